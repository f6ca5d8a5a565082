#![cfg_attr(feature = "strict", deny(warnings))]

pub mod bounded_join_set;
pub use bounded_join_set::BoundedJoinSet;

pub mod configuration_utils;
pub use configuration_utils::ParsableConfigValue;

mod guards;
pub use guards::EnvOverrides;
