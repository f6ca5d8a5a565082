pub mod macros;

mod b2_config;
pub use b2_config::B2Config;

pub mod groups;

// Used by the config_group! macro.
pub use utils::ParsableConfigValue;
