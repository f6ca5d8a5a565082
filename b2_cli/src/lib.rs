pub mod account;
pub mod app;
mod constants;
mod output;
mod progress;

pub use constants::CURRENT_VERSION;
