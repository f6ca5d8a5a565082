pub const PROGRAM_NAME: &str = "b2";

// The current version of executable
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// Persisted account state lives in <config dir>/b2/config.toml
pub const CONFIG_DIR_NAME: &str = "b2";
pub const CONFIG_FILE_NAME: &str = "config.toml";
