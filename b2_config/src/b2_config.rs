use crate::groups::{client, log};

/// Every configuration group of the client.
#[derive(Debug, Clone, Default)]
pub struct B2Config {
    pub client: client::ConfigValueGroup,
    pub log: log::ConfigValueGroup,
}

impl B2Config {
    /// Defaults overridden by any `B2_<GROUP>_<FIELD>` environment variables.
    pub fn new() -> Self {
        Self {
            client: client::ConfigValueGroup::from_env(),
            log: log::ConfigValueGroup::from_env(),
        }
    }
}
