use serde::Deserialize;

/// Venue credentials and connection settings, grounded on `auto_trader.py`'s
/// `config["okx"]` block (`api_key`, `secret`, `passphrase`, `hostname`, `testnet`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OkxConfig {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    pub hostname: String,
    pub testnet: bool,
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            passphrase: String::new(),
            hostname: "https://www.okx.com".to_string(),
            testnet: false,
        }
    }
}
