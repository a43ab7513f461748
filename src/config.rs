use serde::Deserialize;

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub server_port: u16,
    pub database_url: String,
    /// Public base URL of the portal, used for payment success/fail redirects.
    pub public_app_url: String,

    pub enot_shop_id: Option<String>,
    pub enot_secret_key: Option<String>,
    /// Second Enot secret, used only for webhook signatures.
    pub enot_secret_key_2: Option<String>,

    pub yookassa_shop_id: Option<String>,
    pub yookassa_secret_key: Option<String>,
    #[serde(default)]
    pub enable_yookassa: bool,

    /// Shared secret for trusted internal callers (the bot backend).
    pub internal_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        config.try_deserialize()
    }
}
