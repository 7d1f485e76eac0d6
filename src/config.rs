use anyhow::Context;

pub const DEFAULT_PREFIX: &str = "dm.";
pub const DEFAULT_LOG_FILE: &str = "debug.log";

/// Process-wide settings read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub discord_token: String,
    pub database_url: String,
    /// Prefix of text commands, next to the slash commands.
    pub prefix: String,
    /// Where release builds write their logs.
    pub log_file: String,
}

impl BotConfig {
    /// Reads the configuration from the environment.
    ///
    /// Debug builds load a `.env` file first.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        // Load the .env file only in the development environment (bypassed with the --release flag)
        #[cfg(debug_assertions)]
        dotenv::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("Expected {} as an environment variable", key))
        };
        let optional = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            discord_token: required("DISCORD_TOKEN")?,
            database_url: required("DATABASE_URL")?,
            prefix: optional("BOT_PREFIX", DEFAULT_PREFIX),
            log_file: optional("LOG_FILE", DEFAULT_LOG_FILE),
        })
    }
}
