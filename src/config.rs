//! Configuration loader and validator for the guild mirror bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub discord: Discord,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub cache_dir: String,
    pub sync_queue_depth: usize,
}

/// Discord connection and mirroring settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discord {
    pub bot_token: String,
    pub guild_id: u64,
    pub activity_text: String,
    /// The member whose profile picture the bot mirrors.
    pub avatar_source: u64,
    /// Messages authored by these users trigger an avatar sync.
    pub avatar_triggers: Vec<u64>,
}

impl Config {
    /// Ensure required directories exist (data dir and avatar cache dir).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [&self.app.data_dir, &self.app.cache_dir] {
            if !dir.trim().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.cache_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.cache_dir must be non-empty"));
    }
    if cfg.app.sync_queue_depth == 0 {
        return Err(ConfigError::Invalid("app.sync_queue_depth must be > 0"));
    }

    if cfg.discord.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("discord.bot_token must be non-empty"));
    }
    if cfg.discord.guild_id == 0 {
        return Err(ConfigError::Invalid("discord.guild_id must be non-zero"));
    }
    if cfg.discord.activity_text.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "discord.activity_text must be non-empty",
        ));
    }
    if cfg.discord.avatar_source == 0 {
        return Err(ConfigError::Invalid(
            "discord.avatar_source must be non-zero",
        ));
    }
    if cfg.discord.avatar_triggers.contains(&0) {
        return Err(ConfigError::Invalid(
            "discord.avatar_triggers must not contain zero ids",
        ));
    }

    Ok(())
}

/// Example YAML document, kept in sync with the schema above.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  cache_dir: "./data/avatar_cache"
  sync_queue_depth: 16

discord:
  bot_token: "YOUR_DISCORD_BOT_TOKEN"
  guild_id: 190508104004534272
  activity_text: "Building Skynet..."
  avatar_source: 162635759441018881
  avatar_triggers:
    - 77509464290234368
    - 162635759441018881
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.discord.avatar_triggers.len(), 2);
    }

    #[test]
    fn invalid_bot_token() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.discord.bot_token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("bot_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_guild_and_avatar_ids() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.discord.guild_id = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.discord.avatar_source = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.discord.avatar_triggers.push(0);
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_queue_depth() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.sync_queue_depth = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("sync_queue_depth")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn ensure_dirs_creates_both_dirs() {
        let td = tempdir().unwrap();
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = td.path().join("data").to_string_lossy().into_owned();
        cfg.app.cache_dir = td.path().join("data/cache").to_string_lossy().into_owned();
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("data/cache").exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.discord.avatar_source, 162635759441018881);
    }
}
