use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_command_prefix() -> String {
    "!".into()
}

fn default_database_url() -> String {
    "sqlite://proforma.db?mode=rwc".into()
}

/// Bot configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProformaConfig {
    /// Discord bot token. Required to go online.
    #[serde(default)]
    pub bot_token: String,

    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Users exempt from guild count limits (the bot support team).
    #[serde(default)]
    pub support_user_ids: Vec<String>,
}

impl Default for ProformaConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            command_prefix: default_command_prefix(),
            database_url: default_database_url(),
            support_user_ids: Vec::new(),
        }
    }
}

impl ProformaConfig {
    /// Load the config file, writing a default one first if none exists.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                toml::from_str(&content).with_context(|| format!("parse {}", path.display()))
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                let serialized =
                    toml::to_string_pretty(&config).context("serialize default config")?;
                if let Err(write_error) = fs::write(path, serialized) {
                    tracing::warn!(
                        path = %path.display(),
                        %write_error,
                        "failed to write default config file"
                    );
                } else {
                    tracing::info!(path = %path.display(), "wrote default config file");
                }
                Ok(config)
            }
            Err(error) => {
                Err(anyhow::Error::from(error).context(format!("read {}", path.display())))
            }
        }
    }

    pub fn is_support_user(&self, user_id: &str) -> bool {
        self.support_user_ids.iter().any(|id| id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults_and_writes_them() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proforma.toml");

        let config = ProformaConfig::load_or_init(&path).unwrap();
        assert_eq!(config.command_prefix, "!");
        assert!(config.bot_token.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proforma.toml");
        fs::write(&path, "bot_token = \"abc\"\n").unwrap();

        let config = ProformaConfig::load_or_init(&path).unwrap();
        assert_eq!(config.bot_token, "abc");
        assert_eq!(config.database_url, default_database_url());
    }

    #[test]
    fn support_user_lookup_is_exact() {
        let config = ProformaConfig {
            support_user_ids: vec!["111".into()],
            ..ProformaConfig::default()
        };
        assert!(config.is_support_user("111"));
        assert!(!config.is_support_user("1111"));
        assert!(!config.is_support_user(""));
    }
}
