use anyhow::Context;
use clap::{ArgAction, Parser};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::spam::SpamPolicy;

/// Long-poll timeout passed to `getUpdates`.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub const USAGE: &str = "usage:\n joinguard --token <token>";

const DEFAULT_PORT: u16 = 80;
const DEFAULT_MAX_LENGTH: i64 = 20;
const DEFAULT_GRACE_SECS: u64 = 5;

#[derive(Debug, Parser)]
#[command(name = "joinguard", about = "Removes spam accounts joining Telegram groups")]
pub struct Cli {
    /// Telegram bot token
    #[arg(long)]
    pub token: Option<String>,

    /// Verbose transport logging (default: true)
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub debug: Option<bool>,

    /// Base URL for webhook mode; polling is used when empty
    #[arg(long = "webhookBaseURL")]
    pub webhook_base_url: Option<String>,

    /// Port the webhook listener binds on (default: 80)
    #[arg(long)]
    pub port: Option<String>,

    /// Max length for username / display name (default: 20)
    #[arg(long, allow_negative_numbers = true)]
    pub charlength: Option<i64>,

    /// Illegal substring in the display name
    #[arg(long)]
    pub illegalchars: Option<String>,

    /// Seconds to wait for in-flight moderation actions on shutdown (default: 5)
    #[arg(long = "grace")]
    pub grace_secs: Option<u64>,

    /// Optional TOML file with the same settings; flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Port may be written as a string (like the flag) or a bare integer.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Text(String),
}

impl PortValue {
    fn into_text(self) -> String {
        match self {
            PortValue::Number(n) => n.to_string(),
            PortValue::Text(s) => s,
        }
    }
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub token: Option<String>,
    pub debug: Option<bool>,
    pub webhook_base_url: Option<String>,
    pub port: Option<PortValue>,
    pub charlength: Option<i64>,
    pub illegalchars: Option<String>,
    pub grace_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("bot token is required")]
    MissingToken,
    #[error("invalid port {0:?}: expected a number between 0 and 65535")]
    InvalidPort(String),
    #[error("invalid webhook base URL {url:?}: {reason}")]
    InvalidWebhookUrl { url: String, reason: String },
    #[error(transparent)]
    File(#[from] anyhow::Error),
}

/// How updates reach the bot. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Polling { timeout: Duration },
    Webhook { base_url: Url, port: u16 },
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Polling { .. } => "polling",
            Transport::Webhook { .. } => "webhook",
        }
    }
}

/// Immutable runtime settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub token: String,
    pub debug: bool,
    pub transport: Transport,
    pub policy: SpamPolicy,
    pub shutdown_grace: Duration,
}

impl Settings {
    /// Parse the command line, layering it over the optional config file.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    /// Flags win over file values, which win over built-in defaults.
    pub fn merge(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let token = cli.token.or(file.token).unwrap_or_default();
        if token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }

        let base_url = cli
            .webhook_base_url
            .or(file.webhook_base_url)
            .unwrap_or_default();
        let port = cli.port.or(file.port.map(PortValue::into_text));
        let transport = resolve_transport(base_url.trim(), port)?;

        let policy = SpamPolicy {
            max_length: cli
                .charlength
                .or(file.charlength)
                .unwrap_or(DEFAULT_MAX_LENGTH),
            illegal_substring: cli.illegalchars.or(file.illegalchars).unwrap_or_default(),
        };

        Ok(Self {
            token,
            debug: cli.debug.or(file.debug).unwrap_or(true),
            transport,
            policy,
            shutdown_grace: Duration::from_secs(
                cli.grace_secs.or(file.grace_secs).unwrap_or(DEFAULT_GRACE_SECS),
            ),
        })
    }
}

fn resolve_transport(base_url: &str, port: Option<String>) -> Result<Transport, ConfigError> {
    if base_url.is_empty() {
        return Ok(Transport::Polling {
            timeout: POLL_TIMEOUT,
        });
    }

    let base_url = Url::parse(base_url).map_err(|e| ConfigError::InvalidWebhookUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    let port = match port {
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(raw))?,
        None => DEFAULT_PORT,
    };
    Ok(Transport::Webhook { base_url, port })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["joinguard"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_select_polling() {
        let settings =
            Settings::merge(cli(&["--token", "123:abc"]), FileConfig::default()).unwrap();
        assert_eq!(settings.token, "123:abc");
        assert!(settings.debug);
        assert_eq!(
            settings.transport,
            Transport::Polling {
                timeout: POLL_TIMEOUT
            }
        );
        assert_eq!(settings.policy, SpamPolicy::default());
        assert_eq!(settings.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let err = Settings::merge(cli(&[]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let err = Settings::merge(cli(&["--token", ""]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));
    }

    #[test]
    fn test_webhook_flags() {
        let settings = Settings::merge(
            cli(&[
                "--token",
                "t",
                "--webhookBaseURL",
                "https://bot.example.com",
                "--port",
                "8443",
            ]),
            FileConfig::default(),
        )
        .unwrap();
        match settings.transport {
            Transport::Webhook { base_url, port } => {
                assert_eq!(base_url.host_str(), Some("bot.example.com"));
                assert_eq!(port, 8443);
            }
            other => panic!("expected webhook, got {:?}", other),
        }
    }

    #[test]
    fn test_webhook_default_port() {
        let settings = Settings::merge(
            cli(&["--token", "t", "--webhookBaseURL", "https://bot.example.com"]),
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(settings.transport.name(), "webhook");
        assert!(matches!(settings.transport, Transport::Webhook { port: 80, .. }));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let err = Settings::merge(
            cli(&["--token", "t", "--webhookBaseURL", "https://x.org", "--port", "http"]),
            FileConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(p) if p == "http"));
    }

    #[test]
    fn test_port_ignored_in_polling_mode() {
        let settings =
            Settings::merge(cli(&["--token", "t", "--port", "nope"]), FileConfig::default())
                .unwrap();
        assert_eq!(settings.transport.name(), "polling");
    }

    #[test]
    fn test_invalid_webhook_url_is_rejected() {
        let err = Settings::merge(
            cli(&["--token", "t", "--webhookBaseURL", "not a url"]),
            FileConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWebhookUrl { .. }));
    }

    #[test]
    fn test_debug_flag_forms() {
        assert_eq!(cli(&["--debug", "false"]).debug, Some(false));
        assert_eq!(cli(&["--debug"]).debug, Some(true));
        assert_eq!(cli(&[]).debug, None);
    }

    #[test]
    fn test_negative_charlength_flag() {
        let settings =
            Settings::merge(cli(&["--token", "t", "--charlength", "-1"]), FileConfig::default())
                .unwrap();
        assert_eq!(settings.policy.max_length, -1);
    }

    #[test]
    fn test_flags_override_file() {
        let file = FileConfig {
            token: Some("from-file".to_string()),
            debug: Some(false),
            charlength: Some(10),
            illegalchars: Some("bad".to_string()),
            grace_secs: Some(0),
            ..Default::default()
        };
        let settings = Settings::merge(cli(&["--charlength", "32"]), file).unwrap();
        assert_eq!(settings.token, "from-file");
        assert!(!settings.debug);
        assert_eq!(settings.policy.max_length, 32);
        assert_eq!(settings.policy.illegal_substring, "bad");
        assert_eq!(settings.shutdown_grace, Duration::ZERO);
    }

    #[test]
    fn test_load_file_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
token = "123:abc"
webhook_base_url = "https://hooks.example.com/tg"
port = 8080
charlength = 15
illegalchars = "http"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let settings = Settings::load(cli(&["--config", path.as_str()])).unwrap();
        assert_eq!(settings.token, "123:abc");
        assert_eq!(settings.policy.max_length, 15);
        assert_eq!(settings.policy.illegal_substring, "http");
        match settings.transport {
            Transport::Webhook { base_url, port } => {
                assert_eq!(base_url.as_str(), "https://hooks.example.com/tg");
                assert_eq!(port, 8080);
            }
            other => panic!("expected webhook, got {:?}", other),
        }
    }

    #[test]
    fn test_port_as_string_in_file() {
        let file: FileConfig = toml::from_str(r#"port = "9000""#).unwrap();
        assert_eq!(file.port, Some(PortValue::Text("9000".to_string())));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let err = Settings::load(cli(&["--token", "t", "--config", "/nonexistent/joinguard.toml"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::File(_)));
    }
}
