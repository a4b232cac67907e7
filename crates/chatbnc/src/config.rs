//! Bouncer configuration, loaded from a TOML file.
//!
//! ```toml
//! account = "myaccount"
//! password = "hunter2"
//! host = "wss://chat.f-list.net/chat2"
//! port = 8722
//! characters = ["Alice", "Bob"]
//! log_directory = "logs"
//! # Serve wss:// to local clients
//! cert_file = "/etc/chatbnc/cert.pem"
//! key_file = "/etc/chatbnc/key.pem"
//! ```
//!
//! Every field has a serde default so that a file missing a required
//! field still parses; [`Config::validate`] then names what's missing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatbnc_session::DEFAULT_AUTH_URL;
use chatbnc_upstream::{
    DEFAULT_TICKET_URL, LogPolicy, MAX_IDENTITIES, SessionConfig,
};
use serde::Deserialize;

/// Errors found while loading or validating the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required field is absent or empty.
    #[error("no {0} configured")]
    Missing(&'static str),

    #[error("host must be a ws:// or wss:// URL, got {0:?}")]
    InvalidHost(String),

    #[error("too many characters configured: {0} (at most 3)")]
    TooManyCharacters(usize),

    #[error("character {0} is configured twice")]
    DuplicateCharacter(String),

    /// Only one half of the TLS certificate/key pair is set.
    #[error("{0} file missing")]
    TlsIncomplete(&'static str),
}

/// Everything the `chatbnc` binary reads from its config file.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account the managed characters belong to. Clients must identify
    /// with this account.
    pub account: String,
    pub password: String,

    /// Chat service WebSocket URL.
    pub host: String,

    /// Local listen port and address.
    pub port: u16,
    pub bind: String,

    /// PEM certificate chain and private key. When both are set the
    /// local listener serves `wss://`.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,

    /// Characters to keep logged in. At most three.
    pub characters: Vec<String>,

    /// Verbose logging, including every frame crossing a session.
    pub debug: bool,

    /// Message logs are written below this directory. Logging is off when
    /// unset.
    pub log_directory: Option<PathBuf>,
    pub log_channels: bool,
    pub log_ads: bool,
    pub log_private: bool,

    /// Replay buffer length in frames. 0 means unbounded.
    pub replay_limit: usize,
    pub channel_list_max_age_secs: u64,
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,

    pub ticket_url: String,
    pub auth_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: String::new(),
            password: String::new(),
            host: String::new(),
            port: 0,
            bind: "127.0.0.1".into(),
            cert_file: None,
            key_file: None,
            characters: Vec::new(),
            debug: false,
            log_directory: None,
            log_channels: true,
            log_ads: false,
            log_private: true,
            replay_limit: 1000,
            channel_list_max_age_secs: 60,
            reconnect_base_secs: 5,
            reconnect_max_secs: 120,
            ticket_url: DEFAULT_TICKET_URL.into(),
            auth_url: DEFAULT_AUTH_URL.into(),
        }
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bind", &self.bind)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("characters", &self.characters)
            .field("debug", &self.debug)
            .field("log_directory", &self.log_directory)
            .field("replay_limit", &self.replay_limit)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Reads, parses and validates the file at `path`.
    ///
    /// # Errors
    /// Any [`ConfigError`]. All of them are fatal at startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_toml(&text)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks required fields, the character list and the TLS pair.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.is_empty() {
            return Err(ConfigError::Missing("account"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("password"));
        }
        if self.host.is_empty() {
            return Err(ConfigError::Missing("host"));
        }
        if !(self.host.starts_with("ws://") || self.host.starts_with("wss://")) {
            return Err(ConfigError::InvalidHost(self.host.clone()));
        }
        if self.characters.is_empty() {
            return Err(ConfigError::Missing("characters"));
        }
        if self.port == 0 {
            return Err(ConfigError::Missing("port"));
        }
        if self.characters.len() > MAX_IDENTITIES {
            return Err(ConfigError::TooManyCharacters(self.characters.len()));
        }
        for (i, character) in self.characters.iter().enumerate() {
            if character.is_empty() {
                return Err(ConfigError::Missing("character name"));
            }
            if self.characters[..i].contains(character) {
                return Err(ConfigError::DuplicateCharacter(character.clone()));
            }
        }
        match (&self.cert_file, &self.key_file) {
            (Some(_), None) => return Err(ConfigError::TlsIncomplete("key")),
            (None, Some(_)) => return Err(ConfigError::TlsIncomplete("cert")),
            _ => {}
        }
        Ok(())
    }

    /// Address the local listener binds to.
    pub fn listen_addr(&self) -> String {
        if self.bind.contains(':') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }

    pub fn log_policy(&self) -> LogPolicy {
        LogPolicy {
            channels: self.log_channels,
            ads: self.log_ads,
            private: self.log_private,
        }
    }

    /// Settings shared by every upstream session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            account: self.account.clone(),
            replay_limit: self.replay_limit,
            channel_list_max_age: Duration::from_secs(
                self.channel_list_max_age_secs,
            ),
            reconnect_base: Duration::from_secs(self.reconnect_base_secs),
            reconnect_max: Duration::from_secs(self.reconnect_max_secs),
            log_policy: self.log_policy(),
            trace_frames: self.debug,
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        account = "acc"
        password = "pw"
        host = "wss://chat.example.net/chat2"
        port = 8722
        characters = ["Alice", "Bob"]
    "#;

    fn minimal() -> Config {
        Config::from_toml(MINIMAL).unwrap()
    }

    #[test]
    fn test_from_toml_minimal_applies_defaults() {
        let c = minimal();
        assert_eq!(c.account, "acc");
        assert_eq!(c.characters, vec!["Alice", "Bob"]);
        assert_eq!(c.bind, "127.0.0.1");
        assert_eq!(c.replay_limit, 1000);
        assert_eq!(c.log_directory, None);
        assert_eq!(c.ticket_url, DEFAULT_TICKET_URL);
        assert_eq!(c.auth_url, DEFAULT_AUTH_URL);
        assert!(!c.debug);
    }

    #[test]
    fn test_from_toml_overrides() {
        let text = format!(
            "{MINIMAL}\nbind = \"0.0.0.0\"\ndebug = true\nreplay_limit = 0\n\
             log_directory = \"/var/log/chatbnc\"\nlog_ads = true\n"
        );
        let c = Config::from_toml(&text).unwrap();
        assert_eq!(c.listen_addr(), "0.0.0.0:8722");
        assert!(c.debug);
        assert_eq!(c.replay_limit, 0);
        assert_eq!(c.log_directory, Some(PathBuf::from("/var/log/chatbnc")));
        assert!(c.log_policy().ads);
    }

    #[test]
    fn test_validate_missing_fields() {
        let cases = [
            ("account", Config { account: String::new(), ..minimal() }),
            ("password", Config { password: String::new(), ..minimal() }),
            ("host", Config { host: String::new(), ..minimal() }),
            ("port", Config { port: 0, ..minimal() }),
            ("characters", Config { characters: Vec::new(), ..minimal() }),
        ];
        for (field, config) in cases {
            match config.validate() {
                Err(ConfigError::Missing(name)) => assert_eq!(name, field),
                other => panic!("{field}: expected Missing, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_rejects_fourth_character() {
        let c = Config {
            characters: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            ..minimal()
        };
        assert!(matches!(c.validate(), Err(ConfigError::TooManyCharacters(4))));
    }

    #[test]
    fn test_validate_rejects_duplicate_character() {
        let c = Config {
            characters: vec!["A".into(), "B".into(), "A".into()],
            ..minimal()
        };
        assert!(
            matches!(c.validate(), Err(ConfigError::DuplicateCharacter(ref n)) if n == "A")
        );
    }

    #[test]
    fn test_validate_rejects_non_websocket_host() {
        let c = Config {
            host: "chat.example.net".into(),
            ..minimal()
        };
        assert!(matches!(c.validate(), Err(ConfigError::InvalidHost(_))));
    }

    #[test]
    fn test_from_toml_tls_pair() {
        let text = format!(
            "{MINIMAL}\ncert_file = \"/etc/chatbnc/cert.pem\"\n\
             key_file = \"/etc/chatbnc/key.pem\"\n"
        );
        let c = Config::from_toml(&text).unwrap();
        assert_eq!(c.cert_file, Some(PathBuf::from("/etc/chatbnc/cert.pem")));
        assert_eq!(c.key_file, Some(PathBuf::from("/etc/chatbnc/key.pem")));
        assert_eq!(minimal().cert_file, None);
    }

    #[test]
    fn test_validate_cert_without_key() {
        let c = Config {
            cert_file: Some("cert.pem".into()),
            ..minimal()
        };
        let err = c.validate().unwrap_err();
        assert!(matches!(err, ConfigError::TlsIncomplete("key")));
        assert_eq!(err.to_string(), "key file missing");
    }

    #[test]
    fn test_validate_key_without_cert() {
        let c = Config {
            key_file: Some("key.pem".into()),
            ..minimal()
        };
        assert!(matches!(c.validate(), Err(ConfigError::TlsIncomplete("cert"))));
    }

    #[test]
    fn test_from_toml_missing_account_is_reported() {
        let err = Config::from_toml("password = \"pw\"").unwrap_err();
        assert_eq!(err.to_string(), "no account configured");
    }

    #[test]
    fn test_from_toml_syntax_error() {
        assert!(matches!(
            Config::from_toml("account = "),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatbnc.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        assert_eq!(Config::load(&path).unwrap().port, 8722);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn test_listen_addr_brackets_ipv6() {
        let c = Config {
            bind: "::1".into(),
            ..minimal()
        };
        assert_eq!(c.listen_addr(), "[::1]:8722");
    }

    #[test]
    fn test_session_config_carries_settings() {
        let c = Config {
            debug: true,
            reconnect_base_secs: 2,
            log_private: false,
            ..minimal()
        };
        let s = c.session_config();
        assert_eq!(s.account, "acc");
        assert_eq!(s.reconnect_base, Duration::from_secs(2));
        assert_eq!(s.reconnect_max, Duration::from_secs(120));
        assert!(s.trace_frames);
        assert!(!s.log_policy.private);
        assert_eq!(s.client_name, "chatbnc");
    }

    #[test]
    fn test_debug_redacts_password() {
        let printed = format!("{:?}", minimal());
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("\"pw\""));
    }
}
