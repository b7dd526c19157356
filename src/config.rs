use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{info, warn};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ChatError, Result};

const APP_DIR: &str = "chatlink";

static CONFIG_DIR_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Point the config directory somewhere else (used by `--config-dir` and tests).
pub fn set_config_dir_override(dir: PathBuf) {
    if CONFIG_DIR_OVERRIDE.set(dir).is_err() {
        warn!("Config directory override already set, ignoring");
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(dir) = CONFIG_DIR_OVERRIDE.get() {
        return Ok(dir.clone());
    }
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ChatError::Config("Could not determine config directory".into()))?
        .join(APP_DIR);

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .map_err(|e| ChatError::Config(format!("Cannot create {}: {}", config_dir.display(), e)))?;
    }
    Ok(config_dir)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub base_url: Option<String>,
    pub messages_collection: String,
    pub profiles_collection: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            base_url: None,
            messages_collection: "messages".to_string(),
            profiles_collection: "profiles".to_string(),
            api_key: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_page_limit: usize,
    pub typing_timeout_ms: u64,
    pub initial_history_limit: usize,
    pub muc_service: Option<String>,
    pub store: StoreConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            connect_timeout_ms: 5_000,
            send_timeout_ms: 5_000,
            poll_interval_ms: 2_000,
            poll_page_limit: 100,
            typing_timeout_ms: 3_000,
            initial_history_limit: 50,
            muc_service: None,
            store: StoreConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Read the JSON config (explicit path, else `<config_dir>/chatlink/config.json`),
    /// then apply environment overrides. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => get_config_dir()?.join("config.json"),
        };

        let mut config = if path.exists() {
            let file = File::open(&path)
                .map_err(|e| ChatError::Config(format!("Cannot open {}: {}", path.display(), e)))?;
            let config: ChatConfig = serde_json::from_reader(file)
                .map_err(|e| ChatError::Config(format!("Invalid config {}: {}", path.display(), e)))?;
            info!("Loaded configuration from {}", path.display());
            config
        } else {
            info!("No configuration at {}, using defaults", path.display());
            ChatConfig::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("CHATLINK_STORE_URL") {
            self.store.base_url = Some(url);
        }
        if let Some(key) = lookup("CHATLINK_STORE_API_KEY") {
            self.store.api_key = Some(key);
        }
        if let Some(service) = lookup("CHATLINK_MUC_SERVICE") {
            self.muc_service = Some(service);
        }
        if let Some(value) = lookup("CHATLINK_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_ms("CHATLINK_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("CHATLINK_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = parse_ms("CHATLINK_CONNECT_TIMEOUT_MS", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(ChatError::Config("poll_interval_ms must be positive".into()));
        }
        if self.poll_page_limit == 0 {
            return Err(ChatError::Config("poll_page_limit must be positive".into()));
        }
        if self.typing_timeout_ms == 0 {
            return Err(ChatError::Config("typing_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    /// Room service domain, `conference.<server>` unless configured.
    pub fn muc_service_for(&self, server: &str) -> String {
        self.muc_service
            .clone()
            .unwrap_or_else(|| format!("conference.{}", server))
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ChatError::Config(format!("{} must be a number of milliseconds, got '{}'", key, value)))
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Credentials {
    pub server: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(server: &str, username: &str, password: &str) -> Self {
        Credentials {
            server: server.to_string(),
            username: username.to_string(),
            password: Some(BASE64.encode(password)),
        }
    }

    pub fn from_env() -> Option<Self> {
        match (
            std::env::var("XMPP_SERVER"),
            std::env::var("XMPP_USERNAME"),
            std::env::var("XMPP_PASSWORD"),
        ) {
            (Ok(server), Ok(username), Ok(password)) => Some(Credentials::new(&server, &username, &password)),
            _ => None,
        }
    }

    pub fn get_password(&self) -> Option<String> {
        self.password.as_ref().map(|encoded| {
            String::from_utf8(BASE64.decode(encoded).unwrap_or_default()).unwrap_or_default()
        })
    }

    /// Bare JID; the server domain is appended when the username has none.
    pub fn jid(&self) -> String {
        if self.username.contains('@') {
            self.username.clone()
        } else {
            format!("{}@{}", self.username, self.server)
        }
    }

    /// Local part of the JID, used as the user id everywhere else.
    pub fn user_id(&self) -> &str {
        self.username.split('@').next().unwrap_or(&self.username)
    }

    /// Domain the account lives on.
    pub fn domain(&self) -> &str {
        self.username.split('@').nth(1).unwrap_or(&self.server)
    }
}

fn credentials_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("credentials.json"))
}

pub fn save_credentials(credentials: &Credentials) -> Result<()> {
    save_credentials_to(&credentials_path()?, credentials)
}

pub fn load_credentials() -> Result<Option<Credentials>> {
    load_credentials_from(&credentials_path()?)
}

pub fn save_credentials_to(path: &Path, credentials: &Credentials) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| ChatError::Config(format!("Cannot write {}: {}", path.display(), e)))?;
    serde_json::to_writer_pretty(file, credentials)
        .map_err(|e| ChatError::Config(format!("Cannot serialize credentials: {}", e)))?;
    info!("Credentials saved for {}", credentials.username);
    Ok(())
}

pub fn load_credentials_from(path: &Path) -> Result<Option<Credentials>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| ChatError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
    let credentials: Credentials = serde_json::from_str(&contents)
        .map_err(|e| ChatError::Config(format!("Invalid credentials file {}: {}", path.display(), e)))?;
    info!("Loaded credentials for {} from {}", credentials.username, path.display());
    Ok(Some(credentials))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChatConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.poll_interval_ms, 2_000);
        assert_eq!(config.typing_timeout_ms, 3_000);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = File::create(&path).unwrap();
        write!(file, r#"{{"poll_interval_ms": 750, "store": {{"base_url": "http://db.local"}}}}"#).unwrap();

        let config = ChatConfig::load(Some(&path)).unwrap();
        assert_eq!(config.poll_interval_ms, 750);
        assert_eq!(config.store.base_url.as_deref(), Some("http://db.local"));
        assert_eq!(config.store.messages_collection, "messages");
        assert_eq!(config.initial_history_limit, 50);
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("CHATLINK_STORE_URL", "http://override"),
            ("CHATLINK_POLL_INTERVAL_MS", "1500"),
        ]
        .into_iter()
        .collect();
        let mut config = ChatConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.store.base_url.as_deref(), Some("http://override"));
        assert_eq!(config.poll_interval_ms, 1500);

        let err = config
            .apply_env(|k| (k == "CHATLINK_CONNECT_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = ChatConfig {
            poll_interval_ms: 0,
            ..ChatConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn muc_service_defaults_to_conference_subdomain() {
        let config = ChatConfig::default();
        assert_eq!(config.muc_service_for("example.org"), "conference.example.org");
    }

    #[test]
    fn credentials_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let creds = Credentials::new("example.org", "alice", "s3cret");
        save_credentials_to(&path, &creds).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("s3cret"), "password must not be stored in clear text");

        let loaded = load_credentials_from(&path).unwrap().unwrap();
        assert_eq!(loaded.get_password().as_deref(), Some("s3cret"));
        assert_eq!(loaded.jid(), "alice@example.org");
        assert_eq!(loaded.user_id(), "alice");
    }

    #[test]
    fn username_with_domain_is_kept() {
        let creds = Credentials::new("ignored.org", "bob@chat.example", "pw");
        assert_eq!(creds.jid(), "bob@chat.example");
        assert_eq!(creds.user_id(), "bob");
        assert_eq!(creds.domain(), "chat.example");
    }
}
