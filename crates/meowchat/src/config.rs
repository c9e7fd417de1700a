//! Configuration: a key/value source plus the settings the server resolves from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{error, warn};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_MOTD: &str = "hey thanks for meowing";
pub const DEFAULT_CONFIG_PATH: &str = "assets/config.json";
pub const DEFAULT_ACCOUNTS_PATH: &str = "assets/accounts.json";

/// Read-only key/value configuration.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<&Value>;

    fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    fn get_str_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Str,
    Port,
    Uint,
    StrList,
}

// (key, type, required)
const SCHEMA: &[(&str, Kind, bool)] = &[
    ("host", Kind::Str, true),
    ("port", Kind::Port, true),
    ("motd", Kind::Str, false),
    ("admins", Kind::StrList, false),
    ("idle_timeout_secs", Kind::Uint, false),
    ("accounts_path", Kind::Str, false),
];

/// JSON object config. Anything that fails validation is replaced by an empty config, so
/// every lookup falls back to its default.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    values: Map<String, Value>,
}

impl JsonConfig {
    pub fn load(path: &Path) -> Self {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found; using defaults");
                return Self::default();
            }
            Err(e) => {
                error!(path = %path.display(), err = %e, "failed to read config; using defaults");
                return Self::default();
            }
        };
        let v: Value = match serde_json::from_str(&s) {
            Ok(v) => v,
            Err(e) => {
                error!(path = %path.display(), err = %e, "failed to parse config; using defaults");
                return Self::default();
            }
        };
        match Self::from_value(v) {
            Ok(c) => c,
            Err(errors) => {
                error!(
                    path = %path.display(),
                    "config validation failed; using defaults:\n{}",
                    errors.join("\n")
                );
                Self::default()
            }
        }
    }

    /// Validate a parsed document, returning every problem found.
    pub fn from_value(v: Value) -> Result<Self, Vec<String>> {
        let Value::Object(values) = v else {
            return Err(vec!["root is not an object".to_string()]);
        };

        let mut errors = Vec::new();
        for (key, kind, required) in SCHEMA {
            let Some(val) = values.get(*key) else {
                if *required {
                    errors.push(format!("missing required key: '{key}'"));
                }
                continue;
            };
            let ok = match kind {
                Kind::Str => val.is_string(),
                Kind::Port => val
                    .as_u64()
                    .is_some_and(|p| (1..=u64::from(u16::MAX)).contains(&p)),
                Kind::Uint => val.is_u64(),
                Kind::StrList => val
                    .as_array()
                    .is_some_and(|a| a.iter().all(Value::is_string)),
            };
            if !ok {
                errors.push(format!("key '{key}' expected {}, got {val}", kind_name(*kind)));
            }
        }

        if errors.is_empty() {
            Ok(Self { values })
        } else {
            Err(errors)
        }
    }
}

fn kind_name(k: Kind) -> &'static str {
    match k {
        Kind::Str => "string",
        Kind::Port => "port number (1-65535)",
        Kind::Uint => "non-negative integer",
        Kind::StrList => "list of strings",
    }
}

impl ConfigSource for JsonConfig {
    fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Everything the server needs, resolved from a `ConfigSource`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub accounts_path: PathBuf,
    pub motd: String,
    /// Account names allowed to run admin commands, matched exactly.
    pub admins: Vec<String>,
    /// `None` means sessions may idle forever.
    pub idle_timeout: Option<Duration>,
    pub max_line_len: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            accounts_path: PathBuf::from(DEFAULT_ACCOUNTS_PATH),
            motd: DEFAULT_MOTD.to_string(),
            admins: Vec::new(),
            idle_timeout: None,
            max_line_len: telio::editor::DEFAULT_MAX_LEN,
        }
    }
}

impl Settings {
    pub fn from_source(src: &dyn ConfigSource) -> Self {
        let d = Self::default();
        let port = u16::try_from(src.get_u64("port", u64::from(d.port))).unwrap_or(d.port);
        let idle = src.get_u64("idle_timeout_secs", 0);
        Self {
            host: src.get_str("host", &d.host),
            port,
            accounts_path: src
                .get_str("accounts_path", &d.accounts_path.to_string_lossy())
                .into(),
            motd: src.get_str("motd", &d.motd),
            admins: src
                .get_str_list("admins")
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            idle_timeout: (idle > 0).then(|| Duration::from_secs(idle)),
            max_line_len: d.max_line_len,
        }
    }

    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_config_resolves_settings() {
        let c = JsonConfig::from_value(json!({
            "host": "127.0.0.1",
            "port": 4000,
            "motd": "hello",
            "admins": ["Root", " "],
            "idle_timeout_secs": 90,
        }))
        .unwrap();
        let s = Settings::from_source(&c);
        assert_eq!(s.bind_addr(), "127.0.0.1:4000");
        assert_eq!(s.motd, "hello");
        assert_eq!(s.admins, vec!["Root".to_string()]);
        assert_eq!(s.idle_timeout, Some(Duration::from_secs(90)));
        assert_eq!(s.accounts_path, PathBuf::from(DEFAULT_ACCOUNTS_PATH));
    }

    #[test]
    fn validation_lists_every_problem() {
        let errors = JsonConfig::from_value(json!({
            "port": "12345",
            "admins": [1],
        }))
        .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("missing required key: 'host'")));
        assert!(errors.iter().any(|e| e.contains("'port'")));
        assert!(errors.iter().any(|e| e.contains("'admins'")));
    }

    #[test]
    fn port_out_of_range_is_rejected() {
        assert!(JsonConfig::from_value(json!({"host": "h", "port": 70000})).is_err());
        assert!(JsonConfig::from_value(json!({"host": "h", "port": 0})).is_err());
        assert!(JsonConfig::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = JsonConfig::load(&dir.path().join("nope.json"));
        let s = Settings::from_source(&c);
        assert_eq!(s.bind_addr(), "0.0.0.0:12345");
        assert_eq!(s.motd, DEFAULT_MOTD);
        assert!(s.idle_timeout.is_none());
    }

    #[test]
    fn invalid_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"host": "10.0.0.1"}"#).unwrap();
        let s = Settings::from_source(&JsonConfig::load(&path));
        assert_eq!(s.host, DEFAULT_HOST);
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let s = Settings {
            host: "::1".to_string(),
            ..Settings::default()
        };
        assert_eq!(s.bind_addr(), "[::1]:12345");
    }
}
