use crate::messages::MessageKey;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "PERMGATE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PermGateConfig {
    /// Log every connection phase at `info` instead of `debug`.
    pub debug_logins: bool,
    /// Set the elevated flag from the `permgate.autoelevate` node.
    pub auto_elevate: bool,
    /// Adds a static `server=<name>` context to every set.
    pub server: Option<String>,
    pub zone_rewrites: HashMap<String, String>,
    pub enable_timeout_secs: u64,
    pub detach_delay_ticks: u64,
    pub context_cache_ttl_ms: u64,
    pub resolution_cache_capacity: u64,
    pub monitored_slots: Vec<String>,
    pub messages: BTreeMap<MessageKey, String>,
}

impl Default for PermGateConfig {
    fn default() -> Self {
        Self {
            debug_logins: false,
            auto_elevate: false,
            server: None,
            zone_rewrites: HashMap::new(),
            enable_timeout_secs: 60,
            detach_delay_ticks: 1,
            context_cache_ttl_ms: 50,
            resolution_cache_capacity: 10_000,
            monitored_slots: vec!["internal/console".to_string()],
            messages: BTreeMap::new(),
        }
    }
}

impl PermGateConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: PermGateConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// File (if any), then `PERMGATE_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Applies overrides from `lookup`, keyed without the prefix.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("DEBUG_LOGINS") {
            self.debug_logins = parse_bool("DEBUG_LOGINS", &v)?;
        }
        if let Some(v) = lookup("AUTO_ELEVATE") {
            self.auto_elevate = parse_bool("AUTO_ELEVATE", &v)?;
        }
        if let Some(v) = lookup("SERVER") {
            self.server = (!v.trim().is_empty()).then(|| v.trim().to_string());
        }
        if let Some(v) = lookup("ENABLE_TIMEOUT_SECS") {
            self.enable_timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PREFIX}ENABLE_TIMEOUT_SECS: invalid value '{v}'"))?;
        }
        if let Some(v) = lookup("DETACH_DELAY_TICKS") {
            self.detach_delay_ticks = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PREFIX}DETACH_DELAY_TICKS: invalid value '{v}'"))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.detach_delay_ticks == 0 {
            bail!("detach_delay_ticks must be at least 1");
        }
        if self.enable_timeout_secs == 0 {
            bail!("enable_timeout_secs must be at least 1");
        }
        if self.resolution_cache_capacity == 0 {
            bail!("resolution_cache_capacity must be at least 1");
        }
        Ok(())
    }

    pub fn enable_timeout(&self) -> Duration {
        Duration::from_secs(self.enable_timeout_secs)
    }

    pub fn context_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.context_cache_ttl_ms)
    }

    pub fn message_overrides(&self) -> HashMap<MessageKey, String> {
        self.messages
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{ENV_PREFIX}{key}: expected a boolean, got '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PermGateConfig::default();
        assert_eq!(config.enable_timeout(), Duration::from_secs(60));
        assert_eq!(config.detach_delay_ticks, 1);
        assert_eq!(config.monitored_slots, ["internal/console"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "auto_elevate: true\nserver: lobby\nzone_rewrites:\n  world_nether: nether\nmessages:\n  loading_state_error: reconnect please"
        )
        .unwrap();

        let config = PermGateConfig::from_file(file.path()).unwrap();
        assert!(config.auto_elevate);
        assert_eq!(config.server.as_deref(), Some("lobby"));
        assert_eq!(config.zone_rewrites["world_nether"], "nether");
        assert_eq!(
            config.message_overrides()[&MessageKey::LoadingStateError],
            "reconnect please"
        );
        assert_eq!(config.detach_delay_ticks, 1);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "auto_op: true").unwrap();
        assert!(PermGateConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_zero_detach_delay_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "detach_delay_ticks: 0").unwrap();
        let err = PermGateConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("detach_delay_ticks"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DEBUG_LOGINS", "yes"),
            ("SERVER", " hub "),
            ("DETACH_DELAY_TICKS", "3"),
        ]
        .into_iter()
        .collect();
        let mut config = PermGateConfig::default();
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert!(config.debug_logins);
        assert_eq!(config.server.as_deref(), Some("hub"));
        assert_eq!(config.detach_delay_ticks, 3);
    }

    #[test]
    fn test_bad_env_bool() {
        let mut config = PermGateConfig::default();
        let err = config
            .apply_vars(|k| (k == "AUTO_ELEVATE").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("AUTO_ELEVATE"));
    }
}
