//! Gateway configuration from the environment

use std::path::PathBuf;
use survey_rollup::store::DEFAULT_COMMIT_ATTEMPTS;

pub const DEFAULT_PORT: &str = "18620";
pub const DEFAULT_SNAPSHOT_PATH: &str = "data/snapshot.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub port: String,
    pub snapshot_path: PathBuf,
    /// Built-in belt tables when unset
    pub belts_path: Option<PathBuf>,
    pub commit_attempts: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            belts_path: None,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable values fall back to defaults
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let defaults = Self::default();

        let port = lookup("SURVEY_GATEWAY_PORT")
            .or_else(|| lookup("PORT"))
            .unwrap_or(defaults.port);
        let snapshot_path = lookup("SURVEY_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.snapshot_path);
        let belts_path = lookup("SURVEY_BELTS_PATH").map(PathBuf::from);
        let commit_attempts = match lookup("SURVEY_COMMIT_RETRIES").map(|v| v.parse::<usize>()) {
            Some(Ok(n)) if n > 0 => n,
            Some(_) => {
                tracing::warn!("Ignoring invalid SURVEY_COMMIT_RETRIES");
                defaults.commit_attempts
            }
            None => defaults.commit_attempts,
        };

        Self {
            port,
            snapshot_path,
            belts_path,
            commit_attempts,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[]));
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.bind_addr(), "0.0.0.0:18620");
    }

    #[test]
    fn test_port_precedence() {
        let config = GatewayConfig::from_lookup(lookup(&[("PORT", "9000")]));
        assert_eq!(config.port, "9000");

        let config = GatewayConfig::from_lookup(lookup(&[("PORT", "9000"), ("SURVEY_GATEWAY_PORT", "9100")]));
        assert_eq!(config.port, "9100");
    }

    #[test]
    fn test_paths_and_retries() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("SURVEY_SNAPSHOT_PATH", "/var/lib/surveys.json"),
            ("SURVEY_BELTS_PATH", "/etc/belts.json"),
            ("SURVEY_COMMIT_RETRIES", "7"),
        ]));
        assert_eq!(config.snapshot_path, PathBuf::from("/var/lib/surveys.json"));
        assert_eq!(config.belts_path, Some(PathBuf::from("/etc/belts.json")));
        assert_eq!(config.commit_attempts, 7);

        let config = GatewayConfig::from_lookup(lookup(&[("SURVEY_COMMIT_RETRIES", "zero")]));
        assert_eq!(config.commit_attempts, DEFAULT_COMMIT_ATTEMPTS);
    }
}
