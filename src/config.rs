use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

/// A `{ address, port }` pair as it appears in the starter's `targets` list
/// and `redirect_to` field (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedirectorConfig {
    pub auth: String,
    pub separator: String,
    pub listen: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StarterConfig {
    pub auth: String,
    pub separator: String,
    pub redirect_to: Endpoint,
    #[serde(default)]
    pub targets: Vec<Endpoint>,
}

impl StarterConfig {
    /// Resolves the backend address to dial for `port`, defaulting to
    /// localhost when the port isn't configured (§4.4).
    pub fn target_address(&self, port: u16) -> String {
        self.targets
            .iter()
            .find(|t| t.port == port)
            .map(|t| t.address.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }
}

/// Both peers must agree on `separator`, and it must never be able to
/// appear inside a header token: header tokens are built from ASCII
/// digits (ports, digests, fragment counters) and space-joined, so a
/// separator containing a space or a digit could split — or fail to
/// split — a header in the wrong place (§6).
fn validate_separator(separator: &str) -> Result<()> {
    if separator.is_empty() {
        return Err(TunnelError::Config("separator must not be empty".into()));
    }
    if separator.contains(' ') {
        return Err(TunnelError::Config(
            "separator must not contain a space".into(),
        ));
    }
    if separator.chars().any(|c| c.is_ascii_digit()) {
        return Err(TunnelError::Config(
            "separator must not contain a digit".into(),
        ));
    }
    Ok(())
}

pub fn load_redirector_config(path: impl AsRef<Path>) -> Result<RedirectorConfig> {
    let text = std::fs::read_to_string(path)?;
    let config: RedirectorConfig = serde_json::from_str(&text)?;
    validate_separator(&config.separator)?;
    if config.auth.is_empty() {
        return Err(TunnelError::Config("auth must not be empty".into()));
    }
    Ok(config)
}

pub fn load_starter_config(path: impl AsRef<Path>) -> Result<StarterConfig> {
    let text = std::fs::read_to_string(path)?;
    let config: StarterConfig = serde_json::from_str(&text)?;
    validate_separator(&config.separator)?;
    if config.auth.is_empty() {
        return Err(TunnelError::Config("auth must not be empty".into()));
    }
    Ok(config)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_redirector_config() {
        let json = r#"{ "auth": "hunter2", "separator": "\r\n", "listen": 9000 }"#;
        let config: RedirectorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.listen, 9000);
        validate_separator(&config.separator).unwrap();
    }

    #[test]
    fn parses_starter_config_with_targets() {
        let json = r#"{
            "auth": "hunter2",
            "separator": "\r\n",
            "redirect_to": { "address": "redirector.example.com", "port": 9000 },
            "targets": [ { "address": "10.0.0.5", "port": 8080 } ]
        }"#;
        let config: StarterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.target_address(8080), "10.0.0.5");
        assert_eq!(config.target_address(8081), "127.0.0.1");
    }

    #[test]
    fn rejects_separator_with_space_or_digit() {
        assert!(validate_separator("a b").is_err());
        assert!(validate_separator("a1").is_err());
        assert!(validate_separator("").is_err());
        assert!(validate_separator("\r\n").is_ok());
    }
}
