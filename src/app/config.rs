//! Agent configuration, loaded from JSON or the environment.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::core::Role;
use crate::namespace::{ClientInfo, NamespaceKind, DEC112_DOMAIN};

fn default_domain() -> String {
    DEC112_DOMAIN.to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Own SIP URI, used as sender and reply address.
    pub endpoint: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub namespace: NamespaceKind,
    /// Domain used in ETSI Call-Info URNs.
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(flatten)]
    pub client_info: ClientInfo,
    #[serde(default)]
    pub heartbeat_interval_ms: Option<u64>,
}

impl AgentConfig {
    pub fn new(endpoint: impl Into<String>, role: Role, namespace: NamespaceKind) -> Self {
        Self {
            endpoint: endpoint.into(),
            display_name: None,
            role,
            namespace,
            domain: default_domain(),
            client_info: ClientInfo::default(),
            heartbeat_interval_ms: None,
        }
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Failed to parse agent config")
    }

    /// Read the config from `NG112_*` environment variables.
    /// - requires NG112_ENDPOINT
    /// - NG112_ROLE (client | psap) and NG112_NAMESPACE (etsi | dec112) default to client / etsi
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint = std::env::var("NG112_ENDPOINT").context("NG112_ENDPOINT is not set")?;

        let role = match env_opt("NG112_ROLE") {
            Some(role) => parse_role(&role)?,
            None => Role::default(),
        };
        let namespace = match env_opt("NG112_NAMESPACE") {
            Some(namespace) => namespace.parse::<NamespaceKind>().map_err(anyhow::Error::msg)?,
            None => NamespaceKind::default(),
        };
        let heartbeat_interval_ms = env_opt("NG112_HEARTBEAT_INTERVAL_MS")
            .map(|ms| {
                ms.parse::<u64>()
                    .context(format!("Failed to parse NG112_HEARTBEAT_INTERVAL_MS: {ms}"))
            })
            .transpose()?;

        Ok(Self {
            endpoint,
            display_name: env_opt("NG112_DISPLAY_NAME"),
            role,
            namespace,
            domain: env_opt("NG112_DOMAIN").unwrap_or_else(default_domain),
            client_info: ClientInfo {
                device_id: env_opt("NG112_DEVICE_ID"),
                registration_id: env_opt("NG112_REGISTRATION_ID"),
                client_version: env_opt("NG112_CLIENT_VERSION"),
                language: env_opt("NG112_LANGUAGE"),
            },
            heartbeat_interval_ms,
        })
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn parse_role(value: &str) -> anyhow::Result<Role> {
    match value.trim().to_ascii_lowercase().as_str() {
        "client" => Ok(Role::Client),
        "psap" => Ok(Role::Psap),
        other => bail!("unknown role: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_defaults() {
        let config = AgentConfig::from_json(r#"{"endpoint":"sip:alice@example.com"}"#).unwrap();
        assert_eq!(config, AgentConfig::new("sip:alice@example.com", Role::Client, NamespaceKind::Etsi));
        assert_eq!(config.domain, "service.dec112.at");
    }

    #[test]
    fn test_from_json_full() {
        let config = AgentConfig::from_json(
            r#"{
                "endpoint": "sip:psap@example.com",
                "display_name": "PSAP Vienna",
                "role": "PSAP",
                "namespace": "dec112",
                "device_id": "dev-1",
                "language": "de",
                "heartbeat_interval_ms": 5000
            }"#,
        )
        .unwrap();

        assert_eq!(config.role, Role::Psap);
        assert_eq!(config.namespace, NamespaceKind::Dec112);
        assert_eq!(config.client_info.device_id.as_deref(), Some("dev-1"));
        assert_eq!(config.client_info.registration_id, None);
        assert_eq!(config.heartbeat_interval_ms, Some(5000));
    }

    #[test]
    fn test_from_json_requires_endpoint() {
        assert!(AgentConfig::from_json(r#"{"role":"CLIENT"}"#).is_err());
    }

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("PSAP").unwrap(), Role::Psap);
        assert_eq!(parse_role(" client ").unwrap(), Role::Client);
        assert!(parse_role("caller").is_err());
    }
}
