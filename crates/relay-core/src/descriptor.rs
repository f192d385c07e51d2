//! Backend descriptors
//!
//! A descriptor names one backend and says how to reach it. Descriptors are
//! loaded once (JSON or TOML), validated immediately, and never mutated
//! afterwards.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::{GatewayError, GatewayResult};

/// Credential material that must never reach a log line.
///
/// `Debug` and `Display` both print `[REDACTED]`; the raw value is only
/// reachable through [`Secret::expose`].
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw value, for handing to a transport or comparing against
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Top-level backend configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct ServersConfig {
    /// Backends, in connection order
    pub servers: Vec<BackendDescriptor>,
}

/// One backend the gateway connects out to
#[derive(Debug, Clone, Deserialize)]
pub struct BackendDescriptor {
    /// Unique backend identifier
    pub name: String,
    /// How to reach the backend
    pub transport: TransportConfig,
    /// Expose tools and prompts as `"<name>/<capability>"`
    #[serde(default)]
    pub namespace: bool,
}

/// Transport configuration, one variant per transport kind
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawn a child process and speak line-delimited JSON-RPC on its stdio
    #[serde(alias = "stdio")]
    Process(ProcessConfig),
    /// Connect to a remote server-sent-events endpoint
    #[serde(alias = "sse")]
    Stream(StreamConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Process(_) => "process",
            TransportConfig::Stream(_) => "stream",
        }
    }
}

/// Child-process transport
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// Executable to spawn
    pub command: String,
    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Names of environment variables to forward; each value is resolved
    /// from the gateway's own environment at spawn time
    #[serde(default)]
    pub env: Option<Vec<String>>,
}

/// Server-sent-events transport
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Absolute http(s) URL of the event stream
    pub url: String,
    /// Headers forwarded on every outbound request
    #[serde(default)]
    pub headers: StreamHeaders,
}

/// Outbound headers for a stream backend
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamHeaders {
    /// Full `Authorization` header value (e.g. `"Bearer abc"`)
    #[serde(rename = "Authorization", alias = "authorization", default)]
    pub authorization: Option<Secret>,
}

impl StreamConfig {
    /// Parsed URL. Validation guarantees this succeeds for loaded configs.
    pub fn parsed_url(&self) -> GatewayResult<Url> {
        Url::parse(&self.url).map_err(|e| GatewayError::Config(format!("invalid url: {}", e)))
    }
}

impl BackendDescriptor {
    /// Namespace applied to this backend's tools and prompts
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.then_some(self.name.as_str())
    }

    /// Check required fields of this descriptor
    pub fn validate(&self) -> GatewayResult<()> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::Config(
                "backend name must not be empty".to_string(),
            ));
        }

        match &self.transport {
            TransportConfig::Process(cfg) => {
                if cfg.command.trim().is_empty() {
                    return Err(GatewayError::Config(format!(
                        "backend '{}': process command must not be empty",
                        self.name
                    )));
                }
            }
            TransportConfig::Stream(cfg) => {
                let url = cfg.parsed_url().map_err(|e| {
                    GatewayError::Config(format!("backend '{}': {}", self.name, e))
                })?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(GatewayError::Config(format!(
                        "backend '{}': unsupported url scheme '{}'",
                        self.name,
                        url.scheme()
                    )));
                }
            }
        }

        Ok(())
    }
}

impl ServersConfig {
    /// Parse a JSON document and validate it
    pub fn from_json_str(content: &str) -> GatewayResult<Self> {
        let config: ServersConfig = serde_json::from_str(content)
            .map_err(|e| GatewayError::Config(format!("failed to parse JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document and validate it
    pub fn from_toml_str(content: &str) -> GatewayResult<Self> {
        let config: ServersConfig = toml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("failed to parse TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.toml` files are parsed as TOML, anything else as JSON
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// Validate every descriptor and enforce unique names
    pub fn validate(&self) -> GatewayResult<()> {
        let mut seen = HashSet::new();
        for descriptor in &self.servers {
            descriptor.validate()?;
            if !seen.insert(descriptor.name.as_str()) {
                return Err(GatewayError::Config(format!(
                    "duplicate backend name '{}'",
                    descriptor.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const JSON_CONFIG: &str = r#"{
        "servers": [
            {
                "name": "files",
                "transport": {
                    "type": "process",
                    "command": "npx",
                    "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
                    "env": ["HOME"]
                }
            },
            {
                "name": "remote",
                "namespace": true,
                "transport": {
                    "type": "sse",
                    "url": "https://example.com/sse",
                    "headers": { "Authorization": "Bearer top-secret" }
                }
            }
        ]
    }"#;

    #[test]
    fn parse_json_preserves_order_and_variants() {
        let config = ServersConfig::from_json_str(JSON_CONFIG).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].name, "files");
        assert_eq!(config.servers[1].name, "remote");

        match &config.servers[0].transport {
            TransportConfig::Process(cfg) => {
                assert_eq!(cfg.command, "npx");
                assert_eq!(cfg.args.len(), 3);
                assert_eq!(cfg.env.as_deref(), Some(&["HOME".to_string()][..]));
            }
            other => panic!("expected process transport, got {:?}", other),
        }

        match &config.servers[1].transport {
            TransportConfig::Stream(cfg) => {
                let auth = cfg.headers.authorization.as_ref().unwrap();
                assert_eq!(auth.expose(), "Bearer top-secret");
            }
            other => panic!("expected stream transport, got {:?}", other),
        }
        assert_eq!(config.servers[1].namespace(), Some("remote"));
        assert_eq!(config.servers[0].namespace(), None);
    }

    #[test]
    fn debug_output_never_contains_secret() {
        let config = ServersConfig::from_json_str(JSON_CONFIG).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("top-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn parse_toml() {
        let config = ServersConfig::from_toml_str(
            r#"
            [[servers]]
            name = "git"
            [servers.transport]
            type = "stdio"
            command = "mcp-server-git"
            "#,
        )
        .unwrap();
        assert_eq!(config.servers[0].transport.kind(), "process");
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = ServersConfig::from_json_str(
            r#"{"servers": [
                {"name": "a", "transport": {"type": "process", "command": "x"}},
                {"name": "a", "transport": {"type": "process", "command": "y"}}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Config(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn stream_requires_http_url() {
        let err = ServersConfig::from_json_str(
            r#"{"servers": [{"name": "a", "transport": {"type": "stream", "url": "ftp://x/y"}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));

        let err = ServersConfig::from_json_str(
            r#"{"servers": [{"name": "a", "transport": {"type": "stream", "url": "not a url"}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn unknown_transport_type_rejected() {
        let err = ServersConfig::from_json_str(
            r#"{"servers": [{"name": "a", "transport": {"type": "carrier-pigeon"}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn load_picks_format_from_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[[servers]]\nname = \"a\"\n[servers.transport]\ntype = \"process\"\ncommand = \"echo\""
        )
        .unwrap();
        let config = ServersConfig::load(file.path()).unwrap();
        assert_eq!(config.servers[0].name, "a");

        let missing = ServersConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(missing, GatewayError::Config(_)));
    }
}
