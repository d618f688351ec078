//! Tool server configuration and runtime settings.
//!
//! Server entries are read from a JSON file shaped like
//! `{"servers": [{"name": "...", "transport": "stdio", ...}]}` or the
//! equivalent TOML (`[[servers]]` tables). A missing or malformed file is
//! treated as "no servers" by [`load_servers_or_empty`]; callers that need
//! the underlying error use [`load_servers`].

pub mod settings;

pub use settings::{CollisionPolicy, DecisionSettings, RelaySettings, SessionTimeouts};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::RelayError;

/// File name looked up when no explicit configuration path is given.
pub const DEFAULT_SERVERS_FILE: &str = "mcp_servers.json";

/// How a tool server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TransportKind {
    /// Spawned child process speaking over stdin/stdout.
    Process,
    /// Long-lived network stream (MCP streamable HTTP).
    Stream,
}

/// Transport-specific parameters, tagged by the `transport` field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportConfig {
    #[serde(alias = "stdio")]
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    #[serde(alias = "sse", alias = "streamable_http", alias = "http")]
    Stream {
        #[serde(alias = "endpoint_url")]
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        bearer_token: Option<String>,
    },
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process {
                command,
                args,
                env,
                cwd,
            } => f
                .debug_struct("Process")
                .field("command", command)
                .field("args", args)
                .field("env", &env.keys().collect::<Vec<_>>())
                .field("cwd", cwd)
                .finish(),
            Self::Stream {
                url,
                headers,
                bearer_token,
            } => f
                .debug_struct("Stream")
                .field("url", url)
                .field("headers", &headers.keys().collect::<Vec<_>>())
                .field("bearer_token", &bearer_token.as_ref().map(|_| ".."))
                .finish(),
        }
    }
}

/// One configured tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name.
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    /// A process-backed server.
    pub fn process(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Process {
                command: command.into(),
                args,
                env: BTreeMap::new(),
                cwd: None,
            },
            enabled: true,
        }
    }

    /// A stream-backed server.
    pub fn stream(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Stream {
                url: url.into(),
                headers: BTreeMap::new(),
                bearer_token: None,
            },
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a static header (stream transport only; ignored otherwise).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Stream { headers, .. } = &mut self.transport {
            headers.insert(name.into(), value.into());
        }
        self
    }

    /// Add an environment variable (process transport only; ignored otherwise).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Process { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    pub fn kind(&self) -> TransportKind {
        match self.transport {
            TransportConfig::Process { .. } => TransportKind::Process,
            TransportConfig::Stream { .. } => TransportKind::Stream,
        }
    }

    /// Stable key derived from the display name: lower-cased, spaces to `_`.
    pub fn key(&self) -> String {
        server_key(&self.name)
    }

    /// Reject entries that cannot possibly connect.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.name.trim().is_empty() {
            return Err(RelayError::Configuration(
                "server name must not be empty".into(),
            ));
        }
        match &self.transport {
            TransportConfig::Process { command, .. } if command.trim().is_empty() => Err(
                RelayError::Configuration(format!("server '{}' has an empty command", self.name)),
            ),
            TransportConfig::Stream { url, .. } if url.trim().is_empty() => Err(
                RelayError::Configuration(format!("server '{}' has an empty url", self.name)),
            ),
            _ => Ok(()),
        }
    }
}

/// Normalize a display name into a server key.
pub fn server_key(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<ServerConfig>,
}

/// Parse a JSON servers document.
pub fn parse_servers_json(raw: &str) -> Result<Vec<ServerConfig>, RelayError> {
    let file: ServersFile = serde_json::from_str(raw)?;
    Ok(file.servers)
}

/// Parse a TOML servers document.
pub fn parse_servers_toml(raw: &str) -> Result<Vec<ServerConfig>, RelayError> {
    let file: ServersFile = toml::from_str(raw)?;
    Ok(file.servers)
}

/// Load server entries from `path`, choosing the format by extension.
pub fn load_servers(path: &Path) -> Result<Vec<ServerConfig>, RelayError> {
    let raw = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        parse_servers_toml(&raw)
    } else {
        parse_servers_json(&raw)
    }
}

/// Load server entries, treating a missing or malformed file as empty.
pub fn load_servers_or_empty(path: &Path) -> Vec<ServerConfig> {
    match load_servers(path) {
        Ok(servers) => servers,
        Err(RelayError::Io(error)) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "server configuration not found");
            Vec::new()
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "server configuration unreadable");
            Vec::new()
        }
    }
}

/// Keep only enabled entries, preserving order.
pub fn enabled_servers(servers: impl IntoIterator<Item = ServerConfig>) -> Vec<ServerConfig> {
    servers.into_iter().filter(|server| server.enabled).collect()
}

/// Resolve the servers file: explicit path, then the working directory,
/// then the platform configuration directory.
pub fn resolve_servers_path(explicit: Option<&Path>, cwd: &Path) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = cwd.join(DEFAULT_SERVERS_FILE);
    if local.exists() {
        return local;
    }
    directories::ProjectDirs::from("", "", "toolrelay")
        .map(|dirs| dirs.config_dir().join(DEFAULT_SERVERS_FILE))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_json_servers_layout() {
        let servers = parse_servers_json(
            r#"{
                "servers": [
                    {
                        "name": "Simple Calculator",
                        "transport": "stdio",
                        "command": "python",
                        "args": ["server.py"]
                    },
                    {
                        "name": "Remote Docs",
                        "transport": "sse",
                        "url": "http://localhost:3000/mcp",
                        "enabled": false
                    }
                ]
            }"#,
        )
        .expect("servers document should parse");

        assert_eq!(servers.len(), 2);
        assert_eq!(
            servers[0],
            ServerConfig::process("Simple Calculator", "python", vec!["server.py".into()])
        );
        assert_eq!(servers[0].key(), "simple_calculator");
        assert_eq!(servers[1].kind(), TransportKind::Stream);
        assert!(!servers[1].enabled);
    }

    #[test]
    fn transport_aliases_map_to_two_kinds() {
        for (tag, kind) in [
            ("process", TransportKind::Process),
            ("stdio", TransportKind::Process),
            ("stream", TransportKind::Stream),
            ("streamable_http", TransportKind::Stream),
            ("http", TransportKind::Stream),
        ] {
            let field = match kind {
                TransportKind::Process => r#""command": "srv""#,
                TransportKind::Stream => r#""endpoint_url": "http://x/mcp""#,
            };
            let raw = format!(r#"{{"servers": [{{"name": "a", "transport": "{tag}", {field}}}]}}"#);
            let servers = parse_servers_json(&raw).expect("alias should parse");
            assert_eq!(servers[0].kind(), kind, "tag {tag}");
        }
    }

    #[test]
    fn parses_toml_layout() {
        let servers = parse_servers_toml(
            r#"
            [[servers]]
            name = "calc"
            transport = "process"
            command = "calc-server"
            env = { CALC_MODE = "fast" }

            [[servers]]
            name = "docs"
            transport = "stream"
            url = "https://docs.example/mcp"
            bearer_token = "secret"
            "#,
        )
        .expect("toml document should parse");

        assert_eq!(
            servers[0],
            ServerConfig::process("calc", "calc-server", Vec::new()).with_env("CALC_MODE", "fast")
        );
        let debug = format!("{:?}", servers[1]);
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn load_servers_or_empty_tolerates_missing_and_malformed_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_servers_or_empty(&dir.path().join("absent.json")).is_empty());

        let malformed = dir.path().join("broken.json");
        std::fs::write(&malformed, "{ \"servers\": [").expect("write fixture");
        assert!(load_servers_or_empty(&malformed).is_empty());
        assert!(matches!(
            load_servers(&malformed),
            Err(RelayError::Serialization(_))
        ));
    }

    #[test]
    fn enabled_servers_filters_and_keeps_order() {
        let servers = enabled_servers(vec![
            ServerConfig::process("a", "a", Vec::new()),
            ServerConfig::process("b", "b", Vec::new()).with_enabled(false),
            ServerConfig::stream("c", "http://c/mcp"),
        ]);
        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn validate_rejects_empty_command_and_url() {
        assert!(ServerConfig::process("a", " ", Vec::new()).validate().is_err());
        assert!(ServerConfig::stream("b", "").validate().is_err());
        assert!(ServerConfig::process("", "srv", Vec::new()).validate().is_err());
        assert!(ServerConfig::stream("ok", "http://x/mcp").validate().is_ok());
    }

    #[test]
    fn explicit_path_wins_resolution() {
        let dir = tempfile::tempdir().expect("tempdir");
        let explicit = dir.path().join("custom.toml");
        assert_eq!(
            resolve_servers_path(Some(&explicit), dir.path()),
            explicit
        );
        std::fs::write(dir.path().join(DEFAULT_SERVERS_FILE), "{}").expect("write fixture");
        assert_eq!(
            resolve_servers_path(None, dir.path()),
            dir.path().join(DEFAULT_SERVERS_FILE)
        );
    }
}
