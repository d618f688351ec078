//! Tests for server files and environment-derived settings.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use pretty_assertions::assert_eq;
use toolrelay::config::{
    enabled_servers, load_servers, CollisionPolicy, RelaySettings, ServerConfig, TransportKind,
    DEFAULT_SERVERS_FILE,
};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 10] = [
    "TOOLRELAY_HANDSHAKE_TIMEOUT_SECS",
    "TOOLRELAY_LIST_TIMEOUT_SECS",
    "TOOLRELAY_CALL_TIMEOUT_SECS",
    "TOOLRELAY_COLLISIONS",
    "TOOLRELAY_DECISION_BASE_URL",
    "TOOLRELAY_DECISION_API_KEY",
    "TOOLRELAY_DECISION_MODEL",
    "TOOLRELAY_DECISION_TEMPERATURE",
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn settings_from_env_reads_relay_and_openai_variables() {
    let _env_lock = env_lock_guard();
    let _env_guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    for key in CONFIG_ENV_VARS {
        std::env::remove_var(key);
    }

    std::env::set_var("OPENAI_API_KEY", "sk-fallback");
    std::env::set_var("OPENAI_BASE_URL", "http://localhost:9999/v1/");
    std::env::set_var("TOOLRELAY_CALL_TIMEOUT_SECS", "5");
    std::env::set_var("TOOLRELAY_COLLISIONS", "namespace");

    let settings = RelaySettings::from_env();

    assert_eq!(settings.decision.api_key.as_deref(), Some("sk-fallback"));
    assert_eq!(settings.decision.base_url, "http://localhost:9999/v1");
    assert_eq!(settings.timeouts.call, Duration::from_secs(5));
    assert_eq!(settings.timeouts.handshake, Duration::from_secs(30));
    assert_eq!(
        settings.collision_policy,
        CollisionPolicy::NamespaceServerAndTool
    );
}

#[test]
fn debug_output_never_contains_credentials() {
    let settings = RelaySettings::from_lookup(|key| match key {
        "TOOLRELAY_DECISION_API_KEY" => Some("sk-very-secret".into()),
        _ => None,
    });
    assert!(!format!("{settings:?}").contains("sk-very-secret"));

    let server = ServerConfig::stream("docs", "https://example.com/mcp")
        .with_header("authorization", "Bearer hidden-token");
    assert!(!format!("{server:?}").contains("hidden-token"));
}

#[test]
fn json_servers_file_round_trips_through_loader() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(DEFAULT_SERVERS_FILE);
    std::fs::write(
        &path,
        r#"{
          "servers": [
            {"name": "Simple Calculator", "transport": "stdio", "command": "python", "args": ["calc.py"]},
            {"name": "Docs", "transport": "sse", "url": "http://localhost:8000/mcp", "enabled": false}
          ]
        }"#,
    )
    .expect("write servers file");

    let servers = load_servers(&path).expect("servers should load");
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].key(), "simple_calculator");
    assert_eq!(servers[0].kind(), TransportKind::Process);
    assert_eq!(servers[1].kind(), TransportKind::Stream);

    let enabled = enabled_servers(servers);
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].name, "Simple Calculator");
}

#[test]
fn toml_servers_file_is_selected_by_extension() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("servers.toml");
    std::fs::write(
        &path,
        r#"
[[servers]]
name = "calc"
transport = "process"
command = "calc-server"
args = ["--stdio"]

[servers.env]
LOG_LEVEL = "debug"
"#,
    )
    .expect("write servers file");

    let servers = load_servers(&path).expect("toml should load");
    assert_eq!(
        servers,
        vec![ServerConfig::process("calc", "calc-server", vec!["--stdio".into()])
            .with_env("LOG_LEVEL", "debug")]
    );
}
