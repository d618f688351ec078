//! CLI arguments for the toolrelay binary.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use crate::config::{CollisionPolicy, RelaySettings};

/// Console client dispatching requests to MCP tool servers.
#[derive(Parser, Debug)]
#[command(name = "toolrelay", version, about = "Route requests to MCP tool servers")]
pub struct Cli {
    /// Servers file (JSON or TOML). Defaults to ./mcp_servers.json, then the
    /// platform config directory.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Decision model name
    #[arg(short, long)]
    pub model: Option<String>,

    /// OpenAI-compatible base URL for the decision model
    #[arg(long)]
    pub base_url: Option<String>,

    /// Temperature (0.0 - 2.0)
    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Duplicate operation names: last_wins or namespace
    #[arg(long, value_parser = parse_collisions)]
    pub collisions: Option<CollisionPolicy>,

    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_collisions(raw: &str) -> Result<CollisionPolicy, String> {
    CollisionPolicy::from_str(raw)
        .map_err(|_| format!("unknown collision policy '{raw}' (expected last_wins or namespace)"))
}

impl Cli {
    /// Apply command-line overrides on top of env-derived settings.
    pub fn apply(&self, mut settings: RelaySettings) -> RelaySettings {
        if let Some(model) = &self.model {
            settings.decision.model = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            settings.decision.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(temperature) = self.temperature {
            settings.decision.temperature = temperature;
        }
        if let Some(policy) = self.collisions {
            settings.collision_policy = policy;
        }
        settings
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}
