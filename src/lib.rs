//! toolrelay: MCP tool servers behind one flat namespace.
//!
//! Connects to any number of Model Context Protocol servers, over a child
//! process's standard streams or a remote HTTP stream, merges their tools
//! into one catalog, and routes a single tool call per user turn.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use toolrelay::prelude::*;
//!
//! # async fn example() -> toolrelay::error::Result<()> {
//! let settings = RelaySettings::from_env();
//! let servers = load_servers(std::path::Path::new("mcp_servers.json"))?;
//! let relay = Lifecycle::start(servers, settings.clone()).await?;
//!
//! let dispatcher = relay.dispatcher(Arc::new(ChatCompletionsDecider::new(settings.decision)));
//! let turn = dispatcher.run_turn("what is 2 + 3?").await;
//! println!("{}", turn.response_text);
//!
//! relay.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod mcp;
pub mod prelude;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
