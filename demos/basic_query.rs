//! Connect, authenticate and run one query.
//!
//! Demonstrates:
//! - Building a connection configuration
//! - Watching lifecycle events
//! - Waiting for the handshake and issuing a query
//!
//! Usage:
//!   cargo run --example basic_query
//!   cargo run --example basic_query -- ws://db.local:8000 "INFO FOR DB"
//!
//! Set `RUST_LOG=surreal_rpc=debug` for transport logs.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::Context;
use surreal_rpc::{AuthMode, ConnectionConfig, ConnectionEvent, ConnectionManager};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_ENDPOINT: &str = "localhost:8000";
const DEFAULT_QUERY: &str = "INFO FOR DB";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    let statement = args.next().unwrap_or_else(|| DEFAULT_QUERY.to_string());

    println!("=== Basic Query ===\n");

    let config = ConnectionConfig::builder()
        .endpoint(&endpoint)
        .namespace("test")
        .database("test")
        .credentials("root", "root")
        .auth_mode(AuthMode::Root)
        .query_timeout(Duration::from_secs(10))
        .build()
        .context("invalid configuration")?;

    let manager = ConnectionManager::new();
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConnectionEvent::Connected { connection } => println!("[Event] {connection} ready"),
                ConnectionEvent::Disconnected { connection, code, reason } => {
                    println!("[Event] {connection} disconnected ({code}: {reason})");
                }
                ConnectionEvent::Error { connection, message } => {
                    println!("[Event] {connection} error: {message}");
                }
            }
        }
    });

    let handle = manager.open(config)?;
    handle
        .ready()
        .await
        .with_context(|| format!("handshake with {endpoint} failed"))?;

    println!("[Query] {statement}");
    let result = handle.query("query", vec![statement.into()]).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    manager.close();
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
