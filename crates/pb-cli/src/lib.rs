//! PocketBase CLI library

pub mod batch;
pub mod realtime;
pub mod records;

use anyhow::{Context, Result};
use pb_rest_client::{AuthStore, Client, ClientConfig};
use std::sync::Arc;

// Re-export CLI types for testing
pub use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pb")]
#[command(about = "PocketBase command-line client")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Log requests and connection events
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record operations on one collection
    Records {
        #[command(subcommand)]
        subcommand: records::RecordCommands,
    },
    /// Submit several record mutations as one batch call
    Batch(batch::BatchArgs),
    /// Print realtime events for the given topics
    Realtime(realtime::RealtimeArgs),
    /// Check that the backend is up
    Health,
}

/// Where and how to reach the backend
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Backend base URL
    #[arg(long, env = "PB_URL", default_value = "http://127.0.0.1:8090", global = true)]
    pub url: String,

    /// Accept-Language sent with every request
    #[arg(long, env = "PB_LANG", default_value = "en-US", global = true)]
    pub lang: String,

    /// Auth token sent as the Authorization header
    #[arg(long, env = "PB_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Auth collection used to refresh a rejected token once per request
    #[arg(long, env = "PB_AUTH_COLLECTION", global = true)]
    pub auth_collection: Option<String>,
}

impl ConnectionArgs {
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.url.clone()).with_language(self.lang.clone())
    }

    pub fn client(&self) -> Result<Client> {
        let auth = match &self.token {
            Some(token) => AuthStore::with_token(token.clone()),
            None => AuthStore::new(),
        };
        let mut builder = Client::builder(self.config()).auth(Arc::new(auth));
        if let Some(collection) = &self.auth_collection {
            builder = builder.refresh_auth_on_401(collection.clone());
        }
        builder
            .build()
            .with_context(|| format!("Invalid backend URL {}", self.url))
    }
}

/// Default log filter for the given verbosity; `RUST_LOG` overrides it
pub fn default_log_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Print the backend health report
pub async fn health(client: &Client) -> Result<()> {
    let report = client.health().await.context("Health check failed")?;
    print_json(&serde_json::to_value(report)?)
}

/// Pretty-print a JSON value on stdout
pub(crate) fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
