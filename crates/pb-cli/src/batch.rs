use anyhow::{Context, Result};
use clap::Args;
use pb_rest_client::{Batch, BatchOperation, Client};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing::warn;

use crate::print_json;

/// Arguments for a batch submission
#[derive(Args)]
pub struct BatchArgs {
    /// JSON file holding an array of operations
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// One operation as written in the batch file
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BatchEntry {
    Create {
        collection: String,
        #[serde(default)]
        body: Map<String, Value>,
        expand: Option<String>,
    },
    Update {
        collection: String,
        id: String,
        #[serde(default)]
        body: Map<String, Value>,
        expand: Option<String>,
    },
    Upsert {
        collection: String,
        id: String,
        #[serde(default)]
        body: Map<String, Value>,
        expand: Option<String>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl BatchEntry {
    pub fn into_operation(self) -> Result<BatchOperation> {
        let (operation, expand) = match self {
            BatchEntry::Create {
                collection,
                body,
                expand,
            } => (BatchOperation::create(collection, &body)?, expand),
            BatchEntry::Update {
                collection,
                id,
                body,
                expand,
            } => (BatchOperation::update(collection, id, &body)?, expand),
            BatchEntry::Upsert {
                collection,
                id,
                body,
                expand,
            } => (BatchOperation::upsert(collection, id, &body)?, expand),
            BatchEntry::Delete { collection, id } => {
                (BatchOperation::delete(collection, id), None)
            }
        };
        Ok(match expand {
            Some(expand) => operation.expand(expand),
            None => operation,
        })
    }
}

/// Build a batch from the file contents
pub fn parse_batch(contents: &str) -> Result<Batch> {
    let entries: Vec<BatchEntry> =
        serde_json::from_str(contents).context("Batch file must be a JSON array of operations")?;
    let mut batch = Batch::new();
    for entry in entries {
        batch.push(entry.into_operation()?);
    }
    Ok(batch)
}

impl BatchArgs {
    pub async fn run(self, client: &Client) -> Result<()> {
        let contents = tokio::fs::read_to_string(&self.file)
            .await
            .with_context(|| format!("Failed to read {}", self.file.display()))?;
        let batch = parse_batch(&contents)?;

        let response = client.send_batch(&batch).await?;
        for (index, item) in response.failures() {
            warn!(index, status = item.status, "batch operation failed");
        }

        let items: Vec<Value> = response
            .iter()
            .map(|item| json!({"status": item.status, "body": item.body}))
            .collect();
        print_json(&Value::Array(items))
    }
}
