use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use futures::StreamExt;
use pb_rest_client::{Client, FileAttachment, DEFAULT_FULL_LIST_BATCH};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::print_json;

/// Record-related commands
#[derive(Subcommand)]
pub enum RecordCommands {
    /// List records of a collection
    List(ListArgs),
    /// Show one record
    Get {
        collection: String,
        id: String,
    },
    /// Create a record from a JSON object
    Create(CreateArgs),
    /// Patch a record with a JSON object
    Update {
        collection: String,
        id: String,
        /// JSON object with the fields to change
        #[arg(long, value_name = "JSON")]
        data: String,
    },
    /// Delete a record
    Delete {
        collection: String,
        id: String,
    },
    /// Download a file stored on a record
    Download(DownloadArgs),
}

#[derive(Args)]
pub struct ListArgs {
    pub collection: String,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long = "per-page", default_value_t = 30)]
    pub per_page: u32,

    /// Backend filter expression, e.g. `done = false`
    #[arg(long)]
    pub filter: Option<String>,

    /// Sort expression, e.g. `-created`
    #[arg(long)]
    pub sort: Option<String>,

    /// Fetch every page instead of a single one
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct CreateArgs {
    pub collection: String,

    /// JSON object with the record fields
    #[arg(long, value_name = "JSON", default_value = "{}")]
    pub data: String,

    /// File field as FIELD=PATH; may repeat
    #[arg(long = "file", value_name = "FIELD=PATH")]
    pub files: Vec<String>,
}

#[derive(Args)]
pub struct DownloadArgs {
    pub collection: String,
    pub record_id: String,
    pub file_name: String,

    /// Thumbnail size such as 100x100
    #[arg(long)]
    pub thumb: Option<String>,

    /// Output path; defaults to the file name
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RecordCommands {
    pub async fn run(self, client: &Client) -> Result<()> {
        match self {
            RecordCommands::List(args) => args.run(client).await,
            RecordCommands::Get { collection, id } => {
                let record: Value = client.collection(collection).get_one(&id).await?;
                print_json(&record)
            }
            RecordCommands::Create(args) => args.run(client).await,
            RecordCommands::Update {
                collection,
                id,
                data,
            } => {
                let body = parse_object(&data)?;
                let record: Value = client.collection(collection).update(&id, &body).await?;
                print_json(&record)
            }
            RecordCommands::Delete { collection, id } => {
                client.collection(&collection).delete(&id).await?;
                info!(%collection, %id, "record deleted");
                Ok(())
            }
            RecordCommands::Download(args) => args.run(client).await,
        }
    }
}

impl ListArgs {
    async fn run(self, client: &Client) -> Result<()> {
        let records = client.collection(&self.collection);
        if self.all {
            let items: Vec<Value> = records
                .get_full_list(
                    DEFAULT_FULL_LIST_BATCH,
                    self.filter.as_deref(),
                    self.sort.as_deref(),
                )
                .await?;
            return print_json(&Value::Array(items));
        }

        let page = records
            .list::<Value>(
                self.page,
                self.per_page,
                self.filter.as_deref(),
                self.sort.as_deref(),
            )
            .await?;
        print_json(&serde_json::to_value(page)?)
    }
}

impl CreateArgs {
    async fn run(self, client: &Client) -> Result<()> {
        let body = parse_object(&self.data)?;
        let mut files = Vec::with_capacity(self.files.len());
        for arg in &self.files {
            let (field, path) = parse_file_arg(arg)?;
            let file = FileAttachment::from_path(field, &path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            files.push(file);
        }

        let records = client.collection(&self.collection);
        let record: Value = if files.is_empty() {
            records.create(&body).await?
        } else {
            records.create_with_files(&body, files).await?
        };
        print_json(&record)
    }
}

impl DownloadArgs {
    async fn run(self, client: &Client) -> Result<()> {
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.file_name));
        let mut stream = client
            .collection(&self.collection)
            .download_file(&self.record_id, &self.file_name, self.thumb.as_deref(), None)
            .await?;

        let mut file = tokio::fs::File::create(&output)
            .await
            .with_context(|| format!("Failed to create {}", output.display()))?;
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        info!(path = %output.display(), bytes = written, "file downloaded");
        Ok(())
    }
}

/// Parse a JSON object argument
pub fn parse_object(data: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(data).context("Record data is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("Record data must be a JSON object"),
    }
}

/// Split `FIELD=PATH`
pub fn parse_file_arg(arg: &str) -> Result<(String, PathBuf)> {
    match arg.split_once('=') {
        Some((field, path)) if !field.is_empty() && !path.is_empty() => {
            Ok((field.to_string(), PathBuf::from(path)))
        }
        _ => bail!("Expected FIELD=PATH, got {arg}"),
    }
}
