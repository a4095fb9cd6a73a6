use anyhow::{bail, Result};
use clap::Args;
use pb_rest_client::{Client, Listener, Realtime, RealtimeMessage};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;

/// Arguments for following realtime topics
#[derive(Args)]
pub struct RealtimeArgs {
    /// Topics to follow, e.g. a collection name or `todos/RECORD_ID`
    #[arg(required = true, value_name = "TOPIC")]
    pub topics: Vec<String>,

    /// Exit after this many events
    #[arg(long)]
    pub count: Option<usize>,
}

impl RealtimeArgs {
    pub async fn run(self, client: Client) -> Result<()> {
        if self.topics.is_empty() {
            bail!("At least one topic is required");
        }

        let realtime = Realtime::new(client);
        let (tx, mut rx) = mpsc::unbounded_channel::<RealtimeMessage>();
        let listener = Listener::from_fn(move |message| {
            let _ = tx.send(message);
        });
        for topic in &self.topics {
            realtime.subscribe(topic.clone(), listener.clone()).await?;
        }
        info!(topics = ?self.topics, "following realtime topics");

        let mut received = 0usize;
        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    println!("{}", render(&message));
                    received += 1;
                    if self.count.is_some_and(|count| received >= count) {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        realtime.unsubscribe(None).await?;
        Ok(())
    }
}

/// One output line per event
pub fn render(message: &RealtimeMessage) -> String {
    let data = message
        .json::<Value>()
        .unwrap_or_else(|_| Value::String(message.data.clone()));
    json!({"topic": message.event, "data": data}).to_string()
}
