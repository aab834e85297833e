use super::{CorrelationId, Direction, EventType, RecordedEvent, Sanitizer};
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Appends recorded events to a JSONL file from a background task.
pub struct RecordingLogger {
    sender: mpsc::UnboundedSender<RecordedEvent>,
}

impl RecordingLogger {
    pub fn new(log_file_path: PathBuf) -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        // Spawn background task to write events to file
        tokio::spawn(async move {
            if let Err(e) = Self::writer_task(log_file_path, &mut receiver).await {
                error!("Recording logger failed: {}", e);
            }
        });

        Ok(Self { sender })
    }

    #[cfg(test)]
    pub(crate) fn from_sender(sender: mpsc::UnboundedSender<RecordedEvent>) -> Self {
        Self { sender }
    }

    pub fn record(&self, event: RecordedEvent) {
        if self.sender.send(event).is_err() {
            error!("Failed to send event to recording logger: receiver dropped");
        }
    }

    /// Record an inbound payload (gateway dispatch or interaction webhook).
    ///
    /// The payload is sanitized before it leaves this function.
    pub fn record_inbound(
        &self,
        correlation_id: &CorrelationId,
        event_type: EventType,
        operation: &str,
        payload: &serde_json::Value,
    ) {
        self.record(RecordedEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.0.clone(),
            event_type,
            direction: Direction::Request,
            operation: operation.to_string(),
            data: Sanitizer::sanitize_json(payload),
            metadata: HashMap::new(),
        });
    }

    /// Get a clone of the logger for use in middleware
    pub fn clone_for_middleware(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }

    /// Drain the channel into the log file, one JSON object per line.
    ///
    /// Events that queue up while a write is in flight are written together
    /// and flushed once.
    async fn writer_task(
        log_file_path: PathBuf,
        receiver: &mut mpsc::UnboundedReceiver<RecordedEvent>,
    ) -> Result<()> {
        if let Some(parent) = log_file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file_path)
            .await?;
        let mut writer = BufWriter::new(file);

        info!("Recording events to: {:?}", log_file_path);

        while let Some(first) = receiver.recv().await {
            let mut next = Some(first);
            while let Some(event) = next {
                if let Err(e) = write_line(&mut writer, &event).await {
                    error!("Failed to write {} event: {}", event.operation, e);
                }
                next = receiver.try_recv().ok();
            }

            if let Err(e) = writer.flush().await {
                error!("Failed to flush recording log: {}", e);
            }
        }

        info!("Recording writer task shutting down");
        Ok(())
    }
}

async fn write_line(writer: &mut BufWriter<File>, event: &RecordedEvent) -> Result<()> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}
