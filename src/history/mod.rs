// history/mod.rs
//
// Append-only sink for notable state transitions (irrigation start/stop,
// robot mission events) with a bounded, ordered read side. Appends are
// fire-and-forget from the hub's point of view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    Irrigation,
    Robots,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub scope: HistoryScope,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub detail: Option<serde_json::Value>,
    #[schema(value_type = String)]
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(scope: HistoryScope, event: impl Into<String>) -> Self {
        Self {
            scope,
            event: event.into(),
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[async_trait::async_trait]
pub trait HistorySink: Send + Sync {
    async fn append(&self, record: HistoryRecord) -> anyhow::Result<()>;

    /// Newest-first records for one scope, at most `limit`.
    async fn recent(&self, scope: HistoryScope, limit: usize) -> anyhow::Result<Vec<HistoryRecord>>;
}

/// One JSON record per line, appended to a single file.
pub struct JsonlHistory {
    path: std::path::PathBuf,
    // Serializes appends so two transitions cannot interleave mid-line.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl HistorySink for JsonlHistory {
    async fn append(&self, record: HistoryRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn recent(&self, scope: HistoryScope, limit: usize) -> anyhow::Result<Vec<HistoryRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut records: Vec<HistoryRecord> = content
            .lines()
            .filter_map(|line| serde_json::from_str::<HistoryRecord>(line).ok())
            .filter(|record| record.scope == scope)
            .collect();
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}

/// In-memory sink, used when no history path is configured and in tests.
#[derive(Default)]
pub struct MemoryHistory {
    records: std::sync::Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl HistorySink for MemoryHistory {
    async fn append(&self, record: HistoryRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?
            .push(record);
        Ok(())
    }

    async fn recent(&self, scope: HistoryScope, limit: usize) -> anyhow::Result<Vec<HistoryRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?;
        Ok(records
            .iter()
            .rev()
            .filter(|record| record.scope == scope)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_returns_newest_first_bounded() {
        let sink = MemoryHistory::new();
        for i in 0..5 {
            sink.append(
                HistoryRecord::new(HistoryScope::Irrigation, format!("EVENT_{i}")),
            )
            .await
            .unwrap();
        }
        sink.append(HistoryRecord::new(HistoryScope::Robots, "MISSION"))
            .await
            .unwrap();

        let records = sink.recent(HistoryScope::Irrigation, 3).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].event, "EVENT_4");
        assert_eq!(records[2].event, "EVENT_2");
    }

    #[tokio::test]
    async fn jsonl_sink_round_trips_and_filters_scope() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlHistory::new(dir.path().join("history.jsonl"));
        sink.append(
            HistoryRecord::new(HistoryScope::Irrigation, "START")
                .with_detail(serde_json::json!({"duration": 600})),
        )
        .await
        .unwrap();
        sink.append(HistoryRecord::new(HistoryScope::Robots, "MISSION_DONE"))
            .await
            .unwrap();
        sink.append(HistoryRecord::new(HistoryScope::Irrigation, "STOP"))
            .await
            .unwrap();

        let records = sink.recent(HistoryScope::Irrigation, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, "STOP");
        assert_eq!(records[1].event, "START");
        assert_eq!(
            records[1].detail,
            Some(serde_json::json!({"duration": 600}))
        );
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlHistory::new(dir.path().join("nope.jsonl"));
        let records = sink.recent(HistoryScope::Irrigation, 10).await.unwrap();
        assert!(records.is_empty());
    }
}
