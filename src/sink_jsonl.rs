//! Line-delimited JSON sink.
//!
//! Each record becomes one JSON object on its own line, flushed immediately
//! so a downstream `tail -f` or pipe sees it without buffering delay.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;

use crate::models::MessageRecord;
use crate::traits::Sink;

pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<W: Write + Send> Sink for JsonLinesSink<W> {
    async fn emit(&self, record: &MessageRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .with_context(|| format!("Failed to serialize message {}", record.id))?;

        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("output writer lock poisoned"))?;
        writeln!(out, "{}", line)
            .and_then(|_| out.flush())
            .with_context(|| format!("Failed to write message {}", record.id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn writes_one_object_per_line() {
        let sink = JsonLinesSink::new(Vec::new());
        let date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        sink.emit(&MessageRecord::new(-5, 1, date, "first"))
            .await
            .unwrap();
        sink.emit(&MessageRecord::new(-5, 2, date, "multi\nline"))
            .await
            .unwrap();

        let written = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: MessageRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(second.text, "multi\nline");
        assert_eq!(second.date, date);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn write_errors_surface() {
        let sink = JsonLinesSink::new(BrokenPipe);
        let record = MessageRecord::new(1, 1, Utc::now(), "x");
        let err = sink.emit(&record).await.unwrap_err();
        assert!(err.to_string().contains("message 1"));
    }
}
