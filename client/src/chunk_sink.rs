use std::path::Path;

use shared::tcp_command::ChunkFrame;
use tokio::{
    fs::{File, OpenOptions},
    io::{self, AsyncWriteExt},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub chunks: u64,
    pub bytes: u64,
    /// Chunks whose capture timestamp went backwards. Counted, never reordered.
    pub out_of_order: u64,
}

/// Receives relayed live-stream segments in arrival order. Segments are
/// appended verbatim; decoding is someone else's job.
pub struct ChunkSink {
    output: Option<File>,
    last_timestamp: Option<i64>,
    stats: SinkStats,
}

impl ChunkSink {
    pub async fn open(path: Option<&Path>) -> io::Result<Self> {
        let output = match path {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?,
            ),
            None => None,
        };

        Ok(Self {
            output,
            last_timestamp: None,
            stats: SinkStats::default(),
        })
    }

    pub fn begin_stream(&mut self) {
        self.last_timestamp = None;
        self.stats = SinkStats::default();
    }

    pub async fn push(&mut self, chunk: &ChunkFrame) -> io::Result<()> {
        if self
            .last_timestamp
            .is_some_and(|last| chunk.timestamp_ms < last)
        {
            self.stats.out_of_order += 1;
        }
        self.last_timestamp = Some(chunk.timestamp_ms);

        if let Some(output) = self.output.as_mut() {
            output.write_all(&chunk.data).await?;
        }

        self.stats.chunks += 1;
        self.stats.bytes += chunk.data.len() as u64;

        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        if let Some(output) = self.output.as_mut() {
            output.flush().await?;
        }
        Ok(())
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(timestamp_ms: i64, data: &[u8]) -> ChunkFrame {
        ChunkFrame {
            room_code: "AB12CD".to_string(),
            timestamp_ms,
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn segments_are_appended_in_arrival_order() {
        let path = std::env::temp_dir().join(format!("chunk-sink-{}.bin", std::process::id()));
        let _ = tokio::fs::remove_file(&path).await;

        let mut sink = ChunkSink::open(Some(&path)).await.unwrap();
        sink.push(&chunk(1, b"abc")).await.unwrap();
        sink.push(&chunk(3, b"de")).await.unwrap();
        sink.push(&chunk(2, b"f")).await.unwrap();
        sink.flush().await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abcdef".to_vec());
        assert_eq!(
            sink.stats(),
            SinkStats {
                chunks: 3,
                bytes: 6,
                out_of_order: 1
            }
        );

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn new_stream_resets_counters() {
        let mut sink = ChunkSink::open(None).await.unwrap();
        sink.push(&chunk(5, b"xyz")).await.unwrap();

        sink.begin_stream();
        sink.push(&chunk(1, b"a")).await.unwrap();

        assert_eq!(
            sink.stats(),
            SinkStats {
                chunks: 1,
                bytes: 1,
                out_of_order: 0
            }
        );
    }
}
