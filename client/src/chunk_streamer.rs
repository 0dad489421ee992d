use std::{path::Path, time::Duration};

use anyhow::Context;
use log::{debug, info};
use shared::tcp_command::ChunkFrame;
use tokio::{fs::File, io::AsyncReadExt, time::interval};
use tokio_util::sync::CancellationToken;

use crate::server_connection::ServerSender;

pub const CHUNK_SIZE: usize = 4 * 1024;
pub const CHUNK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub chunks: u64,
    pub bytes: u64,
    pub cancelled: bool,
}

/// Uploads a pre-encoded file as live-stream segments, paced like a recorder
/// emitting one segment per timeslice.
pub struct ChunkStreamer;

impl ChunkStreamer {
    pub async fn stream_file(
        sender: &ServerSender,
        room_code: &str,
        path: &Path,
        cancel: CancellationToken,
    ) -> anyhow::Result<StreamSummary> {
        let mut file = File::open(path)
            .await
            .with_context(|| format!("Could not open {}", path.display()))?;

        let mut summary = StreamSummary::default();
        let mut ticker = interval(CHUNK_INTERVAL);
        let mut buf = vec![0u8; CHUNK_SIZE];

        info!("Streaming {} to room {}", path.display(), room_code);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                _ = ticker.tick() => {}
            }

            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            sender
                .upload_chunk(ChunkFrame {
                    room_code: room_code.to_string(),
                    timestamp_ms: sender.server_now(),
                    data: buf[..n].to_vec(),
                })
                .await?;

            summary.chunks += 1;
            summary.bytes += n as u64;
        }

        debug!(
            "Stream of {} ended after {} chunks",
            path.display(),
            summary.chunks
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{tcp_command::TcpCommand, tcp_command_id::TcpCommandId};
    use tokio::sync::mpsc;

    async fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", name, std::process::id()));
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    #[tokio::test(start_paused = true)]
    async fn file_is_uploaded_in_order_sized_chunks() {
        let contents: Vec<u8> = (0..(CHUNK_SIZE * 2 + 10)).map(|i| i as u8).collect();
        let path = temp_file("chunk-streamer-order", &contents).await;

        let (commands_tx, mut commands_rx) = mpsc::channel(16);
        let sender = ServerSender::detached(commands_tx);

        let summary = ChunkStreamer::stream_file(&sender, "AB12CD", &path, CancellationToken::new())
            .await
            .unwrap();
        drop(sender);

        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.bytes, contents.len() as u64);
        assert!(!summary.cancelled);

        let mut uploaded = Vec::new();
        while let Some(command) = commands_rx.recv().await {
            let TcpCommand::Chunk(TcpCommandId::UploadChunk, chunk) = command else {
                panic!("expected upload");
            };
            assert_eq!(chunk.room_code, "AB12CD");
            uploaded.extend(chunk.data);
        }
        assert_eq!(uploaded, contents);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn cancelled_stream_stops_early() {
        let path = temp_file("chunk-streamer-cancel", &[7u8; CHUNK_SIZE * 4]).await;

        let (commands_tx, _commands_rx) = mpsc::channel(16);
        let sender = ServerSender::detached(commands_tx);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = ChunkStreamer::stream_file(&sender, "AB12CD", &path, cancel)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.chunks, 0);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let (commands_tx, _commands_rx) = mpsc::channel(1);
        let sender = ServerSender::detached(commands_tx);

        let result = ChunkStreamer::stream_file(
            &sender,
            "AB12CD",
            Path::new("/definitely/not/here.opus"),
            CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
    }
}
