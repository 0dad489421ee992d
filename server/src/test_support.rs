use std::sync::Arc;

use shared::{
    protocol::{Event, parse_json},
    tcp_command::{ChunkFrame, TcpCommand},
    tcp_command_id::TcpCommandId,
};
use tokio::sync::mpsc;

use crate::broadcast::{ConnectionHandle, ConnectionId};

pub type Outbound = mpsc::Receiver<Arc<TcpCommand>>;

pub fn connection(id: ConnectionId) -> (ConnectionHandle, Outbound) {
    ConnectionHandle::channel(id, 64)
}

pub fn drain_events(outbound: &mut Outbound) -> Vec<Event> {
    let mut events = Vec::new();

    while let Ok(command) = outbound.try_recv() {
        if let TcpCommand::Json(TcpCommandId::Event, payload) = command.as_ref() {
            events.push(parse_json(payload).expect("event json"));
        }
    }

    events
}

pub fn drain_chunks(outbound: &mut Outbound) -> Vec<ChunkFrame> {
    let mut chunks = Vec::new();

    while let Ok(command) = outbound.try_recv() {
        if let TcpCommand::Chunk(TcpCommandId::RelayedChunk, chunk) = command.as_ref() {
            chunks.push(chunk.clone());
        }
    }

    chunks
}
