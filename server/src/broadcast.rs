use std::sync::Arc;

use log::{debug, warn};
use shared::{protocol::Event, tcp_command::TcpCommand};
use tokio::sync::mpsc;

pub type ConnectionId = u64;

/// Non-owning route from a member to its connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    outbound: mpsc::Sender<Arc<TcpCommand>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
}

impl ConnectionHandle {
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Arc<TcpCommand>>) {
        let (outbound, outbound_rx) = mpsc::channel(capacity.max(1));
        (Self { id, outbound }, outbound_rx)
    }

    /// Enqueues without waiting. A full or closed queue only affects this
    /// connection.
    pub fn try_send(&self, command: Arc<TcpCommand>) -> bool {
        match self.outbound.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                warn!(
                    "Outbound queue full for connection {}, dropping {}",
                    self.id,
                    command.id()
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for connection {}", self.id);
                false
            }
        }
    }

    /// Waits for queue space; used for replies to the connection's own requests.
    pub async fn send(&self, command: TcpCommand) -> bool {
        self.outbound.send(Arc::new(command)).await.is_ok()
    }
}

pub fn fan_out<'a, I>(recipients: I, command: Arc<TcpCommand>) -> FanOut
where
    I: IntoIterator<Item = &'a ConnectionHandle>,
{
    let mut report = FanOut::default();

    for recipient in recipients {
        if recipient.try_send(Arc::clone(&command)) {
            report.delivered += 1;
        } else {
            report.dropped += 1;
        }
    }

    report
}

pub fn broadcast_event<'a, I>(recipients: I, event: &Event) -> FanOut
where
    I: IntoIterator<Item = &'a ConnectionHandle>,
{
    match event.to_command() {
        Ok(command) => fan_out(recipients, Arc::new(command)),
        Err(e) => {
            warn!("Failed to encode event: {}", e);
            FanOut::default()
        }
    }
}
