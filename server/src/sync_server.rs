use core::error::Error;
use std::{net::SocketAddr, sync::Arc, time::Duration};

use log::{debug, error, info};
use tokio::net::TcpListener;

use crate::{
    broadcast::ConnectionId, membership::MembershipManager, state::ServerState,
    tcp_handler::TcpHandler,
};

pub struct SyncServer {
    tcp_listener: TcpListener,
    state: Arc<ServerState>,
    queue_len: usize,
}

impl SyncServer {
    pub async fn bind(addr: &str, queue_len: usize) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            tcp_listener: TcpListener::bind(addr).await?,
            state: Arc::new(ServerState::new()),
            queue_len,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp_listener.local_addr()
    }

    pub async fn listen(self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let _stats_task = self.state.relay.spawn_stats_task();

        let mut next_connection_id: ConnectionId = 1;

        loop {
            let (tcp_socket, peer_addr) = match self.tcp_listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            let connection_id = next_connection_id;
            next_connection_id += 1;

            let state = Arc::clone(&self.state);
            let queue_len = self.queue_len;

            tokio::spawn(async move {
                info!("Connection {} from {}", connection_id, peer_addr);

                if let Err(e) = tcp_socket.set_nodelay(true) {
                    debug!("Could not set nodelay on connection {}: {}", connection_id, e);
                }

                let connection_task = tokio::spawn(TcpHandler::handle_stream(
                    tcp_socket,
                    connection_id,
                    Arc::clone(&state),
                    queue_len,
                ));

                match connection_task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Error handling connection {}: {}", connection_id, e),
                    Err(e) => error!("Connection {} task failed: {}", connection_id, e),
                }

                let outcome = MembershipManager::disconnect(&state.rooms, connection_id).await;
                info!(
                    "Connection {} closed ({:?}), {} rooms open",
                    connection_id,
                    outcome,
                    state.rooms.len().await
                );
            });
        }
    }
}
