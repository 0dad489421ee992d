mod broadcast;
mod chunk_relay;
mod error;
mod membership;
mod playback_authority;
mod room;
mod room_table;
mod state;
mod sync_server;
mod tcp_command_handler;
mod tcp_handler;

#[cfg(test)]
mod test_support;

use log::{error, info};
use shared::DEFAULT_PORT;

use clap::Parser;

use crate::sync_server::SyncServer;

const DEFAULT_QUEUE_LEN: usize = 256;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Outbound messages buffered per connection before deliveries are dropped.
    #[arg(short, long, default_value_t = DEFAULT_QUEUE_LEN)]
    queue_len: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let addr = format!("{}:{}", args.host, args.port);

    let server = match SyncServer::bind(&addr, args.queue_len).await {
        Ok(server) => server,
        Err(e) => {
            error!("Error binding: {}", e);
            return;
        }
    };

    match server.local_addr() {
        Ok(local_addr) => info!("Sync server listening on {}", local_addr),
        Err(_) => info!("Sync server listening on {}", addr),
    }

    if let Err(e) = server.listen().await {
        error!("{}", e);
    }
}
