mod chunk_sink;
mod chunk_streamer;
mod cli_display;
mod client;
mod commands;
mod console;
mod lobby_interface;
mod room_interface;
mod server_connection;
mod sync_reconciler;
mod virtual_player;

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use rand::{Rng, rng, seq::IndexedRandom};
use shared::{DEFAULT_PORT, is_valid_name};

use crate::{client::Client, room_interface::RoomOptions, sync_reconciler::DEFAULT_DAMPING};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(short, long)]
    username: Option<String>,

    #[arg(short, long, default_value = "127.0.0.1")]
    server_address: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Append relayed live-stream segments to this file.
    #[arg(short, long)]
    chunk_out: Option<PathBuf>,

    /// Settle time after a sync correction before the next one is applied.
    #[arg(long, default_value_t = DEFAULT_DAMPING.as_millis() as u64)]
    damping_ms: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let username = match args.username {
        Some(username) => username,
        None => generate_username(),
    };

    if !is_valid_name(&username) {
        eprintln!("Invalid username '{}'", username);
        return;
    }

    let options = RoomOptions {
        chunk_out: args.chunk_out,
        damping: Duration::from_millis(args.damping_ms),
    };

    if let Err(e) = Client::run(&args.server_address, args.port, &username, options).await {
        eprintln!("{}", e);
    }
}

fn generate_username() -> String {
    let adjectives = ["fast", "lazy", "cool", "smart", "brave"];
    let nouns = ["tiger", "eagle", "lion", "panda", "wolf"];

    let mut rng = rng();

    let adjective = adjectives.choose(&mut rng).copied().unwrap_or("quiet");
    let noun = nouns.choose(&mut rng).copied().unwrap_or("listener");
    let number: u16 = rng.random_range(1..9999);

    format!("{}-{}{}", adjective, noun, number)
}
