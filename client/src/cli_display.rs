use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType},
};
use shared::protocol::{
    DiagnosticsReport, MemberInfo, PlaybackSnapshot, PlaybackSource, RoomSnapshot,
};
use std::io::{Write, stdout};

use crate::{chunk_sink::SinkStats, sync_reconciler::ReconcilerState};

pub const PROMPT_STR: &str = "> ";

pub struct CliDisplay;

pub struct RoomStatus<'a> {
    pub room: &'a RoomSnapshot,
    pub loaded: Option<&'a str>,
    pub position_seconds: f64,
    pub is_playing: bool,
    /// Listener only.
    pub sync: Option<(ReconcilerState, Option<&'a PlaybackSnapshot>)>,
    pub sink: Option<SinkStats>,
}

impl CliDisplay {
    pub fn print_prompt() {
        let mut stdout = stdout();
        let _ = write!(stdout, "{}", PROMPT_STR);
        let _ = stdout.flush();
    }

    pub fn print_connected_message(server_addr: &str, username: &str) {
        println!("Connected to {} as '{}'!", server_addr, username);
    }

    /// Prints a line that arrived while the prompt may be showing.
    pub fn print_notice(message: &str) {
        let mut stdout = stdout();

        let _ = execute!(
            stdout,
            Clear(ClearType::CurrentLine),
            cursor::MoveToColumn(0)
        );

        let _ = writeln!(stdout, "{}", message);
        let _ = write!(stdout, "{}", PROMPT_STR);
        let _ = stdout.flush();
    }

    pub fn print_room_list(report: &DiagnosticsReport) {
        if report.rooms.is_empty() {
            println!("No open rooms.");
            return;
        }

        println!("Rooms ({}):", report.total_rooms);

        for room in &report.rooms {
            println!(
                "  * {} '{}' ({} member{})",
                room.code,
                room.name,
                room.member_count,
                if room.member_count == 1 { "" } else { "s" }
            );
        }
    }

    pub fn print_joined(room: &RoomSnapshot, me: &MemberInfo) {
        let role = if me.is_admin { "admin" } else { "listener" };
        println!(
            "Joined '{}' (code {}) as {}.",
            room.name, room.code, role
        );
    }

    pub fn print_member_list(room: &RoomSnapshot) {
        println!("Members:");

        for member in &room.members {
            if member.is_admin {
                println!("  * {} (admin)", member.name);
            } else {
                println!("  * {}", member.name);
            }
        }
    }

    pub fn print_status(status: &RoomStatus) {
        let room = status.room;
        println!("Room {} '{}'", room.code, room.name);

        match room.playback.as_ref().and_then(|state| state.source.as_ref()) {
            Some(PlaybackSource::Track { source_name, .. }) => {
                let state = if status.is_playing { "playing" } else { "paused" };
                println!(
                    "  {} '{}' at {}",
                    state,
                    source_name,
                    format_position(status.position_seconds)
                );
            }
            Some(PlaybackSource::LiveStream) => println!("  live stream"),
            None => println!("  nothing loaded"),
        }

        if let Some(loaded) = status.loaded {
            println!("  local source: {}", loaded);
        }

        if let Some((state, latest)) = status.sync {
            let state = match state {
                ReconcilerState::Idle => "in sync",
                ReconcilerState::Correcting { .. } => "correcting",
            };
            match latest {
                Some(snapshot) => println!(
                    "  {} (last snapshot {} at server time {})",
                    state,
                    format_position(snapshot.position_seconds),
                    snapshot.emitted_at_server_time
                ),
                None => println!("  {}", state),
            }
        }

        if let Some(stats) = status.sink {
            println!(
                "  received {} chunks ({} bytes, {} out of order)",
                stats.chunks, stats.bytes, stats.out_of_order
            );
        }
    }

    pub fn print_current_user_left_room(room_name: &str) {
        println!("You have left '{}'.", room_name);
    }

    pub fn print_room_closed(room_name: &str) {
        Self::print_notice(&format!("Room '{}' was closed by its admin.", room_name));
    }
}

pub fn format_position(position_seconds: f64) -> String {
    let total = position_seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
