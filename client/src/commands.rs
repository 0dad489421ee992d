use std::{path::PathBuf, str::FromStr};

use strum_macros::EnumString;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
enum Verb {
    Create,
    Join,
    Rooms,
    Exit,
    Load,
    Play,
    Pause,
    Seek,
    Stream,
    Status,
    Members,
    Leave,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LobbyCommand {
    CreateRoom { room_name: String },
    JoinRoom { room_code: String },
    ListRooms,
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoomCommand {
    Load { url: String, name: String },
    Play,
    Pause,
    Seek { position_seconds: f64 },
    StreamStart,
    StreamFile { path: PathBuf },
    StreamStop,
    Status,
    Members,
    Help,
    Leave,
}

pub const LOBBY_HELP: &str = "Commands:
  create room <name>
  join room <code>
  rooms
  exit";

pub const ROOM_HELP: &str = "Commands:
  load <url> [name]   (admin)
  play | pause        (admin)
  seek <seconds>      (admin)
  stream start        (admin)
  stream file <path>  (admin)
  stream stop         (admin)
  status
  members
  leave";

/// `Ok(None)` for blank input. `Err` carries the message to show the user.
pub fn parse_lobby_command(input: &str) -> Result<Option<LobbyCommand>, String> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let Some(first) = parts.first() else {
        return Ok(None);
    };

    let verb = parse_verb(first)?;

    let command = match (verb, &parts[1..]) {
        (Verb::Create, ["room", name @ ..]) if !name.is_empty() => LobbyCommand::CreateRoom {
            room_name: name.join(" "),
        },
        (Verb::Create, _) => return Err("Usage: create room <name>".to_string()),

        (Verb::Join, ["room", code]) => LobbyCommand::JoinRoom {
            room_code: code.to_string(),
        },
        (Verb::Join, _) => return Err("Usage: join room <code>".to_string()),

        (Verb::Rooms, []) => LobbyCommand::ListRooms,
        (Verb::Help, _) => LobbyCommand::Help,
        (Verb::Exit, []) => LobbyCommand::Exit,

        _ => return Err(format!("Unknown command '{}'. Type 'help'.", input.trim())),
    };

    Ok(Some(command))
}

pub fn parse_room_command(input: &str) -> Result<Option<RoomCommand>, String> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let Some(first) = parts.first() else {
        return Ok(None);
    };

    let verb = parse_verb(first)?;

    let command = match (verb, &parts[1..]) {
        (Verb::Load, [url, name @ ..]) => {
            let name = if name.is_empty() {
                default_track_name(url)
            } else {
                name.join(" ")
            };
            RoomCommand::Load {
                url: url.to_string(),
                name,
            }
        }
        (Verb::Load, _) => return Err("Usage: load <url> [name]".to_string()),

        (Verb::Play, []) => RoomCommand::Play,
        (Verb::Pause, []) => RoomCommand::Pause,

        (Verb::Seek, [position]) => match f64::from_str(position) {
            Ok(position_seconds) if position_seconds.is_finite() && position_seconds >= 0.0 => {
                RoomCommand::Seek { position_seconds }
            }
            _ => return Err("Usage: seek <seconds>".to_string()),
        },
        (Verb::Seek, _) => return Err("Usage: seek <seconds>".to_string()),

        (Verb::Stream, ["start"]) => RoomCommand::StreamStart,
        (Verb::Stream, ["stop"]) => RoomCommand::StreamStop,
        (Verb::Stream, ["file", path @ ..]) if !path.is_empty() => RoomCommand::StreamFile {
            path: PathBuf::from(path.join(" ")),
        },
        (Verb::Stream, _) => {
            return Err("Usage: stream start | stream file <path> | stream stop".to_string());
        }

        (Verb::Status, []) => RoomCommand::Status,
        (Verb::Members, []) => RoomCommand::Members,
        (Verb::Help, _) => RoomCommand::Help,
        (Verb::Leave, []) => RoomCommand::Leave,

        _ => return Err(format!("Unknown command '{}'. Type 'help'.", input.trim())),
    };

    Ok(Some(command))
}

fn parse_verb(word: &str) -> Result<Verb, String> {
    Verb::from_str(&word.to_lowercase())
        .map_err(|_| format!("Unknown command '{}'. Type 'help'.", word))
}

fn default_track_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(url)
        .to_string()
}
