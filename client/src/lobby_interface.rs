use anyhow::bail;
use log::debug;
use shared::protocol::{MemberInfo, Request, ResponseBody, RoomSnapshot};
use tokio::sync::mpsc;

use crate::{
    cli_display::CliDisplay,
    commands::{LOBBY_HELP, LobbyCommand, parse_lobby_command},
    console::Console,
    server_connection::{Incoming, ServerSender},
};

/// What the lobby hands to the room interface after a successful create or join.
#[derive(Debug, Clone)]
pub struct RoomSession {
    pub room: RoomSnapshot,
    pub member: MemberInfo,
}

pub struct LobbyInterface;

impl LobbyInterface {
    /// `Ok(None)` when the user exits.
    pub async fn run(
        console: &mut Console,
        sender: &ServerSender,
        incoming: &mut mpsc::Receiver<Incoming>,
        username: &str,
    ) -> anyhow::Result<Option<RoomSession>> {
        CliDisplay::print_prompt();

        loop {
            let line = tokio::select! {
                line = console.next_line() => line,
                message = incoming.recv() => match message {
                    Some(Incoming::Disconnected(reason)) => bail!(reason),
                    None => bail!("Connection to server is closed"),
                    Some(other) => {
                        debug!("Ignoring {:?} while in the lobby", other);
                        continue;
                    }
                },
            };

            let Some(line) = line else {
                return Ok(None);
            };

            match parse_lobby_command(&line) {
                Ok(Some(LobbyCommand::Exit)) => {
                    println!("Exiting...");
                    return Ok(None);
                }
                Ok(Some(command)) => {
                    if let Some(session) = Self::handle_command(command, sender, username).await? {
                        return Ok(Some(session));
                    }
                }
                Ok(None) => {}
                Err(usage) => eprintln!("{}", usage),
            }

            CliDisplay::print_prompt();
        }
    }

    async fn handle_command(
        command: LobbyCommand,
        sender: &ServerSender,
        username: &str,
    ) -> anyhow::Result<Option<RoomSession>> {
        match command {
            LobbyCommand::CreateRoom { room_name } => {
                let body = sender
                    .request(Request::CreateRoom {
                        room_name: room_name.clone(),
                        user_name: username.to_string(),
                    })
                    .await?;

                match body {
                    ResponseBody::RoomCreated { room_code, member } => {
                        println!("Successfully created room '{}' ({}).", room_name, room_code);

                        let room = RoomSnapshot {
                            code: room_code,
                            name: room_name,
                            admin_id: member.id.clone(),
                            members: vec![member.clone()],
                            playback: None,
                        };
                        return Ok(Some(RoomSession { room, member }));
                    }
                    ResponseBody::Error { message, .. } => eprintln!("{}", message),
                    other => bail!("Invalid response from server during create room: {:?}", other),
                }
            }

            LobbyCommand::JoinRoom { room_code } => {
                let body = sender
                    .request(Request::JoinRoom {
                        room_code,
                        user_name: username.to_string(),
                    })
                    .await?;

                match body {
                    ResponseBody::RoomJoined { room, member } => {
                        return Ok(Some(RoomSession { room, member }));
                    }
                    ResponseBody::Error { message, .. } => eprintln!("{}", message),
                    other => bail!("Invalid response from server during join room: {:?}", other),
                }
            }

            LobbyCommand::ListRooms => match sender.request(Request::GetDiagnostics).await? {
                ResponseBody::Diagnostics { report } => CliDisplay::print_room_list(&report),
                ResponseBody::Error { message, .. } => eprintln!("{}", message),
                other => bail!("Invalid response from server during rooms: {:?}", other),
            },

            LobbyCommand::Help => println!("{}", LOBBY_HELP),

            LobbyCommand::Exit => {}
        }

        Ok(None)
    }
}
