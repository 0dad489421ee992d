use std::{path::PathBuf, time::Duration};

use anyhow::bail;
use log::{debug, warn};
use shared::protocol::{
    Event, MemberInfo, PlaybackSource, Request, ResponseBody, RoomSnapshot,
};
use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use crate::{
    chunk_sink::ChunkSink,
    chunk_streamer::{ChunkStreamer, StreamSummary},
    cli_display::{CliDisplay, RoomStatus},
    commands::{ROOM_HELP, RoomCommand, parse_room_command},
    console::Console,
    lobby_interface::RoomSession,
    server_connection::{Incoming, ServerSender},
    sync_reconciler::{Correction, PlaybackTransport, SyncReconciler},
    virtual_player::VirtualPlayer,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
const RECONCILE_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct RoomOptions {
    pub chunk_out: Option<PathBuf>,
    pub damping: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomExit {
    Left,
    Closed,
    InputClosed,
}

pub struct RoomInterface {
    room: RoomSnapshot,
    me: MemberInfo,
    sender: ServerSender,
    player: VirtualPlayer,
    /// Url and name of the loaded track, known locally as soon as the admin loads it.
    track: Option<(String, String)>,
    reconciler: SyncReconciler,
    sink: ChunkSink,
    stream_cancel: Option<CancellationToken>,
    stream_done_tx: mpsc::Sender<anyhow::Result<StreamSummary>>,
}

impl RoomInterface {
    pub async fn run(
        session: RoomSession,
        console: &mut Console,
        sender: &ServerSender,
        incoming: &mut mpsc::Receiver<Incoming>,
        options: &RoomOptions,
    ) -> anyhow::Result<RoomExit> {
        let (stream_done_tx, mut stream_done_rx) = mpsc::channel(1);

        let sink = ChunkSink::open(options.chunk_out.as_deref()).await?;
        let mut interface =
            RoomInterface::new(session, sender.clone(), sink, options.damping, stream_done_tx);

        CliDisplay::print_joined(&interface.room, &interface.me);
        interface.catch_up();

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reconcile = interval(RECONCILE_INTERVAL);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Skip);

        CliDisplay::print_prompt();

        let exit = loop {
            tokio::select! {
                line = console.next_line() => {
                    let Some(line) = line else {
                        interface.leave().await?;
                        break RoomExit::InputClosed;
                    };

                    match parse_room_command(&line) {
                        Ok(Some(RoomCommand::Leave)) => {
                            interface.leave().await?;
                            CliDisplay::print_current_user_left_room(&interface.room.name);
                            break RoomExit::Left;
                        }
                        Ok(Some(command)) => interface.handle_command(command).await?,
                        Ok(None) => {}
                        Err(usage) => eprintln!("{}", usage),
                    }

                    CliDisplay::print_prompt();
                }

                message = incoming.recv() => match message {
                    Some(Incoming::Event { event, received_at }) => {
                        if interface.handle_event(event, received_at).await? {
                            break RoomExit::Closed;
                        }
                    }
                    Some(Incoming::Chunk(chunk)) => {
                        if chunk.room_code == interface.room.code {
                            interface.sink.push(&chunk).await?;
                        }
                    }
                    Some(Incoming::Disconnected(reason)) => bail!(reason),
                    None => bail!("Connection to server is closed"),
                },

                Some(result) = stream_done_rx.recv() => {
                    interface.stream_cancel = None;
                    match result {
                        Ok(summary) if summary.cancelled => {
                            CliDisplay::print_notice(&format!("Stream stopped after {} chunks.", summary.chunks));
                        }
                        Ok(summary) => CliDisplay::print_notice(&format!(
                            "Finished streaming {} chunks ({} bytes).",
                            summary.chunks, summary.bytes
                        )),
                        Err(e) => CliDisplay::print_notice(&format!("Streaming failed: {}", e)),
                    }
                }

                _ = heartbeat.tick(), if interface.me.is_admin => {
                    if interface.player.is_playing() {
                        interface.publish_playback().await?;
                    }
                }

                _ = reconcile.tick(), if !interface.me.is_admin => {
                    let now = interface.sender.server_now();
                    let correction = interface.reconciler.poll(now, &mut interface.player);
                    log_correction(correction);
                }
            }
        };

        interface.cancel_stream();
        interface.sink.flush().await?;

        Ok(exit)
    }

    fn new(
        session: RoomSession,
        sender: ServerSender,
        sink: ChunkSink,
        damping: Duration,
        stream_done_tx: mpsc::Sender<anyhow::Result<StreamSummary>>,
    ) -> Self {
        Self {
            reconciler: SyncReconciler::new(session.member.id.clone(), damping),
            room: session.room,
            me: session.member,
            sender,
            player: VirtualPlayer::new(),
            track: None,
            sink,
            stream_cancel: None,
            stream_done_tx,
        }
    }

    /// Brings a late joiner in line with what the room is already doing.
    fn catch_up(&mut self) {
        let Some(playback) = self.room.playback.clone() else {
            return;
        };

        match &playback.source {
            Some(PlaybackSource::Track {
                source_url,
                source_name,
            }) => {
                self.player.load(source_url);
                self.track = Some((source_url.clone(), source_name.clone()));
                if !self.me.is_admin {
                    let snapshot = playback.snapshot(&self.room.admin_id);
                    let now = self.sender.server_now();
                    let correction =
                        self.reconciler
                            .on_snapshot(snapshot, now, &mut self.player);
                    log_correction(correction);
                }
            }
            Some(PlaybackSource::LiveStream) => self.sink.begin_stream(),
            None => {}
        }
    }

    async fn handle_command(&mut self, command: RoomCommand) -> anyhow::Result<()> {
        match command {
            RoomCommand::Status => {
                let listener = !self.me.is_admin;
                CliDisplay::print_status(&RoomStatus {
                    room: &self.room,
                    loaded: self.player.source(),
                    position_seconds: self.player.position_seconds(),
                    is_playing: self.player.is_playing(),
                    sync: listener.then(|| (self.reconciler.state(), self.reconciler.latest())),
                    sink: listener.then(|| self.sink.stats()),
                })
            }
            RoomCommand::Members => CliDisplay::print_member_list(&self.room),
            RoomCommand::Help => println!("{}", ROOM_HELP),
            RoomCommand::Leave => {}

            command if !self.me.is_admin => {
                debug!("Listener tried {:?}", command);
                eprintln!("Only the room admin can do that.");
            }

            RoomCommand::Load { url, name } => {
                self.cancel_stream();
                self.player.load(&url);
                self.track = Some((url.clone(), name.clone()));
                self.sender
                    .send(Request::LoadTrack {
                        room_code: self.room.code.clone(),
                        source_url: url,
                        source_name: name,
                    })
                    .await?;
            }

            RoomCommand::Play | RoomCommand::Pause | RoomCommand::Seek { .. }
                if self.current_track().is_none() =>
            {
                eprintln!("Load a track first.");
            }
            RoomCommand::Play => {
                self.player.play();
                self.publish_playback().await?;
            }
            RoomCommand::Pause => {
                self.player.pause();
                self.publish_playback().await?;
            }
            RoomCommand::Seek { position_seconds } => {
                self.player.seek(position_seconds);
                self.publish_playback().await?;
            }

            RoomCommand::StreamStart => self.start_live_stream().await?,
            RoomCommand::StreamFile { path } => {
                if self.stream_cancel.is_some() {
                    eprintln!("Already streaming. Use 'stream stop' first.");
                    return Ok(());
                }
                self.start_live_stream().await?;
                self.spawn_streamer(path);
            }
            RoomCommand::StreamStop => {
                self.cancel_stream();
                self.sender
                    .send(Request::StopLiveStream {
                        room_code: self.room.code.clone(),
                    })
                    .await?;
            }
        }

        Ok(())
    }

    /// Returns `true` once the room has been closed.
    async fn handle_event(&mut self, event: Event, received_at: i64) -> anyhow::Result<bool> {
        match event {
            Event::MemberJoined { member } => {
                CliDisplay::print_notice(&format!("{} joined.", member.name));
            }
            Event::MemberLeft { member_id } => {
                let name = self
                    .room
                    .member(&member_id)
                    .map(|member| member.name.clone())
                    .unwrap_or_else(|| member_id.to_string());
                CliDisplay::print_notice(&format!("{} left.", name));
            }
            Event::RoomUpdated { room } => {
                if room.code == self.room.code {
                    self.room = room;
                }
            }
            Event::RoomClosed { room_code } => {
                if room_code == self.room.code {
                    CliDisplay::print_room_closed(&self.room.name);
                    return Ok(true);
                }
            }
            Event::TrackChanged {
                source_url,
                source_name,
            } => {
                self.reconciler.reset();
                if self.player.source() != Some(source_url.as_str()) {
                    self.player.load(&source_url);
                }
                CliDisplay::print_notice(&format!("Now loaded: '{}'.", source_name));
                self.track = Some((source_url, source_name));
            }
            Event::PlaybackSnapshot { snapshot } => {
                if !self.me.is_admin {
                    let correction =
                        self.reconciler
                            .on_snapshot(snapshot, received_at, &mut self.player);
                    log_correction(correction);
                }
            }
            Event::LiveStreamStarted => {
                self.reconciler.reset();
                self.player.unload();
                self.track = None;
                self.sink.begin_stream();
                CliDisplay::print_notice("Live stream started.");
            }
            Event::LiveStreamStopped => {
                self.sink.flush().await?;
                let stats = self.sink.stats();
                CliDisplay::print_notice(&format!(
                    "Live stream stopped ({} chunks received).",
                    stats.chunks
                ));
            }
        }

        Ok(false)
    }

    fn current_track(&self) -> Option<(&str, &str)> {
        self.track
            .as_ref()
            .map(|(url, name)| (url.as_str(), name.as_str()))
    }

    async fn publish_playback(&self) -> anyhow::Result<()> {
        let request = playback_update(
            &self.room.code,
            &self.player,
            self.current_track(),
            self.sender.server_now(),
        );
        self.sender.send(request).await
    }

    async fn start_live_stream(&mut self) -> anyhow::Result<()> {
        if self
            .room
            .playback
            .as_ref()
            .is_some_and(|playback| playback.is_live_stream())
        {
            return Ok(());
        }

        self.sender
            .send(Request::StartLiveStream {
                room_code: self.room.code.clone(),
            })
            .await
    }

    fn spawn_streamer(&mut self, path: PathBuf) {
        let cancel = CancellationToken::new();
        self.stream_cancel = Some(cancel.clone());

        let sender = self.sender.clone();
        let room_code = self.room.code.clone();
        let done_tx = self.stream_done_tx.clone();

        tokio::spawn(async move {
            let result = ChunkStreamer::stream_file(&sender, &room_code, &path, cancel).await;
            let _ = done_tx.send(result).await;
        });
    }

    fn cancel_stream(&mut self) {
        if let Some(cancel) = self.stream_cancel.take() {
            cancel.cancel();
        }
    }

    async fn leave(&mut self) -> anyhow::Result<()> {
        self.cancel_stream();

        match self
            .sender
            .request(Request::LeaveRoom {
                room_code: self.room.code.clone(),
            })
            .await?
        {
            ResponseBody::Left => Ok(()),
            ResponseBody::Error { message, .. } => {
                warn!("Server refused leave: {}", message);
                Ok(())
            }
            other => bail!("Invalid response from server during leave: {:?}", other),
        }
    }
}

fn playback_update(
    room_code: &str,
    player: &VirtualPlayer,
    track: Option<(&str, &str)>,
    client_timestamp: i64,
) -> Request {
    Request::UpdatePlayback {
        room_code: room_code.to_string(),
        position_seconds: player.position_seconds(),
        is_playing: player.is_playing(),
        client_timestamp,
        source_url: track.map(|(url, _)| url.to_string()),
        source_name: track.map(|(_, name)| name.to_string()),
    }
}

fn log_correction(correction: Correction) {
    if correction != Correction::None {
        debug!("Reconciler: {:?}", correction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{
        protocol::{MemberId, RequestEnvelope, parse_json},
        tcp_command::TcpCommand,
        tcp_command_id::TcpCommandId,
    };

    async fn admin_interface() -> (RoomInterface, mpsc::Receiver<TcpCommand>) {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (stream_done_tx, _stream_done_rx) = mpsc::channel(1);

        let admin = MemberInfo {
            id: MemberId::from("admin"),
            name: "Alice".to_string(),
            is_admin: true,
        };
        let session = RoomSession {
            room: RoomSnapshot {
                code: "AB12CD".to_string(),
                name: "Room".to_string(),
                admin_id: admin.id.clone(),
                members: vec![admin.clone()],
                playback: None,
            },
            member: admin,
        };

        let interface = RoomInterface::new(
            session,
            ServerSender::detached(commands_tx),
            ChunkSink::open(None).await.unwrap(),
            Duration::from_millis(100),
            stream_done_tx,
        );

        (interface, commands_rx)
    }

    fn sent_requests(commands_rx: &mut mpsc::Receiver<TcpCommand>) -> Vec<Request> {
        let mut requests = Vec::new();

        while let Ok(command) = commands_rx.try_recv() {
            if let TcpCommand::Json(TcpCommandId::Request, payload) = command {
                let envelope: RequestEnvelope = parse_json(&payload).unwrap();
                requests.push(envelope.request);
            }
        }

        requests
    }

    #[tokio::test]
    async fn admin_can_play_before_track_change_echo_arrives() {
        let (mut interface, mut commands_rx) = admin_interface().await;

        interface
            .handle_command(RoomCommand::Load {
                url: "https://cdn.example.org/a.mp3".to_string(),
                name: "a.mp3".to_string(),
            })
            .await
            .unwrap();
        interface.handle_command(RoomCommand::Play).await.unwrap();

        let requests = sent_requests(&mut commands_rx);
        assert_eq!(requests.len(), 2);
        assert!(matches!(&requests[0], Request::LoadTrack { source_url, .. }
            if source_url == "https://cdn.example.org/a.mp3"));
        let Request::UpdatePlayback {
            is_playing,
            source_url,
            ..
        } = &requests[1]
        else {
            panic!("expected playback update, got {:?}", requests[1]);
        };
        assert!(*is_playing);
        assert_eq!(source_url.as_deref(), Some("https://cdn.example.org/a.mp3"));

        interface
            .handle_event(
                Event::TrackChanged {
                    source_url: "https://cdn.example.org/a.mp3".to_string(),
                    source_name: "a.mp3".to_string(),
                },
                0,
            )
            .await
            .unwrap();
        assert!(interface.player.is_playing());
    }

    #[tokio::test]
    async fn play_without_any_track_is_refused() {
        let (mut interface, mut commands_rx) = admin_interface().await;

        interface.handle_command(RoomCommand::Play).await.unwrap();

        assert!(sent_requests(&mut commands_rx).is_empty());
        assert!(!interface.player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn playback_update_reports_player_position() {
        let mut player = VirtualPlayer::new();
        player.load("https://cdn.example.org/a.mp3");
        player.seek(12.0);
        player.play();
        tokio::time::advance(Duration::from_millis(1_500)).await;

        let request = playback_update(
            "AB12CD",
            &player,
            Some(("https://cdn.example.org/a.mp3", "a.mp3")),
            1_000,
        );

        let Request::UpdatePlayback {
            room_code,
            position_seconds,
            is_playing,
            client_timestamp,
            source_url,
            source_name,
        } = request
        else {
            panic!("expected playback update");
        };
        assert_eq!(room_code, "AB12CD");
        assert!((position_seconds - 13.5).abs() < 1e-6);
        assert!(is_playing);
        assert_eq!(client_timestamp, 1_000);
        assert_eq!(source_url.as_deref(), Some("https://cdn.example.org/a.mp3"));
        assert_eq!(source_name.as_deref(), Some("a.mp3"));
    }

    #[tokio::test]
    async fn update_without_track_omits_source() {
        let player = VirtualPlayer::new();

        let Request::UpdatePlayback {
            source_url,
            source_name,
            is_playing,
            ..
        } = playback_update("AB12CD", &player, None, 0)
        else {
            panic!("expected playback update");
        };
        assert_eq!(source_url, None);
        assert_eq!(source_name, None);
        assert!(!is_playing);
    }
}
