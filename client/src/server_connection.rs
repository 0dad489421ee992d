use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, anyhow, bail};
use log::{debug, warn};
use shared::{
    PROTOCOL_VERSION, now_millis,
    protocol::{
        Event, Hello, Request, RequestEnvelope, Response, ResponseBody, Welcome, parse_json,
    },
    received_tcp_command::ReceivedTcpCommand,
    tcp_command::{ChunkFrame, TcpCommand},
    tcp_command_id::TcpCommandId,
};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, mpsc, oneshot},
    time::timeout,
};

const OUTBOUND_QUEUE_LEN: usize = 256;
const INCOMING_QUEUE_LEN: usize = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<ResponseBody>>>>;

#[derive(Debug)]
pub enum Incoming {
    Event { event: Event, received_at: i64 },
    Chunk(ChunkFrame),
    Disconnected(String),
}

/// Offset between the local wall clock and the server's, estimated once from
/// the handshake round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerClock {
    offset_ms: i64,
}

impl ServerClock {
    pub fn estimate(sent_at: i64, server_time: i64, received_at: i64) -> Self {
        let midpoint = sent_at + (received_at - sent_at) / 2;

        Self {
            offset_ms: server_time - midpoint,
        }
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    pub fn now(&self) -> i64 {
        now_millis() + self.offset_ms
    }
}

/// Cloneable sending side of the connection.
#[derive(Clone)]
pub struct ServerSender {
    commands: mpsc::Sender<TcpCommand>,
    pending: PendingRequests,
    next_request_id: Arc<AtomicU64>,
    clock: ServerClock,
}

pub struct ServerConnection {
    pub sender: ServerSender,
    pub incoming: mpsc::Receiver<Incoming>,
    pub connection_id: u64,
}

impl ServerConnection {
    pub async fn connect(server_addr: &str) -> anyhow::Result<Self> {
        let mut stream = TcpStream::connect(server_addr)
            .await
            .with_context(|| format!("Could not connect to {}", server_addr))?;
        stream.set_nodelay(true)?;

        let (connection_id, clock) = perform_handshake(&mut stream).await?;
        debug!(
            "Connected as connection {} (clock offset {}ms)",
            connection_id,
            clock.offset_ms()
        );

        let (reader, writer) = stream.into_split();
        let (commands_tx, commands_rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_QUEUE_LEN);
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(write_loop(writer, commands_rx));
        tokio::spawn(read_loop(
            reader,
            commands_tx.clone(),
            Arc::clone(&pending),
            incoming_tx,
            clock,
        ));

        Ok(Self {
            sender: ServerSender {
                commands: commands_tx,
                pending,
                next_request_id: Arc::new(AtomicU64::new(1)),
                clock,
            },
            incoming: incoming_rx,
            connection_id,
        })
    }
}

impl ServerSender {
    #[cfg(test)]
    pub fn detached(commands: mpsc::Sender<TcpCommand>) -> Self {
        Self {
            commands,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: Arc::new(AtomicU64::new(1)),
            clock: ServerClock::default(),
        }
    }

    /// Current time on the server's clock.
    pub fn server_now(&self) -> i64 {
        self.clock.now()
    }

    pub async fn request(&self, request: Request) -> anyhow::Result<ResponseBody> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();

        self.pending.lock().await.insert(request_id, response_tx);

        let envelope = RequestEnvelope {
            request_id,
            request,
        };
        if let Err(e) = self.write(envelope.to_command()?).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match timeout(REQUEST_TIMEOUT, response_rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => bail!("Connection closed before the server replied"),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                bail!("Server did not reply in time")
            }
        }
    }

    /// Fire-and-forget; the server never answers these.
    pub async fn send(&self, request: Request) -> anyhow::Result<()> {
        if request.expects_response() {
            warn!("Reply to {:?} will be discarded", request);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);

        self.write(
            RequestEnvelope {
                request_id,
                request,
            }
            .to_command()?,
        )
        .await
    }

    pub async fn upload_chunk(&self, chunk: ChunkFrame) -> anyhow::Result<()> {
        self.write(TcpCommand::Chunk(TcpCommandId::UploadChunk, chunk))
            .await
    }

    async fn write(&self, command: TcpCommand) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("Connection to server is closed"))
    }
}

async fn perform_handshake(stream: &mut TcpStream) -> anyhow::Result<(u64, ServerClock)> {
    let sent_at = now_millis();

    TcpCommand::json(
        TcpCommandId::Hello,
        &Hello {
            protocol_version: PROTOCOL_VERSION,
        },
    )?
    .write_to_stream(stream)
    .await?;

    let received_command = TcpCommand::read_from_stream(stream).await?;
    let received_at = now_millis();

    let received_command = match received_command {
        ReceivedTcpCommand::EOF => bail!("Unexpected EOF from server during handshake"),
        ReceivedTcpCommand::Command(command) => command,
    };

    match received_command {
        TcpCommand::Json(TcpCommandId::Welcome, payload) => {
            let welcome: Welcome = parse_json(&payload)?;
            Ok((
                welcome.connection_id,
                ServerClock::estimate(sent_at, welcome.server_time, received_at),
            ))
        }
        TcpCommand::Json(TcpCommandId::Response, payload) => {
            let response: Response = parse_json(&payload)?;
            match response.body {
                ResponseBody::Error { message, .. } => Err(anyhow!(message)),
                _ => bail!("Invalid response from server during handshake"),
            }
        }
        _ => bail!("Invalid command from server during handshake"),
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut commands_rx: mpsc::Receiver<TcpCommand>) {
    while let Some(command) = commands_rx.recv().await {
        if let Err(e) = command.write_to_stream(&mut writer).await {
            warn!("Error writing to server: {}", e);
            return;
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    commands: mpsc::Sender<TcpCommand>,
    pending: PendingRequests,
    incoming: mpsc::Sender<Incoming>,
    clock: ServerClock,
) {
    let reason = loop {
        let received = match TcpCommand::read_from_stream(&mut reader).await {
            Ok(ReceivedTcpCommand::EOF) => break "Server closed connection.".to_string(),
            Ok(ReceivedTcpCommand::Command(command)) => command,
            Err(e) => break format!("Lost connection to server: {}", e),
        };

        match received {
            TcpCommand::Simple(TcpCommandId::Ping) => {
                let _ = commands.send(TcpCommand::Simple(TcpCommandId::Pong)).await;
            }

            TcpCommand::Json(TcpCommandId::Response, payload) => {
                match parse_json::<Response>(&payload) {
                    Ok(response) => {
                        match pending.lock().await.remove(&response.request_id) {
                            Some(response_tx) => {
                                let _ = response_tx.send(response.body);
                            }
                            None => debug!("Unsolicited response {:?}", response.body),
                        }
                    }
                    Err(e) => warn!("Malformed response from server: {}", e),
                }
            }

            TcpCommand::Json(TcpCommandId::Event, payload) => {
                let received_at = clock.now();

                match parse_json::<Event>(&payload) {
                    Ok(event) => {
                        if incoming
                            .send(Incoming::Event { event, received_at })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => warn!("Malformed event from server: {}", e),
                }
            }

            TcpCommand::Chunk(TcpCommandId::RelayedChunk, chunk) => {
                if incoming.send(Incoming::Chunk(chunk)).await.is_err() {
                    return;
                }
            }

            other => debug!("Ignoring unexpected {} from server", other.id()),
        }
    };

    pending.lock().await.clear();
    let _ = incoming.send(Incoming::Disconnected(reason)).await;
}
