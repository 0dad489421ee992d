use core::error::Error;
use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use shared::{
    PROTOCOL_VERSION,
    error::ProtocolError,
    now_millis,
    protocol::{ErrorKind, Hello, RequestEnvelope, Response, ResponseBody, Welcome, parse_json},
    received_tcp_command::ReceivedTcpCommand,
    tcp_command::TcpCommand,
    tcp_command_id::TcpCommandId,
};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    time::{interval, timeout},
};

use crate::{
    broadcast::{ConnectionHandle, ConnectionId},
    state::ServerState,
    tcp_command_handler::TcpCommandHandler,
};

const PING_INTERVAL: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TcpHandler;

impl TcpHandler {
    /// Serves one connection until EOF, error or idle timeout. The caller is
    /// responsible for running disconnect cleanup afterwards.
    pub async fn handle_stream(
        stream: TcpStream,
        connection_id: ConnectionId,
        state: Arc<ServerState>,
        queue_len: usize,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let (mut reader, mut writer) = stream.into_split();

        if !Self::handle_handshake(&mut reader, &mut writer, connection_id).await? {
            return Ok(());
        }

        let (connection, outbound_rx) = ConnectionHandle::channel(connection_id, queue_len);

        let mut writer_task = tokio::spawn(write_loop(writer, outbound_rx));

        tokio::select! {

            result = Self::read_loop(&mut reader, &connection, &state) => {

                writer_task.abort();
                result
            }

            result = &mut writer_task => {

                result?
            }
        }
    }

    async fn read_loop(
        reader: &mut OwnedReadHalf,
        connection: &ConnectionHandle,
        state: &ServerState,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        loop {
            let received = match timeout(IDLE_TIMEOUT, TcpCommand::read_from_stream(reader)).await {
                Ok(result) => result?,
                Err(_) => return Err("Connection idle for too long".into()),
            };

            let incoming_command = match received {
                ReceivedTcpCommand::EOF => return Ok(()),
                ReceivedTcpCommand::Command(command) => command,
            };

            match incoming_command {
                TcpCommand::Json(TcpCommandId::Request, payload) => {
                    let envelope: RequestEnvelope = match parse_json(&payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!("Malformed request from connection {}: {}", connection.id, e);
                            let response = Response {
                                request_id: 0,
                                body: ResponseBody::Error {
                                    kind: ErrorKind::Protocol,
                                    message: e.to_string(),
                                },
                            };
                            connection.send(response.to_command()?).await;
                            continue;
                        }
                    };

                    if let Some(response) =
                        TcpCommandHandler::handle_request(envelope, connection, state).await
                    {
                        connection.send(response.to_command()?).await;
                    }
                }

                TcpCommand::Chunk(TcpCommandId::UploadChunk, chunk) => {
                    TcpCommandHandler::handle_chunk(chunk, connection, state).await;
                }

                TcpCommand::Simple(TcpCommandId::Pong) => {}

                other => {
                    debug!(
                        "Ignoring unexpected {} from connection {}",
                        other.id(),
                        connection.id
                    );
                }
            }
        }
    }

    async fn handle_handshake(
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        connection_id: ConnectionId,
    ) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let received_command =
            match timeout(HANDSHAKE_TIMEOUT, TcpCommand::read_from_stream(reader)).await {
                Ok(result) => result?,
                Err(_) => return Err("Handshake timed out".into()),
            };

        let received_command = match received_command {
            ReceivedTcpCommand::EOF => return Ok(false),
            ReceivedTcpCommand::Command(cmd) => cmd,
        };

        let hello: Hello = match received_command {
            TcpCommand::Json(TcpCommandId::Hello, payload) => parse_json(&payload)?,
            other => {
                return Err(ProtocolError::UnexpectedCommand(format!(
                    "{} before hello",
                    other.id()
                ))
                .into());
            }
        };

        if hello.protocol_version != PROTOCOL_VERSION {
            let response = Response {
                request_id: 0,
                body: ResponseBody::Error {
                    kind: ErrorKind::Protocol,
                    message: format!(
                        "Protocol version {} is not supported (server speaks {}).",
                        hello.protocol_version, PROTOCOL_VERSION
                    ),
                },
            };
            response.to_command()?.write_to_stream(writer).await?;

            info!(
                "Connection {} sent unsupported protocol version {}",
                connection_id, hello.protocol_version
            );

            return Ok(false);
        }

        let welcome = Welcome {
            connection_id,
            server_time: now_millis(),
        };
        TcpCommand::json(TcpCommandId::Welcome, &welcome)?
            .write_to_stream(writer)
            .await?;

        Ok(true)
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Arc<TcpCommand>>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.tick().await;

    loop {
        tokio::select! {

            command = outbound_rx.recv() => {

                match command {
                    Some(command) => command.write_to_stream(&mut writer).await?,
                    None => return Ok(()),
                }
            }

            _ = ping_interval.tick() => {

                TcpCommand::Simple(TcpCommandId::Ping)
                    .write_to_stream(&mut writer)
                    .await?;
            }
        }
    }
}
