use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    MAX_FRAME_LEN, error::ProtocolError, received_tcp_command::ReceivedTcpCommand,
    tcp_command_id::TcpCommandId, tcp_command_payload_type::TcpCommandPayloadType,
};

/// An opaque encoded audio segment travelling admin -> server -> listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub room_code: String,
    pub timestamp_ms: i64,
    pub data: Vec<u8>,
}

impl ChunkFrame {
    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.room_code.len() > u8::MAX as usize {
            return Err(ProtocolError::MalformedChunk);
        }

        let mut bytes = Vec::with_capacity(8 + 1 + self.room_code.len() + self.data.len());
        bytes.extend(self.timestamp_ms.to_be_bytes());
        bytes.push(self.room_code.len() as u8);
        bytes.extend(self.room_code.as_bytes());
        bytes.extend(&self.data);

        Ok(bytes)
    }

    fn decode(mut payload: Vec<u8>) -> Result<Self, ProtocolError> {
        if payload.len() < 9 {
            return Err(ProtocolError::MalformedChunk);
        }

        let mut timestamp_buf = [0u8; 8];
        timestamp_buf.copy_from_slice(&payload[..8]);
        let code_len = payload[8] as usize;

        if payload.len() < 9 + code_len {
            return Err(ProtocolError::MalformedChunk);
        }

        let room_code = String::from_utf8(payload[9..9 + code_len].to_vec())?;
        let data = payload.split_off(9 + code_len);

        Ok(Self {
            room_code,
            timestamp_ms: i64::from_be_bytes(timestamp_buf),
            data,
        })
    }
}

#[derive(Debug, Clone)]
pub enum TcpCommand {
    Simple(TcpCommandId),
    Json(TcpCommandId, String),
    Chunk(TcpCommandId, ChunkFrame),
}

impl TcpCommand {
    pub fn json<T: serde::Serialize>(id: TcpCommandId, value: &T) -> Result<Self, ProtocolError> {
        Ok(TcpCommand::Json(id, serde_json::to_string(value)?))
    }

    pub fn id(&self) -> TcpCommandId {
        match self {
            TcpCommand::Simple(id) | TcpCommand::Json(id, _) | TcpCommand::Chunk(id, _) => *id,
        }
    }

    pub async fn write_to_stream<W>(&self, stream: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = match &self {
            TcpCommand::Simple(id) => vec![id.to_byte()],
            TcpCommand::Json(id, payload) => framed(*id, payload.as_bytes())?,
            TcpCommand::Chunk(id, chunk) => framed(*id, &chunk.encode()?)?,
        };

        stream.write_all(&bytes).await?;
        stream.flush().await?;

        Ok(())
    }

    pub async fn read_from_stream<R>(stream: &mut R) -> Result<ReceivedTcpCommand, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0; 1];

        let first_byte = match stream.read(&mut buf).await {
            Ok(0) => return Ok(ReceivedTcpCommand::EOF),
            Ok(_) => buf[0],
            Err(e) => return Err(e.into()),
        };

        let command_id = TcpCommandId::from_byte(first_byte)?;

        let command = match command_id.get_payload_type() {
            TcpCommandPayloadType::Simple => TcpCommand::Simple(command_id),
            TcpCommandPayloadType::Json => {
                let payload = read_payload(stream).await?;
                TcpCommand::Json(command_id, String::from_utf8(payload)?)
            }
            TcpCommandPayloadType::Chunk => {
                let payload = read_payload(stream).await?;
                TcpCommand::Chunk(command_id, ChunkFrame::decode(payload)?)
            }
        };

        Ok(ReceivedTcpCommand::Command(command))
    }
}

fn framed(id: TcpCommandId, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut bytes = Vec::with_capacity(5 + payload.len());
    bytes.push(id.to_byte());
    bytes.extend((payload.len() as u32).to_be_bytes());
    bytes.extend(payload);

    Ok(bytes)
}

async fn read_payload<R>(stream: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let payload_len = u32::from_be_bytes(len_buf) as usize;

    if payload_len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload_len));
    }

    let mut payload = vec![0; payload_len];
    stream.read_exact(&mut payload).await?;

    Ok(payload)
}
