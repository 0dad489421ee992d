use crate::{error::ProtocolError, tcp_command_payload_type::TcpCommandPayloadType};

const COMMAND_BYTE_OFFSET: u8 = 69;

macro_rules! tcp_command_id_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, PartialEq, Eq, Clone, Copy, strum_macros::Display)]
        #[repr(u8)]
        $vis enum $name {
            $($variant),*
        }

        impl $name {

            pub fn to_byte(&self) -> u8 {
                *self as u8 + COMMAND_BYTE_OFFSET
            }

            pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
                match byte.wrapping_sub(COMMAND_BYTE_OFFSET) {
                    $(x if x == $name::$variant as u8 => Ok($name::$variant),)*
                    _ => Err(ProtocolError::InvalidCommandId(byte)),
                }
            }
        }
    };
}

tcp_command_id_enum! {
    pub enum TcpCommandId {
        Hello,
        Welcome,
        Ping,
        Pong,
        Request,
        Response,
        Event,
        UploadChunk,
        RelayedChunk,
    }
}

impl TcpCommandId {
    pub fn get_payload_type(&self) -> TcpCommandPayloadType {
        match &self {
            TcpCommandId::Hello => TcpCommandPayloadType::Json,
            TcpCommandId::Welcome => TcpCommandPayloadType::Json,
            TcpCommandId::Ping => TcpCommandPayloadType::Simple,
            TcpCommandId::Pong => TcpCommandPayloadType::Simple,
            TcpCommandId::Request => TcpCommandPayloadType::Json,
            TcpCommandId::Response => TcpCommandPayloadType::Json,
            TcpCommandId::Event => TcpCommandPayloadType::Json,
            TcpCommandId::UploadChunk => TcpCommandPayloadType::Chunk,
            TcpCommandId::RelayedChunk => TcpCommandPayloadType::Chunk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_survive_byte_conversion() {
        for id in [
            TcpCommandId::Hello,
            TcpCommandId::Event,
            TcpCommandId::RelayedChunk,
        ] {
            assert_eq!(TcpCommandId::from_byte(id.to_byte()).unwrap(), id);
        }
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        assert!(matches!(
            TcpCommandId::from_byte(0),
            Err(ProtocolError::InvalidCommandId(0))
        ));
    }
}
