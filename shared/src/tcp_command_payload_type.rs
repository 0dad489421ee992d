#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpCommandPayloadType {
    Simple,
    Json,
    Chunk,
}
