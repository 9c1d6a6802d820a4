//! Mesh transport
//!
//! Sessions are encrypted QUIC connections; every stream on them is
//! reliable and ordered, so retries and acknowledgement stay the
//! transport's responsibility. Audio frames travel on unidirectional
//! streams; bidirectional streams carry a one-byte tag selecting the
//! hello handshake or a companion clip transfer.

pub mod endpoint;
pub mod receive;
pub mod transmit;

pub use endpoint::MeshEndpoint;
pub use transmit::Transmitter;

use iroh::endpoint::{RecvStream, SendStream};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::NetworkError;

/// First byte of a bidirectional stream: session hello
pub(crate) const TAG_HELLO: u8 = 0x01;
/// First byte of a bidirectional stream: companion clip transfer
pub(crate) const TAG_CLIP: u8 = 0x02;

/// Write a length-prefixed chunk
pub(crate) async fn write_chunk(stream: &mut SendStream, bytes: &[u8]) -> Result<(), NetworkError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| NetworkError::MessageTooLarge(bytes.len()))?;
    stream
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| NetworkError::SendFailed {
            peer: "stream".into(),
            detail: e.to_string(),
        })?;
    stream
        .write_all(bytes)
        .await
        .map_err(|e| NetworkError::SendFailed {
            peer: "stream".into(),
            detail: e.to_string(),
        })?;
    Ok(())
}

/// Read a length-prefixed chunk, bounded by `max`.
///
/// Any failure on the length prefix is reported as `ReceiveFailed`; for a
/// stream that simply finished, callers treat that as end-of-stream.
pub(crate) async fn read_chunk(stream: &mut RecvStream, max: usize) -> Result<Vec<u8>, NetworkError> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max {
        return Err(NetworkError::MessageTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
    Ok(buf)
}

/// Serialize and send one message
pub(crate) async fn write_msg<T: Serialize>(
    stream: &mut SendStream,
    value: &T,
) -> Result<(), NetworkError> {
    let bytes = bincode::serialize(value)
        .map_err(|e| NetworkError::ReceiveFailed(format!("serialize: {e}")))?;
    write_chunk(stream, &bytes).await
}

/// Receive and deserialize one message
pub(crate) async fn read_msg<T: DeserializeOwned>(
    stream: &mut RecvStream,
    max: usize,
) -> Result<T, NetworkError> {
    let bytes = read_chunk(stream, max).await?;
    bincode::deserialize(&bytes)
        .map_err(|e| NetworkError::ReceiveFailed(format!("deserialize: {e}")))
}
