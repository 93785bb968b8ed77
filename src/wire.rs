//! Length-prefixed JSON framing over a byte stream (spec.md §6).
//!
//! Every frame on the wire is a 4-byte big-endian length followed by that
//! many bytes of JSON encoding a `(routingKey, Packet)` envelope. This is
//! the same shape the source's socket layer uses for its own length-prefixed
//! messages, generalized here to carry the routing key alongside the
//! packet instead of assuming a single fixed message type.

use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::log;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SamError;
use crate::packet::Packet;

/// Frames larger than this are refused rather than allocated; guards
/// against a peer sending a bogus length prefix.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    key: String,
    packet: Packet,
}

/// Writes one `(key, packet)` frame to `stream`.
pub async fn send_frame<W>(stream: &mut W, key: &str, packet: &Packet) -> Result<(), SamError>
where
    W: AsyncWrite + Unpin,
{
    let envelope = Envelope { key: key.to_string(), packet: packet.clone() };
    let body = serde_json::to_vec(&envelope)?;
    let length_bytes = (body.len() as u32).to_be_bytes();

    stream.write_all(&length_bytes).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;

    log!(LogLevel::Trace, "sent frame key={} bytes={}", key, body.len());
    Ok(())
}

/// Reads one `(key, packet)` frame from `stream`. Returns
/// [`SamError::Transport`] on a clean EOF (the peer closed the connection)
/// as well as on any I/O failure, so callers can treat connection loss
/// uniformly.
pub async fn recv_frame<R>(stream: &mut R) -> Result<(String, Packet), SamError>
where
    R: AsyncRead + Unpin,
{
    let mut length_bytes = [0u8; 4];
    stream.read_exact(&mut length_bytes).await.map_err(|e| {
        SamError::transport(format!("connection closed while reading frame length: {e}"))
    })?;
    let length = u32::from_be_bytes(length_bytes);
    if length > MAX_FRAME_BYTES {
        return Err(SamError::protocol(format!(
            "frame of {length} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }

    let mut body = vec![0u8; length as usize];
    stream.read_exact(&mut body).await.map_err(|e| {
        SamError::transport(format!("connection closed while reading frame body: {e}"))
    })?;

    log!(LogLevel::Trace, "received frame bytes={}", body.len());

    let envelope: Envelope = serde_json::from_slice(&body)?;
    Ok((envelope.key, envelope.packet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn frame_round_trips_over_a_duplex_pair() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let packet = Packet::new("alice", "samcore", "helloWorld")
            .args(json!({"text": "there"}))
            .return_code(1)
            .build();

        send_frame(&mut a, "samcore.helloWorld", &packet).await.unwrap();
        let (key, received) = recv_frame(&mut b).await.unwrap();

        assert_eq!(key, "samcore.helloWorld");
        assert_eq!(received.sender, "alice");
        assert_eq!(received.api_call, "helloWorld");
        assert_eq!(received.return_code, Some(1));
    }

    #[tokio::test]
    async fn recv_on_closed_stream_is_a_transport_error() {
        let (a, mut b) = tokio::io::duplex(4096);
        drop(a);
        let err = recv_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, SamError::Transport(_)));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(16);
        a.write_all(&(MAX_FRAME_BYTES + 1).to_be_bytes()).await.unwrap();
        let err = recv_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, SamError::Protocol(_)));
    }
}
