use log::{debug, info};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::core::protocol::{WireMessage, PROTOCOL_VERSION};
use crate::utils::{DhtError, Result};

/// Default upper bound for a single frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Serialize)]
struct OutboundFrame<'a> {
    version: u16,
    message: &'a WireMessage,
}

#[derive(Deserialize)]
struct FrameHeader {
    version: u16,
}

#[derive(Deserialize)]
struct InboundFrame {
    message: WireMessage,
}

pub struct Transport;

impl Transport {
    pub async fn connect(addr: SocketAddr) -> Result<TcpStream> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            DhtError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
        })?;

        debug!("Connected to {}", addr);
        Ok(stream)
    }

    /// Bind a TCP listener with SO_REUSEADDR and an explicit accept backlog.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| DhtError::NetworkError(format!("Failed to create socket: {}", e)))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| DhtError::NetworkError(format!("Failed to set reuse_address: {}", e)))?;

        socket
            .bind(&addr.into())
            .map_err(|e| DhtError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;

        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        socket
            .listen(backlog)
            .map_err(|e| DhtError::NetworkError(format!("Failed to listen on {}: {}", addr, e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| DhtError::NetworkError(format!("Failed to set nonblocking: {}", e)))?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener).map_err(|e| {
            DhtError::NetworkError(format!("Failed to convert to tokio listener: {}", e))
        })?;

        info!("Listening on {} (backlog {})", addr, backlog);
        Ok(listener)
    }

    pub async fn send_data<W>(stream: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let len = u32::try_from(data.len()).map_err(|_| DhtError::MessageTooLarge(data.len()))?;
        stream.write_u32(len).await?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn receive_data<R>(stream: &mut R, max_size: usize) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let len = stream.read_u32().await? as usize;

        if len > max_size {
            return Err(DhtError::MessageTooLarge(len));
        }

        let mut buffer = vec![0u8; len];
        stream.read_exact(&mut buffer).await?;

        Ok(buffer)
    }

    /// Write one versioned frame.
    pub async fn write_message<W>(stream: &mut W, message: &WireMessage) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = OutboundFrame {
            version: PROTOCOL_VERSION,
            message,
        };
        let data = serde_json::to_vec(&frame)?;
        Self::send_data(stream, &data).await
    }

    /// Read one versioned frame. The version is checked before the message
    /// body is decoded, so a newer peer gets a deterministic refusal.
    pub async fn read_message<R>(stream: &mut R, max_size: usize) -> Result<WireMessage>
    where
        R: AsyncRead + Unpin,
    {
        let data = Self::receive_data(stream, max_size).await?;
        decode_frame(&data)
    }
}

fn decode_frame(data: &[u8]) -> Result<WireMessage> {
    let header: FrameHeader = serde_json::from_slice(data)?;
    if header.version != PROTOCOL_VERSION {
        return Err(DhtError::UnsupportedVersion(header.version));
    }

    let frame: InboundFrame = serde_json::from_slice(data)?;
    Ok(frame.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{ErrorEnvelope, Request, Response};
    use crate::network::dht::{Contact, Identifier};
    use tokio::io::duplex;

    fn ping() -> WireMessage {
        let destination = Contact::new(Identifier::from(9u64), "127.0.0.1".parse().unwrap(), 1);
        WireMessage::Request(Request::ping(destination))
    }

    #[tokio::test]
    async fn test_frame_round_trip_over_pipe() {
        let (mut client, mut server) = duplex(4096);

        Transport::write_message(&mut client, &ping()).await.unwrap();
        Transport::write_message(
            &mut client,
            &WireMessage::Error(ErrorEnvelope::new("value not found")),
        )
        .await
        .unwrap();

        let first = Transport::read_message(&mut server, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        assert_eq!(first, ping());

        let second = Transport::read_message(&mut server, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        assert_eq!(
            second,
            WireMessage::Error(ErrorEnvelope::new("value not found"))
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = duplex(4096);
        Transport::send_data(&mut client, &[b'x'; 128]).await.unwrap();

        let result = Transport::read_message(&mut server, 64).await;
        assert!(matches!(result, Err(DhtError::MessageTooLarge(128))));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_serialization_error() {
        let (mut client, mut server) = duplex(4096);
        Transport::send_data(&mut client, b"\x00\x01not json").await.unwrap();

        let result = Transport::read_message(&mut server, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(result, Err(DhtError::SerializationError(_))));
    }

    #[tokio::test]
    async fn test_unknown_version_rejected_before_body() {
        let (mut client, mut server) = duplex(4096);
        let frame = br#"{"version":99,"message":{"something_new":{}}}"#;
        Transport::send_data(&mut client, frame).await.unwrap();

        let result = Transport::read_message(&mut server, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(result, Err(DhtError::UnsupportedVersion(99))));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_io_error() {
        let (mut client, mut server) = duplex(4096);
        client.write_u32(100).await.unwrap();
        client.write_all(b"short").await.unwrap();
        drop(client);

        let result = Transport::read_message(&mut server, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(result, Err(DhtError::IoError(_))));
    }

    #[test]
    fn test_decode_response_frame() {
        let data = br#"{"version":1,"message":{"response":{"kind":"pong","id":"0000000000000000000000000000000000000009"}}}"#;
        let message = decode_frame(data).unwrap();
        assert_eq!(
            message,
            WireMessage::Response(Response::Pong {
                id: Identifier::from(9u64)
            })
        );
    }
}
