//! Buffered frame transport over TCP

use crate::common::{Error, Result};
use crate::protocol::{Frame, FrameError};
use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Sends and receives [`Frame`] values on a TCP stream.
///
/// Incoming bytes accumulate in a read buffer until a whole frame is
/// available; a partial frame never blocks frames already buffered.
#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Open a connection to `addr`.
    pub async fn connect(addr: &str) -> Result<Connection> {
        let socket = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))?;
        socket.set_nodelay(true)?;
        Ok(Connection::new(socket))
    }

    /// Read a single frame.
    ///
    /// Returns `None` when the peer closed the stream on a frame boundary.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(Error::ConnectionFailed(
                    "connection reset by peer".into(),
                ));
            }
        }
    }

    fn parse_frame(&mut self) -> Result<Option<Frame>> {
        let mut buf = Cursor::new(&self.buffer[..]);

        match Frame::check(&mut buf) {
            Ok(()) => {
                let len = buf.position() as usize;
                buf.set_position(0);
                let frame = Frame::parse(&mut buf).map_err(|e| Error::Protocol(e.to_string()))?;
                self.buffer.advance(len);
                Ok(Some(frame))
            }
            Err(FrameError::Incomplete) => Ok(None),
            Err(FrameError::Invalid(reason)) => Err(Error::Protocol(reason)),
        }
    }

    /// Write a single frame and flush it.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_split_across_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = tokio::spawn(async move {
            let mut socket = TcpStream::connect(addr).await.unwrap();
            socket.write_all(b"+O").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            socket.write_all(b"K\r\n:7\r\n").await.unwrap();
        });

        let (socket, _) = listener.accept().await.unwrap();
        let mut conn = Connection::new(socket);
        assert_eq!(
            conn.read_frame().await.unwrap(),
            Some(Frame::Simple("OK".into()))
        );
        assert_eq!(conn.read_frame().await.unwrap(), Some(Frame::Integer(7)));
        writer.await.unwrap();
        assert_eq!(conn.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_frame_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut socket = TcpStream::connect(addr).await.unwrap();
            socket.write_all(b"!oops\r\n").await.unwrap();
        });

        let (socket, _) = listener.accept().await.unwrap();
        let mut conn = Connection::new(socket);
        assert!(matches!(conn.read_frame().await, Err(Error::Protocol(_))));
    }
}
