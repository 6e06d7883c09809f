//! TCP transport to the projector.
//!
//! One request is in flight at a time: [`ProjectorLink::exchange`] holds the
//! connection mutex from the write until the full response has been read, so
//! a response always belongs to the request just sent.
//!
//! The connection is opened lazily and kept between exchanges.  When a kept
//! connection fails (the device closed it, or the runtime that registered it
//! is gone) the request is sent once more on a fresh connection.  Every
//! request is an absolute get or set, so a repeat is harmless.  A failure on
//! a fresh connection is returned as is.

use std::time::Duration;

use async_trait::async_trait;
use theater_core::protocol::codec::body_len;
use theater_core::protocol::messages::HEADER_SIZE;
use theater_core::ErrorKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Sends one encoded request frame and returns the raw response frame.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// # Errors
    ///
    /// Returns a transport [`ErrorKind`] when the device cannot be reached or
    /// does not answer in time.
    async fn exchange(&self, frame: Vec<u8>) -> Result<Vec<u8>, ErrorKind>;
}

/// [`DeviceLink`] over a plain TCP stream.
pub struct ProjectorLink {
    address: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl ProjectorLink {
    /// Creates an unconnected link to `address` (`host:port`).
    pub fn new(address: impl Into<String>, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            read_timeout,
            stream: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream, ErrorKind> {
        match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => {
                debug!("connected to projector at {}", self.address);
                Ok(stream)
            }
            Ok(Err(e)) => {
                warn!("connect to {} failed: {e}", self.address);
                Err(ErrorKind::NetworkTimeout)
            }
            Err(_) => {
                warn!("connect to {} timed out", self.address);
                Err(ErrorKind::NetworkTimeout)
            }
        }
    }

    async fn read_exact(&self, stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), ErrorKind> {
        match timeout(self.read_timeout, stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("projector closed the connection mid-response");
                Err(ErrorKind::OtherCommError)
            }
            Ok(Err(e)) => {
                debug!("read from projector failed: {e}");
                Err(ErrorKind::ReadError)
            }
            Err(_) => Err(ErrorKind::CommTimeout),
        }
    }

    async fn round_trip(&self, stream: &mut TcpStream, frame: &[u8]) -> Result<Vec<u8>, ErrorKind> {
        stream.write_all(frame).await.map_err(|e| {
            debug!("write to projector failed: {e}");
            ErrorKind::WriteError
        })?;

        let mut header = [0u8; HEADER_SIZE];
        self.read_exact(stream, &mut header).await?;

        let mut response = header.to_vec();
        response.resize(HEADER_SIZE + body_len(&header), 0);
        self.read_exact(stream, &mut response[HEADER_SIZE..]).await?;
        Ok(response)
    }
}

#[async_trait]
impl DeviceLink for ProjectorLink {
    async fn exchange(&self, frame: Vec<u8>) -> Result<Vec<u8>, ErrorKind> {
        let mut slot = self.stream.lock().await;
        if let Some(mut stream) = slot.take() {
            match self.round_trip(&mut stream, &frame).await {
                Ok(response) => {
                    *slot = Some(stream);
                    return Ok(response);
                }
                Err(kind) => debug!("kept connection to {} failed ({kind}); reconnecting", self.address),
            }
        }

        let mut stream = self.connect().await?;
        let response = self.round_trip(&mut stream, &frame).await?;
        *slot = Some(stream);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const SHORT: Duration = Duration::from_millis(200);
    const GET_FRAME: [u8; HEADER_SIZE] = [0x02, 0x0A, b'S', b'O', b'N', b'Y', 0x01, 0x01, 0x02, 0x00];

    fn ok_reply(request: &[u8; HEADER_SIZE]) -> [u8; HEADER_SIZE + 2] {
        [0x02, 0x0A, b'S', b'O', b'N', b'Y', 0x01, request[7], request[8], 0x02, 0x00, 0x03]
    }

    /// Device on plain threads, independent of any Tokio runtime.
    fn spawn_thread_device() -> std::net::SocketAddr {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for socket in listener.incoming() {
                let Ok(mut socket) = socket else { return };
                std::thread::spawn(move || {
                    let mut request = [0u8; HEADER_SIZE];
                    while socket.read_exact(&mut request).is_ok() {
                        if socket.write_all(&ok_reply(&request)).is_err() {
                            return;
                        }
                    }
                });
            }
        });
        addr
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_exchange_reads_header_then_declared_body() {
        // Arrange: a device that answers any request with a 2-byte OK payload
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; HEADER_SIZE];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&ok_reply(&request)).await.unwrap();
        });
        let link = ProjectorLink::new(addr.to_string(), SHORT, SHORT);

        // Act
        let response = link.exchange(GET_FRAME.to_vec()).await.unwrap();

        // Assert
        assert_eq!(response.len(), HEADER_SIZE + 2);
        assert_eq!(&response[HEADER_SIZE..], &[0x00, 0x03]);
    }

    #[tokio::test]
    async fn test_connect_refused_maps_to_network_timeout() {
        // Bind then drop to get a port that is very likely closed.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let link = ProjectorLink::new(addr.to_string(), SHORT, SHORT);

        let result = link.exchange(vec![0; HEADER_SIZE]).await;

        assert_eq!(result, Err(ErrorKind::NetworkTimeout));
    }

    #[tokio::test]
    async fn test_silent_device_maps_to_comm_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let link = ProjectorLink::new(addr.to_string(), SHORT, Duration::from_millis(50));

        let result = link.exchange(vec![0; HEADER_SIZE]).await;

        assert_eq!(result, Err(ErrorKind::CommTimeout));
    }

    #[tokio::test]
    async fn test_truncated_response_maps_to_other_comm_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; HEADER_SIZE];
            socket.read_exact(&mut request).await.unwrap();
            // Header promises 4 body bytes; only one arrives before close.
            socket
                .write_all(&[0x02, 0x0A, b'S', b'O', b'N', b'Y', 0x01, 0x80, 0x01, 0x04, b'M'])
                .await
                .unwrap();
        });
        let link = ProjectorLink::new(addr.to_string(), SHORT, SHORT);

        let result = link.exchange(vec![0; HEADER_SIZE]).await;

        assert_eq!(result, Err(ErrorKind::OtherCommError));
    }

    #[test]
    fn test_connection_from_a_shut_down_runtime_is_replaced() {
        // Arrange: the first exchange opens the connection on a runtime that
        // is dropped right after
        let addr = spawn_thread_device();
        let link = ProjectorLink::new(addr.to_string(), SHORT, SHORT);
        let first = runtime().block_on(link.exchange(GET_FRAME.to_vec()));

        // Act
        let second = runtime().block_on(link.exchange(GET_FRAME.to_vec()));

        // Assert
        assert!(first.is_ok(), "{first:?}");
        assert_eq!(second.map(|r| r[HEADER_SIZE..].to_vec()), Ok(vec![0x00, 0x03]));
    }

    #[tokio::test]
    async fn test_device_closing_after_each_reply_still_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; HEADER_SIZE];
                if socket.read_exact(&mut request).await.is_ok() {
                    socket.write_all(&ok_reply(&request)).await.ok();
                }
            }
        });
        let link = ProjectorLink::new(addr.to_string(), SHORT, SHORT);

        let first = link.exchange(GET_FRAME.to_vec()).await;
        let second = link.exchange(GET_FRAME.to_vec()).await;

        assert!(first.is_ok(), "{first:?}");
        assert!(second.is_ok(), "{second:?}");
    }
}
