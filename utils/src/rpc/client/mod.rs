use crate::rpc::{
    message_codec::{FrameError, MessageCodec},
    messages::{Command, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::{future::Future, io, time::Duration};
use thiserror::Error;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tokio_util::codec::Framed;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The relay closed the connection before a full response frame arrived.
    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("Frame error: {0}")]
    Frame(#[source] FrameError),

    #[error("Failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Malformed response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => ClientError::Transport(e),
            FrameError::Truncated { .. } => ClientError::ConnectionClosed,
            other => ClientError::Frame(other),
        }
    }
}

/// One connection to a relay. Every read, write and the connect itself is
/// bounded by the same timeout.
#[derive(Debug)]
pub struct RelayClient {
    framed: Framed<TcpStream, MessageCodec>,
    timeout: Duration,
}

impl RelayClient {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ClientError> {
        let addr = format!("{}:{}", host, port);
        let stream = with_timeout(timeout, TcpStream::connect(&addr))
            .await?
            .map_err(|source| ClientError::Connect {
                addr: addr.clone(),
                source,
            })?;

        debug!("Connected to relay at {}", addr);

        Ok(Self {
            framed: Framed::new(stream, MessageCodec::default()),
            timeout,
        })
    }

    /// Sends one command frame and waits for exactly one response frame.
    pub async fn send_command(&mut self, command: &Command) -> Result<Response, ClientError> {
        let json = command.to_json().map_err(ClientError::Encode)?;
        with_timeout(self.timeout, self.framed.send(json)).await??;

        debug!("Sent command: {}", command);

        let payload = match with_timeout(self.timeout, self.framed.next()).await? {
            Some(Ok(payload)) => payload,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ClientError::ConnectionClosed),
        };
        let response: Response = serde_json::from_slice(&payload).map_err(ClientError::Decode)?;
        debug!("Received response: {}", response);
        Ok(response)
    }

    pub async fn close(self) -> Result<(), ClientError> {
        let mut stream = self.framed.into_inner();
        stream.shutdown().await.map_err(ClientError::Transport)?;
        Ok(())
    }
}

async fn with_timeout<F: Future>(timeout: Duration, fut: F) -> Result<F::Output, ClientError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ClientError::Timeout(timeout))
}

/// Asks the relay at `host:port` to upload `filename`. Opens its own
/// connection, performs a single round trip and closes it again.
pub async fn request_upload(
    host: &str,
    port: u16,
    filename: &str,
    timeout: Duration,
) -> Result<Response, ClientError> {
    let mut client = RelayClient::connect(host, port, timeout).await?;
    let response = client.send_command(&Command::upload(filename)).await?;
    if let Err(e) = client.close().await {
        debug!("Failed to shut down relay connection cleanly: {}", e);
    }
    Ok(response)
}
