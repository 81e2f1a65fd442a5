//! Async TCP client for the fixed-format command protocol.

use crate::error::ClientError;
use commd_protocol::{Cmd, CommandPacket, DEFAULT_PORT};
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
}

/// A connected protocol client.
pub struct Client {
    stream: TcpStream,
    peer: String,
}

impl Client {
    /// Connects to the configured server.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let host = config.host.as_str();
        let mut addrs = tokio::net::lookup_host((host, config.port)).await?;
        let addr = addrs
            .next()
            .ok_or_else(|| ClientError::Unresolvable(host.to_string()))?;

        tracing::debug!(%addr, "connecting");
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;

        Ok(Self {
            stream,
            peer: addr.to_string(),
        })
    }

    /// Sends one command packet.
    pub async fn send(&mut self, cmd: Cmd, data: Option<&str>) -> Result<(), ClientError> {
        let packet = CommandPacket::new(cmd, data)?;
        self.stream.write_all(&packet.to_bytes()).await?;
        Ok(())
    }

    /// Reads one response packet.
    ///
    /// A clean close before any byte arrives maps to
    /// [`ClientError::ConnectionClosed`]; bytes that do not form a
    /// well-formed packet map to [`ClientError::MalformedResponse`].
    pub async fn read(&mut self) -> Result<CommandPacket, ClientError> {
        match CommandPacket::read_from(&mut self.stream).await {
            Ok(Some(packet)) => Ok(packet),
            Ok(None) => Err(ClientError::MalformedResponse),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ClientError::ConnectionClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs the status exchange: sends one Status request, then
    /// acknowledges every Message the server returns until the server
    /// terminates the conversation with End or Error. Returns the full
    /// response transcript in arrival order.
    pub async fn run_status_exchange(mut self) -> Result<Vec<CommandPacket>, ClientError> {
        let mut transcript = Vec::new();

        self.send(Cmd::Status, None).await?;
        loop {
            let response = self.read().await?;
            tracing::debug!(peer = %self.peer, cmd = ?response.cmd(), data = ?response.data(), "response");
            let cmd = response.cmd();
            transcript.push(response);

            match cmd {
                Cmd::Message => self.send(Cmd::Ack, None).await?,
                Cmd::End | Cmd::Error => break,
                // Timeout notifications carry no obligation to reply.
                _ => {}
            }
        }

        let _ = self.stream.shutdown().await;
        Ok(transcript)
    }
}
