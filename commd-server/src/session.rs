//! Per-connection protocol session.
//!
//! Each accepted connection gets one session: a request/response loop
//! over fixed-format packets with an implicit counter state (message
//! count, consecutive timeout count) instead of named states. The loop
//! runs until a terminal response is sent or cancellation is signaled,
//! and the connection is shut down on every exit path.

use crate::error::ServerError;
use commd_protocol::{Cmd, CommandPacket};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::timeout;

/// Default per-read timeout.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Default maximum exchanged-message count.
pub const MESSAGE_BUDGET: u32 = 10;
/// Default maximum consecutive read timeouts.
pub const MAX_TIMEOUTS: u32 = 5;

/// A per-connection protocol session.
pub struct Session<S> {
    stream: S,
    peer: String,
    cancel: watch::Receiver<bool>,
    read_timeout: Duration,
    message_budget: u32,
    max_timeouts: u32,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a session over an accepted stream with the default
    /// timeout/retry policy. `cancel` is the service-wide cooperative
    /// cancellation signal, polled before each read.
    pub fn new(stream: S, peer: impl Into<String>, cancel: watch::Receiver<bool>) -> Self {
        Self {
            stream,
            peer: peer.into(),
            cancel,
            read_timeout: READ_TIMEOUT,
            message_budget: MESSAGE_BUDGET,
            max_timeouts: MAX_TIMEOUTS,
        }
    }

    /// Overrides the timeout/retry policy.
    pub fn with_policy(
        mut self,
        read_timeout: Duration,
        message_budget: u32,
        max_timeouts: u32,
    ) -> Self {
        self.read_timeout = read_timeout;
        self.message_budget = message_budget;
        self.max_timeouts = max_timeouts;
        self
    }

    /// Runs the session to completion.
    ///
    /// Errors never escape: unexpected failures are logged here, at the
    /// session boundary, and the underlying connection is shut down
    /// unconditionally whether the loop ended normally, was cancelled,
    /// or failed.
    pub async fn run(mut self) {
        if let Err(e) = self.serve().await {
            tracing::error!(peer = %self.peer, error = %e, "session error");
        }
        let _ = self.stream.shutdown().await;
        tracing::debug!(peer = %self.peer, "session closed");
    }

    async fn serve(&mut self) -> Result<(), ServerError> {
        let mut message_counter: u32 = 1;
        let mut timeout_counter: u32 = 0;

        loop {
            // Checked before every read attempt, not only after a
            // timeout, so shutdown stays responsive mid-exchange.
            if *self.cancel.borrow() {
                tracing::info!(peer = %self.peer, "cancelled");
                self.respond(Cmd::End, None).await?;
                return Ok(());
            }

            let request =
                match timeout(self.read_timeout, CommandPacket::read_from(&mut self.stream)).await
                {
                    Ok(Ok(Some(packet))) => packet,
                    Ok(Ok(None)) => {
                        // Bytes arrived but did not form a well-formed
                        // packet; the peer still gets a response.
                        self.respond(Cmd::Error, Some("Unknown")).await?;
                        return Ok(());
                    }
                    Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        tracing::debug!(peer = %self.peer, "connection closed by peer");
                        return Ok(());
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_elapsed) => {
                        if timeout_counter < self.max_timeouts {
                            self.respond(Cmd::Timeout, None).await?;
                            timeout_counter += 1;
                            continue;
                        }
                        self.respond(Cmd::End, Some("Timeout!")).await?;
                        return Ok(());
                    }
                };

            tracing::info!(
                peer = %self.peer,
                n = message_counter,
                cmd = ?request.cmd(),
                "processing request"
            );

            match request.cmd() {
                Cmd::Status => {
                    self.respond(Cmd::Message, Some(&format!("Msg: {message_counter}")))
                        .await?;
                }
                Cmd::Ack if message_counter <= self.message_budget => {
                    self.respond(Cmd::Message, Some(&format!("Msg: {message_counter}")))
                        .await?;
                }
                Cmd::Ack => {
                    self.respond(Cmd::End, Some(&format!("Mesg: {message_counter}")))
                        .await?;
                    return Ok(());
                }
                Cmd::End => {
                    self.respond(Cmd::End, None).await?;
                    return Ok(());
                }
                _ => {
                    self.respond(Cmd::Error, Some("Unknown")).await?;
                    return Ok(());
                }
            }

            timeout_counter = 0;
            message_counter += 1;
        }
    }

    async fn respond(&mut self, cmd: Cmd, data: Option<&str>) -> Result<(), ServerError> {
        let packet = CommandPacket::new(cmd, data)?;
        self.stream.write_all(&packet.to_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};

    const TEST_TIMEOUT: Duration = Duration::from_millis(100);

    fn spawn_session(cancel: watch::Receiver<bool>) -> DuplexStream {
        let (client, server) = tokio::io::duplex(1024);
        let session =
            Session::new(server, "test-peer", cancel).with_policy(TEST_TIMEOUT, 10, 5);
        tokio::spawn(session.run());
        client
    }

    fn cancel_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    async fn send(client: &mut DuplexStream, cmd: Cmd, data: Option<&str>) {
        let packet = CommandPacket::new(cmd, data).unwrap();
        client.write_all(&packet.to_bytes()).await.unwrap();
    }

    async fn recv(client: &mut DuplexStream) -> CommandPacket {
        CommandPacket::read_from(client)
            .await
            .unwrap()
            .expect("response should be a well-formed packet")
    }

    #[tokio::test]
    async fn status_returns_running_message_number() {
        let (_tx, rx) = cancel_pair();
        let mut client = spawn_session(rx);

        send(&mut client, Cmd::Status, None).await;
        let response = recv(&mut client).await;
        assert_eq!(response.cmd(), Cmd::Message);
        assert_eq!(response.data(), Some("Msg: 1"));

        send(&mut client, Cmd::Status, None).await;
        let response = recv(&mut client).await;
        assert_eq!(response.data(), Some("Msg: 2"));
    }

    #[tokio::test]
    async fn ack_past_budget_ends_the_session() {
        let (_tx, rx) = cancel_pair();
        let mut client = spawn_session(rx);

        send(&mut client, Cmd::Status, None).await;
        assert_eq!(recv(&mut client).await.data(), Some("Msg: 1"));

        // Acks 2..=10 stay within the budget.
        for n in 2..=10 {
            send(&mut client, Cmd::Ack, None).await;
            let response = recv(&mut client).await;
            assert_eq!(response.cmd(), Cmd::Message);
            assert_eq!(response.data(), Some(format!("Msg: {n}").as_str()));
        }

        // The 11th exchange exhausts it.
        send(&mut client, Cmd::Ack, None).await;
        let response = recv(&mut client).await;
        assert_eq!(response.cmd(), Cmd::End);
        assert_eq!(response.data(), Some("Mesg: 11"));

        // The session closed its side afterwards.
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn end_request_gets_bare_end() {
        let (_tx, rx) = cancel_pair();
        let mut client = spawn_session(rx);

        send(&mut client, Cmd::End, None).await;
        let response = recv(&mut client).await;
        assert_eq!(response.cmd(), Cmd::End);
        assert_eq!(response.data(), None);
    }

    #[tokio::test]
    async fn unhandled_command_gets_error_and_terminates() {
        let (_tx, rx) = cancel_pair();
        let mut client = spawn_session(rx);

        send(&mut client, Cmd::DumpConfig, None).await;
        let response = recv(&mut client).await;
        assert_eq!(response.cmd(), Cmd::Error);
        assert_eq!(response.data(), Some("Unknown"));

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn malformed_packet_gets_error_response() {
        let (_tx, rx) = cancel_pair();
        let mut client = spawn_session(rx);

        client.write_all(&[0xAB; 20]).await.unwrap();
        let response = recv(&mut client).await;
        assert_eq!(response.cmd(), Cmd::Error);
        assert_eq!(response.data(), Some("Unknown"));
    }

    #[tokio::test]
    async fn timeout_sequence_ends_after_five_retries() {
        let (_tx, rx) = cancel_pair();
        let mut client = spawn_session(rx);

        // No request is ever written: five Timeout notifications, then
        // the forced End.
        for _ in 0..5 {
            let response = recv(&mut client).await;
            assert_eq!(response.cmd(), Cmd::Timeout);
            assert_eq!(response.data(), None);
        }
        let response = recv(&mut client).await;
        assert_eq!(response.cmd(), Cmd::End);
        assert_eq!(response.data(), Some("Timeout!"));
    }

    #[tokio::test]
    async fn request_resets_the_timeout_counter() {
        let (_tx, rx) = cancel_pair();
        let mut client = spawn_session(rx);

        for _ in 0..4 {
            assert_eq!(recv(&mut client).await.cmd(), Cmd::Timeout);
        }

        send(&mut client, Cmd::Status, None).await;
        assert_eq!(recv(&mut client).await.cmd(), Cmd::Message);

        // A fresh run of five timeouts is allowed again.
        for _ in 0..5 {
            assert_eq!(recv(&mut client).await.cmd(), Cmd::Timeout);
        }
        assert_eq!(recv(&mut client).await.cmd(), Cmd::End);
    }

    #[tokio::test]
    async fn cancellation_sends_end_before_reading() {
        let (tx, rx) = cancel_pair();
        tx.send(true).unwrap();
        let mut client = spawn_session(rx);

        let response = recv(&mut client).await;
        assert_eq!(response.cmd(), Cmd::End);
        assert_eq!(response.data(), None);
    }

    #[tokio::test]
    async fn cancellation_mid_exchange_is_honored() {
        let (tx, rx) = cancel_pair();
        let mut client = spawn_session(rx);

        send(&mut client, Cmd::Status, None).await;
        assert_eq!(recv(&mut client).await.cmd(), Cmd::Message);

        tx.send(true).unwrap();
        // The signal is picked up at the next loop iteration, at the
        // latest once the pending read times out.
        loop {
            let response = recv(&mut client).await;
            match response.cmd() {
                Cmd::Timeout => continue,
                Cmd::End => break,
                other => panic!("unexpected response {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn peer_disconnect_closes_quietly() {
        let (_tx, rx) = cancel_pair();
        let (client, server) = tokio::io::duplex(1024);
        let session = Session::new(server, "test-peer", rx).with_policy(TEST_TIMEOUT, 10, 5);
        let handle = tokio::spawn(session.run());

        drop(client);
        handle.await.unwrap();
    }
}
