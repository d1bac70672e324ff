//! Byte transports to a device CLI.
//!
//! A [`Connector`] dials the device named by a request and yields a
//! [`TransportClient`]; the vendor profile then turns it into a [`Shell`],
//! the read/write/close capability the session engine drives. Every shell is
//! backed by a pump task that moves text between the wire and a pair of
//! mpsc channels.

use async_ssh2_tokio::client::Client;
use async_trait::async_trait;
use log::debug;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::device::PtyRequest;
use crate::error::ConnectError;
use crate::protocol::{CliRequest, ProtocolKind};

pub mod ssh;
pub mod telnet;

/// Dials the transport a request asks for.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(
        &self,
        request: &CliRequest,
        config: &EngineConfig,
    ) -> Result<TransportClient, ConnectError>;
}

/// Connector for real devices: SSH through `async-ssh2-tokio`, Telnet over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkConnector;

#[async_trait]
impl Connector for NetworkConnector {
    async fn dial(
        &self,
        request: &CliRequest,
        config: &EngineConfig,
    ) -> Result<TransportClient, ConnectError> {
        match request.protocol {
            ProtocolKind::Ssh => ssh::dial(request, config).await.map(TransportClient::Ssh),
            ProtocolKind::Telnet => telnet::dial(request, config)
                .await
                .map(TransportClient::Telnet),
        }
    }
}

/// A dialed transport that has no shell yet.
pub enum TransportClient {
    /// Authenticated SSH connection.
    Ssh(Client),
    /// Connected Telnet socket; login happens in-band.
    Telnet(TcpStream),
    /// A shell that is already open, e.g. an in-process test device.
    Shell(Shell),
}

impl TransportClient {
    /// Opens the interactive shell and starts its pump task.
    pub async fn into_shell(
        self,
        pty: Option<&PtyRequest>,
        capacity: usize,
    ) -> Result<Shell, ConnectError> {
        match self {
            TransportClient::Ssh(client) => ssh::open_shell(client, pty, capacity).await,
            TransportClient::Telnet(stream) => Ok(telnet::open_shell(stream, capacity)),
            TransportClient::Shell(shell) => Ok(shell),
        }
    }
}

/// Text-level read/write/close capability over an interactive shell.
pub struct Shell {
    writer: Sender<String>,
    reader: Receiver<String>,
    pump: Option<JoinHandle<()>>,
    /// Keeps the SSH connection alive for as long as the shell is.
    ssh: Option<Client>,
    closed: bool,
}

/// Far end of a [`Shell`] pair: what a pump task or a fake device holds.
pub struct ShellPeer {
    /// Text the session wrote.
    pub from_session: Receiver<String>,
    /// Text delivered to the session as device output.
    pub to_session: Sender<String>,
}

impl Shell {
    /// Creates a connected shell and peer with bounded channels.
    pub fn pair(capacity: usize) -> (Shell, ShellPeer) {
        let (sender_to_shell, receiver_from_user) = mpsc::channel::<String>(capacity.max(1));
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(capacity.max(1));
        (
            Shell {
                writer: sender_to_shell,
                reader: receiver_from_shell,
                pump: None,
                ssh: None,
                closed: false,
            },
            ShellPeer {
                from_session: receiver_from_user,
                to_session: sender_to_user,
            },
        )
    }

    pub(crate) fn attach_pump(&mut self, pump: JoinHandle<()>) {
        self.pump = Some(pump);
    }

    pub(crate) fn attach_ssh(&mut self, client: Client) {
        self.ssh = Some(client);
    }

    /// Queues `data` for the device.
    pub async fn send(&self, data: String) -> Result<(), ConnectError> {
        if self.closed {
            return Err(ConnectError::TransportClosed);
        }
        self.writer.send(data).await?;
        Ok(())
    }

    /// Waits for the next chunk of device output until `deadline`.
    ///
    /// `Ok(None)` means the deadline passed. Cancelling the future loses no
    /// data.
    pub async fn read_chunk(&mut self, deadline: Instant) -> Result<Option<String>, ConnectError> {
        if self.closed {
            return Err(ConnectError::TransportClosed);
        }
        match tokio::time::timeout_at(deadline, self.reader.recv()).await {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => Err(ConnectError::TransportClosed),
            Err(_) => Ok(None),
        }
    }

    /// Discards output that is already buffered; returns how much was dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(chunk) = self.reader.try_recv() {
            dropped += chunk.len();
        }
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.closed
            || self.writer.is_closed()
            || self.ssh.as_ref().is_some_and(|client| client.is_closed())
    }

    /// Stops the pump and drops the underlying connection. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reader.close();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if self.ssh.take().is_some() {
            debug!("ssh connection dropped");
        }
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.close();
    }
}

/// Turns a byte stream into text without breaking multi-byte characters.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// one; only invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        text
    }
}

/// Splits `host:port`, accepting bracketed IPv6 and a bare host.
pub fn split_address(address: &str, default_port: u16) -> Result<(String, u16), ConnectError> {
    let invalid = || ConnectError::ConnectFailure(format!("invalid address '{address}'"));
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None if tail.is_empty() => default_port,
            None => return Err(invalid()),
        };
        return Ok((host.to_string(), port));
    }
    match address.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => Ok((address.to_string(), default_port)),
        Some((host, port)) if !host.is_empty() => {
            Ok((host.to_string(), port.parse().map_err(|_| invalid())?))
        }
        Some(_) => Err(invalid()),
        None if address.is_empty() => Err(invalid()),
        None => Ok((address.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn address_forms_are_split() {
        assert_eq!(
            split_address("10.0.0.1:2222", 22).expect("split"),
            ("10.0.0.1".to_string(), 2222)
        );
        assert_eq!(
            split_address("router1", 23).expect("split"),
            ("router1".to_string(), 23)
        );
        assert_eq!(
            split_address("[fe80::1]:830", 22).expect("split"),
            ("fe80::1".to_string(), 830)
        );
        assert!(split_address("host:port", 22).is_err());
        assert!(split_address("", 22).is_err());
    }

    #[tokio::test]
    async fn read_chunk_reports_deadline_as_none() {
        let (mut shell, _peer) = Shell::pair(4);
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(shell.read_chunk(deadline).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn dropped_peer_closes_shell() {
        let (mut shell, peer) = Shell::pair(4);
        peer.to_session.send("late".to_string()).await.expect("send");
        drop(peer);
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            shell.read_chunk(deadline).await.expect("read").as_deref(),
            Some("late")
        );
        assert!(matches!(
            shell.read_chunk(deadline).await,
            Err(ConnectError::TransportClosed)
        ));
        assert!(shell.is_closed());
    }

    #[test]
    fn split_character_is_reassembled() {
        let bytes = "中".as_bytes();
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.decode(&bytes[1..2]), "");
        assert_eq!(decoder.decode(&bytes[2..]), "中");
    }

    #[test]
    fn invalid_bytes_are_replaced_and_tail_is_kept() {
        let mut decoder = Utf8Decoder::new();
        let mut input = b"ok\xFFx".to_vec();
        input.extend_from_slice(&"错".as_bytes()[..2]);
        assert_eq!(decoder.decode(&input), "ok\u{FFFD}x");
        assert_eq!(decoder.decode(&"错".as_bytes()[2..]), "错");
    }

    #[tokio::test]
    async fn drain_discards_buffered_output() {
        let (mut shell, peer) = Shell::pair(4);
        peer.to_session.send("stale".to_string()).await.expect("send");
        assert_eq!(shell.drain(), 5);
        assert_eq!(shell.drain(), 0);
    }
}
