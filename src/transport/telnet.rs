//! Telnet transport over a plain TCP socket.
//!
//! Every option the device proposes is refused, which leaves the line in
//! NVT mode. Login prompts are answered in-band by the session builder.

use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{Shell, Utf8Decoder, split_address};
use crate::config::EngineConfig;
use crate::error::ConnectError;
use crate::protocol::CliRequest;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

pub async fn dial(request: &CliRequest, config: &EngineConfig) -> Result<TcpStream, ConnectError> {
    let (host, port) = split_address(&request.address, 23)?;
    let stream = tokio::time::timeout(config.dial_timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| {
            ConnectError::ConnectFailure(format!(
                "telnet dial {} timed out after {:?}",
                request.address, config.dial_timeout
            ))
        })??;
    stream.set_nodelay(true)?;
    debug!("{} telnet connection to {} established", request.prefix(), request.address);
    Ok(stream)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Option(u8),
    Sub,
    SubIac,
}

/// Incremental decoder splitting Telnet input into text and replies.
#[derive(Debug, Default)]
pub struct TelnetDecoder {
    state: State,
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `input`, appending payload to `data` and option refusals to
    /// `reply`. State carries across calls, so commands may span chunks.
    pub fn decode(&mut self, input: &[u8], data: &mut Vec<u8>, reply: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (State::Data, IAC) => State::Iac,
                // Bare NUL follows CR in NVT line endings.
                (State::Data, 0) => State::Data,
                (State::Data, b) => {
                    data.push(b);
                    State::Data
                }
                (State::Iac, IAC) => {
                    data.push(IAC);
                    State::Data
                }
                (State::Iac, cmd @ (DO | DONT | WILL | WONT)) => State::Option(cmd),
                (State::Iac, SB) => State::Sub,
                (State::Iac, _) => State::Data,
                (State::Option(cmd), option) => {
                    match cmd {
                        DO => reply.extend_from_slice(&[IAC, WONT, option]),
                        WILL => reply.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    State::Data
                }
                (State::Sub, IAC) => State::SubIac,
                (State::Sub, _) => State::Sub,
                (State::SubIac, SE) => State::Data,
                (State::SubIac, _) => State::Sub,
            };
        }
    }
}

/// Spawns the pump for a connected socket.
///
/// Outgoing text needs no IAC escaping: UTF-8 never contains the 0xFF byte.
pub fn open_shell(stream: TcpStream, capacity: usize) -> Shell {
    let (mut shell, mut peer) = Shell::pair(capacity);
    let (mut rd, mut wr) = stream.into_split();
    let pump = tokio::spawn(async move {
        let mut decoder = TelnetDecoder::new();
        let mut utf8 = Utf8Decoder::new();
        let mut buf = vec![0u8; 4096];
        let mut data = Vec::with_capacity(4096);
        let mut reply = Vec::new();
        loop {
            tokio::select! {
                Some(text) = peer.from_session.recv() => {
                    if let Err(e) = wr.write_all(text.as_bytes()).await {
                        debug!("failed to send data to telnet peer: {:?}", e);
                        break;
                    }
                },
                read = rd.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => {
                            debug!("telnet peer closed the connection");
                            break;
                        }
                        Ok(n) => n,
                        Err(e) => {
                            debug!("telnet read failed: {:?}", e);
                            break;
                        }
                    };
                    data.clear();
                    reply.clear();
                    decoder.decode(&buf[..n], &mut data, &mut reply);
                    if !reply.is_empty() && wr.write_all(&reply).await.is_err() {
                        break;
                    }
                    let text = utf8.decode(&data);
                    if text.is_empty() {
                        continue;
                    }
                    trace!("{:?}", text);
                    if peer.to_session.send(text).await.is_err() {
                        debug!("telnet output receiver dropped, closing pump");
                        break;
                    }
                }
            }
        }
        debug!("telnet pump ended");
    });
    shell.attach_pump(pump);
    shell
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    #[tokio::test]
    async fn pump_refuses_options_and_forwards_text_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let device = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.expect("accept");
            let wide = "中".as_bytes();
            sock.write_all(&[IAC, DO, 24, wide[0]]).await.expect("write");
            tokio::time::sleep(Duration::from_millis(50)).await;
            sock.write_all(&wide[1..]).await.expect("write");
            let mut refusal = [0u8; 3];
            sock.read_exact(&mut refusal).await.expect("read refusal");
            let mut line = [0u8; 5];
            sock.read_exact(&mut line).await.expect("read line");
            (refusal, line)
        });

        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut shell = open_shell(stream, 8);
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut text = String::new();
        while text.chars().count() < 1 {
            let chunk = shell
                .read_chunk(deadline)
                .await
                .expect("read")
                .expect("output before deadline");
            text.push_str(&chunk);
        }
        assert_eq!(text, "中");

        shell.send("show\n".to_string()).await.expect("send");
        let (refusal, line) = device.await.expect("device task");
        assert_eq!(refusal, [IAC, WONT, 24]);
        assert_eq!(&line, b"show\n");

        // The device hung up after reading.
        assert!(matches!(
            shell.read_chunk(deadline).await,
            Err(ConnectError::TransportClosed)
        ));
        assert!(shell.is_closed());
    }

    #[test]
    fn options_are_refused() {
        let mut decoder = TelnetDecoder::new();
        let (mut data, mut reply) = (Vec::new(), Vec::new());
        decoder.decode(&[IAC, DO, 24, IAC, WILL, 1, b'o', b'k'], &mut data, &mut reply);
        assert_eq!(data, b"ok");
        assert_eq!(reply, vec![IAC, WONT, 24, IAC, DONT, 1]);
    }

    #[test]
    fn commands_split_across_chunks() {
        let mut decoder = TelnetDecoder::new();
        let (mut data, mut reply) = (Vec::new(), Vec::new());
        decoder.decode(&[b'a', IAC], &mut data, &mut reply);
        decoder.decode(&[DO], &mut data, &mut reply);
        decoder.decode(&[31, b'b'], &mut data, &mut reply);
        assert_eq!(data, b"ab");
        assert_eq!(reply, vec![IAC, WONT, 31]);
    }

    #[test]
    fn subnegotiation_and_escaped_iac() {
        let mut decoder = TelnetDecoder::new();
        let (mut data, mut reply) = (Vec::new(), Vec::new());
        decoder.decode(
            &[IAC, SB, 24, 1, IAC, SE, b'x', IAC, IAC, b'\r', 0, b'\n'],
            &mut data,
            &mut reply,
        );
        assert_eq!(data, vec![b'x', IAC, b'\r', b'\n']);
        assert!(reply.is_empty());
    }
}
