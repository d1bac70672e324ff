//! SSH transport: password login and an interactive shell channel.

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::{debug, trace};
use russh::{ChannelMsg, Pty};

use super::{Shell, Utf8Decoder, split_address};
use crate::config::{self, EngineConfig};
use crate::device::PtyRequest;
use crate::error::ConnectError;
use crate::protocol::CliRequest;

/// Connects and authenticates with the request credentials.
///
/// Host keys are accepted without verification: the devices are
/// pre-enrolled infrastructure addressed by operators.
pub async fn dial(request: &CliRequest, config: &EngineConfig) -> Result<Client, ConnectError> {
    let (host, port) = split_address(&request.address, 22)?;
    let ssh_config = Config {
        preferred: config::preferred_algorithms(),
        inactivity_timeout: None,
        ..Default::default()
    };

    let client = tokio::time::timeout(
        config.dial_timeout,
        Client::connect_with_config(
            (host, port),
            &request.auth.username,
            AuthMethod::with_password(&request.auth.password),
            ServerCheckMethod::NoCheck,
            ssh_config,
        ),
    )
    .await
    .map_err(|_| {
        ConnectError::ConnectFailure(format!(
            "ssh dial {} timed out after {:?}",
            request.address, config.dial_timeout
        ))
    })??;
    debug!("{} ssh connection to {} established", request.prefix(), request.address);
    Ok(client)
}

/// Opens a shell channel, optionally with a PTY, and spawns its pump.
pub async fn open_shell(
    client: Client,
    pty: Option<&PtyRequest>,
    capacity: usize,
) -> Result<Shell, ConnectError> {
    let mut channel = client.get_channel().await?;
    if let Some(pty) = pty {
        channel
            .request_pty(
                false,
                &pty.term,
                pty.width,
                pty.height,
                0,
                0,
                &[(Pty::ECHO, u32::from(pty.echo))],
            )
            .await?;
    }
    channel.request_shell(false).await?;

    let (mut shell, mut peer) = Shell::pair(capacity);
    let pump = tokio::spawn(async move {
        let mut utf8 = Utf8Decoder::new();
        loop {
            tokio::select! {
                Some(data) = peer.from_session.recv() => {
                    if let Err(e) = channel.data(data.as_bytes()).await {
                        debug!("failed to send data to shell: {:?}", e);
                        break;
                    }
                },
                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { ref data }) => {
                            let text = utf8.decode(data);
                            if text.is_empty() {
                                continue;
                            }
                            trace!("{:?}", text);
                            if peer.to_session.send(text).await.is_err() {
                                debug!("shell output receiver dropped, closing pump");
                                break;
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            debug!("shell exited with status code: {}", exit_status);
                            let _ = channel.eof().await;
                            break;
                        }
                        Some(ChannelMsg::Eof) | None => {
                            debug!("shell sent EOF");
                            break;
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        debug!("ssh pump ended");
    });
    shell.attach_pump(pump);
    shell.attach_ssh(client);
    Ok(shell)
}
