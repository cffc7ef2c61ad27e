//! Per-connection protocol driver.
//!
//! A session starts in [`SessionState::AwaitingName`], moves to
//! [`SessionState::Active`] once its name is admitted by the registry, and
//! always ends in [`SessionState::Terminated`]. Outgoing lines go through the
//! connection's [`Outbound`] queue and a dedicated writer task, which shuts
//! the write half down after the last queued line is flushed.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf},
    sync::mpsc::UnboundedReceiver,
    time::timeout,
};
use tracing::{debug, info};

use crate::{
    dispatch::broadcast_except,
    name,
    protocol::{ServerLine, read_line},
    registry::{Member, Outbound, Registry},
};

/// How long a finished session keeps reading after its last line went out.
/// Closing with unread input queued makes the kernel send a reset, which can
/// destroy the final line before the peer reads it.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingName,
    Active { name: String },
    /// `joined` carries the name if the session ever became active.
    Terminated { joined: Option<String> },
}

/// Why a name was turned away during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRejection {
    InvalidName,
    NameTaken,
}

impl JoinRejection {
    pub fn line(self) -> ServerLine<'static> {
        match self {
            JoinRejection::InvalidName => ServerLine::InvalidName,
            JoinRejection::NameTaken => ServerLine::NameTaken,
        }
    }
}

/// Runs one connection to completion.
///
/// Returns once the connection has been torn down. Transport failures and
/// rejected names are normal ways for a session to end, not errors.
pub async fn run<S>(stream: S, peer: Option<SocketAddr>, registry: Arc<Registry>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (outbound, queue) = Outbound::channel();
    let writer_task = tokio::spawn(write_lines(writer, queue, peer));

    let mut session = Session {
        reader: BufReader::new(reader),
        outbound,
        registry,
        peer,
    };
    session.drive().await;

    // The writer task exits once every outbound handle is gone; the registry
    // copy was dropped in `terminate`.
    let Session {
        mut reader,
        outbound,
        ..
    } = session;
    drop(outbound);
    writer_task.await.context("connection writer task failed")?;

    let mut discard = tokio::io::sink();
    match timeout(CLOSE_LINGER, tokio::io::copy(&mut reader, &mut discard)).await {
        Ok(Ok(discarded)) if discarded > 0 => {
            debug!(?peer, discarded, "discarded unread input before closing");
        }
        Ok(Err(error)) => debug!(?peer, ?error, "failed to drain connection"),
        _ => {}
    }
    drop(reader);

    Ok(())
}

struct Session<S> {
    reader: BufReader<ReadHalf<S>>,
    outbound: Outbound,
    registry: Arc<Registry>,
    peer: Option<SocketAddr>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn drive(&mut self) {
        let mut state = SessionState::AwaitingName;
        loop {
            state = match state {
                SessionState::AwaitingName => self.await_name().await,
                SessionState::Active { name } => self.relay(name).await,
                SessionState::Terminated { joined } => {
                    self.terminate(joined).await;
                    return;
                }
            };
        }
    }

    async fn await_name(&mut self) -> SessionState {
        self.send(ServerLine::Welcome);

        let line = match read_line(&mut self.reader).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(peer = ?self.peer, "disconnected before choosing a name");
                return SessionState::Terminated { joined: None };
            }
            Err(error) => {
                debug!(peer = ?self.peer, ?error, "failed to read name");
                return SessionState::Terminated { joined: None };
            }
        };

        let name = line.trim();
        if let Err(rejection) = self.join(name).await {
            info!(peer = ?self.peer, name, ?rejection, "join rejected");
            self.send(rejection.line());
            return SessionState::Terminated { joined: None };
        }

        info!(peer = ?self.peer, name, "member joined");
        broadcast_except(&self.registry, &ServerLine::Joined(name).encode(), name).await;

        SessionState::Active {
            name: name.to_string(),
        }
    }

    async fn join(&self, name: &str) -> Result<(), JoinRejection> {
        if !name::is_valid(name) {
            return Err(JoinRejection::InvalidName);
        }

        // The roster is queued under the registry's write guard so that no
        // broadcast can reach the newcomer ahead of it.
        let member = Member::new(name, self.outbound.clone());
        let admitted = self
            .registry
            .add_if_absent_with(member, |others, outbound| {
                if outbound.send(ServerLine::Roster(others).encode()).is_err() {
                    debug!(peer = ?self.peer, "connection writer already stopped");
                }
            })
            .await;
        if !admitted {
            return Err(JoinRejection::NameTaken);
        }

        Ok(())
    }

    async fn relay(&mut self, name: String) -> SessionState {
        loop {
            match read_line(&mut self.reader).await {
                Ok(Some(text)) => {
                    let line = ServerLine::Chat {
                        name: &name,
                        text: &text,
                    };
                    broadcast_except(&self.registry, &line.encode(), &name).await;
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(peer = ?self.peer, %name, ?error, "read failed");
                    break;
                }
            }
        }

        SessionState::Terminated { joined: Some(name) }
    }

    async fn terminate(&mut self, joined: Option<String>) {
        let Some(name) = joined else {
            return;
        };

        self.registry.remove(&name).await;
        info!(peer = ?self.peer, %name, "member left");
        broadcast_except(&self.registry, &ServerLine::Left(&name).encode(), &name).await;
    }

    fn send(&self, line: ServerLine<'_>) {
        if self.outbound.send(line.encode()).is_err() {
            debug!(peer = ?self.peer, "connection writer already stopped");
        }
    }
}

async fn write_lines<W>(
    mut writer: W,
    mut queue: UnboundedReceiver<String>,
    peer: Option<SocketAddr>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = queue.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(error) = written.await {
            debug!(?peer, ?error, "failed to write to connection");
            return;
        }
    }

    if let Err(error) = writer.shutdown().await {
        debug!(?peer, ?error, "failed to shut down connection writer");
    }
}
