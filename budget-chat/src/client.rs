use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tracing::{debug, info, warn};

use crate::cli::ClientArgs;

/// Why the terminal session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    ServerClosed,
    InputClosed,
    Interrupted,
}

/// Pipes the chat to the terminal: stdin lines go to the server verbatim, and
/// every server line is printed as received. The name prompt is answered
/// by typing like any other line.
pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (reader, mut to_server) = stream.into_split();
    // `next_line` is cancel safe, so a line half-read by one branch survives
    // the other branch winning the select.
    let mut from_server = BufReader::new(reader).lines();
    let mut from_user = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let ending = loop {
        select! {
            line = from_server.next_line() => {
                let Some(line) = line.context("failed to read from server")? else {
                    break Ending::ServerClosed;
                };
                stdout.write_all(format!("{line}\n").as_bytes()).await?;
                stdout.flush().await?;
            }
            line = from_user.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break Ending::InputClosed;
                };
                to_server
                    .write_all(format!("{line}\n").as_bytes())
                    .await
                    .context("failed to send line")?;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(error) = result {
                    warn!(?error, "ctrl-c handler failed");
                }
                break Ending::Interrupted;
            }
        }
    };

    debug!(?ending, "leaving chat");
    if let Err(error) = to_server.shutdown().await {
        debug!(?error, "connection already closed");
    }

    Ok(())
}
