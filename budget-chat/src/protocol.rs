use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Every line the server writes to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLine<'a> {
    Welcome,
    Roster(&'a [String]),
    Joined(&'a str),
    Left(&'a str),
    Chat { name: &'a str, text: &'a str },
    InvalidName,
    NameTaken,
}

impl ServerLine<'_> {
    /// Renders the line with its trailing newline.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for ServerLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerLine::Welcome => f.write_str("Welcome to Budget Chat! What's your name?"),
            ServerLine::Roster(names) => write!(f, "* The room contains: {}", names.join(",")),
            ServerLine::Joined(name) => write!(f, "* {name} has entered the room"),
            ServerLine::Left(name) => write!(f, "* {name} has left the room"),
            ServerLine::Chat { name, text } => write!(f, "[{name}] {text}"),
            ServerLine::InvalidName => f.write_str("Invalid username. Please try again."),
            ServerLine::NameTaken => f.write_str("Username already taken. Please try again."),
        }
    }
}

/// Reads one newline-terminated line with the terminator stripped.
///
/// Returns `Ok(None)` at end of stream. A trailing fragment with no `\n`
/// counts as end of stream too: the peer went away mid-line. Bytes that are
/// not valid UTF-8 become U+FFFD rather than failing the read.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let bytes = reader.read_until(b'\n', &mut raw).await?;
    if bytes == 0 || raw.last() != Some(&b'\n') {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&raw);
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}
