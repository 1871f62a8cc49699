//! STOMP 1.2 frame codec.
//!
//! One frame travels per WebSocket text message. A message made only of
//! EOLs is a heart-beat.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let command = match raw {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(command)
    }

    // CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("frame has no blank line after its headers")]
    MissingHeaderTerminator,
    #[error("malformed header line `{0}`")]
    InvalidHeader(String),
    #[error("invalid escape sequence in `{0}`")]
    InvalidEscape(String),
    #[error("frame body is not NUL-terminated")]
    MissingNul,
    #[error("bad content-length `{0}`")]
    ContentLength(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header; repeated headers after the first are ignored.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parses one frame. `Ok(None)` means the payload was a heart-beat.
    pub fn parse(raw: &str) -> Result<Option<Frame>, FrameError> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        if raw.is_empty() {
            return Ok(None);
        }

        let mut lines = Vec::new();
        let mut offset = 0;
        loop {
            let Some(newline) = raw[offset..].find('\n') else {
                return Err(FrameError::MissingHeaderTerminator);
            };
            let line = &raw[offset..offset + newline];
            let line = line.strip_suffix('\r').unwrap_or(line);
            offset += newline + 1;
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }

        let command_line = lines[0];
        let command = Command::parse(command_line)
            .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;

        let mut headers = Vec::with_capacity(lines.len() - 1);
        for line in &lines[1..] {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::InvalidHeader(line.to_string()))?;
            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let rest = &raw[offset..];
        let length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| value.trim());
        let body = match length {
            Some(length) => {
                let length: usize = length
                    .parse()
                    .map_err(|_| FrameError::ContentLength(length.to_string()))?;
                if !rest.is_char_boundary(length) || rest.as_bytes().get(length) != Some(&0) {
                    return Err(FrameError::ContentLength(length.to_string()));
                }
                &rest[..length]
            }
            None => {
                let end = rest.find('\0').ok_or(FrameError::MissingNul)?;
                &rest[..end]
            }
        };

        Ok(Some(Frame {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

fn push_escaped(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

/// Heart-beat intervals agreed with the server. `None` disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing: Option<Duration>,
    pub incoming: Option<Duration>,
}

impl HeartBeat {
    /// `client_*` is what we offered in CONNECT, `server` the `heart-beat`
    /// header of CONNECTED (`sx,sy`).
    pub fn negotiate(client_outgoing_ms: u64, client_incoming_ms: u64, server: Option<&str>) -> Self {
        let (server_outgoing, server_incoming) = server
            .and_then(|value| {
                let (sx, sy) = value.split_once(',')?;
                Some((sx.trim().parse::<u64>().ok()?, sy.trim().parse::<u64>().ok()?))
            })
            .unwrap_or((0, 0));

        let pick = |ours: u64, theirs: u64| {
            if ours == 0 || theirs == 0 {
                None
            } else {
                Some(Duration::from_millis(ours.max(theirs)))
            }
        };

        Self {
            outgoing: pick(client_outgoing_ms, server_incoming),
            incoming: pick(client_incoming_ms, server_outgoing),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.outgoing.is_some() || self.incoming.is_some()
    }
}
