//! STOMP 1.2 text frames, one frame per WebSocket text message.
//!
//! ```text
//! COMMAND\n
//! header1:value1\n
//! header2:value2\n
//! \n
//! body^@
//! ```
//!
//! A message consisting only of EOLs is a heart-beat. Header values are
//! escaped (`\\`, `\n`, `\r`, `\c`) on every frame except CONNECT and
//! CONNECTED.
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Protocol version negotiated with the push endpoint.
pub const STOMP_VERSION: &str = "1.2";

/// A single EOL sent as a heart-beat.
pub const HEARTBEAT: &str = "\n";

/// A peer is considered gone after this many missed incoming heart-beat intervals.
pub const HEARTBEAT_GRACE: u32 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has no command line")]
    MissingCommand,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("frame is not NUL-terminated")]
    Unterminated,

    #[error("content-length {declared} exceeds body of {actual} bytes")]
    ContentLength { declared: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // client -> server
    Connect,
    Stomp,
    Subscribe,
    Unsubscribe,
    Send,
    Disconnect,
    // server -> client
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(raw: &str) -> Result<Self, FrameError> {
        Ok(match raw {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SEND" => Self::Send,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }

    /// CONNECT/CONNECTED headers are sent verbatim for 1.0 compatibility.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
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

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence wins, as STOMP 1.2 requires for repeated headers.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Client CONNECT frame advertising `heart_beat` (outgoing, incoming).
    pub fn connect(host: &str, heart_beat: HeartBeat) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", host)
            .header("heart-beat", heart_beat.to_string())
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
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

    /// Decode one WebSocket text message.
    ///
    /// Returns `Ok(None)` for a heart-beat (a message made only of EOLs).
    pub fn decode(raw: &str) -> Result<Option<Self>, FrameError> {
        let trimmed = raw.trim_start_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(None);
        }

        let (head, rest) = match trimmed.find("\n\n") {
            Some(idx) => (&trimmed[..idx], &trimmed[idx + 2..]),
            None => match trimmed.find("\r\n\r\n") {
                Some(idx) => (&trimmed[..idx], &trimmed[idx + 4..]),
                None => return Err(FrameError::Unterminated),
            },
        };

        let mut lines = head.lines();
        let command_line = lines.next().ok_or(FrameError::MissingCommand)?.trim_end_matches('\r');
        if command_line.is_empty() {
            return Err(FrameError::MissingCommand);
        }
        let command = Command::parse(command_line)?;
        let escape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if escape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let body = match headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.parse::<usize>().ok())
        {
            Some(declared) => rest
                .get(..declared)
                .ok_or(FrameError::ContentLength {
                    declared,
                    actual: rest.len(),
                })?
                .to_string(),
            None => {
                let end = rest.find('\0').ok_or(FrameError::Unterminated)?;
                rest[..end].to_string()
            }
        };

        Ok(Some(Self {
            command,
            headers,
            body,
        }))
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

/// A `heart-beat` header value: `outgoing,incoming` in milliseconds.
/// Zero means "cannot send" / "does not want to receive".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl HeartBeat {
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    /// Parse a header value. A malformed value means no heart-beating.
    pub fn parse(raw: &str) -> Self {
        let Some((out, inc)) = raw.split_once(',') else {
            return Self::default();
        };
        match (out.trim().parse::<u64>(), inc.trim().parse::<u64>()) {
            (Ok(out), Ok(inc)) => Self::new(Duration::from_millis(out), Duration::from_millis(inc)),
            _ => Self::default(),
        }
    }

    /// Intervals actually used by the side that advertised `self`, given the
    /// peer's advertisement. Returns (send every, expect data every); zero
    /// disables that direction.
    pub fn negotiate(&self, peer: &HeartBeat) -> (Duration, Duration) {
        let send = if self.outgoing.is_zero() || peer.incoming.is_zero() {
            Duration::ZERO
        } else {
            self.outgoing.max(peer.incoming)
        };
        let expect = if self.incoming.is_zero() || peer.outgoing.is_zero() {
            Duration::ZERO
        } else {
            self.incoming.max(peer.outgoing)
        };
        (send, expect)
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing.as_millis(), self.incoming.as_millis())
    }
}
