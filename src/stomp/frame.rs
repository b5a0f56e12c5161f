//! STOMP 1.2 frame codec.
//!
//! One WebSocket text message carries one frame:
//!
//! ```text
//! COMMAND
//! header1:value1
//! header2:value2
//!
//! body^@
//! ```
//!
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) on every command
//! except `CONNECT` and `CONNECTED`.

use std::fmt;
use std::str::FromStr;

/// Frame commands understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client opens a session.
    Connect,
    /// STOMP 1.2 alias of `CONNECT`.
    Stomp,
    /// Server accepts a session.
    Connected,
    /// Client sends to a destination.
    Send,
    /// Client subscribes to a destination.
    Subscribe,
    /// Client drops a subscription.
    Unsubscribe,
    /// Client acknowledges a message.
    Ack,
    /// Client rejects a message.
    Nack,
    /// Client starts a transaction.
    Begin,
    /// Client commits a transaction.
    Commit,
    /// Client aborts a transaction.
    Abort,
    /// Client closes the session.
    Disconnect,
    /// Server delivers a message.
    Message,
    /// Server acknowledges a `receipt` request.
    Receipt,
    /// Server reports an error.
    Error,
}

impl Command {
    /// Returns the wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// `CONNECT` and `CONNECTED` carry unescaped header values.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// No command line.
    #[error("empty frame")]
    Empty,

    /// Command line is not a STOMP command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Header line without `:` or with an invalid escape.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Body is not terminated by a NUL octet.
    #[error("frame is not NUL-terminated")]
    MissingNull,

    /// `content-length` does not match the body.
    #[error("invalid content-length: {0}")]
    BodyLength(String),
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Frame body.
    pub body: String,
}

/// Returns `true` if `text` is a heart-beat (only end-of-line octets).
#[must_use]
pub fn is_heartbeat(text: &str) -> bool {
    text.chars().all(|c| c == '\n' || c == '\r')
}

impl Frame {
    /// Creates a frame without headers or body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Builds an `ERROR` frame with a short `message` header and detail
    /// body.
    #[must_use]
    pub fn error(message: &str, detail: impl Into<String>) -> Self {
        Self::new(Command::Error)
            .header("message", message)
            .header("content-type", "text/plain")
            .body(detail)
    }

    /// Decodes one frame from a WebSocket text payload.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] when the payload is not a well-formed frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.trim_end_matches('\0').is_empty() {
            return Err(FrameError::Empty);
        }
        let (head, rest) = split_at_blank_line(text).ok_or(FrameError::MissingNull)?;

        let mut lines = head.lines();
        let command_line = lines.next().map(str::trim_end).unwrap_or_default();
        if command_line.is_empty() {
            return Err(FrameError::Empty);
        }
        let command: Command = command_line.parse()?;

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let frame = Self {
            command,
            headers,
            body: String::new(),
        };
        let body = frame.read_body(rest)?;
        Ok(Self { body, ..frame })
    }

    fn read_body(&self, rest: &str) -> Result<String, FrameError> {
        if let Some(raw) = self.get("content-length") {
            let len: usize = raw
                .trim()
                .parse()
                .map_err(|_| FrameError::BodyLength(raw.to_string()))?;
            let body = rest
                .get(..len)
                .ok_or_else(|| FrameError::BodyLength(raw.to_string()))?;
            if !rest.get(len..).is_some_and(|tail| tail.starts_with('\0')) {
                return Err(FrameError::MissingNull);
            }
            return Ok(body.to_string());
        }
        let end = rest.find('\0').ok_or(FrameError::MissingNull)?;
        Ok(rest.get(..end).unwrap_or_default().to_string())
    }

    /// Encodes the frame for a WebSocket text message.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.body.len().saturating_add(64));
        out.push_str(self.command.as_str());
        out.push('\n');
        let escape_headers = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape_headers {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Splits a frame at the blank line ending its headers.
fn split_at_blank_line(text: &str) -> Option<(&str, &str)> {
    let lf = text.find("\n\n").map(|at| (at, 2));
    let crlf = text.find("\r\n\r\n").map(|at| (at, 4));
    let (at, width) = match (lf, crlf) {
        (Some(lf), Some(crlf)) if crlf.0 < lf.0 => crlf,
        (Some(lf), _) => lf,
        (None, crlf) => crlf?,
    };
    Some((text.get(..at)?, text.get(at.saturating_add(width)..)?))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
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
            _ => return Err(FrameError::MalformedHeader(value.to_string())),
        }
    }
    Ok(out)
}
