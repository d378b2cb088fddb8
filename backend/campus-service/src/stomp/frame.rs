//! STOMP 1.2 frame codec
//!
//! A frame is `COMMAND\n(header:value\n)*\n<body>\0`. Header values are
//! escaped (`\\`, `\n`, `\r`, `\c`) on every command except `CONNECT` and
//! `CONNECTED`. A `content-length` header fixes the body size; otherwise the
//! body runs to the first NUL. Bare EOLs between frames are heart-beats and
//! are skipped.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_TYPE: &str = "content-type";
pub const DESTINATION: &str = "destination";
pub const ID: &str = "id";
pub const RECEIPT: &str = "receipt";
pub const RECEIPT_ID: &str = "receipt-id";
pub const SUBSCRIPTION: &str = "subscription";
pub const MESSAGE_ID: &str = "message-id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("frame is not terminated by NUL")]
    Unterminated,

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // client
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // server
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED carry raw header values
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cmd = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        };
        Ok(cmd)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// In wire order. Repeated names are kept; lookups see the first.
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

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn connected(user_name: &str, heart_beat: (u64, u64)) -> Self {
        Frame::new(Command::Connected)
            .header("version", "1.2")
            .header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1))
            .header("user-name", user_name)
    }

    pub fn message(destination: &str, subscription: &str, message_id: &str, body: &str) -> Self {
        Frame::new(Command::Message)
            .header(DESTINATION, destination)
            .header(SUBSCRIPTION, subscription)
            .header(MESSAGE_ID, message_id)
            .header(CONTENT_TYPE, "application/json")
            .with_body(body)
    }

    pub fn receipt(receipt_id: &str) -> Self {
        Frame::new(Command::Receipt).header(RECEIPT_ID, receipt_id)
    }

    pub fn error(message: &str, detail: &str) -> Self {
        Frame::new(Command::Error)
            .header("message", message)
            .header(CONTENT_TYPE, "text/plain")
            .with_body(detail)
    }

    /// Serialize with a NUL terminator. A `content-length` is added for
    /// non-empty bodies that lack one.
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
        if !self.body.is_empty() && self.get(CONTENT_LENGTH).is_none() {
            out.push_str(&format!("{CONTENT_LENGTH}:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Parse every frame in `input`. Heart-beat EOLs yield no frames.
pub fn decode_frames(input: &str) -> Result<Vec<Frame>, FrameError> {
    let bytes = input.as_bytes();
    let mut frames = Vec::new();
    let mut pos = 0;

    loop {
        while pos < bytes.len() && matches!(bytes[pos], b'\n' | b'\r') {
            pos += 1;
        }
        if pos >= bytes.len() {
            return Ok(frames);
        }

        let (frame, next) = decode_one(bytes, pos)?;
        frames.push(frame);
        pos = next;
    }
}

fn decode_one(bytes: &[u8], start: usize) -> Result<(Frame, usize), FrameError> {
    let (command_line, mut pos) = read_line(bytes, start)?;
    let command: Command = command_line.parse()?;
    let unescape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, next) = read_line(bytes, pos)?;
        pos = next;
        if line.is_empty() {
            break;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == CONTENT_LENGTH)
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(len) => {
            let end = pos
                .checked_add(len)
                .filter(|end| *end < bytes.len())
                .ok_or(FrameError::Unterminated)?;
            if bytes[end] != 0 {
                return Err(FrameError::Unterminated);
            }
            end
        }
        None => bytes[pos..]
            .iter()
            .position(|b| *b == 0)
            .map(|offset| pos + offset)
            .ok_or(FrameError::Unterminated)?,
    };

    let body = std::str::from_utf8(&bytes[pos..body_end])
        .map_err(|_| FrameError::InvalidUtf8)?
        .to_string();

    Ok((
        Frame {
            command,
            headers,
            body,
        },
        body_end + 1,
    ))
}

/// Line starting at `start` without its EOL, and the offset after the EOL
fn read_line(bytes: &[u8], start: usize) -> Result<(&str, usize), FrameError> {
    let offset = bytes[start..]
        .iter()
        .position(|b| *b == b'\n')
        .ok_or(FrameError::Unterminated)?;
    let mut line = &bytes[start..start + offset];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    let line = std::str::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)?;
    Ok((line, start + offset + 1))
}

fn escape_header(value: &str) -> String {
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

fn unescape_header(value: &str) -> Result<String, FrameError> {
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
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}
