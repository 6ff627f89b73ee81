//! Wire records: data messages and the connection handshake.
//!
//! Every record is one text line. Fields are separated by [`DELIMITER`],
//! which cannot appear in an integer field. Line terminators are the
//! transport's business; `decode` tolerates a trailing `\n` or `\r\n`.

use crate::error::EnvError;
use crate::types::NodeId;
use std::str::FromStr;

/// Field separator shared by every wire record.
pub const DELIMITER: char = '\t';

/// A timestamped message between two nodes.
///
/// `logical_time` is the sender's clock value at the moment of sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Message {
    pub sender: NodeId,
    pub recipient: NodeId,
    pub logical_time: u64,
}

impl Message {
    /// Creates a new message.
    pub fn new(sender: NodeId, recipient: NodeId, logical_time: u64) -> Self {
        Self {
            sender,
            recipient,
            logical_time,
        }
    }

    /// Encodes the message as `sender\trecipient\tlogical_time` (no newline).
    pub fn encode(&self) -> String {
        format!(
            "{}{DELIMITER}{}{DELIMITER}{}",
            self.sender, self.recipient, self.logical_time
        )
    }

    /// Decodes one line. Fails unless it holds exactly three non-negative
    /// integer fields.
    pub fn decode(line: &str) -> Result<Self, EnvError> {
        let line = strip_line_ending(line);
        let fields: Vec<&str> = line.split(DELIMITER).collect();
        if fields.len() != 3 {
            return Err(EnvError::malformed(format!(
                "expected 3 fields, got {}: {line:?}",
                fields.len()
            )));
        }

        let sender = parse_field::<u32>(fields[0], "sender")?;
        let recipient = parse_field::<u32>(fields[1], "recipient")?;
        let logical_time = parse_field::<u64>(fields[2], "logical time")?;

        Ok(Self::new(NodeId(sender), NodeId(recipient), logical_time))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Message {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Identity negotiation, exchanged once when a node connects.
///
/// ```text
/// node  -> relay   HELLO            (relay picks the id)
/// node  -> relay   HELLO\t2         (node asks for id 2)
/// relay -> node    WELCOME\t2
/// relay -> node    REJECTED\tid 2 already connected
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Hello { requested: Option<NodeId> },
    Welcome { id: NodeId },
    Rejected { reason: String },
}

impl Handshake {
    const HELLO: &'static str = "HELLO";
    const WELCOME: &'static str = "WELCOME";
    const REJECTED: &'static str = "REJECTED";

    /// Encodes the frame as a single line (no newline).
    pub fn encode(&self) -> String {
        match self {
            Handshake::Hello { requested: None } => Self::HELLO.to_string(),
            Handshake::Hello {
                requested: Some(id),
            } => format!("{}{DELIMITER}{id}", Self::HELLO),
            Handshake::Welcome { id } => format!("{}{DELIMITER}{id}", Self::WELCOME),
            // Newlines would split the frame
            Handshake::Rejected { reason } => {
                format!("{}{DELIMITER}{}", Self::REJECTED, reason.replace(['\n', '\r'], " "))
            }
        }
    }

    /// Decodes a handshake line.
    pub fn decode(line: &str) -> Result<Self, EnvError> {
        let line = strip_line_ending(line);
        let (tag, rest) = match line.split_once(DELIMITER) {
            Some((tag, rest)) => (tag, Some(rest)),
            None => (line, None),
        };

        match (tag, rest) {
            (Self::HELLO, None) => Ok(Handshake::Hello { requested: None }),
            (Self::HELLO, Some(id)) => Ok(Handshake::Hello {
                requested: Some(NodeId(parse_field(id, "requested id")?)),
            }),
            (Self::WELCOME, Some(id)) => Ok(Handshake::Welcome {
                id: NodeId(parse_field(id, "assigned id")?),
            }),
            (Self::REJECTED, reason) => Ok(Handshake::Rejected {
                reason: reason.unwrap_or_default().to_string(),
            }),
            _ => Err(EnvError::malformed(format!("not a handshake: {line:?}"))),
        }
    }
}

fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

fn parse_field<T: FromStr>(field: &str, name: &str) -> Result<T, EnvError> {
    // Reject signs and whitespace explicitly; FromStr accepts a leading '+'
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EnvError::malformed(format!("bad {name} field: {field:?}")));
    }
    field
        .parse()
        .map_err(|_| EnvError::malformed(format!("{name} out of range: {field:?}")))
}
