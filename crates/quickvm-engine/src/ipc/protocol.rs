//! Wire frames of the service protocol.

use std::io;

use quickvm_common::constants::MAX_FRAME_BYTES;
use quickvm_common::error::{QuickVmError, Result};
use quickvm_common::types::{CommandOutcome, RequestedState, StateChangeEvent, VmId, VmStatus};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// A request from a front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Correlates the response with this request.
    pub id: u64,
    /// The operation.
    #[serde(flatten)]
    pub call: Call,
}

/// Operations a front-end can invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    /// Start receiving state-change pushes on this connection.
    Subscribe,
    /// Stop receiving pushes.
    Unsubscribe,
    /// Enumerate machines.
    GetVm {
        /// Restrict to one machine.
        #[serde(default)]
        name: Option<VmId>,
    },
    /// Request a state change with a raw requested-state code.
    RequestVmStateChange {
        /// Target machine.
        name: VmId,
        /// Requested-state code.
        requested_state: RequestedState,
    },
    /// Ask the guest to shut down.
    ShutdownVm {
        /// Target machine.
        name: VmId,
    },
    /// Liveness check.
    Ping,
}

/// A frame sent by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Answer to the request with the same id.
    Response {
        /// Id of the request.
        id: u64,
        /// The answer.
        reply: Reply,
    },
    /// Pushed to subscribed connections.
    StateChanged {
        /// The transition.
        event: StateChangeEvent,
    },
}

impl From<StateChangeEvent> for ServerFrame {
    fn from(event: StateChangeEvent) -> Self {
        Self::StateChanged { event }
    }
}

/// Payload of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Reply {
    /// The connection is subscribed.
    Subscribed,
    /// The connection is no longer subscribed.
    Unsubscribed,
    /// Result of `get_vm`.
    Vms(Vec<VmStatus>),
    /// Result of a command.
    Outcome(CommandOutcome),
    /// Result of `ping`.
    Pong,
    /// The request could not be served.
    Error(String),
}

/// Serializes a frame as one newline-terminated line.
///
/// # Errors
///
/// Returns an error if serialization fails or the frame exceeds
/// [`MAX_FRAME_BYTES`].
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(frame)?;
    if line.len() >= MAX_FRAME_BYTES {
        return Err(QuickVmError::Protocol {
            message: format!("frame of {} bytes exceeds limit", line.len()),
        });
    }
    line.push(b'\n');
    Ok(line)
}

/// Parses one line received from the peer.
///
/// # Errors
///
/// Returns an error if the line is too long or is not a valid frame.
pub fn decode_frame<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    if line.len() > MAX_FRAME_BYTES {
        return Err(QuickVmError::Protocol {
            message: format!("frame of {} bytes exceeds limit", line.len()),
        });
    }
    Ok(serde_json::from_slice(line)?)
}

/// Reads lines until one decodes as a `T`.
///
/// Blank and malformed lines are skipped. Returns `None` at end of stream
/// or on a read error.
pub async fn read_next_valid_frame<T, R>(reader: &mut R) -> Option<T>
where
    T: DeserializeOwned,
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = Vec::new();
        match read_bounded_line(reader, &mut line).await {
            Ok(Line::Eof) => return None,
            Ok(Line::Complete) => {}
            Ok(Line::TooLong) => {
                tracing::warn!(limit = MAX_FRAME_BYTES, "skipping oversized frame");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "read failed");
                return None;
            }
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match decode_frame(&line) {
            Ok(frame) => return Some(frame),
            Err(e) => tracing::warn!(error = %e, "skipping malformed frame"),
        }
    }
}

enum Line {
    Complete,
    TooLong,
    Eof,
}

/// Reads one newline-terminated line into `line`, holding at most
/// [`MAX_FRAME_BYTES`] of it. The rest of an oversized line is consumed and
/// discarded.
async fn read_bounded_line<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let mut too_long = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            let result = if too_long {
                Line::TooLong
            } else if line.is_empty() {
                Line::Eof
            } else {
                Line::Complete
            };
            return Ok(result);
        }
        let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        let used = chunk.len();
        if !too_long {
            if line.len() + used > MAX_FRAME_BYTES + 1 {
                too_long = true;
                line.clear();
            } else {
                line.extend_from_slice(chunk);
            }
        }
        reader.consume(used);
        if done {
            return Ok(if too_long { Line::TooLong } else { Line::Complete });
        }
    }
}
