//! Length-prefixed framing codec for interpreter communication.
//!
//! Frames are `<decimal byte length>\n<payload>`. A request is one frame of
//! code; a response is exactly two frames, stdout then stderr. The decoder is
//! an explicit four-state machine driven by arbitrarily chunked bytes: each
//! state consumes only the bytes its declared length covers and leaves the
//! remainder buffered for the next state. Works over any AsyncRead/AsyncWrite.

use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::bridge::protocol::{ExecReply, ExecRequest};

/// Longest acceptable `<digits>\n` header.
const MAX_HEADER_BYTES: usize = 20;

/// Upper bound on a single stdout/stderr payload.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame header: {0}")]
    InvalidHeader(String),
    #[error("declared frame length {0} exceeds {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    OutputLen,
    Output { remaining: usize },
    ErrorLen,
    Error { remaining: usize },
}

/// Codec pairing a one-frame request encoder with the four-state response
/// decoder. One in-flight request per session at a time; the decoder resets
/// itself after yielding a reply, with any surplus bytes left in the buffer.
pub struct ExecCodec {
    state: DecodeState,
    output: Vec<u8>,
    error: Vec<u8>,
}

impl ExecCodec {
    pub fn new() -> Self {
        Self {
            state: DecodeState::OutputLen,
            output: Vec::new(),
            error: Vec::new(),
        }
    }
}

impl Default for ExecCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume one `<digits>\n` header from the front of `src`, if complete.
fn read_length(src: &mut BytesMut) -> Result<Option<usize>, FrameError> {
    match src.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            let header = src.split_to(pos + 1);
            let digits = std::str::from_utf8(&header[..pos])
                .map_err(|_| FrameError::InvalidHeader("header is not UTF-8".to_string()))?;
            let length: usize = digits
                .trim()
                .parse()
                .map_err(|_| FrameError::InvalidHeader(format!("not a decimal length: {digits:?}")))?;
            if length > MAX_FRAME_BYTES {
                return Err(FrameError::FrameTooLarge(length));
            }
            Ok(Some(length))
        }
        None if src.len() > MAX_HEADER_BYTES => Err(FrameError::InvalidHeader(
            "no newline within header bounds".to_string(),
        )),
        None => Ok(None),
    }
}

impl Decoder for ExecCodec {
    type Item = ExecReply;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ExecReply>, FrameError> {
        loop {
            match self.state {
                DecodeState::OutputLen => match read_length(src)? {
                    Some(length) => {
                        self.output.clear();
                        self.state = DecodeState::Output { remaining: length };
                    }
                    None => return Ok(None),
                },
                DecodeState::Output { remaining } => {
                    let take = remaining.min(src.len());
                    self.output.extend_from_slice(&src.split_to(take));
                    if take < remaining {
                        self.state = DecodeState::Output {
                            remaining: remaining - take,
                        };
                        return Ok(None);
                    }
                    self.state = DecodeState::ErrorLen;
                }
                DecodeState::ErrorLen => match read_length(src)? {
                    Some(length) => {
                        self.error.clear();
                        self.state = DecodeState::Error { remaining: length };
                    }
                    None => return Ok(None),
                },
                DecodeState::Error { remaining } => {
                    let take = remaining.min(src.len());
                    self.error.extend_from_slice(&src.split_to(take));
                    if take < remaining {
                        self.state = DecodeState::Error {
                            remaining: remaining - take,
                        };
                        return Ok(None);
                    }
                    let reply = ExecReply {
                        output: String::from_utf8_lossy(&self.output).into_owned(),
                        error: String::from_utf8_lossy(&self.error).into_owned(),
                    };
                    self.output.clear();
                    self.error.clear();
                    self.state = DecodeState::OutputLen;
                    return Ok(Some(reply));
                }
            }
        }
    }
}

impl Encoder<ExecRequest> for ExecCodec {
    type Error = FrameError;

    fn encode(&mut self, item: ExecRequest, dst: &mut BytesMut) -> Result<(), FrameError> {
        let code = item.code.as_bytes();
        tracing::trace!(code_bytes = code.len(), "Encoding exec frame");
        let header = format!("{}\n", code.len());
        dst.reserve(header.len() + code.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(code);
        Ok(())
    }
}
