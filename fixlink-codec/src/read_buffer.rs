//! Incremental, IO-agnostic framer.
//!
//! [`FrameBuffer`] is a state machine fed with arbitrary byte chunks via
//! [`receive`](FrameBuffer::receive) (an empty chunk signals end of
//! stream) and drained with [`next_event`](FrameBuffer::next_event),
//! which yields complete framed messages, a request for more data, or
//! end-of-file. Bytes are scanned once: the cursor only moves forward
//! over already validated input.

use bytes::{Bytes, BytesMut};
use memchr::memchr;
use thiserror::Error;

use crate::{SOH, message::calc_checksum};

/// Byte length of the trailing `10=NNN<SEP>` checksum field.
const CHECKSUM_FIELD_LEN: usize = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("expected BeginString")]
    ExpectedBeginString,
    #[error("expected BodyLength")]
    ExpectedBodyLength,
    #[error("bad BodyLength value")]
    BadBodyLength,
    #[error("no terminating separator")]
    MissingSeparator,
    #[error("no terminating checksum")]
    MissingChecksum,
    #[error("checksum mismatch: expected {expected}, received {received}")]
    ChecksumMismatch { expected: String, received: String },
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("read buffer closed")]
    Closed,
}

#[derive(Debug, PartialEq)]
pub enum FrameEvent {
    /// More input is required; the hint, when known, is the minimum byte
    /// count still missing from the current frame.
    NeedsMoreData { hint: Option<usize> },
    /// One complete, well-framed message, terminating separator included.
    DataReady(Bytes),
    /// The stream is closed; no further events will be produced.
    EndOfFile,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ReadState {
    Idle,
    ExpectBeginString,
    ExpectBodyLength,
    ExpectBody,
    EndOfFile,
    Closed,
}

#[derive(Debug)]
pub struct FrameBuffer {
    separator: u8,
    convert_sep_for_checksum: bool,
    validate: bool,
    buf: BytesMut,
    /// Scan cursor: everything before it has been consumed by a previous
    /// state.
    scan: usize,
    required: usize,
    eof: bool,
    state: ReadState,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> FrameBuffer {
        FrameBuffer::with_options(SOH, true, true)
    }

    pub fn with_options(
        separator: u8,
        convert_sep_for_checksum: bool,
        validate: bool,
    ) -> FrameBuffer {
        FrameBuffer {
            separator,
            convert_sep_for_checksum,
            validate,
            buf: BytesMut::with_capacity(4096),
            scan: 0,
            required: 0,
            eof: false,
            state: ReadState::Idle,
        }
    }

    /// Append a chunk of input. An empty chunk signals end of stream.
    pub fn receive(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// Produce the next framing event.
    pub fn next_event(&mut self) -> Result<FrameEvent, FrameError> {
        loop {
            match self.state {
                ReadState::Closed => return Err(FrameError::Closed),
                ReadState::EndOfFile => {
                    self.state = ReadState::Closed;
                    return Ok(FrameEvent::EndOfFile);
                }
                ReadState::Idle => {
                    if self.buf.is_empty() {
                        if self.eof {
                            self.state = ReadState::EndOfFile;
                            continue;
                        }
                        return Ok(FrameEvent::NeedsMoreData { hint: None });
                    }
                    self.state = ReadState::ExpectBeginString;
                }
                ReadState::ExpectBeginString => {
                    let Some(sep) = memchr(self.separator, &self.buf) else {
                        return self.stalled();
                    };
                    if !self.buf.starts_with(b"8=") {
                        return Err(FrameError::ExpectedBeginString);
                    }
                    self.scan = sep + 1;
                    self.state = ReadState::ExpectBodyLength;
                }
                ReadState::ExpectBodyLength => {
                    let Some(sep) = memchr(self.separator, &self.buf[self.scan..]) else {
                        return self.stalled();
                    };
                    let sep = self.scan + sep;
                    let pair = &self.buf[self.scan..sep];
                    if !pair.starts_with(b"9=") {
                        return Err(FrameError::ExpectedBodyLength);
                    }
                    let body_length = parse_body_length(&pair[2..])?;
                    // The full frame also carries the checksum field.
                    self.required = sep + 1 + body_length + CHECKSUM_FIELD_LEN;
                    self.scan = sep + 1;
                    self.state = ReadState::ExpectBody;
                }
                ReadState::ExpectBody => {
                    if self.buf.len() < self.required {
                        let hint = self.required - self.buf.len();
                        if self.eof {
                            return Err(FrameError::UnexpectedEof);
                        }
                        return Ok(FrameEvent::NeedsMoreData { hint: Some(hint) });
                    }
                    // Trailing bytes beyond the frame stay queued for the
                    // next message.
                    let frame = self.buf.split_to(self.required).freeze();
                    self.scan = 0;
                    self.required = 0;
                    self.state = ReadState::Idle;
                    self.check_frame(&frame)?;
                    return Ok(FrameEvent::DataReady(frame));
                }
            }
        }
    }

    fn stalled(&self) -> Result<FrameEvent, FrameError> {
        if self.eof {
            Err(FrameError::UnexpectedEof)
        } else {
            Ok(FrameEvent::NeedsMoreData { hint: None })
        }
    }

    fn check_frame(&self, frame: &[u8]) -> Result<(), FrameError> {
        if frame.last() != Some(&self.separator) {
            return Err(FrameError::MissingSeparator);
        }
        if !self.validate {
            return Ok(());
        }
        let checksum = &frame[frame.len() - CHECKSUM_FIELD_LEN..frame.len() - 1];
        if !checksum.starts_with(b"10=") {
            return Err(FrameError::MissingChecksum);
        }
        let received = &checksum[3..];
        let expected = calc_checksum(frame, self.separator, self.convert_sep_for_checksum);
        if received != expected {
            return Err(FrameError::ChecksumMismatch {
                expected: String::from_utf8_lossy(&expected).into_owned(),
                received: String::from_utf8_lossy(received).into_owned(),
            });
        }
        Ok(())
    }
}

fn parse_body_length(digits: &[u8]) -> Result<usize, FrameError> {
    // Zero padding is within the specification.
    let digits = std::str::from_utf8(digits).map_err(|_| FrameError::BadBodyLength)?;
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    digits.parse().map_err(|_| FrameError::BadBodyLength)
}
