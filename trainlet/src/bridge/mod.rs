//! IPC bridge between trainlet and the interpreter subprocess.
//!
//! The interpreter speaks a minimal length-prefixed protocol over its
//! stdin/stdout:
//!
//! - **request**: one frame carrying the cell's code
//! - **response**: two frames in order, stdout payload then stderr payload
//!
//! # Architecture
//!
//! - **protocol**: Message types (ExecRequest/ExecReply)
//! - **codec**: Length-prefixed framing codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
