//! Wire layer between the host and the interpreter subprocess.
//!
//! # Architecture
//!
//! - **protocol**: Message types (Command, Response)
//! - **codec**: Length-prefixed JSON framing for AsyncRead/AsyncWrite
//! - **channel**: One write-then-read exchange per call over the child's pipes

pub mod channel;
pub mod codec;
pub mod protocol;
