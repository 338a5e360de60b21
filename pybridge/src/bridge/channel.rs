//! Protocol channel over the interpreter's stdin/stdout.
//!
//! Each exchange is one frame written, then one frame read. There is no
//! background reader and no request queue; `&mut self` keeps callers from
//! interleaving exchanges.

use std::io;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::JsonCodec;
use super::protocol::{Command, Response};
use crate::error::{BridgeError, Result};

pub struct Channel<R, W> {
    reader: FramedRead<R, JsonCodec<Response>>,
    writer: FramedWrite<W, JsonCodec<Command>>,
    timeout: Option<Duration>,
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_codecs(reader, writer, JsonCodec::new(), JsonCodec::new())
    }

    pub fn with_max_frame_length(reader: R, writer: W, max_frame_length: usize) -> Self {
        Self::with_codecs(
            reader,
            writer,
            JsonCodec::with_max_frame_length(max_frame_length),
            JsonCodec::with_max_frame_length(max_frame_length),
        )
    }

    fn with_codecs(
        reader: R,
        writer: W,
        read_codec: JsonCodec<Response>,
        write_codec: JsonCodec<Command>,
    ) -> Self {
        Self {
            reader: FramedRead::new(reader, read_codec),
            writer: FramedWrite::new(writer, write_codec),
            timeout: None,
        }
    }

    /// Deadline for a whole exchange (write and read). `None` blocks forever.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Write one frame and read exactly one response frame.
    ///
    /// `error` responses are returned as-is; callers decide whether to map
    /// them with [`Response::into_result`].
    pub async fn exchange<C: Serialize>(&mut self, frame: C) -> Result<Response> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange_inner(frame))
                .await
                .map_err(|_| BridgeError::Timeout(limit))?,
            None => self.exchange_inner(frame).await,
        }
    }

    async fn exchange_inner<C: Serialize>(&mut self, frame: C) -> Result<Response> {
        self.writer.send(frame).await.map_err(send_error)?;

        match self.reader.next().await {
            Some(Ok(response)) => {
                tracing::trace!(kind = response.kind(), "Received response");
                Ok(response)
            }
            Some(Err(e)) => Err(BridgeError::Io(e)),
            None => Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "interpreter closed its output",
            ))),
        }
    }

}

/// A frame that fails to serialize never reaches the pipe, so it is an
/// encoding error rather than a broken stream.
fn send_error(e: io::Error) -> BridgeError {
    if !e.get_ref().is_some_and(|inner| inner.is::<serde_json::Error>()) {
        return BridgeError::Io(e);
    }
    let kind = e.kind();
    match e.into_inner().map(|inner| inner.downcast::<serde_json::Error>()) {
        Some(Ok(json)) => BridgeError::Encoding(*json),
        Some(Err(inner)) => BridgeError::Io(io::Error::new(kind, inner)),
        None => BridgeError::Io(kind.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{DuplexStream, duplex};

    type ChildReader = FramedRead<DuplexStream, JsonCodec<Command>>;
    type ChildWriter = FramedWrite<DuplexStream, JsonCodec<Command>>;

    /// Host channel plus the child's ends of both pipes.
    fn pipes() -> (Channel<DuplexStream, DuplexStream>, ChildReader, ChildWriter) {
        let (host_in, child_out) = duplex(64 * 1024);
        let (host_out, child_in) = duplex(64 * 1024);
        (
            Channel::new(host_in, host_out),
            FramedRead::new(child_in, JsonCodec::new()),
            FramedWrite::new(child_out, JsonCodec::new()),
        )
    }

    #[tokio::test]
    async fn exchange_writes_then_reads_one_frame() {
        let (mut channel, mut child_rx, mut child_tx) = pipes();

        let child = tokio::spawn(async move {
            let cmd = child_rx.next().await.unwrap().unwrap();
            assert_eq!(cmd, Command::get("x").unwrap());
            child_tx
                .send(Response::Get {
                    var: "x".to_string(),
                    value: json!(42),
                })
                .await
                .unwrap();
        });

        let resp = channel.exchange(Command::get("x").unwrap()).await.unwrap();
        assert_eq!(
            resp,
            Response::Get {
                var: "x".to_string(),
                value: json!(42)
            }
        );
        child.await.unwrap();
    }

    #[tokio::test]
    async fn responses_stay_in_request_order() {
        let (mut channel, mut child_rx, mut child_tx) = pipes();

        tokio::spawn(async move {
            while let Some(Ok(cmd)) = child_rx.next().await {
                let resp = match cmd {
                    Command::Run { script } => Response::Run { output: script },
                    _ => Response::Set,
                };
                if child_tx.send(resp).await.is_err() {
                    break;
                }
            }
        });

        for i in 0..5 {
            let resp = channel.exchange(Command::run(format!("#{i}"))).await.unwrap();
            assert_eq!(
                resp,
                Response::Run {
                    output: format!("#{i}")
                }
            );
        }
    }

    #[tokio::test]
    async fn closed_output_is_unexpected_eof() {
        let (mut channel, mut child_rx, child_tx) = pipes();
        drop(child_tx);

        tokio::spawn(async move {
            let _ = child_rx.next().await;
        });

        match channel.exchange(Command::Shutdown).await {
            Err(BridgeError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_child_times_out() {
        let (mut channel, _child_rx, _child_tx) = pipes();
        channel.set_timeout(Some(Duration::from_millis(50)));

        let err = channel.exchange(Command::get("x").unwrap()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn unserializable_frame_is_an_encoding_error() {
        let (mut channel, _child_rx, _child_tx) = pipes();

        let mut frame = std::collections::HashMap::new();
        frame.insert(vec![1u8], 1);

        let err = channel.exchange(frame).await.unwrap_err();
        assert!(matches!(err, BridgeError::Encoding(_)), "{err:?}");
    }

    #[tokio::test]
    async fn raw_frames_reach_the_child() {
        let (mut channel, child_rx, mut child_tx) = pipes();

        // Not a Command, so the child side decodes plain JSON values.
        let mut child_rx =
            FramedRead::new(child_rx.into_inner(), JsonCodec::<serde_json::Value>::new());
        tokio::spawn(async move {
            let frame = child_rx.next().await.unwrap().unwrap();
            child_tx
                .send(Response::Error {
                    kind: "ValueError".to_string(),
                    message: format!("invalid command type: {}", frame["type"]),
                })
                .await
                .unwrap();
        });

        let resp = channel.exchange(json!({"type": "bogus"})).await.unwrap();
        assert_eq!(
            resp,
            Response::Error {
                kind: "ValueError".to_string(),
                message: "invalid command type: \"bogus\"".to_string(),
            }
        );
    }
}
