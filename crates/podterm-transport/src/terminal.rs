//! Session transport: one client connection adapted into the input, output
//! and size-poll streams an executor consumes.
//!
//! The connection is split once. The inbound half belongs to the
//! [`SessionReader`]; the outbound half is moved into a writer task that
//! serializes frames from every [`SessionWriter`] handle and closes the
//! connection when the session terminates.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use podterm_core::{BridgeError, InputSource, OutputSink, ProtocolError, TransportError};
use podterm_session::{
    Lifecycle, ResizeQueue, ResizeSender, SessionConfig, TerminationReason, resize_channel,
};
use tokio::sync::{mpsc, oneshot, watch};

use crate::protocol::{self, ClientCommand};

/// One inbound frame, independent of the websocket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close,
}

type CloseOutcome = Option<Result<(), TransportError>>;

struct WriteRequest {
    frame: String,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

/// A client connection bound to one session.
pub struct SessionTransport<S> {
    reader: SessionReader<S>,
    writer: SessionWriter,
    resize: ResizeQueue,
}

impl<S> SessionTransport<S>
where
    S: Stream<Item = Result<Frame, TransportError>> + Send + Unpin,
{
    /// Take ownership of a connection and start its writer task.
    #[must_use]
    pub fn spawn<K>(frames: S, sink: K, lifecycle: &Lifecycle, config: &SessionConfig) -> Self
    where
        K: Sink<String, Error = TransportError> + Send + Unpin + 'static,
    {
        let (resize_tx, resize) = resize_channel(config.resize_policy, lifecycle);
        let (tx, rx) = mpsc::channel(1);
        let (closed_tx, closed_rx) = watch::channel(None);

        tokio::spawn(write_loop(
            sink,
            rx,
            lifecycle.clone(),
            config.close_timeout(),
            closed_tx,
        ));

        Self {
            reader: SessionReader {
                frames,
                resize: resize_tx,
                lifecycle: lifecycle.clone(),
                terminate_on_protocol_error: config.terminate_on_protocol_error,
            },
            writer: SessionWriter {
                tx,
                lifecycle: lifecycle.clone(),
                closed: closed_rx,
            },
            resize,
        }
    }

    /// Split into the three executor-facing streams.
    #[must_use]
    pub fn into_parts(self) -> (SessionReader<S>, SessionWriter, ResizeQueue) {
        (self.reader, self.writer, self.resize)
    }

    /// See [`SessionReader::read_input`].
    ///
    /// # Errors
    /// See [`SessionReader::read_input`].
    pub async fn read_input(&mut self) -> Result<Bytes, BridgeError> {
        self.reader.read_input().await
    }

    /// See [`SessionWriter::write_output`].
    ///
    /// # Errors
    /// See [`SessionWriter::write_output`].
    pub async fn write_output(&self, data: &[u8]) -> Result<(), TransportError> {
        self.writer.write_output(data).await
    }

    /// See [`SessionWriter::close`].
    ///
    /// # Errors
    /// See [`SessionWriter::close`].
    pub async fn close(&self) -> Result<(), TransportError> {
        self.writer.close().await
    }
}

/// Inbound half: decodes client envelopes and dispatches them.
pub struct SessionReader<S> {
    frames: S,
    resize: ResizeSender,
    lifecycle: Lifecycle,
    terminate_on_protocol_error: bool,
}

impl<S> SessionReader<S>
where
    S: Stream<Item = Result<Frame, TransportError>> + Send + Unpin,
{
    /// Wait for the next input chunk.
    ///
    /// Keep-alives and resizes yield an empty chunk. A resize is handed to
    /// the resize queue before this returns.
    ///
    /// # Errors
    /// Returns a protocol error for an undecodable envelope, and
    /// [`TransportError::Closed`] once the client is gone or the session has
    /// terminated.
    pub async fn read_input(&mut self) -> Result<Bytes, BridgeError> {
        let frame = tokio::select! {
            biased;
            () = self.lifecycle.cancelled() => return Err(TransportError::Closed.into()),
            frame = self.frames.next() => frame,
        };

        let decoded = match frame {
            Some(Ok(Frame::Text(text))) => protocol::decode(&text),
            Some(Ok(Frame::Binary(data))) => protocol::decode_binary(&data),
            None | Some(Ok(Frame::Close)) => {
                tracing::debug!("client closed connection");
                self.lifecycle.terminate(TerminationReason::ClientGone);
                return Err(TransportError::Closed.into());
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "read message err");
                self.lifecycle.terminate(TerminationReason::Transport);
                return Err(e.into());
            }
        };

        match decoded {
            Ok(ClientCommand::Input(data)) => Ok(data),
            Ok(ClientCommand::Ping) => Ok(Bytes::new()),
            Ok(ClientCommand::Resize(size)) => {
                tracing::trace!(%size, "resize requested");
                self.resize
                    .send(size)
                    .await
                    .map_err(|_| TransportError::Closed)?;
                Ok(Bytes::new())
            }
            Err(e) => Err(self.protocol_error(e)),
        }
    }

    fn protocol_error(&self, err: ProtocolError) -> BridgeError {
        tracing::warn!(error = %err, "read parse message err");
        if self.terminate_on_protocol_error {
            self.lifecycle.terminate(TerminationReason::Protocol);
        }
        err.into()
    }
}

#[async_trait]
impl<S> InputSource for SessionReader<S>
where
    S: Stream<Item = Result<Frame, TransportError>> + Send + Unpin,
{
    async fn read_input(&mut self) -> Result<Bytes, BridgeError> {
        Self::read_input(self).await
    }
}

/// Outbound handle. Cheap to clone; every clone feeds the same writer task,
/// which sends frames in the order the writes were issued.
#[derive(Clone)]
pub struct SessionWriter {
    tx: mpsc::Sender<WriteRequest>,
    lifecycle: Lifecycle,
    closed: watch::Receiver<CloseOutcome>,
}

impl SessionWriter {
    /// Send one chunk of output as exactly one frame.
    ///
    /// Returns once the frame has been handed to the connection.
    ///
    /// # Errors
    /// Returns the transport error if the send failed, or
    /// [`TransportError::Closed`] if the connection is already closed.
    pub async fn write_output(&self, data: &[u8]) -> Result<(), TransportError> {
        let frame = protocol::encode_output(data).map_err(|e| TransportError::Send(e.to_string()))?;
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriteRequest { frame, ack })
            .await
            .map_err(|_| TransportError::Closed)?;
        done.await.map_err(|_| TransportError::Closed)?
    }

    /// Terminate the session and wait for the connection to close.
    ///
    /// Safe to call any number of times; every call reports the same
    /// outcome.
    ///
    /// # Errors
    /// Returns the error from closing the connection, if any.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.lifecycle.terminate(TerminationReason::Closed);
        let mut closed = self.closed.clone();
        match closed.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or(Ok(())),
            // Writer task is gone without reporting; nothing left to close.
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl OutputSink for SessionWriter {
    async fn write_output(&mut self, data: &[u8]) -> Result<(), TransportError> {
        Self::write_output(self, data).await
    }
}

async fn write_loop<K>(
    mut sink: K,
    mut rx: mpsc::Receiver<WriteRequest>,
    lifecycle: Lifecycle,
    close_timeout: Duration,
    closed: watch::Sender<CloseOutcome>,
) where
    K: Sink<String, Error = TransportError> + Unpin,
{
    loop {
        let request = tokio::select! {
            biased;
            () = lifecycle.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            () = lifecycle.cancelled() => Err(TransportError::Closed),
            result = sink.send(request.frame) => result,
        };
        let failed = result.is_err();
        if let Err(e) = &result {
            tracing::warn!(error = %e, "write message err");
            lifecycle.terminate(TerminationReason::Transport);
        }
        let _ = request.ack.send(result);
        if failed {
            break;
        }
    }

    // Fail queued and future writes fast.
    rx.close();
    lifecycle.terminate(TerminationReason::Closed);

    let outcome = match tokio::time::timeout(close_timeout, sink.close()).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::CloseTimeout(close_timeout)),
    };
    if let Err(e) = &outcome {
        tracing::debug!(error = %e, "connection close failed");
    }
    closed.send_replace(Some(outcome));
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        task::{Context, Poll},
        time::Duration,
    };

    use futures::channel::mpsc as fmpsc;
    use podterm_core::TerminalSize;
    use podterm_session::{LifecycleState, ResizePolicy};

    use super::*;

    const BOUND: Duration = Duration::from_secs(1);

    type Inbound = fmpsc::UnboundedSender<Result<Frame, TransportError>>;
    type Outbound = fmpsc::UnboundedReceiver<String>;
    type Frames = fmpsc::UnboundedReceiver<Result<Frame, TransportError>>;

    fn connect(config: &SessionConfig) -> (Inbound, Outbound, Lifecycle, SessionTransport<Frames>) {
        let (client_tx, frames) = fmpsc::unbounded();
        let (sink, client_rx) = fmpsc::unbounded::<String>();
        let sink = sink.sink_map_err(|e| TransportError::Send(e.to_string()));
        let lifecycle = Lifecycle::new();
        let transport = SessionTransport::spawn(frames, sink, &lifecycle, config);
        (client_tx, client_rx, lifecycle, transport)
    }

    fn text(s: &str) -> Result<Frame, TransportError> {
        Ok(Frame::Text(s.to_string()))
    }

    #[tokio::test]
    async fn test_input_reaches_read_path_in_order() {
        let (client, _out, _lc, mut transport) = connect(&SessionConfig::default());
        client
            .unbounded_send(text(r#"{"operation":"input","data":"ls\n"}"#))
            .unwrap();
        client
            .unbounded_send(text(r#"{"operation":"input","data":"pwd\n"}"#))
            .unwrap();

        assert_eq!(transport.read_input().await.unwrap(), Bytes::from_static(b"ls\n"));
        assert_eq!(transport.read_input().await.unwrap(), Bytes::from_static(b"pwd\n"));
    }

    #[tokio::test]
    async fn test_ping_is_empty_not_eof() {
        let (client, _out, lifecycle, transport) = connect(&SessionConfig::default());
        let (mut reader, _writer, mut resize) = transport.into_parts();

        client.unbounded_send(text(r#"{"operation":"ping"}"#)).unwrap();
        assert!(reader.read_input().await.unwrap().is_empty());
        assert_eq!(lifecycle.state(), LifecycleState::Active);

        // No size event came out of the ping.
        let mut next = tokio_test::task::spawn(resize.next_size());
        tokio_test::assert_pending!(next.poll());
    }

    #[tokio::test]
    async fn test_resize_reaches_poller() {
        let (client, _out, _lc, transport) = connect(&SessionConfig::default());
        let (mut reader, _writer, mut resize) = transport.into_parts();

        let poller = tokio::spawn(async move { resize.next_size().await });
        client
            .unbounded_send(text(r#"{"operation":"resize","rows":40,"cols":120}"#))
            .unwrap();

        assert!(reader.read_input().await.unwrap().is_empty());
        let size = tokio::time::timeout(BOUND, poller).await.unwrap().unwrap();
        assert_eq!(size, Some(TerminalSize::new(40, 120)));
    }

    #[tokio::test]
    async fn test_rendezvous_resize_waits_for_poller() {
        let config = SessionConfig {
            resize_policy: ResizePolicy::Rendezvous,
            ..SessionConfig::default()
        };
        let (client, _out, _lc, transport) = connect(&config);
        let (mut reader, _writer, mut resize) = transport.into_parts();

        client
            .unbounded_send(text(r#"{"operation":"resize","rows":24,"cols":80}"#))
            .unwrap();
        let read = tokio::spawn(async move { reader.read_input().await.map(|b| b.len()) });

        assert_eq!(resize.next_size().await, Some(TerminalSize::new(24, 80)));
        let len = tokio::time::timeout(BOUND, read).await.unwrap().unwrap().unwrap();
        assert_eq!(len, 0);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_protocol_error() {
        let (client, _out, lifecycle, mut transport) = connect(&SessionConfig::default());
        client.unbounded_send(text(r#"{"operation":"bogus"}"#)).unwrap();
        client
            .unbounded_send(text(r#"{"operation":"input","data":"a"}"#))
            .unwrap();

        let err = transport.read_input().await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Protocol(ProtocolError::UnknownOperation(ref op)) if op == "bogus"
        ));
        assert!(!err.is_fatal());
        assert_eq!(lifecycle.state(), LifecycleState::Active);

        // The session keeps reading and no bytes leaked from the bad frame.
        assert_eq!(transport.read_input().await.unwrap(), Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn test_protocol_error_can_terminate() {
        let config = SessionConfig {
            terminate_on_protocol_error: true,
            ..SessionConfig::default()
        };
        let (client, _out, lifecycle, mut transport) = connect(&config);
        client.unbounded_send(text("{")).unwrap();

        assert!(matches!(
            transport.read_input().await,
            Err(BridgeError::Protocol(ProtocolError::Malformed(_)))
        ));
        assert_eq!(
            lifecycle.state(),
            LifecycleState::Terminated(TerminationReason::Protocol)
        );
    }

    #[tokio::test]
    async fn test_output_frames_keep_call_order() {
        let (_client, mut out, _lc, transport) = connect(&SessionConfig::default());

        for chunk in ["one", "two", "three"] {
            transport.write_output(chunk.as_bytes()).await.unwrap();
        }

        for expected in ["one", "two", "three"] {
            let frame = out.next().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["operation"], "output");
            assert_eq!(value["data"], expected);
        }
    }

    #[tokio::test]
    async fn test_client_drop_terminates_and_unblocks_poller() {
        let (client, _out, lifecycle, transport) = connect(&SessionConfig::default());
        let (mut reader, writer, mut resize) = transport.into_parts();

        let poller = tokio::spawn(async move { resize.next_size().await });
        drop(client);

        assert!(reader.read_input().await.unwrap_err().is_closed());
        let size = tokio::time::timeout(BOUND, poller).await.unwrap().unwrap();
        assert_eq!(size, None);
        assert_eq!(
            lifecycle.state(),
            LifecycleState::Terminated(TerminationReason::ClientGone)
        );

        // Closing afterwards is harmless.
        writer.close().await.unwrap();
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_closes_connection() {
        let (_client, mut out, lifecycle, transport) = connect(&SessionConfig::default());

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(
            lifecycle.state(),
            LifecycleState::Terminated(TerminationReason::Closed)
        );

        // Sink closed: the client side sees end of stream.
        assert_eq!(out.next().await, None);
        assert_eq!(
            transport.write_output(b"late").await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_terminate_unblocks_pending_read() {
        let (_client, _out, lifecycle, transport) = connect(&SessionConfig::default());
        let (mut reader, _writer, _resize) = transport.into_parts();

        let read = tokio::spawn(async move { reader.read_input().await });
        tokio::task::yield_now().await;
        lifecycle.terminate(TerminationReason::Cancelled);

        let res = tokio::time::timeout(BOUND, read).await.unwrap().unwrap();
        assert!(res.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_receive_error_is_fatal() {
        let (client, _out, lifecycle, mut transport) = connect(&SessionConfig::default());
        client
            .unbounded_send(Err(TransportError::Receive("connection reset".into())))
            .unwrap();

        let err = transport.read_input().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            lifecycle.state(),
            LifecycleState::Terminated(TerminationReason::Transport)
        );
    }

    #[tokio::test]
    async fn test_send_failure_is_returned_and_terminates() {
        let (frames_tx, frames) = fmpsc::unbounded::<Result<Frame, TransportError>>();
        let (sink, client_rx) = fmpsc::unbounded::<String>();
        drop(client_rx);
        let sink = sink.sink_map_err(|e| TransportError::Send(e.to_string()));
        let lifecycle = Lifecycle::new();
        let transport =
            SessionTransport::spawn(frames, sink, &lifecycle, &SessionConfig::default());

        assert!(matches!(
            transport.write_output(b"x").await,
            Err(TransportError::Send(_))
        ));
        assert_eq!(
            lifecycle.state(),
            LifecycleState::Terminated(TerminationReason::Transport)
        );
        drop(frames_tx);
    }

    /// Accepts frames but never finishes closing.
    struct HangingClose;

    impl Sink<String> for HangingClose {
        type Error = TransportError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, _item: String) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_close_gives_up_after_close_timeout() {
        let (_client, frames) = fmpsc::unbounded::<Result<Frame, TransportError>>();
        let config = SessionConfig {
            close_timeout_ms: 50,
            ..SessionConfig::default()
        };
        let lifecycle = Lifecycle::new();
        let transport = SessionTransport::spawn(frames, HangingClose, &lifecycle, &config);

        transport.write_output(b"x").await.unwrap();
        let expected = Err(TransportError::CloseTimeout(Duration::from_millis(50)));
        let first = tokio::time::timeout(BOUND, transport.close()).await.unwrap();
        assert_eq!(first, expected);
        assert_eq!(transport.close().await, expected);
        assert_eq!(
            lifecycle.state(),
            LifecycleState::Terminated(TerminationReason::Closed)
        );
    }
}
