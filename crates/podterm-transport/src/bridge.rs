//! Drives one terminal session from accepted connection to teardown.

use futures::{Sink, Stream};
use podterm_core::{ExecStreams, ExecTarget, TerminalSizeQueue, TransportError};
use podterm_session::{ManagerError, SessionManager, TerminationReason};
use tracing::Instrument;

use crate::terminal::{Frame, SessionTransport};

/// Prefix of the final frame a client sees when the exec stream fails.
pub const EXEC_ERROR_PREFIX: &str = "Exec to pod error! err: ";

/// Run one session over an already-upgraded connection.
///
/// Registers the session, hands the connection to the manager's executor and
/// tears everything down once either side finishes. When the executor fails
/// while the client is still connected, its error text is sent as one last
/// output frame before the connection closes.
///
/// # Errors
/// Returns error if the manager refuses new sessions.
pub async fn run_bridge<S, K>(
    manager: &SessionManager,
    target: ExecTarget,
    frames: S,
    sink: K,
) -> Result<TerminationReason, ManagerError>
where
    S: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
    K: Sink<String, Error = TransportError> + Send + Unpin + 'static,
{
    let handle = manager.register(target.clone()).await?;
    let span = tracing::info_span!(
        "terminal",
        session_id = %handle.id,
        namespace = %target.namespace,
        pod = %target.pod,
        container = %target.container,
    );

    let reason = async move {
        let lifecycle = handle.lifecycle.clone();
        let config = manager.config();
        let transport = SessionTransport::spawn(frames, sink, &lifecycle, config);
        let (reader, writer, resize) = transport.into_parts();

        let streams = ExecStreams {
            stdin: Box::new(reader),
            stdout: Box::new(writer.clone()),
            resize: target
                .tty
                .then(|| Box::new(resize) as Box<dyn TerminalSizeQueue>),
            tty: target.tty,
            cancel: lifecycle.token(),
        };

        tracing::info!(exec = %target.exec_path(), "exec pod");
        let executor = manager.executor();
        let stream = executor.stream(&target, streams);
        tokio::pin!(stream);

        let result = tokio::select! {
            result = &mut stream => result,
            () = lifecycle.cancelled() => {
                // Give the executor a chance to stop on its own.
                let grace = config.close_timeout();
                if let Ok(result) = tokio::time::timeout(grace, &mut stream).await {
                    result
                } else {
                    tracing::warn!(?grace, "executor did not stop after termination");
                    Ok(())
                }
            }
        };

        match result {
            Ok(()) => {
                lifecycle.terminate(TerminationReason::Completed);
            }
            Err(e) => {
                tracing::info!(error = %e, "exec stream failed");
                if !lifecycle.is_terminated() {
                    let msg = format!("{EXEC_ERROR_PREFIX}{e}");
                    let bound = config.close_timeout();
                    match tokio::time::timeout(bound, writer.write_output(msg.as_bytes())).await {
                        Ok(Ok(())) => {}
                        Ok(Err(send_err)) => {
                            tracing::debug!(error = %send_err, "could not report exec error");
                        }
                        Err(_) => tracing::debug!(?bound, "client not reading, exec error dropped"),
                    }
                }
                lifecycle.terminate(TerminationReason::Execution);
            }
        }

        if let Err(e) = writer.close().await {
            tracing::debug!(error = %e, "close failed");
        }

        let reason = manager
            .unregister(handle.id)
            .await
            .or_else(|| lifecycle.reason())
            .unwrap_or(TerminationReason::Closed);
        tracing::info!(%reason, "close session.");
        reason
    }
    .instrument(span)
    .await;
    Ok(reason)
}
