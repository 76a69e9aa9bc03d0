//! Cancellable run event stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tessera_runtime::RunEvent;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Lazy, finite sequence of run events.
///
/// Yields one event per node completion or output chunk, in completion order,
/// and ends right after the terminal [`RunEvent::Finished`] or
/// [`RunEvent::Failed`]. Dropping the stream cancels the request it was
/// created for; the session and its other requests are unaffected.
pub struct RunStream {
  receiver: mpsc::UnboundedReceiver<RunEvent>,
  _cancel_on_drop: DropGuard,
  finished: bool,
}

impl RunStream {
  /// Wrap the receiving end of a run, cancelling `request` when dropped.
  pub fn new(receiver: mpsc::UnboundedReceiver<RunEvent>, request: CancellationToken) -> Self {
    Self {
      receiver,
      _cancel_on_drop: request.drop_guard(),
      finished: false,
    }
  }
}

impl Stream for RunStream {
  type Item = RunEvent;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunEvent>> {
    if self.finished {
      return Poll::Ready(None);
    }

    match self.receiver.poll_recv(cx) {
      Poll::Ready(Some(event)) => {
        if event.is_terminal() {
          self.finished = true;
        }
        Poll::Ready(Some(event))
      }
      Poll::Ready(None) => {
        self.finished = true;
        Poll::Ready(None)
      }
      Poll::Pending => Poll::Pending,
    }
  }
}

impl std::fmt::Debug for RunStream {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RunStream")
      .field("finished", &self.finished)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::StreamExt;
  use serde_json::json;

  #[tokio::test]
  async fn test_stream_ends_after_terminal_event() {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut stream = RunStream::new(rx, CancellationToken::new());

    tx.send(RunEvent::Finished { output: json!([1]) }).unwrap();
    tx.send(RunEvent::Finished { output: json!([2]) }).unwrap();

    assert!(matches!(stream.next().await, Some(RunEvent::Finished { .. })));
    assert!(stream.next().await.is_none());
  }

  #[tokio::test]
  async fn test_drop_cancels_request() {
    let (_tx, rx) = mpsc::unbounded_channel();
    let request = CancellationToken::new();
    let stream = RunStream::new(rx, request.clone());

    assert!(!request.is_cancelled());
    drop(stream);
    assert!(request.is_cancelled());
  }
}
