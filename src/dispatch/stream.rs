use crate::task::{DispatchResult, TaskRegistry};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Results of one dispatcher run, yielded as tasks retire
///
/// The stream is finite: it ends once every descriptor has produced its result
/// and the run's background loops have stopped. It cannot be restarted.
/// Dropping it cancels the run.
pub struct DispatchStream {
    results: UnboundedReceiverStream<DispatchResult>,
    registry: Arc<TaskRegistry>,
    cancel: CancellationToken,
    _guard: DropGuard,
    remaining: usize,
}

impl DispatchStream {
    pub(crate) fn new(
        receiver: UnboundedReceiver<DispatchResult>,
        registry: Arc<TaskRegistry>,
        cancel: CancellationToken,
        expected: usize,
    ) -> Self {
        Self {
            results: UnboundedReceiverStream::new(receiver),
            registry,
            _guard: cancel.clone().drop_guard(),
            cancel,
            remaining: expected,
        }
    }

    /// Live task table of this run
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Stops admitting new tasks; queued ones retire as cancelled
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for DispatchStream {
    type Item = DispatchResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.results).poll_next(cx);
        if let Poll::Ready(Some(_)) = &polled {
            self.remaining = self.remaining.saturating_sub(1);
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl std::fmt::Debug for DispatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchStream")
            .field("remaining", &self.remaining)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
