//! Change-notification stream.
//!
//! A [`ChangeStream`] is fed by a producer task through a bounded channel.
//! The stream never ends silently: once the producer goes away without
//! sending an error, [`ChangeStream::next`] reports
//! [`ConnectorError::StreamClosed`].

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::{ConnectorError, ConnectorResult};
use crate::record::ExternalRecord;

/// Producer half of a change stream.
pub type ChangeSender = mpsc::Sender<ConnectorResult<ExternalRecord>>;

/// Unbounded sequence of changed directory entries.
#[derive(Debug)]
pub struct ChangeStream {
    rx: mpsc::Receiver<ConnectorResult<ExternalRecord>>,
    producer: Option<AbortHandle>,
}

impl ChangeStream {
    /// Create a connected sender/stream pair.
    pub fn channel(buffer: usize) -> (ChangeSender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            tx,
            Self {
                rx,
                producer: None,
            },
        )
    }

    /// Tie the lifetime of the producer task to this stream.
    ///
    /// The task is aborted when the stream is dropped.
    #[must_use]
    pub fn with_producer(mut self, handle: AbortHandle) -> Self {
        self.producer = Some(handle);
        self
    }

    /// Wait for the next change.
    ///
    /// Returns the producer's error if it failed, or `StreamClosed` if it
    /// stopped without one.
    pub async fn next(&mut self) -> ConnectorResult<ExternalRecord> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Err(ConnectorError::StreamClosed),
        }
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
    }
}
