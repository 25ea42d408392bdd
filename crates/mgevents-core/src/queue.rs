//! Queue transport abstraction used by the poller.

use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// A message received from the event queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueMessage {
    /// Unique identifier for the message assigned by the queue
    pub message_id: String,
    /// The serialized activity batch
    pub body: String,
    /// Handle used to delete the message
    pub receipt_handle: String,
    /// How many times the queue has handed this message out, if reported
    pub receive_count: Option<u32>,
}

/// The two queue operations the poller needs.
///
/// A received message stays invisible to other consumers for the visibility
/// timeout. If it is not deleted by then it is delivered again. One transport
/// is shared by every poller worker, so implementations must tolerate
/// concurrent calls.
pub trait QueueTransport: Send + Sync {
    fn receive(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> impl Future<Output = Result<Vec<QueueMessage>, TransportError>> + Send;

    fn delete(&self, receipt_handle: &str)
        -> impl Future<Output = Result<(), TransportError>> + Send;
}
