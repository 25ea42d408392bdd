//! SQS implementation of the queue transport.

use std::time::Duration;

use aws_config::SdkConfig;
use aws_sdk_sqs as sqs;
use sqs::config::retry::RetryConfig;
use sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use sqs::types::MessageSystemAttributeName;

use crate::error::{ErrorKind, TransportError};
use crate::queue::{QueueMessage, QueueTransport};

/// SQS accepts between 1 and 10 messages per receive call.
const MAX_RECEIVE_BATCH: u32 = 10;

/// The provider's event feed queue, reached through the AWS SDK.
///
/// # Example
///
/// ```no_run
/// use mgevents::SqsQueue;
///
/// # async fn example() {
/// let config = aws_config::from_env().load().await;
/// let queue_url = "https://sqs.us-east-1.amazonaws.com/123456789/events";
/// let queue = SqsQueue::from_config(&config, queue_url, 3);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct SqsQueue {
    /// The SQS client instance
    pub client: sqs::Client,
    /// The URL of the queue the provider publishes activity to
    pub queue_url: String,
}

impl SqsQueue {
    /// Builds a client from a pre-loaded AWS SDK config.
    ///
    /// `max_error_retry` is the number of SDK-level retries for retryable
    /// failures such as throttling or 5xx responses.
    pub fn from_config(
        config: &SdkConfig,
        queue_url: impl Into<String>,
        max_error_retry: u32,
    ) -> Self {
        let sqs_config = sqs::config::Builder::from(config)
            .retry_config(RetryConfig::standard().with_max_attempts(max_error_retry + 1))
            .build();

        Self {
            client: sqs::Client::from_conf(sqs_config),
            queue_url: queue_url.into(),
        }
    }
}

impl QueueTransport for SqsQueue {
    async fn receive(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, TransportError> {
        let max_messages = max_messages.clamp(1, MAX_RECEIVE_BATCH) as i32;
        let visibility = i32::try_from(visibility_timeout.as_secs()).unwrap_or(i32::MAX);

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .visibility_timeout(visibility)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| classify(&self.queue_url, e))?;

        output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(QueueMessage::from_aws_message)
            .collect()
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| classify(&self.queue_url, e))?;

        Ok(())
    }
}

impl QueueMessage {
    /// Converts an AWS SDK Message into a QueueMessage.
    ///
    /// # See Also
    ///
    /// - [AWS SQS Message API Reference](https://docs.aws.amazon.com/AWSSimpleQueueService/latest/APIReference/API_Message.html)
    pub fn from_aws_message(message: sqs::types::Message) -> Result<Self, TransportError> {
        let receive_count = message
            .attributes
            .as_ref()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok());

        let missing =
            |field: &str| TransportError::transient(format!("sqs message is missing {field}"));

        Ok(Self {
            message_id: message.message_id.ok_or_else(|| missing("message_id"))?,
            receipt_handle: message.receipt_handle.ok_or_else(|| missing("receipt_handle"))?,
            body: message.body.unwrap_or_default(),
            receive_count,
        })
    }
}

/// Maps an SQS error code onto the crate's error kinds.
///
/// The query protocol reports a missing queue as
/// `AWS.SimpleQueueService.NonExistentQueue`, the JSON protocol as
/// `QueueDoesNotExist`.
pub fn kind_for_code(code: Option<&str>) -> ErrorKind {
    match code {
        Some("AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist") => {
            ErrorKind::QueueNotFound
        }
        Some("AccessDenied" | "AccessDeniedException") => ErrorKind::AccessDenied,
        _ => ErrorKind::Transient,
    }
}

fn classify<E, R>(queue_url: &str, err: SdkError<E, R>) -> TransportError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) => ErrorKind::Timeout,
        _ => kind_for_code(err.code()),
    };
    let message = format!("{queue_url}: {}", DisplayErrorContext(&err));
    TransportError::with_source(kind, message, err)
}
