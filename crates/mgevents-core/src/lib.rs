//! # mgevents-core
//!
//! Core library for consuming an email provider's delivery and engagement
//! activity.
//!
//! Activity reaches an account in two ways, and both end up in the same
//! [`ActivityListener`]:
//!
//! - **Event queue**: the provider publishes batches of activity to an AWS SQS
//!   queue. [`QueuePoller`] drains it with any number of worker loops and
//!   deletes a message only after every activity in it was dispatched.
//! - **Activity export**: the daily account activity file.
//!   [`ActivityFileProcessor`] streams it without loading it into memory.
//!
//! [`FileUploader`] covers the remaining AWS chore: pushing recipient list
//! files to S3 where the provider can read them.
//!
//! ## Example
//!
//! ```no_run
//! use mgevents::{PollerConfig, QueuePoller, SqsQueue};
//! # use mgevents::ActivityListener;
//!
//! # async fn example(listener: impl ActivityListener + 'static) {
//! let config = aws_config::from_env().load().await;
//! let queue_url = "https://sqs.us-east-1.amazonaws.com/123456789/events";
//! let queue = SqsQueue::from_config(&config, queue_url, 3);
//!
//! let poller = QueuePoller::new(queue, listener, PollerConfig::default());
//! let workers = poller.start();
//! # }
//! ```

mod activity;
mod config;
mod error;
mod listener;
mod poller;
mod processor;
mod queue;
mod s3;
mod sqs;
mod store;

#[cfg(test)]
mod test_utils;

pub use activity::*;
pub use config::*;
pub use error::*;
pub use listener::*;
pub use poller::*;
pub use processor::*;
pub use queue::*;
pub use s3::S3Store;
pub use sqs::SqsQueue;
pub use store::*;
