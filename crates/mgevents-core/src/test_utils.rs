use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::activity::{
    ActivityKind, ActivityRecord, BouncedMessageActivity, ClickActivity, DeliveredMessageActivity,
    JobErrorActivity, OpenActivity, RenderErrorActivity, SpamComplaintActivity, UnsubActivity,
};
use crate::error::{ErrorKind, TransportError};
use crate::listener::ActivityListener;
use crate::queue::{QueueMessage, QueueTransport};
use crate::store::ObjectStore;

pub const NAMESPACE: &str = "https://api.example.com/3.1/";

/// One activity element with the fields every kind requires.
pub fn activity_xml(kind: ActivityKind, request_id: &str) -> String {
    let name = kind.element_name();
    let extra = match kind {
        ActivityKind::Click => "<Url>https://example.com/sale?a=1&amp;b=2</Url><LinkName>Sale</LinkName>",
        ActivityKind::JobError => "<ErrorCode>404</ErrorCode><ErrorMessage>recipient list not found</ErrorMessage>",
        _ => "",
    };
    format!(
        "<{name}><RequestId>{request_id}</RequestId><Timestamp>2024-03-01T10:15:00Z</Timestamp>{extra}</{name}>"
    )
}

/// A queue message body holding the given activities in document order.
pub fn batch_xml(activities: &[(ActivityKind, &str)]) -> String {
    let children: String = activities
        .iter()
        .map(|(kind, id)| activity_xml(*kind, id))
        .collect();
    format!(r#"<ActivityItems xmlns="{NAMESPACE}">{children}</ActivityItems>"#)
}

pub fn record(kind: ActivityKind, request_id: &str) -> ActivityRecord {
    kind.parse_fragment(&activity_xml(kind, request_id))
        .expect("test fragment should parse")
}

/// Records `(kind, request_id)` for every call, optionally failing the nth
/// call (1-based, counting failures) once.
#[derive(Default)]
pub struct RecordingListener {
    calls: Mutex<Vec<(ActivityKind, String)>>,
    attempts: AtomicUsize,
    fail_on: Option<usize>,
}

impl RecordingListener {
    pub fn failing_on(attempt: usize) -> Self {
        Self {
            fail_on: Some(attempt),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(ActivityKind, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, kind: ActivityKind, request_id: &str) -> anyhow::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(attempt) {
            anyhow::bail!("listener failed on attempt {attempt}");
        }
        self.calls
            .lock()
            .unwrap()
            .push((kind, request_id.to_string()));
        Ok(())
    }
}

impl ActivityListener for RecordingListener {
    fn on_bounce(&self, activity: BouncedMessageActivity) -> anyhow::Result<()> {
        self.record(ActivityKind::Bounce, &activity.request_id)
    }

    fn on_click(&self, activity: ClickActivity) -> anyhow::Result<()> {
        self.record(ActivityKind::Click, &activity.request_id)
    }

    fn on_delivery(&self, activity: DeliveredMessageActivity) -> anyhow::Result<()> {
        self.record(ActivityKind::Delivery, &activity.request_id)
    }

    fn on_job_error(&self, activity: JobErrorActivity) -> anyhow::Result<()> {
        self.record(ActivityKind::JobError, &activity.request_id)
    }

    fn on_open(&self, activity: OpenActivity) -> anyhow::Result<()> {
        self.record(ActivityKind::Open, &activity.request_id)
    }

    fn on_render_error(&self, activity: RenderErrorActivity) -> anyhow::Result<()> {
        self.record(ActivityKind::RenderError, &activity.request_id)
    }

    fn on_spam_complaint(&self, activity: SpamComplaintActivity) -> anyhow::Result<()> {
        self.record(ActivityKind::SpamComplaint, &activity.request_id)
    }

    fn on_unsub(&self, activity: UnsubActivity) -> anyhow::Result<()> {
        self.record(ActivityKind::Unsub, &activity.request_id)
    }
}

struct StoredMessage {
    message_id: String,
    body: String,
    receives: u32,
    in_flight: bool,
    deleted: bool,
}

impl StoredMessage {
    fn receipt_handle(&self) -> String {
        format!("{}#{}", self.message_id, self.receives)
    }
}

#[derive(Default)]
struct QueueState {
    messages: Vec<StoredMessage>,
    receive_failures: VecDeque<TransportError>,
    delete_failure: Option<ErrorKind>,
    receive_calls: Vec<tokio::time::Instant>,
    deleted: Vec<String>,
}

/// An in-memory queue with SQS-like visibility semantics.
///
/// A received message stays invisible until it is deleted or
/// [`expire_visibility`](Self::expire_visibility) is called.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn push(&self, message_id: &str, body: String) {
        self.state.lock().unwrap().messages.push(StoredMessage {
            message_id: message_id.to_string(),
            body,
            receives: 0,
            in_flight: false,
            deleted: false,
        });
    }

    pub fn fail_next_receive(&self, error: TransportError) {
        self.state.lock().unwrap().receive_failures.push_back(error);
    }

    pub fn fail_deletes_with(&self, kind: ErrorKind) {
        self.state.lock().unwrap().delete_failure = Some(kind);
    }

    pub fn expire_visibility(&self) {
        for message in self.state.lock().unwrap().messages.iter_mut() {
            message.in_flight = false;
        }
    }

    pub fn receive_calls(&self) -> Vec<tokio::time::Instant> {
        self.state.lock().unwrap().receive_calls.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn receive_count(&self, message_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|m| m.message_id == message_id)
            .map(|m| m.receives)
            .unwrap_or_default()
    }
}

impl QueueTransport for MemoryQueue {
    async fn receive(
        &self,
        max_messages: u32,
        _visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.receive_calls.push(tokio::time::Instant::now());

        if let Some(error) = state.receive_failures.pop_front() {
            return Err(error);
        }

        let received = state
            .messages
            .iter_mut()
            .filter(|m| !m.deleted && !m.in_flight)
            .take(max_messages as usize)
            .map(|m| {
                m.receives += 1;
                m.in_flight = true;
                QueueMessage {
                    message_id: m.message_id.clone(),
                    body: m.body.clone(),
                    receipt_handle: m.receipt_handle(),
                    receive_count: Some(m.receives),
                }
            })
            .collect();

        Ok(received)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.delete_failure {
            return Err(TransportError::new(kind, "scripted delete failure"));
        }

        let Some(message) = state
            .messages
            .iter_mut()
            .find(|m| !m.deleted && m.receipt_handle() == receipt_handle)
        else {
            return Err(TransportError::transient(format!(
                "receipt handle {receipt_handle} is not valid"
            )));
        };

        message.deleted = true;
        let id = message.message_id.clone();
        state.deleted.push(id);
        Ok(())
    }
}

/// An in-memory object store that fails the first `failures` calls of each
/// operation.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<&'static str, usize>>,
    attempts: Mutex<HashMap<&'static str, usize>>,
    grants: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    pub fn insert(&self, bucket: &str, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{key}"), bytes.to_vec());
    }

    pub fn fail(&self, operation: &'static str, times: usize) {
        self.failures.lock().unwrap().insert(operation, times);
    }

    pub fn attempts(&self, operation: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&format!("{bucket}/{key}"))
            .cloned()
    }

    pub fn grants(&self) -> Vec<(String, String)> {
        self.grants.lock().unwrap().clone()
    }

    fn attempt(&self, operation: &'static str) -> Result<(), TransportError> {
        *self.attempts.lock().unwrap().entry(operation).or_default() += 1;

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(TransportError::transient(format!("scripted {operation} failure")))
            }
            _ => Ok(()),
        }
    }
}

impl ObjectStore for MemoryStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, TransportError> {
        self.attempt("list")?;
        let prefix = format!("{bucket}/{prefix}");
        let mut keys: Vec<_> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .map(|k| k[bucket.len() + 1..].to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<(), TransportError> {
        self.attempt("put")?;
        let bytes = std::fs::read(path)
            .map_err(|e| {
                TransportError::with_source(ErrorKind::NotFound, path.display().to_string(), e)
            })?;
        self.insert(bucket, key, &bytes);
        Ok(())
    }

    async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.attempt("put")?;
        self.insert(bucket, key, &bytes);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), TransportError> {
        self.attempt("delete")?;
        self.objects.lock().unwrap().remove(&format!("{bucket}/{key}"));
        Ok(())
    }

    async fn grant_read(
        &self,
        bucket: &str,
        key: &str,
        canonical_id: &str,
    ) -> Result<(), TransportError> {
        self.attempt("grant_read")?;
        self.grants
            .lock()
            .unwrap()
            .push((format!("{bucket}/{key}"), canonical_id.to_string()));
        Ok(())
    }
}
