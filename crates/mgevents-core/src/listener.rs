//! The consumer contract shared by the queue poller and the file processor.

use crate::activity::{
    ActivityRecord, BouncedMessageActivity, ClickActivity, DeliveredMessageActivity,
    JobErrorActivity, OpenActivity, RenderErrorActivity, SpamComplaintActivity, UnsubActivity,
};
use crate::error::{Error, Result};

/// Receives every activity read from the event queue or an activity file.
///
/// Each method is called synchronously, once per record, in the order the
/// source delivered them. The queue poller may call a listener from several
/// worker tasks at once and may deliver the same record more than once, so
/// implementations should be idempotent.
///
/// Returning an error from a queue-driven call leaves the whole message on the
/// queue to be redelivered once its visibility timeout expires. From the file
/// processor it aborts the pass.
pub trait ActivityListener: Send + Sync {
    fn on_bounce(&self, activity: BouncedMessageActivity) -> anyhow::Result<()>;

    fn on_click(&self, activity: ClickActivity) -> anyhow::Result<()>;

    fn on_delivery(&self, activity: DeliveredMessageActivity) -> anyhow::Result<()>;

    /// A whole job failed. These are worth alerting on.
    fn on_job_error(&self, activity: JobErrorActivity) -> anyhow::Result<()>;

    fn on_open(&self, activity: OpenActivity) -> anyhow::Result<()>;

    /// A single recipient's message failed to render, usually a template
    /// referencing missing recipient data.
    fn on_render_error(&self, activity: RenderErrorActivity) -> anyhow::Result<()>;

    fn on_spam_complaint(&self, activity: SpamComplaintActivity) -> anyhow::Result<()>;

    fn on_unsub(&self, activity: UnsubActivity) -> anyhow::Result<()>;
}

/// Hands one record to the matching listener method.
pub fn dispatch<L: ActivityListener + ?Sized>(listener: &L, record: ActivityRecord) -> Result<()> {
    let kind = record.kind();
    let result = match record {
        ActivityRecord::Bounce(a) => listener.on_bounce(a),
        ActivityRecord::Click(a) => listener.on_click(a),
        ActivityRecord::Delivery(a) => listener.on_delivery(a),
        ActivityRecord::JobError(a) => listener.on_job_error(a),
        ActivityRecord::Open(a) => listener.on_open(a),
        ActivityRecord::RenderError(a) => listener.on_render_error(a),
        ActivityRecord::SpamComplaint(a) => listener.on_spam_complaint(a),
        ActivityRecord::Unsub(a) => listener.on_unsub(a),
    };

    result.map_err(|e| Error::Listener {
        kind,
        source: e.into(),
    })
}
