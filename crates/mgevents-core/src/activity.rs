//! Activity records delivered by the provider, as they appear on the wire.
//!
//! Every record kind maps to one XML element. The same element names are used
//! inside queue message bodies ([`ActivityBatch`]) and inside the account
//! activity export consumed by [`crate::ActivityFileProcessor`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// The eight kinds of activity the provider reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Bounce,
    Click,
    Delivery,
    JobError,
    Open,
    RenderError,
    SpamComplaint,
    Unsub,
}

impl ActivityKind {
    /// Every kind, in the order records of a batch are dispatched.
    pub const ALL: [ActivityKind; 8] = [
        ActivityKind::Bounce,
        ActivityKind::Click,
        ActivityKind::Delivery,
        ActivityKind::JobError,
        ActivityKind::Open,
        ActivityKind::RenderError,
        ActivityKind::SpamComplaint,
        ActivityKind::Unsub,
    ];

    pub fn element_name(self) -> &'static str {
        match self {
            ActivityKind::Bounce => "BouncedMessageActivity",
            ActivityKind::Click => "ClickActivity",
            ActivityKind::Delivery => "DeliveredMessageActivity",
            ActivityKind::JobError => "JobErrorActivity",
            ActivityKind::Open => "OpenActivity",
            ActivityKind::RenderError => "RenderErrorActivity",
            ActivityKind::SpamComplaint => "SpamComplaintActivity",
            ActivityKind::Unsub => "UnsubActivity",
        }
    }

    pub fn from_element_name(name: &str) -> Option<Self> {
        ActivityKind::ALL
            .into_iter()
            .find(|kind| kind.element_name() == name)
    }

    /// Deserializes one stand-alone activity element.
    pub fn parse_fragment(self, xml: &str) -> Result<ActivityRecord> {
        let record = match self {
            ActivityKind::Bounce => ActivityRecord::Bounce(self.decode(xml)?),
            ActivityKind::Click => ActivityRecord::Click(self.decode(xml)?),
            ActivityKind::Delivery => ActivityRecord::Delivery(self.decode(xml)?),
            ActivityKind::JobError => ActivityRecord::JobError(self.decode(xml)?),
            ActivityKind::Open => ActivityRecord::Open(self.decode(xml)?),
            ActivityKind::RenderError => ActivityRecord::RenderError(self.decode(xml)?),
            ActivityKind::SpamComplaint => ActivityRecord::SpamComplaint(self.decode(xml)?),
            ActivityKind::Unsub => ActivityRecord::Unsub(self.decode(xml)?),
        };
        Ok(record)
    }

    fn decode<T: DeserializeOwned>(self, xml: &str) -> Result<T> {
        quick_xml::de::from_str(xml).map_err(|source| Error::Decode { kind: self, source })
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BouncedMessageActivity {
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub email_address: Option<String>,
    pub bounce_category: Option<String>,
    pub bounce_code: Option<String>,
    pub bounce_details: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClickActivity {
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub email_address: Option<String>,
    pub url: String,
    pub link_name: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeliveredMessageActivity {
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub email_address: Option<String>,
    /// The receiving server's SMTP response.
    pub response: Option<String>,
}

/// A batch or transactional job failed as a whole, typically because a
/// recipient list or attachment could not be read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobErrorActivity {
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OpenActivity {
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub email_address: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A single recipient's message could not be rendered from its template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RenderErrorActivity {
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub email_address: Option<String>,
    pub error_message: Option<String>,
}

/// A feedback loop complaint forwarded by the recipient's mailbox provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpamComplaintActivity {
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub email_address: Option<String>,
    pub feedback_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnsubActivity {
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub email_address: Option<String>,
}

/// One activity of any kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum ActivityRecord {
    Bounce(BouncedMessageActivity),
    Click(ClickActivity),
    Delivery(DeliveredMessageActivity),
    JobError(JobErrorActivity),
    Open(OpenActivity),
    RenderError(RenderErrorActivity),
    SpamComplaint(SpamComplaintActivity),
    Unsub(UnsubActivity),
}

impl ActivityRecord {
    pub fn kind(&self) -> ActivityKind {
        match self {
            ActivityRecord::Bounce(_) => ActivityKind::Bounce,
            ActivityRecord::Click(_) => ActivityKind::Click,
            ActivityRecord::Delivery(_) => ActivityKind::Delivery,
            ActivityRecord::JobError(_) => ActivityKind::JobError,
            ActivityRecord::Open(_) => ActivityKind::Open,
            ActivityRecord::RenderError(_) => ActivityKind::RenderError,
            ActivityRecord::SpamComplaint(_) => ActivityKind::SpamComplaint,
            ActivityRecord::Unsub(_) => ActivityKind::Unsub,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            ActivityRecord::Bounce(a) => &a.request_id,
            ActivityRecord::Click(a) => &a.request_id,
            ActivityRecord::Delivery(a) => &a.request_id,
            ActivityRecord::JobError(a) => &a.request_id,
            ActivityRecord::Open(a) => &a.request_id,
            ActivityRecord::RenderError(a) => &a.request_id,
            ActivityRecord::SpamComplaint(a) => &a.request_id,
            ActivityRecord::Unsub(a) => &a.request_id,
        }
    }
}

/// The body of one event queue message.
///
/// Children of different kinds may be interleaved in the document; each list
/// keeps the document order of its own kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ActivityBatch {
    #[serde(rename = "BouncedMessageActivity", default)]
    pub bounces: Vec<BouncedMessageActivity>,
    #[serde(rename = "ClickActivity", default)]
    pub clicks: Vec<ClickActivity>,
    #[serde(rename = "DeliveredMessageActivity", default)]
    pub deliveries: Vec<DeliveredMessageActivity>,
    #[serde(rename = "JobErrorActivity", default)]
    pub job_errors: Vec<JobErrorActivity>,
    #[serde(rename = "OpenActivity", default)]
    pub opens: Vec<OpenActivity>,
    #[serde(rename = "RenderErrorActivity", default)]
    pub render_errors: Vec<RenderErrorActivity>,
    #[serde(rename = "SpamComplaintActivity", default)]
    pub spam_complaints: Vec<SpamComplaintActivity>,
    #[serde(rename = "UnsubActivity", default)]
    pub unsubs: Vec<UnsubActivity>,
}

impl ActivityBatch {
    pub fn from_xml(body: &str) -> Result<Self> {
        quick_xml::de::from_str(body).map_err(Error::Batch)
    }

    pub fn len(&self) -> usize {
        self.bounces.len()
            + self.clicks.len()
            + self.deliveries.len()
            + self.job_errors.len()
            + self.opens.len()
            + self.render_errors.len()
            + self.spam_complaints.len()
            + self.unsubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens the batch kind by kind, in [`ActivityKind::ALL`] order.
    pub fn into_records(self) -> impl Iterator<Item = ActivityRecord> {
        let ActivityBatch {
            bounces,
            clicks,
            deliveries,
            job_errors,
            opens,
            render_errors,
            spam_complaints,
            unsubs,
        } = self;

        bounces
            .into_iter()
            .map(ActivityRecord::Bounce)
            .chain(clicks.into_iter().map(ActivityRecord::Click))
            .chain(deliveries.into_iter().map(ActivityRecord::Delivery))
            .chain(job_errors.into_iter().map(ActivityRecord::JobError))
            .chain(opens.into_iter().map(ActivityRecord::Open))
            .chain(render_errors.into_iter().map(ActivityRecord::RenderError))
            .chain(spam_complaints.into_iter().map(ActivityRecord::SpamComplaint))
            .chain(unsubs.into_iter().map(ActivityRecord::Unsub))
    }
}

/// Running per-kind totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActivityCounts([usize; 8]);

impl ActivityCounts {
    fn slot(kind: ActivityKind) -> usize {
        ActivityKind::ALL
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_default()
    }

    pub fn increment(&mut self, kind: ActivityKind) {
        self.0[Self::slot(kind)] += 1;
    }

    pub fn get(&self, kind: ActivityKind) -> usize {
        self.0[Self::slot(kind)]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

impl fmt::Display for ActivityCounts {
    /// `total/o/c/b/d/je/re/sc/u`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}/{}/{}/{}",
            self.total(),
            self.get(ActivityKind::Open),
            self.get(ActivityKind::Click),
            self.get(ActivityKind::Bounce),
            self.get(ActivityKind::Delivery),
            self.get(ActivityKind::JobError),
            self.get(ActivityKind::RenderError),
            self.get(ActivityKind::SpamComplaint),
            self.get(ActivityKind::Unsub),
        )
    }
}
