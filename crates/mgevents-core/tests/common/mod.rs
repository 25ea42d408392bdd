#![allow(dead_code)]

use std::sync::Mutex;

use aws_sdk_sqs::config::Credentials;
use mgevents::{
    ActivityKind, ActivityListener, ActivityRecord, BouncedMessageActivity, ClickActivity,
    DeliveredMessageActivity, JobErrorActivity, OpenActivity, RenderErrorActivity,
    SpamComplaintActivity, UnsubActivity,
};
use quick_xml::escape::escape;
use testcontainers::ContainerAsync;
use testcontainers_modules::{
    localstack::LocalStack,
    testcontainers::{runners::AsyncRunner, ImageExt, TestcontainersError},
};

pub const NAMESPACE: &str = "https://api.example.com/3.1/";

/// Keeps every record it is handed.
#[derive(Default)]
pub struct CollectingListener {
    records: Mutex<Vec<ActivityRecord>>,
}

impl CollectingListener {
    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records.lock().unwrap().clone()
    }

    fn keep(&self, record: ActivityRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

impl ActivityListener for CollectingListener {
    fn on_bounce(&self, activity: BouncedMessageActivity) -> anyhow::Result<()> {
        self.keep(ActivityRecord::Bounce(activity))
    }

    fn on_click(&self, activity: ClickActivity) -> anyhow::Result<()> {
        self.keep(ActivityRecord::Click(activity))
    }

    fn on_delivery(&self, activity: DeliveredMessageActivity) -> anyhow::Result<()> {
        self.keep(ActivityRecord::Delivery(activity))
    }

    fn on_job_error(&self, activity: JobErrorActivity) -> anyhow::Result<()> {
        self.keep(ActivityRecord::JobError(activity))
    }

    fn on_open(&self, activity: OpenActivity) -> anyhow::Result<()> {
        self.keep(ActivityRecord::Open(activity))
    }

    fn on_render_error(&self, activity: RenderErrorActivity) -> anyhow::Result<()> {
        self.keep(ActivityRecord::RenderError(activity))
    }

    fn on_spam_complaint(&self, activity: SpamComplaintActivity) -> anyhow::Result<()> {
        self.keep(ActivityRecord::SpamComplaint(activity))
    }

    fn on_unsub(&self, activity: UnsubActivity) -> anyhow::Result<()> {
        self.keep(ActivityRecord::Unsub(activity))
    }
}

/// An activity element carrying `text` in its free-text field: the email
/// address, or the error message for job errors.
pub fn activity(kind: ActivityKind, request_id: &str, text: &str) -> String {
    let name = kind.element_name();
    let text = escape(text);
    let fields = match kind {
        ActivityKind::JobError => format!("<ErrorCode>500</ErrorCode><ErrorMessage>{text}</ErrorMessage>"),
        ActivityKind::Click => format!(
            "<EmailAddress>{text}</EmailAddress><Url>https://example.com/p?id=7&amp;ref=mail</Url><LinkName>Product</LinkName>"
        ),
        _ => format!("<EmailAddress>{text}</EmailAddress>"),
    };
    format!(
        "<{name}>\n  <RequestId>{request_id}</RequestId>\n  <CorrelationId>corr-{request_id}</CorrelationId>\n  <Timestamp>2024-03-01T10:15:00Z</Timestamp>\n  {fields}\n</{name}>\n"
    )
}

/// The free-text field written by [`activity`].
pub fn text_of(record: &ActivityRecord) -> Option<&str> {
    match record {
        ActivityRecord::Bounce(a) => a.email_address.as_deref(),
        ActivityRecord::Click(a) => a.email_address.as_deref(),
        ActivityRecord::Delivery(a) => a.email_address.as_deref(),
        ActivityRecord::JobError(a) => a.error_message.as_deref(),
        ActivityRecord::Open(a) => a.email_address.as_deref(),
        ActivityRecord::RenderError(a) => a.email_address.as_deref(),
        ActivityRecord::SpamComplaint(a) => a.email_address.as_deref(),
        ActivityRecord::Unsub(a) => a.email_address.as_deref(),
    }
}

pub fn export(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<AccountActivityResponse xmlns=\"{NAMESPACE}\">\n{body}</AccountActivityResponse>\n"
    )
}

pub fn local_config(endpoint_url: &str) -> aws_config::ConfigLoader {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .endpoint_url(endpoint_url)
        .region("us-east-1")
        .credentials_provider(Credentials::new("test", "test", None, None, "static"))
}

pub async fn localstack() -> Result<(String, ContainerAsync<LocalStack>), TestcontainersError> {
    let request = LocalStack::default()
        .with_tag("latest")
        .with_env_var("SERVICES", "sqs,s3")
        .with_env_var("SKIP_SSL_CERT_DOWNLOAD", "1");
    let container = request.start().await?;

    let host_ip = container.get_host().await?;
    let host_port = container.get_host_port_ipv4(4566).await?;
    let endpoint_url = format!("http://{host_ip}:{host_port}");

    Ok((endpoint_url, container))
}
