use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use log::{error, info};
use mgevents::{
    compress_file, ActivityFileProcessor, ActivityListener, ActivityRecord,
    BouncedMessageActivity, ClickActivity, DeliveredMessageActivity, FileUploader,
    JobErrorActivity, OpenActivity, PollerConfig, QueuePoller, RenderErrorActivity, S3Store,
    SpamComplaintActivity, SqsQueue, StoreConfig, UnsubActivity,
};
use serde::Deserialize;

#[tokio::main]
pub async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = Cli::parse().run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[derive(Debug, Parser)]
#[command(name = "mgevents")]
#[command(
    about = "consume email provider activity from an SQS event feed or an activity export file",
    long_about = None
)]
pub struct Cli {
    /// Override the AWS endpoint, e.g. http://localhost:4566 for LocalStack
    #[arg(long, global = true)]
    endpoint_url: Option<String>,

    /// JSON file with `poller` and `store` settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll the event queue until ctrl-c, printing each activity as a JSON line
    Poll {
        #[arg(long)]
        queue_url: String,
        /// Concurrent worker loops
        #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        threads: Option<usize>,
        /// Seconds to pause after an empty receive
        #[arg(long)]
        empty_queue_delay: Option<u64>,
        /// Messages per receive call (1 to 10)
        #[arg(long)]
        batch_size: Option<u32>,
        /// Seconds a received message stays hidden from other consumers
        #[arg(long)]
        visibility_timeout: Option<u64>,
    },
    /// Stream an account activity export, printing each activity as a JSON line
    Process { file: PathBuf },
    /// Upload a recipient list and grant the provider read access
    Upload {
        file: PathBuf,
        /// Gzip the file first and upload the compressed copy
        #[arg(long)]
        gzip: bool,
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: String,
    },
    /// Remove an uploaded recipient list
    Remove {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    poller: PollerConfig,
    store: StoreConfig,
}

impl Settings {
    fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let settings = Settings::load(self.config.as_deref())?;
        let endpoint_url = self.endpoint_url.as_deref();

        match self.command {
            Commands::Poll {
                queue_url,
                threads,
                empty_queue_delay,
                batch_size,
                visibility_timeout,
            } => {
                let mut config = settings.poller;
                if let Some(threads) = threads {
                    config.threads = threads;
                }
                if let Some(delay) = empty_queue_delay {
                    config.empty_queue_delay_secs = delay;
                }
                if let Some(batch_size) = batch_size {
                    config.max_batch_size = batch_size;
                }
                if let Some(visibility) = visibility_timeout {
                    config.visibility_timeout_secs = visibility;
                }
                anyhow::ensure!(config.threads > 0, "poll needs at least one worker thread");
                poll(endpoint_url, queue_url, config).await
            }
            Commands::Process { file } => process(file).await,
            Commands::Upload {
                file,
                gzip,
                bucket,
                key,
            } => {
                let file = if gzip {
                    compress_file(&file)
                        .with_context(|| format!("cannot compress {}", file.display()))?
                } else {
                    file
                };
                let store = S3Store::from_config(&aws(endpoint_url).await);
                FileUploader::new(store, settings.store)
                    .put_file(&file, &bucket, &key)
                    .await
                    .with_context(|| format!("cannot upload {}", file.display()))?;
                Ok(())
            }
            Commands::Remove { bucket, key } => {
                let store = S3Store::from_config(&aws(endpoint_url).await);
                FileUploader::new(store, settings.store)
                    .delete(&bucket, &key)
                    .await;
                Ok(())
            }
        }
    }
}

async fn aws(endpoint_url: Option<&str>) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(url) = endpoint_url {
        loader = loader.endpoint_url(url);
    }
    loader.load().await
}

async fn poll(
    endpoint_url: Option<&str>,
    queue_url: String,
    config: PollerConfig,
) -> anyhow::Result<()> {
    let queue = SqsQueue::from_config(&aws(endpoint_url).await, queue_url, config.max_error_retry);
    let poller = QueuePoller::new(queue, JsonLinesListener, config);

    let workers = poller.start();
    let mut finished = tokio::spawn(async move {
        for worker in workers {
            if let Err(e) = worker.await {
                error!("worker task failed: {e}");
            }
        }
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot listen for ctrl-c")?;
            poller.stop();
            info!("waiting for in-flight batches to finish");
            finished.await.context("cannot join workers")?;
            Ok(())
        }
        joined = &mut finished => {
            joined.context("cannot join workers")?;
            anyhow::bail!("every worker stopped on a fatal error")
        }
    }
}

async fn process(file: PathBuf) -> anyhow::Result<()> {
    let counts = tokio::task::spawn_blocking(move || {
        ActivityFileProcessor::new(JsonLinesListener)
            .process(&file)
            .with_context(|| format!("cannot process {}", file.display()))
    })
    .await
    .context("processor task failed")??;

    info!("processed {counts} (total/o/c/b/d/je/re/sc/u)");
    Ok(())
}

/// Prints every activity to stdout as one JSON object per line.
struct JsonLinesListener;

impl JsonLinesListener {
    fn print(&self, record: ActivityRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(&record)?;
        writeln!(std::io::stdout().lock(), "{line}")?;
        Ok(())
    }
}

impl ActivityListener for JsonLinesListener {
    fn on_bounce(&self, activity: BouncedMessageActivity) -> anyhow::Result<()> {
        self.print(ActivityRecord::Bounce(activity))
    }

    fn on_click(&self, activity: ClickActivity) -> anyhow::Result<()> {
        self.print(ActivityRecord::Click(activity))
    }

    fn on_delivery(&self, activity: DeliveredMessageActivity) -> anyhow::Result<()> {
        self.print(ActivityRecord::Delivery(activity))
    }

    fn on_job_error(&self, activity: JobErrorActivity) -> anyhow::Result<()> {
        self.print(ActivityRecord::JobError(activity))
    }

    fn on_open(&self, activity: OpenActivity) -> anyhow::Result<()> {
        self.print(ActivityRecord::Open(activity))
    }

    fn on_render_error(&self, activity: RenderErrorActivity) -> anyhow::Result<()> {
        self.print(ActivityRecord::RenderError(activity))
    }

    fn on_spam_complaint(&self, activity: SpamComplaintActivity) -> anyhow::Result<()> {
        self.print(ActivityRecord::SpamComplaint(activity))
    }

    fn on_unsub(&self, activity: UnsubActivity) -> anyhow::Result<()> {
        self.print(ActivityRecord::Unsub(activity))
    }
}
