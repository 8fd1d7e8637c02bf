//! NATS JetStream job queue.
//!
//! Jobs are published to `flowloom.jobs.<priority>` on a work-queue stream.
//! Each priority has its own durable pull consumer, and `fetch` drains them
//! from critical down to low so higher priorities are always served first.
//! JetStream redelivers any message not acked within `ack_wait`, which is
//! set to the configured visibility timeout.

use crate::envelope::Envelope;
use crate::error::QueueError;
use crate::job::{AckHandle, Delivery, JobPriority, JobQueue, QueueJob};
use async_nats::jetstream::{self, AckKind, consumer::PullConsumer, stream};
use async_trait::async_trait;
use futures::StreamExt;
use rootcause::Report;
use std::time::Duration;
use tracing::{debug, error, warn};

const SUBJECT_PREFIX: &str = "flowloom.jobs";
const STREAM_NAME: &str = "FLOWLOOM_JOBS";
const CONSUMER_PREFIX: &str = "flowloom-worker";

/// Connection and consumer settings for [`NatsJobQueue`].
#[derive(Debug, Clone)]
pub struct NatsQueueConfig {
    pub url: String,
    pub stream_name: String,
    pub consumer_prefix: String,
    /// Becomes the consumer's `ack_wait`.
    pub visibility_timeout: Duration,
    /// Deliveries before JetStream gives up on a message.
    pub max_deliver: i64,
}

impl NatsQueueConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: STREAM_NAME.to_string(),
            consumer_prefix: CONSUMER_PREFIX.to_string(),
            visibility_timeout: Duration::from_secs(300),
            max_deliver: 5,
        }
    }

    #[must_use]
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

/// A job queue backed by a JetStream work-queue stream.
pub struct NatsJobQueue {
    jetstream: jetstream::Context,
    /// Highest priority first.
    consumers: Vec<(JobPriority, PullConsumer)>,
}

impl NatsJobQueue {
    /// Connects, then creates the stream and consumers if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable or the stream or
    /// consumers cannot be created.
    pub async fn connect(config: &NatsQueueConfig) -> Result<Self, Report<QueueError>> {
        let client =
            async_nats::connect(&config.url)
                .await
                .map_err(|e| QueueError::Connection {
                    message: e.to_string(),
                })?;
        Self::with_context(jetstream::new(client), config).await
    }

    /// Builds the queue on an existing JetStream context.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream or consumers cannot be created.
    pub async fn with_context(
        jetstream: jetstream::Context,
        config: &NatsQueueConfig,
    ) -> Result<Self, Report<QueueError>> {
        let stream_config = stream::Config {
            name: config.stream_name.clone(),
            description: Some("flowloom workflow run jobs".to_string()),
            subjects: vec![format!("{SUBJECT_PREFIX}.>")],
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        let stream = jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::Connection {
                message: format!("failed to create job stream: {e}"),
            })?;

        let mut consumers = Vec::with_capacity(JobPriority::ALL.len());
        for priority in JobPriority::ALL {
            let name = format!("{}-{}", config.consumer_prefix, priority.as_str());
            let consumer_config = jetstream::consumer::pull::Config {
                name: Some(name.clone()),
                durable_name: Some(name.clone()),
                description: Some(format!("flowloom {priority} priority jobs")),
                filter_subject: subject(priority),
                ack_wait: config.visibility_timeout,
                max_deliver: config.max_deliver,
                ..Default::default()
            };
            let consumer: PullConsumer = stream
                .get_or_create_consumer(&name, consumer_config)
                .await
                .map_err(|e| QueueError::Connection {
                    message: format!("failed to create consumer {name}: {e}"),
                })?;
            consumers.push((priority, consumer));
        }

        debug!(stream = %config.stream_name, "job stream ready");
        Ok(Self {
            jetstream,
            consumers,
        })
    }

    async fn fetch_from(
        &self,
        priority: JobPriority,
        consumer: &PullConsumer,
    ) -> Result<Option<Delivery>, Report<QueueError>> {
        let mut messages = consumer
            .fetch()
            .max_messages(1)
            .messages()
            .await
            .map_err(|e| QueueError::Fetch {
                message: e.to_string(),
            })?;

        let Some(message) = messages.next().await else {
            return Ok(None);
        };
        let message = message.map_err(|e| QueueError::Fetch {
            message: e.to_string(),
        })?;

        let mut job = match Envelope::<QueueJob>::open(&message.payload) {
            Ok(job) => job,
            Err(e) => {
                error!(priority = %priority, error = %e, "dropping undecodable job");
                if let Err(e) = message.ack_with(AckKind::Term).await {
                    warn!(error = %e, "failed to terminate undecodable job");
                }
                return Ok(None);
            }
        };

        if !job.is_ready() {
            let remaining = job.remaining_delay();
            debug!(job_id = %job.id, delay_ms = remaining.as_millis(), "job not yet due");
            message
                .ack_with(AckKind::Nak(Some(remaining)))
                .await
                .map_err(|e| QueueError::Ack {
                    message: e.to_string(),
                })?;
            return Ok(None);
        }

        if let Ok(info) = message.info() {
            job.attempts = u32::try_from(info.delivered).unwrap_or(u32::MAX);
        }
        Ok(Some(Delivery::new(job, Box::new(NatsAck { message }))))
    }
}

#[async_trait]
impl JobQueue for NatsJobQueue {
    async fn push(&self, job: QueueJob) -> Result<(), Report<QueueError>> {
        let subject = subject(job.priority);
        let job_id = job.id;
        let bytes = Envelope::seal(job).map_err(|e| QueueError::Serialization {
            message: e.to_string(),
        })?;

        self.jetstream
            .publish(subject.clone(), bytes.into())
            .await
            .map_err(|e| QueueError::Publish {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| QueueError::Publish {
                message: e.to_string(),
            })?;

        debug!(job_id = %job_id, subject = %subject, "job published");
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<Delivery>, Report<QueueError>> {
        for (priority, consumer) in &self.consumers {
            if let Some(delivery) = self.fetch_from(*priority, consumer).await? {
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for NatsJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsJobQueue")
            .field("consumers", &self.consumers.len())
            .finish_non_exhaustive()
    }
}

struct NatsAck {
    message: jetstream::Message,
}

#[async_trait]
impl AckHandle for NatsAck {
    async fn ack(self: Box<Self>) -> Result<(), Report<QueueError>> {
        self.message.ack().await.map_err(|e| QueueError::Ack {
            message: e.to_string(),
        })?;
        Ok(())
    }

    async fn retry(self: Box<Self>, delay: Duration) -> Result<(), Report<QueueError>> {
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| QueueError::Ack {
                message: e.to_string(),
            })?;
        Ok(())
    }
}

fn subject(priority: JobPriority) -> String {
    format!("{SUBJECT_PREFIX}.{}", priority.as_str())
}
