//! NATS JetStream backend for the bus interface.

use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::stream::{RetentionPolicy, StorageType};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::info;

use ipfsniffer_core::config::BusConfig;
use ipfsniffer_core::subjects::{self, PIPELINE_SUBJECTS, STREAM_NAME};

use super::{Acker, Bus, Delivery, Subscription, DEFAULT_MAX_DELIVER};
use crate::{Error, Result};

type PullConsumer = jetstream::consumer::Consumer<pull::Config>;

/// JetStream-backed bus. One instance per process; cheap to share.
pub struct NatsBus {
    client: async_nats::Client,
    js: jetstream::Context,
    consumers: tokio::sync::Mutex<HashMap<(String, String), PullConsumer>>,
    max_deliver: i64,
}

impl NatsBus {
    /// Connect and hold both a core client (ephemeral subscriptions) and a
    /// JetStream context (durable subjects).
    pub async fn connect(cfg: &BusConfig) -> Result<NatsBus> {
        let client = async_nats::ConnectOptions::new()
            .name(cfg.name.clone())
            .connection_timeout(cfg.timeout)
            .connect(cfg.url.as_str())
            .await
            .map_err(|e| Error::Bus(format!("connect {}: {e}", cfg.url)))?;
        let js = jetstream::new(client.clone());

        info!(url = %cfg.url, name = %cfg.name, "bus connected");

        Ok(NatsBus {
            client,
            js,
            consumers: tokio::sync::Mutex::new(HashMap::new()),
            max_deliver: DEFAULT_MAX_DELIVER,
        })
    }

    /// Provision the pipeline stream and the per-subject DLQ streams.
    /// Idempotent; every worker calls this at startup.
    pub async fn ensure_stream(&self) -> Result<()> {
        self.js
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: PIPELINE_SUBJECTS.iter().map(|s| s.to_string()).collect(),
                retention: RetentionPolicy::Limits,
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Bus(format!("ensure stream: {e}")))?;

        for subject in PIPELINE_SUBJECTS {
            self.js
                .get_or_create_stream(jetstream::stream::Config {
                    name: subjects::dlq_stream_name(subject),
                    subjects: vec![subjects::dlq_subject(subject)],
                    retention: RetentionPolicy::Limits,
                    storage: StorageType::File,
                    ..Default::default()
                })
                .await
                .map_err(|e| Error::Bus(format!("ensure dlq stream for {subject}: {e}")))?;
        }

        Ok(())
    }

    async fn consumer(&self, subject: &str, durable: &str) -> Result<PullConsumer> {
        let key = (subject.to_string(), durable.to_string());
        let mut consumers = self.consumers.lock().await;
        if let Some(consumer) = consumers.get(&key) {
            return Ok(consumer.clone());
        }

        let stream = self
            .js
            .get_stream(STREAM_NAME)
            .await
            .map_err(|e| Error::Bus(format!("get stream: {e}")))?;
        let consumer = stream
            .get_or_create_consumer(
                durable,
                pull::Config {
                    durable_name: Some(durable.to_string()),
                    description: Some(format!("{subject} consumer")),
                    filter_subject: subject.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    max_deliver: self.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Bus(format!("consumer {durable}: {e}")))?;

        consumers.insert(key, consumer.clone());
        Ok(consumer)
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        let ack = self
            .js
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| Error::Bus(format!("publish {subject}: {e}")))?;
        ack.await
            .map_err(|e| Error::Bus(format!("publish ack {subject}: {e}")))?;
        Ok(())
    }

    async fn pull(
        &self,
        subject: &str,
        durable: &str,
        max_wait: Duration,
    ) -> Result<Option<Delivery>> {
        let consumer = self.consumer(subject, durable).await?;
        let mut batch = consumer
            .fetch()
            .max_messages(1)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| Error::Bus(format!("fetch {subject}: {e}")))?;

        match batch.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(Error::Bus(format!("fetch {subject}: {e}"))),
            Some(Ok(msg)) => {
                let payload = msg.payload.clone();
                Ok(Some(Delivery::new(payload, Box::new(NatsAcker { msg }))))
            }
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>> {
        let sub = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| Error::Bus(format!("subscribe {subject}: {e}")))?;
        Ok(Box::new(NatsSubscription { inner: sub }))
    }
}

struct NatsAcker {
    msg: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.msg
            .ack()
            .await
            .map_err(|e| Error::Bus(format!("ack: {e}")))
    }
}

struct NatsSubscription {
    inner: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<Bytes> {
        self.inner.next().await.map(|msg| msg.payload)
    }
}
