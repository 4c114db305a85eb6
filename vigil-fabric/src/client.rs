//! JetStream client wrapper: connection, stream lifecycle, durable
//! work-queue consumers.

use std::time::Duration;

use async_nats::jetstream::{self, consumer, stream};
use bytes::Bytes;
use tracing::{info, warn};

use vigil_core::subjects;
use vigil_transport::{TlsMaterial, TlsPaths};

use crate::{FabricError, FabricResult};

/// Bus endpoint settings, usually from `NATS_URL`/`NATS_USER`/`NATS_PASSWORD`
/// plus the mTLS triplet when the deployment runs with certificates.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    /// Client name shown in server monitoring.
    pub name: String,
    pub tls: Option<TlsPaths>,
    /// Stream replica count — a deployment knob, 1 outside HA setups.
    pub replicas: usize,
}

impl FabricConfig {
    pub fn from_env(name: &str) -> FabricConfig {
        FabricConfig {
            url: vigil_core::config::env_or("NATS_URL", "nats://127.0.0.1:4222"),
            user: vigil_core::config::env_or("NATS_USER", ""),
            password: vigil_core::config::env_or("NATS_PASSWORD", ""),
            name: name.to_string(),
            tls: TlsPaths::from_env(),
            replicas: vigil_core::config::env_parse("NATS_STREAM_REPLICAS", 1),
        }
    }
}

/// Shared handle to the bus. Reconnects are handled by the underlying
/// client (unbounded attempts, bounded backoff); the initial connect fails
/// fast so a misconfigured service exits with code 1.
#[derive(Clone)]
pub struct FabricClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl FabricClient {
    pub async fn connect(cfg: &FabricConfig) -> FabricResult<FabricClient> {
        let mut opts = async_nats::ConnectOptions::new()
            .name(&cfg.name)
            .max_reconnects(None)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => warn!("bus disconnected"),
                    async_nats::Event::Connected => info!("bus reconnected"),
                    other => info!(event = %other, "bus event"),
                }
            });

        if !cfg.user.is_empty() && !cfg.password.is_empty() {
            opts = opts.user_and_password(cfg.user.clone(), cfg.password.clone());
        }

        if let Some(tls) = &cfg.tls {
            // Validate the triplet up front so a broken certificate is a
            // startup failure, not a reconnect loop.
            let material = TlsMaterial::load(tls).map_err(|e| FabricError::Connect(e.to_string()))?;
            info!(identity = %material.identity, "bus connection uses mutual TLS");
            opts = opts
                .require_tls(true)
                .add_root_certificates(tls.ca_file.clone().into())
                .add_client_certificate(tls.cert_file.clone().into(), tls.key_file.clone().into());
        }

        let client = opts
            .connect(cfg.url.as_str())
            .await
            .map_err(|e| FabricError::Connect(e.to_string()))?;
        let jetstream = jetstream::new(client.clone());

        info!(url = %cfg.url, name = %cfg.name, "bus connected");
        Ok(FabricClient { client, jetstream })
    }

    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Declare the two core streams idempotently.
    ///
    /// `VIGIL_EVENTS` uses work-queue retention: a message disappears once
    /// some consumer group acknowledges it. `VIGIL_ALERTS` keeps history
    /// under limits retention.
    pub async fn init_streams(&self, replicas: usize) -> FabricResult<()> {
        self.jetstream
            .get_or_create_stream(stream::Config {
                name: subjects::STREAM_EVENTS.to_string(),
                description: Some("Vigil security events".to_string()),
                subjects: vec!["events.>".to_string()],
                retention: stream::RetentionPolicy::WorkQueue,
                storage: stream::StorageType::File,
                max_age: Duration::from_secs(24 * 3600),
                num_replicas: replicas,
                ..Default::default()
            })
            .await
            .map_err(|e| FabricError::Stream(e.to_string()))?;

        self.jetstream
            .get_or_create_stream(stream::Config {
                name: subjects::STREAM_ALERTS.to_string(),
                description: Some("Vigil generated alerts".to_string()),
                subjects: vec!["alerts.>".to_string()],
                retention: stream::RetentionPolicy::Limits,
                storage: stream::StorageType::File,
                max_age: Duration::from_secs(7 * 24 * 3600),
                num_replicas: replicas,
                ..Default::default()
            })
            .await
            .map_err(|e| FabricError::Stream(e.to_string()))?;

        Ok(())
    }

    /// Non-blocking publish: the returned future resolves to the server
    /// ack. Callers on hot paths hold the future and await it in batches.
    pub async fn publish_async(
        &self,
        subject: String,
        payload: Bytes,
    ) -> FabricResult<jetstream::context::PublishAckFuture> {
        self.jetstream
            .publish(subject, payload)
            .await
            .map_err(|e| FabricError::Publish(e.to_string()))
    }

    /// Publish and wait for the server ack.
    pub async fn publish_sync(&self, subject: String, payload: Bytes) -> FabricResult<()> {
        let ack = self.publish_async(subject, payload).await?;
        ack.await.map_err(|e| FabricError::Publish(e.to_string()))?;
        Ok(())
    }

    /// Fire-and-forget publish outside the streams; used for
    /// `commands.<agent>` dispatch where replay is not wanted.
    pub async fn publish_core(&self, subject: String, payload: Bytes) -> FabricResult<()> {
        self.client
            .publish(subject, payload)
            .await
            .map_err(|e| FabricError::Publish(e.to_string()))
    }

    /// Plain subscription for ephemeral subjects (agent command channel).
    pub async fn subscribe_core(&self, subject: String) -> FabricResult<async_nats::Subscriber> {
        self.client
            .subscribe(subject)
            .await
            .map_err(|e| FabricError::Consumer(e.to_string()))
    }

    /// Durable work-queue consumer shared by every subscriber using the
    /// same `group`: explicit acks, delivery starts at `new` on first bind
    /// and resumes from the last acknowledged thereafter. Unacked messages
    /// redeliver after the ack grace period, so handlers are idempotent at
    /// the logical layer.
    pub async fn queue_subscribe(
        &self,
        stream_name: &str,
        filter_subject: &str,
        group: &str,
    ) -> FabricResult<consumer::pull::Stream> {
        let stream = self
            .jetstream
            .get_stream(stream_name)
            .await
            .map_err(|e| FabricError::Stream(e.to_string()))?;

        let consumer: consumer::PullConsumer = stream
            .get_or_create_consumer(
                group,
                consumer::pull::Config {
                    durable_name: Some(group.to_string()),
                    filter_subject: filter_subject.to_string(),
                    deliver_policy: consumer::DeliverPolicy::New,
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(30),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| FabricError::Consumer(e.to_string()))?;

        consumer
            .messages()
            .await
            .map_err(|e| FabricError::Consumer(e.to_string()))
    }
}
