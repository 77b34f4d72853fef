//! Application-level factory for pull sessions
//!
//! An application owns what its sessions share: the router, the metrics
//! sink, the connector and the configured defaults. It hands out a fresh
//! msid for every stream it creates.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::{Config, PullStreamProperties, ReconnectConfig, SrtDefaults};
use crate::demux::{ts_demuxer_factory, DemuxerFactory};
use crate::error::{PullError, Result};
use crate::metrics::Metrics;
use crate::router::{MediaRouter, StreamInfo};
use crate::session::{SessionContext, SrtPullSession};
use crate::transport::{Connector, SrtConnector};

/// Factory for SRT pull sessions
pub struct SrtPullApplication {
    name: String,
    srt: SrtDefaults,
    reconnect: ReconnectConfig,
    connector: Arc<dyn Connector>,
    router: Arc<dyn MediaRouter>,
    metrics: Arc<Metrics>,
    demuxer_factory: DemuxerFactory,
    next_msid: AtomicU32,
}

impl SrtPullApplication {
    /// Create an application connecting through `srt-tokio`
    pub fn new(
        name: impl Into<String>,
        config: &Config,
        router: Arc<dyn MediaRouter>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let connector = Arc::new(SrtConnector::new(config.srt.recv_buffer_size));
        Self::with_connector(name, config, connector, router, metrics)
    }

    /// Create an application with a custom connector
    pub fn with_connector(
        name: impl Into<String>,
        config: &Config,
        connector: Arc<dyn Connector>,
        router: Arc<dyn MediaRouter>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            name: name.into(),
            srt: config.srt.clone(),
            reconnect: config.reconnect.clone(),
            connector,
            router,
            metrics,
            demuxer_factory: ts_demuxer_factory(),
            next_msid: AtomicU32::new(1),
        }
    }

    /// Replace the demuxer used by sessions created from now on
    pub fn with_demuxer_factory(mut self, factory: DemuxerFactory) -> Self {
        self.demuxer_factory = factory;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Create an idle session for one stream
    ///
    /// # Errors
    ///
    /// [`PullError::InvalidLocator`] when `urls` is empty.
    pub fn create_stream(
        &self,
        stream_id: impl Into<String>,
        stream_name: impl Into<String>,
        urls: Vec<String>,
        properties: &PullStreamProperties,
    ) -> Result<SrtPullSession> {
        let stream_name = stream_name.into();
        if urls.is_empty() {
            return Err(PullError::invalid_locator(
                "",
                format!("stream '{}' has no source locators", stream_name),
            ));
        }

        let (srt, reconnect) = properties.apply(&self.srt, &self.reconnect);
        let stream = StreamInfo {
            id: stream_id.into(),
            name: stream_name,
            msid: self.next_msid.fetch_add(1, Ordering::Relaxed),
        };

        tracing::debug!(
            application = %self.name,
            stream = %stream.name,
            msid = stream.msid,
            candidates = urls.len(),
            "Created SRT pull session"
        );

        let context = SessionContext::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.router),
            self.metrics.stream(&stream.name),
        )
        .with_demuxer_factory(Arc::clone(&self.demuxer_factory));

        Ok(SrtPullSession::new(stream, urls, srt, reconnect, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ChannelRouter;
    use crate::session::{PullSession, SessionState};

    fn application() -> SrtPullApplication {
        let (router, _rx) = ChannelRouter::new();
        SrtPullApplication::new(
            "live",
            &Config::default(),
            Arc::new(router),
            Arc::new(Metrics::new()),
        )
    }

    #[test]
    fn test_create_stream_allocates_msids() {
        let app = application();
        let props = PullStreamProperties::default();

        let first = app
            .create_stream("1", "cam1", vec!["srt://10.0.0.5:9000".into()], &props)
            .unwrap();
        let second = app
            .create_stream("2", "cam2", vec!["srt://10.0.0.6:9000".into()], &props)
            .unwrap();

        assert_eq!(first.name(), "cam1");
        assert_eq!(first.state(), SessionState::Idle);
        assert_ne!(first.stream().msid, second.stream().msid);
        assert_eq!(app.name(), "live");
    }

    #[tokio::test]
    async fn test_short_passphrase_fails_start() {
        let app = application();
        let mut session = app
            .create_stream(
                "1",
                "cam1",
                vec!["srt://127.0.0.1:9?passphrase=short".into()],
                &PullStreamProperties::default(),
            )
            .unwrap();

        let result = session.start().await;
        assert!(matches!(result, Err(PullError::ConnectFailure { .. })));
        assert_eq!(session.state(), SessionState::Error);

        let snapshot = app.metrics().snapshot();
        assert_eq!(snapshot.connect_failures, 1);
        assert_eq!(snapshot.streams[0].connect_failures, 1);
    }

    #[test]
    fn test_create_stream_requires_locators() {
        let app = application();
        let result = app.create_stream("1", "cam1", Vec::new(), &PullStreamProperties::default());
        assert!(matches!(result, Err(PullError::InvalidLocator { .. })));
    }
}
