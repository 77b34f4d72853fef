//! SRT pull ingest adapter for RemoteMedia SDK
//!
//! Pulls MPEG-TS over SRT in caller mode from a remote origin, discovers the
//! elementary tracks it carries and forwards timestamped media packets to a
//! [`MediaRouter`].
//!
//! # Architecture
//!
//! ```text
//! SrtPullApplication ──create_stream──▶ SrtPullSession ◀──ticks── StreamMotor
//!                                            │
//!          SourceLocator ─▶ Connector ─▶ Connection (srt-tokio reader task)
//!                                            │ bytes
//!                                       DemuxBridge (TsDemuxer)
//!                                        │ tracks       │ units
//!                                TrackPublisher   FrameDispatcher
//!                                        └──────▶ MediaRouter ◀──────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use remotemedia_pull_srt::{
//!     ChannelRouter, Config, Metrics, PullStreamProperties, SrtPullApplication, StreamMotor,
//! };
//!
//! # async fn run() -> Result<(), remotemedia_pull_srt::PullError> {
//! let config = Config::default();
//! let (router, mut events) = ChannelRouter::new();
//! let app = SrtPullApplication::new("live", &config, Arc::new(router), Arc::new(Metrics::new()));
//!
//! let session = app.create_stream(
//!     "1",
//!     "cam1",
//!     vec!["srt://10.0.0.5:9000?streamid=cam1&latency=200".to_string()],
//!     &PullStreamProperties::default(),
//! )?;
//! let motor = StreamMotor::new(&config.motor).spawn(session);
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! motor.terminate().await;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod config;
pub mod demux;
pub mod dispatcher;
pub mod error;
pub mod locator;
pub mod media;
pub mod metrics;
pub mod motor;
pub mod publisher;
pub mod reconnect;
pub mod router;
pub mod session;
pub mod transport;

pub use application::SrtPullApplication;
pub use config::{Config, ConfigError, PullStreamProperties, ReconnectConfig, SrtDefaults};
pub use demux::{DemuxBridge, Demuxer, DemuxerFactory, TsDemuxer};
pub use error::{PullError, Result};
pub use locator::{ConnectionParams, LocatorList, SourceLocator};
pub use media::{
    BitstreamFormat, CodecId, ElementaryUnit, MediaKind, MediaPacket, PacketType,
    TrackDescriptor, TrackId,
};
pub use metrics::{Metrics, MetricsSnapshot, StreamRecorder};
pub use motor::{MotorHandle, StreamMotor};
pub use reconnect::{ReconnectAction, ReconnectPolicy};
pub use router::{ChannelRouter, MediaRouter, RouterEvent, StreamInfo};
pub use session::{
    ControlRequest, PullSession, SchedulingMode, SessionContext, SessionControl, SessionState,
    SrtPullSession,
};
pub use transport::{Connection, Connector, PollableDescriptor, ReceiveOutcome, SrtConnector};
