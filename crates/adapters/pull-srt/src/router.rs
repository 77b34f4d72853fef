//! Downstream media routing surface
//!
//! Sessions register their tracks, announce track-set changes and hand off
//! packets through a [`MediaRouter`]. The router is shared between sessions
//! and never reports back: every call is fire-and-forget.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::media::{MediaPacket, TrackDescriptor};

/// Identity of a pulled stream as seen by the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    /// Stream id given at creation
    pub id: String,

    /// Stream name published downstream
    pub name: String,

    /// Router-assigned stream id stamped on every packet
    pub msid: u32,
}

/// Track registration and packet sink
pub trait MediaRouter: Send + Sync {
    /// Register one track of a stream
    fn add_track(&self, stream: &StreamInfo, track: &TrackDescriptor);

    /// Signal that the stream's track set changed
    fn update_stream(&self, stream: &StreamInfo);

    /// Hand off a completed packet
    fn send_frame(&self, packet: MediaPacket);
}

/// Events produced by [`ChannelRouter`]
#[derive(Debug, Clone)]
pub enum RouterEvent {
    TrackAdded {
        stream: StreamInfo,
        track: TrackDescriptor,
    },
    StreamUpdated {
        stream: StreamInfo,
    },
    Frame(MediaPacket),
}

/// Router forwarding everything into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    tx: mpsc::UnboundedSender<RouterEvent>,
}

impl ChannelRouter {
    /// Create a router and the receiver its events go to
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: RouterEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Router receiver dropped, discarding event");
        }
    }
}

impl MediaRouter for ChannelRouter {
    fn add_track(&self, stream: &StreamInfo, track: &TrackDescriptor) {
        self.emit(RouterEvent::TrackAdded {
            stream: stream.clone(),
            track: *track,
        });
    }

    fn update_stream(&self, stream: &StreamInfo) {
        self.emit(RouterEvent::StreamUpdated {
            stream: stream.clone(),
        });
    }

    fn send_frame(&self, packet: MediaPacket) {
        self.emit(RouterEvent::Frame(packet));
    }
}
