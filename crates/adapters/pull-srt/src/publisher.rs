//! Exactly-once track publication

use std::collections::BTreeMap;

use crate::media::{TrackDescriptor, TrackId};
use crate::router::{MediaRouter, StreamInfo};

/// Public track set of a session
///
/// Tracks are published once per session lifetime; reconnects keep the set
/// that was announced first.
#[derive(Debug, Default)]
pub struct TrackPublisher {
    tracks: BTreeMap<TrackId, TrackDescriptor>,
    published: bool,
}

impl TrackPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `tracks` unless the session already has
    ///
    /// Registers every track with the router, then signals one stream
    /// update. Returns false when nothing was published.
    pub fn publish_once(
        &mut self,
        tracks: BTreeMap<TrackId, TrackDescriptor>,
        stream: &StreamInfo,
        router: &dyn MediaRouter,
    ) -> bool {
        if self.published || tracks.is_empty() {
            return false;
        }

        tracing::info!(
            stream = %stream.name,
            tracks = tracks.len(),
            "Discovered tracks in MPEG-TS stream"
        );

        for track in tracks.values() {
            tracing::debug!(
                stream = %stream.name,
                pid = track.id,
                kind = %track.kind,
                codec = ?track.codec,
                "Publishing track"
            );
            router.add_track(stream, track);
        }

        self.tracks = tracks;
        self.published = true;
        router.update_stream(stream);

        true
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Look up a published track
    pub fn get(&self, track_id: TrackId) -> Option<&TrackDescriptor> {
        self.tracks.get(&track_id)
    }

    pub fn tracks(&self) -> &BTreeMap<TrackId, TrackDescriptor> {
        &self.tracks
    }
}
