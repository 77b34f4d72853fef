//! Demux bridge
//!
//! The session feeds every received chunk, in receive order, into a
//! [`Demuxer`] and then pulls discovered tracks and elementary units back
//! out. A demuxer never fails: malformed container bytes are absorbed
//! internally, and "nothing available" simply means "not yet".

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::media::{ElementaryUnit, TrackDescriptor, TrackId};

pub mod ts;

pub use ts::TsDemuxer;

/// Incremental container demultiplexer
pub trait Demuxer: Send {
    /// Feed raw container bytes; order preserving, no backpressure
    fn feed(&mut self, data: &[u8]);

    /// Whether unconsumed track information is available
    fn has_track_info(&self) -> bool;

    /// Consume the discovered tracks
    fn take_tracks(&mut self) -> BTreeMap<TrackId, TrackDescriptor>;

    /// Whether an elementary unit is ready
    fn has_elementary_unit(&self) -> bool;

    /// Pop the next elementary unit in demuxer output order
    fn pop_elementary_unit(&mut self) -> Option<ElementaryUnit>;
}

/// Creates a fresh demuxer for every successful (re)start
pub type DemuxerFactory = Arc<dyn Fn() -> Box<dyn Demuxer> + Send + Sync>;

/// Factory for the built-in MPEG-TS demuxer
pub fn ts_demuxer_factory() -> DemuxerFactory {
    Arc::new(|| Box::new(TsDemuxer::new()) as Box<dyn Demuxer>)
}

/// Session-side adapter around one demuxer instance
pub struct DemuxBridge {
    demuxer: Box<dyn Demuxer>,
    bytes_fed: u64,
}

impl DemuxBridge {
    pub fn new(demuxer: Box<dyn Demuxer>) -> Self {
        Self {
            demuxer,
            bytes_fed: 0,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.bytes_fed += data.len() as u64;
        self.demuxer.feed(data);
    }

    /// Discovered tracks, if the demuxer has any to hand out
    pub fn discovered_tracks(&mut self) -> Option<BTreeMap<TrackId, TrackDescriptor>> {
        if !self.demuxer.has_track_info() {
            return None;
        }

        let tracks = self.demuxer.take_tracks();
        if tracks.is_empty() {
            None
        } else {
            Some(tracks)
        }
    }

    /// Next ready elementary unit
    pub fn next_unit(&mut self) -> Option<ElementaryUnit> {
        while self.demuxer.has_elementary_unit() {
            if let Some(unit) = self.demuxer.pop_elementary_unit() {
                return Some(unit);
            }
        }
        None
    }

    pub fn bytes_fed(&self) -> u64 {
        self.bytes_fed
    }
}
