//! Frame dispatch
//!
//! Normalises elementary-unit timestamps across the 33-bit MPEG-TS wrap,
//! tags each unit with its bitstream format and hands the resulting
//! [`MediaPacket`] to the router.

use std::collections::HashMap;

use crate::media::{BitstreamFormat, ElementaryUnit, MediaPacket, PacketType, TrackDescriptor, TrackId};
use crate::router::MediaRouter;

/// Modulus of the 33-bit PTS/DTS counter
pub const TIMESTAMP_MODULUS: i64 = 1 << 33;

const HALF_MODULUS: i64 = TIMESTAMP_MODULUS / 2;

/// Unwraps one 33-bit timestamp sequence into a monotonic timeline
#[derive(Debug, Default, Clone)]
pub struct WrapCounter {
    last: Option<i64>,
    base: i64,
}

impl WrapCounter {
    pub fn normalise(&mut self, raw: i64) -> i64 {
        let raw = raw.rem_euclid(TIMESTAMP_MODULUS);

        if let Some(last) = self.last {
            if last - raw > HALF_MODULUS {
                self.base += TIMESTAMP_MODULUS;
            } else if raw - last > HALF_MODULUS && self.base >= TIMESTAMP_MODULUS {
                // Late unit from before the last wrap (B-frame reordering)
                return self.base - TIMESTAMP_MODULUS + raw;
            }
        }

        self.last = Some(raw);
        self.base + raw
    }
}

#[derive(Debug, Default)]
struct TrackTimeline {
    pts: WrapCounter,
    dts: WrapCounter,
}

/// Builds and forwards media packets for one session
#[derive(Debug, Default)]
pub struct FrameDispatcher {
    timelines: HashMap<TrackId, TrackTimeline>,
}

impl FrameDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all timestamp state; called on every successful (re)start
    pub fn reset(&mut self) {
        self.timelines.clear();
    }

    /// Build the packet for `unit` on the published `track`
    pub fn build_packet(&mut self, msid: u32, track: &TrackDescriptor, unit: ElementaryUnit) -> MediaPacket {
        let timeline = self.timelines.entry(track.id).or_default();
        let pts = timeline.pts.normalise(unit.pts);
        let dts = timeline.dts.normalise(unit.dts);

        MediaPacket {
            msid,
            track_id: track.id,
            kind: track.kind,
            payload: unit.payload,
            pts,
            dts,
            duration: None,
            bitstream: BitstreamFormat::for_codec(track.codec),
            packet_type: PacketType::for_kind(track.kind),
        }
    }

    /// Build the packet for `unit` and send it
    pub fn dispatch(
        &mut self,
        msid: u32,
        track: &TrackDescriptor,
        unit: ElementaryUnit,
        router: &dyn MediaRouter,
    ) {
        let packet = self.build_packet(msid, track, unit);
        tracing::trace!(
            pid = packet.track_id,
            pts = packet.pts,
            dts = packet.dts,
            size = packet.payload.len(),
            "Dispatching packet"
        );
        router.send_frame(packet);
    }
}
