//! Media value types shared by the demuxer, publisher and dispatcher

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Track identifier (MPEG-TS PID)
pub type TrackId = u16;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Codec carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecId {
    H264,
    H265,
    Mpeg2Video,
    Aac,
    Mp3,
    /// Container stream type without a dedicated mapping
    Unknown(u8),
}

impl CodecId {
    /// Media kind implied by the codec, `None` for [`CodecId::Unknown`]
    pub fn kind(self) -> Option<MediaKind> {
        match self {
            CodecId::H264 | CodecId::H265 | CodecId::Mpeg2Video => Some(MediaKind::Video),
            CodecId::Aac | CodecId::Mp3 => Some(MediaKind::Audio),
            CodecId::Unknown(_) => None,
        }
    }
}

/// Framing of the payload bytes inside a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitstreamFormat {
    H264AnnexB,
    H265AnnexB,
    AacAdts,
    Unknown,
}

impl BitstreamFormat {
    /// Bitstream tag for a codec
    ///
    /// Codecs without a dedicated tag pass through as [`BitstreamFormat::Unknown`].
    pub fn for_codec(codec: CodecId) -> Self {
        match codec {
            CodecId::H264 => BitstreamFormat::H264AnnexB,
            CodecId::H265 => BitstreamFormat::H265AnnexB,
            CodecId::Aac => BitstreamFormat::AacAdts,
            CodecId::Mpeg2Video | CodecId::Mp3 | CodecId::Unknown(_) => BitstreamFormat::Unknown,
        }
    }
}

/// Packet granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    /// One access unit of NAL units
    Nalu,
    /// Raw codec frame(s)
    Raw,
}

impl PacketType {
    pub fn for_kind(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => PacketType::Nalu,
            MediaKind::Audio => PacketType::Raw,
        }
    }
}

/// Descriptor of a discovered track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: TrackId,
    pub kind: MediaKind,
    pub codec: CodecId,
}

impl TrackDescriptor {
    /// Descriptor whose kind follows the codec
    ///
    /// [`CodecId::Unknown`] has no implied kind and is described as video;
    /// use [`TrackDescriptor::with_kind`] when the container says otherwise.
    pub fn new(id: TrackId, codec: CodecId) -> Self {
        Self::with_kind(id, codec.kind().unwrap_or(MediaKind::Video), codec)
    }

    pub fn with_kind(id: TrackId, kind: MediaKind, codec: CodecId) -> Self {
        Self { id, kind, codec }
    }
}

/// One demultiplexed access unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryUnit {
    pub track_id: TrackId,
    pub kind: MediaKind,
    /// Raw 33-bit presentation timestamp (90 kHz)
    pub pts: i64,
    /// Raw 33-bit decoding timestamp (90 kHz)
    pub dts: i64,
    pub payload: Bytes,
}

/// Immutable media packet handed to the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    /// Router-assigned stream id
    pub msid: u32,
    pub track_id: TrackId,
    pub kind: MediaKind,
    pub payload: Bytes,
    /// Normalised presentation timestamp (90 kHz, monotonic across wraps)
    pub pts: i64,
    /// Normalised decoding timestamp (90 kHz, monotonic across wraps)
    pub dts: i64,
    /// Always `None`: MPEG-TS does not carry per-frame durations
    pub duration: Option<i64>,
    pub bitstream: BitstreamFormat,
    pub packet_type: PacketType,
}
