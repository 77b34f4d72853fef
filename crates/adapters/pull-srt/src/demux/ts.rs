//! MPEG-TS demuxer
//!
//! Incremental ISO/IEC 13818-1 transport stream parser. It follows the first
//! program announced in the PAT, maps the PMT's elementary streams to tracks
//! and reassembles PES packets into elementary units.
//!
//! Malformed input is never reported to the caller: lost sync, truncated
//! sections and broken PES headers are skipped and counted.

use std::collections::{BTreeMap, HashMap, VecDeque};

use bytes::{Buf, Bytes, BytesMut};

use super::Demuxer;
use crate::media::{CodecId, ElementaryUnit, MediaKind, TrackDescriptor, TrackId};

pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;
pub const PID_PAT: u16 = 0x0000;
pub const PID_NULL: u16 = 0x1FFF;

const TABLE_ID_PAT: u8 = 0x00;
const TABLE_ID_PMT: u8 = 0x02;

/// Largest PSI section: 3 header bytes plus a 1021-byte `section_length`
const MAX_PSI_SECTION_SIZE: usize = 1024;

/// Upper bound for one PES under reassembly
pub const MAX_PES_SIZE: usize = 4 * 1024 * 1024;

/// Stream types recognised in the PMT
pub mod stream_type {
    pub const MPEG1_VIDEO: u8 = 0x01;
    pub const MPEG2_VIDEO: u8 = 0x02;
    pub const MPEG1_AUDIO: u8 = 0x03;
    pub const MPEG2_AUDIO: u8 = 0x04;
    pub const AAC_ADTS: u8 = 0x0F;
    pub const H264: u8 = 0x1B;
    pub const H265: u8 = 0x24;

    // Audio/video streams forwarded without a dedicated codec mapping
    pub const MPEG4_VIDEO: u8 = 0x10;
    pub const AAC_LATM: u8 = 0x11;
    pub const MPEG4_AUDIO: u8 = 0x1C;
    pub const AVS2_VIDEO: u8 = 0x42;
    pub const AC3: u8 = 0x81;
    pub const EAC3: u8 = 0x87;
    pub const VC1: u8 = 0xEA;
}

/// Map a PMT stream type to a track, `None` for non-media and unsupported types
///
/// Audio and video stream types without a dedicated codec are published as
/// [`CodecId::Unknown`] carrying the stream type.
pub fn track_for_stream_type(pid: TrackId, code: u8) -> Option<TrackDescriptor> {
    let track = match code {
        stream_type::H264 => TrackDescriptor::new(pid, CodecId::H264),
        stream_type::H265 => TrackDescriptor::new(pid, CodecId::H265),
        stream_type::MPEG1_VIDEO | stream_type::MPEG2_VIDEO => {
            TrackDescriptor::new(pid, CodecId::Mpeg2Video)
        }
        stream_type::AAC_ADTS => TrackDescriptor::new(pid, CodecId::Aac),
        stream_type::MPEG1_AUDIO | stream_type::MPEG2_AUDIO => TrackDescriptor::new(pid, CodecId::Mp3),
        stream_type::MPEG4_VIDEO | stream_type::AVS2_VIDEO | stream_type::VC1 => {
            TrackDescriptor::with_kind(pid, MediaKind::Video, CodecId::Unknown(code))
        }
        stream_type::AAC_LATM | stream_type::MPEG4_AUDIO | stream_type::AC3 | stream_type::EAC3 => {
            TrackDescriptor::with_kind(pid, MediaKind::Audio, CodecId::Unknown(code))
        }
        _ => return None,
    };
    Some(track)
}

/// Partial PES packet being reassembled
struct PesAssembly {
    data: BytesMut,
    /// Total PES size when `PES_packet_length` is bounded
    expected_len: Option<usize>,
}

/// Counters of absorbed malformed input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TsDemuxStats {
    pub packets: u64,
    pub skipped_bytes: u64,
    pub discontinuities: u64,
    pub dropped_pes: u64,
}

/// Incremental MPEG-TS demuxer
pub struct TsDemuxer {
    pending: BytesMut,
    pmt_pid: Option<u16>,
    pmt_version: Option<u8>,
    streams: BTreeMap<TrackId, TrackDescriptor>,
    tracks_pending: bool,
    assemblies: HashMap<TrackId, PesAssembly>,
    /// PAT/PMT sections spanning several packets
    sections: HashMap<u16, BytesMut>,
    continuity: HashMap<u16, u8>,
    units: VecDeque<ElementaryUnit>,
    stats: TsDemuxStats,
}

impl Default for TsDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl TsDemuxer {
    pub fn new() -> Self {
        Self {
            pending: BytesMut::with_capacity(TS_PACKET_SIZE * 7 * 16),
            pmt_pid: None,
            pmt_version: None,
            streams: BTreeMap::new(),
            tracks_pending: false,
            assemblies: HashMap::new(),
            sections: HashMap::new(),
            continuity: HashMap::new(),
            units: VecDeque::new(),
            stats: TsDemuxStats::default(),
        }
    }

    pub fn stats(&self) -> TsDemuxStats {
        self.stats
    }

    /// Streams announced by the current PMT
    pub fn streams(&self) -> &BTreeMap<TrackId, TrackDescriptor> {
        &self.streams
    }

    fn process_pending(&mut self) {
        loop {
            // Resync on the next sync byte
            match self.pending.iter().position(|&b| b == TS_SYNC_BYTE) {
                Some(0) => {}
                Some(offset) => {
                    self.stats.skipped_bytes += offset as u64;
                    self.pending.advance(offset);
                }
                None => {
                    self.stats.skipped_bytes += self.pending.len() as u64;
                    self.pending.clear();
                    return;
                }
            }

            if self.pending.len() < TS_PACKET_SIZE {
                return;
            }

            let packet = self.pending.split_to(TS_PACKET_SIZE).freeze();
            self.process_packet(&packet);
        }
    }

    fn process_packet(&mut self, packet: &[u8]) {
        self.stats.packets += 1;

        let transport_error = packet[1] & 0x80 != 0;
        let payload_unit_start = packet[1] & 0x40 != 0;
        let pid = (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16;
        let adaptation_control = (packet[3] >> 4) & 0x03;
        let continuity_counter = packet[3] & 0x0F;

        if transport_error || pid == PID_NULL {
            return;
        }

        let payload_offset = match adaptation_control {
            0b01 => 4,
            0b11 => 5 + packet[4] as usize,
            // Adaptation field only, or reserved
            _ => return,
        };
        if payload_offset >= TS_PACKET_SIZE {
            tracing::trace!(pid, "Adaptation field overruns packet, skipping");
            return;
        }

        if !self.check_continuity(pid, continuity_counter) {
            return;
        }

        let payload = &packet[payload_offset..];

        if pid == PID_PAT || Some(pid) == self.pmt_pid {
            self.push_psi_payload(pid, payload_unit_start, payload);
        } else if self.streams.contains_key(&pid) {
            self.push_pes_payload(pid, payload_unit_start, payload);
        }
    }

    /// Returns false for duplicate packets; discards partial PES on a gap
    fn check_continuity(&mut self, pid: u16, counter: u8) -> bool {
        match self.continuity.insert(pid, counter) {
            Some(last) if last == counter => false,
            Some(last) if (last + 1) & 0x0F != counter => {
                self.stats.discontinuities += 1;
                self.sections.remove(&pid);
                if self.assemblies.remove(&pid).is_some() {
                    self.stats.dropped_pes += 1;
                    tracing::trace!(pid, last, counter, "Continuity gap, dropping partial PES");
                }
                true
            }
            _ => true,
        }
    }

    /// Collect a PAT/PMT section across packets and parse it once complete
    fn push_psi_payload(&mut self, pid: u16, unit_start: bool, payload: &[u8]) {
        if unit_start {
            // Bytes before the pointer target finish a section we never started
            let Some(section) = payload
                .first()
                .and_then(|&pointer| payload.get(1 + pointer as usize..))
            else {
                self.sections.remove(&pid);
                tracing::trace!(pid, "PSI pointer field overruns packet, skipping");
                return;
            };
            self.sections.insert(pid, BytesMut::from(section));
        } else if let Some(buffer) = self.sections.get_mut(&pid) {
            buffer.extend_from_slice(payload);
        } else {
            return;
        }

        let Some(buffer) = self.sections.get_mut(&pid) else {
            return;
        };
        if buffer.len() < 3 {
            return;
        }

        let total = 3 + ((((buffer[1] & 0x0F) as usize) << 8) | buffer[2] as usize);
        if total > MAX_PSI_SECTION_SIZE {
            self.sections.remove(&pid);
            tracing::trace!(pid, total, "Oversized PSI section, skipping");
            return;
        }
        if buffer.len() < total {
            return;
        }

        let section = buffer.split_to(total).freeze();
        self.sections.remove(&pid);

        if pid == PID_PAT {
            self.parse_pat(&section);
        } else {
            self.parse_pmt(&section);
        }
    }

    /// Validate a complete PSI section
    fn psi_section(section: &[u8], table_id: u8) -> Option<&[u8]> {
        if section.len() < 3 || section[0] != table_id {
            return None;
        }

        let section_length = (((section[1] & 0x0F) as usize) << 8) | section[2] as usize;
        // Must at least hold the syntax header and the CRC
        if section_length < 9 {
            return None;
        }
        section.get(..3 + section_length)
    }

    fn parse_pat(&mut self, section: &[u8]) {
        let Some(section) = Self::psi_section(section, TABLE_ID_PAT) else {
            tracing::trace!("Malformed PAT section, skipping");
            return;
        };

        let entries = &section[8..section.len() - 4];
        for entry in entries.chunks_exact(4) {
            let program_number = ((entry[0] as u16) << 8) | entry[1] as u16;
            let pid = (((entry[2] & 0x1F) as u16) << 8) | entry[3] as u16;

            // Program 0 is the network PID
            if program_number == 0 {
                continue;
            }

            if self.pmt_pid != Some(pid) {
                tracing::debug!(program_number, pmt_pid = pid, "PAT announces PMT");
                if let Some(previous) = self.pmt_pid.replace(pid) {
                    self.sections.remove(&previous);
                }
                self.pmt_version = None;
            }
            return;
        }
    }

    fn parse_pmt(&mut self, section: &[u8]) {
        let Some(section) = Self::psi_section(section, TABLE_ID_PMT) else {
            tracing::trace!("Malformed PMT section, skipping");
            return;
        };
        if section.len() < 16 {
            return;
        }

        let version = (section[5] >> 1) & 0x1F;
        if self.pmt_version == Some(version) {
            return;
        }

        let program_info_length = (((section[10] & 0x0F) as usize) << 8) | section[11] as usize;
        let end = section.len() - 4;
        let mut offset = 12 + program_info_length;

        let mut streams = BTreeMap::new();
        while offset + 5 <= end {
            let stream_type = section[offset];
            let pid = (((section[offset + 1] & 0x1F) as u16) << 8) | section[offset + 2] as u16;
            let es_info_length =
                (((section[offset + 3] & 0x0F) as usize) << 8) | section[offset + 4] as usize;
            offset += 5 + es_info_length;

            match track_for_stream_type(pid, stream_type) {
                Some(track) => {
                    streams.insert(pid, track);
                }
                None => {
                    tracing::debug!(pid, stream_type, "Ignoring unsupported elementary stream");
                }
            }
        }

        tracing::debug!(version, streams = streams.len(), "Parsed PMT");

        self.pmt_version = Some(version);
        self.assemblies.retain(|pid, _| streams.contains_key(pid));
        if !streams.is_empty() {
            self.tracks_pending = true;
        }
        self.streams = streams;
    }

    fn push_pes_payload(&mut self, pid: TrackId, unit_start: bool, payload: &[u8]) {
        if unit_start {
            // An unbounded PES ends where the next one starts
            if let Some(previous) = self.assemblies.remove(&pid) {
                self.finish_pes(pid, previous.data.freeze());
            }

            let expected_len = if payload.len() >= 6 {
                match ((payload[4] as usize) << 8) | payload[5] as usize {
                    0 => None,
                    len => Some(6 + len),
                }
            } else {
                None
            };

            self.assemblies.insert(
                pid,
                PesAssembly {
                    data: BytesMut::from(payload),
                    expected_len,
                },
            );
        } else if let Some(assembly) = self.assemblies.get_mut(&pid) {
            if assembly.data.len() + payload.len() > MAX_PES_SIZE {
                self.assemblies.remove(&pid);
                self.stats.dropped_pes += 1;
                tracing::trace!(pid, limit = MAX_PES_SIZE, "PES exceeds reassembly limit, dropping");
                return;
            }
            assembly.data.extend_from_slice(payload);
        } else {
            // Joined mid-PES; wait for the next unit start
            return;
        }

        let complete = self
            .assemblies
            .get(&pid)
            .and_then(|a| a.expected_len.map(|len| a.data.len() >= len))
            .unwrap_or(false);

        if complete {
            if let Some(assembly) = self.assemblies.remove(&pid) {
                let mut data = assembly.data;
                if let Some(len) = assembly.expected_len {
                    data.truncate(len);
                }
                self.finish_pes(pid, data.freeze());
            }
        }
    }

    fn finish_pes(&mut self, pid: TrackId, pes: Bytes) {
        let Some(track) = self.streams.get(&pid).copied() else {
            return;
        };

        match parse_pes(&pes) {
            Some(parsed) => {
                tracing::trace!(
                    pid,
                    pts = parsed.pts,
                    dts = parsed.dts,
                    size = parsed.payload.len(),
                    "Elementary unit"
                );
                self.units.push_back(ElementaryUnit {
                    track_id: pid,
                    kind: track.kind,
                    pts: parsed.pts,
                    dts: parsed.dts,
                    payload: parsed.payload,
                });
            }
            None => {
                self.stats.dropped_pes += 1;
                tracing::trace!(pid, len = pes.len(), "Malformed PES or missing PTS, dropping");
            }
        }
    }
}

struct ParsedPes {
    pts: i64,
    dts: i64,
    payload: Bytes,
}

fn parse_pes(pes: &Bytes) -> Option<ParsedPes> {
    if pes.len() < 9 || pes[0] != 0x00 || pes[1] != 0x00 || pes[2] != 0x01 {
        return None;
    }

    // Optional PES header marker bits '10'
    if pes[6] & 0xC0 != 0x80 {
        return None;
    }

    let pts_dts_flags = pes[7] >> 6;
    let header_data_length = pes[8] as usize;
    let payload_start = 9 + header_data_length;
    if payload_start > pes.len() {
        return None;
    }

    let pts = match pts_dts_flags {
        0b10 | 0b11 => read_timestamp(pes.get(9..14)?),
        _ => return None,
    };
    let dts = if pts_dts_flags == 0b11 {
        read_timestamp(pes.get(14..19)?)
    } else {
        pts
    };

    Some(ParsedPes {
        pts,
        dts,
        payload: pes.slice(payload_start..),
    })
}

/// Decode a 33-bit PES timestamp
fn read_timestamp(b: &[u8]) -> i64 {
    ((((b[0] >> 1) & 0x07) as i64) << 30)
        | ((b[1] as i64) << 22)
        | (((b[2] >> 1) as i64) << 15)
        | ((b[3] as i64) << 7)
        | ((b[4] >> 1) as i64)
}

impl Demuxer for TsDemuxer {
    fn feed(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        self.process_pending();
    }

    fn has_track_info(&self) -> bool {
        self.tracks_pending
    }

    fn take_tracks(&mut self) -> BTreeMap<TrackId, TrackDescriptor> {
        self.tracks_pending = false;
        self.streams.clone()
    }

    fn has_elementary_unit(&self) -> bool {
        !self.units.is_empty()
    }

    fn pop_elementary_unit(&mut self) -> Option<ElementaryUnit> {
        self.units.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;

    fn ts_packet(pid: u16, unit_start: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() <= 184);
        let mut packet = Vec::with_capacity(TS_PACKET_SIZE);
        packet.push(TS_SYNC_BYTE);
        packet.push(((pid >> 8) as u8 & 0x1F) | if unit_start { 0x40 } else { 0 });
        packet.push(pid as u8);
        if payload.len() == 184 {
            packet.push(0x10 | (cc & 0x0F));
        } else {
            packet.push(0x30 | (cc & 0x0F));
            let af_len = 183 - payload.len();
            packet.push(af_len as u8);
            if af_len > 0 {
                packet.push(0x00);
                packet.extend(std::iter::repeat(0xFF).take(af_len - 1));
            }
        }
        packet.extend_from_slice(payload);
        packet
    }

    fn pat(pmt_pid: u16) -> Vec<u8> {
        let mut s = vec![0x00, 0x00, 0xB0, 13, 0x00, 0x01, 0xC1, 0x00, 0x00];
        s.extend_from_slice(&[0x00, 0x01, 0xE0 | (pmt_pid >> 8) as u8, pmt_pid as u8]);
        s.extend_from_slice(&[0, 0, 0, 0]);
        ts_packet(PID_PAT, true, 0, &s)
    }

    fn pmt(pmt_pid: u16, version: u8, streams: &[(u8, u16)]) -> Vec<u8> {
        ts_packet(pmt_pid, true, version, &pmt_section(version, streams, &[]))
    }

    /// Pointer field plus a PMT section; every stream carries `es_info`
    fn pmt_section(version: u8, streams: &[(u8, u16)], es_info: &[u8]) -> Vec<u8> {
        let section_length = 9 + (5 + es_info.len()) * streams.len() + 4;
        let mut s = vec![
            0x00,
            0x02,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            0x00,
            0x01,
            0xC1 | (version << 1),
            0x00,
            0x00,
            0xE1,
            0x00,
            0xF0,
            0x00,
        ];
        for (stream_type, pid) in streams {
            s.extend_from_slice(&[
                *stream_type,
                0xE0 | (pid >> 8) as u8,
                *pid as u8,
                0xF0 | (es_info.len() >> 8) as u8,
                es_info.len() as u8,
            ]);
            s.extend_from_slice(es_info);
        }
        s.extend_from_slice(&[0, 0, 0, 0]);
        s
    }

    fn write_timestamp(out: &mut Vec<u8>, marker: u8, ts: i64) {
        out.push(marker | ((((ts >> 30) & 0x07) as u8) << 1) | 1);
        out.push((ts >> 22) as u8);
        out.push(((((ts >> 15) & 0x7F) as u8) << 1) | 1);
        out.push((ts >> 7) as u8);
        out.push((((ts & 0x7F) as u8) << 1) | 1);
    }

    fn pes(stream_id: u8, pts: i64, dts: Option<i64>, payload: &[u8], bounded: bool) -> Vec<u8> {
        let header_len = if dts.is_some() { 10 } else { 5 };
        let pes_len = if bounded { 3 + header_len + payload.len() } else { 0 };
        let mut v = vec![0x00, 0x00, 0x01, stream_id, (pes_len >> 8) as u8, pes_len as u8];
        v.push(0x80);
        v.push(if dts.is_some() { 0xC0 } else { 0x80 });
        v.push(header_len as u8);
        write_timestamp(&mut v, if dts.is_some() { 0x30 } else { 0x20 }, pts);
        if let Some(dts) = dts {
            write_timestamp(&mut v, 0x10, dts);
        }
        v.extend_from_slice(payload);
        v
    }

    fn packetize(pid: u16, first_cc: u8, pes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, chunk) in pes.chunks(184).enumerate() {
            out.extend(ts_packet(pid, i == 0, first_cc.wrapping_add(i as u8), chunk));
        }
        out
    }

    fn program() -> Vec<u8> {
        let mut data = pat(0x1000);
        data.extend(pmt(0x1000, 0, &[(stream_type::H264, 256), (stream_type::AAC_ADTS, 257)]));
        data
    }

    #[test]
    fn test_discovers_tracks_from_pat_pmt() {
        let mut demuxer = TsDemuxer::new();
        assert!(!demuxer.has_track_info());

        demuxer.feed(&program());
        assert!(demuxer.has_track_info());

        let tracks = demuxer.take_tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[&256].codec, CodecId::H264);
        assert_eq!(tracks[&256].kind, MediaKind::Video);
        assert_eq!(tracks[&257].codec, CodecId::Aac);
        assert_eq!(tracks[&257].kind, MediaKind::Audio);

        // Consumed once
        assert!(!demuxer.has_track_info());
    }

    #[test]
    fn test_unsupported_stream_types_are_ignored() {
        let mut demuxer = TsDemuxer::new();
        let mut data = pat(0x1000);
        data.extend(pmt(0x1000, 0, &[(0x06, 300), (stream_type::H265, 301)]));
        demuxer.feed(&data);

        let tracks = demuxer.take_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[&301].codec, CodecId::H265);
    }

    #[test]
    fn test_unmapped_media_streams_pass_through_as_unknown() {
        let mut demuxer = TsDemuxer::new();
        let mut data = pat(0x1000);
        data.extend(pmt(
            0x1000,
            0,
            &[(stream_type::AC3, 300), (stream_type::VC1, 301), (0x15, 302)],
        ));
        demuxer.feed(&data);

        let tracks = demuxer.take_tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[&300].codec, CodecId::Unknown(stream_type::AC3));
        assert_eq!(tracks[&300].kind, MediaKind::Audio);
        assert_eq!(tracks[&301].codec, CodecId::Unknown(stream_type::VC1));
        assert_eq!(tracks[&301].kind, MediaKind::Video);

        let frame = [0x0B, 0x77, 0x01, 0x02];
        demuxer.feed(&packetize(300, 0, &pes(0xBD, 1800, None, &frame, true)));
        let unit = demuxer.pop_elementary_unit().unwrap();
        assert_eq!(unit.track_id, 300);
        assert_eq!(unit.kind, MediaKind::Audio);
        assert_eq!(unit.payload.as_ref(), &frame);
    }

    #[test]
    fn test_pmt_spanning_two_packets() {
        let mut demuxer = TsDemuxer::new();
        demuxer.feed(&pat(0x1000));

        // Descriptors push the section past one packet payload
        let es_info = [0x0A, 0x04, b'e', b'n', b'g', 0x00].repeat(7);
        let section = pmt_section(
            0,
            &[
                (stream_type::H264, 256),
                (stream_type::AAC_ADTS, 257),
                (stream_type::AAC_ADTS, 258),
                (stream_type::AAC_ADTS, 259),
            ],
            &es_info,
        );
        assert!(section.len() > 184);

        demuxer.feed(&ts_packet(0x1000, true, 0, &section[..184]));
        assert!(!demuxer.has_track_info());

        demuxer.feed(&ts_packet(0x1000, false, 1, &section[184..]));
        assert!(demuxer.has_track_info());

        let tracks = demuxer.take_tracks();
        assert_eq!(tracks.len(), 4);
        assert_eq!(tracks[&256].codec, CodecId::H264);
        assert_eq!(tracks[&259].kind, MediaKind::Audio);
    }

    #[test]
    fn test_psi_continuation_after_gap_is_discarded() {
        let mut demuxer = TsDemuxer::new();
        demuxer.feed(&pat(0x1000));

        let es_info = [0x0A, 0x04, b'e', b'n', b'g', 0x00].repeat(7);
        let section = pmt_section(
            0,
            &[
                (stream_type::H264, 256),
                (stream_type::AAC_ADTS, 257),
                (stream_type::AAC_ADTS, 258),
                (stream_type::AAC_ADTS, 259),
            ],
            &es_info,
        );

        demuxer.feed(&ts_packet(0x1000, true, 0, &section[..184]));
        // Counter jumps from 0 to 2
        demuxer.feed(&ts_packet(0x1000, false, 2, &section[184..]));

        assert!(!demuxer.has_track_info());
        assert_eq!(demuxer.stats().discontinuities, 1);
    }

    #[test]
    fn test_oversized_unbounded_pes_is_dropped() {
        let mut demuxer = TsDemuxer::new();
        demuxer.feed(&program());

        let start = pes(0xE0, 3600, None, &[0, 0, 0, 1, 0x09, 0xF0], false);
        demuxer.feed(&ts_packet(256, true, 0, &start));

        let filler = [0xAB; 184];
        let mut cc = 1u8;
        for _ in 0..(MAX_PES_SIZE / filler.len() + 2) {
            demuxer.feed(&ts_packet(256, false, cc, &filler));
            cc = cc.wrapping_add(1) & 0x0F;
        }

        assert!(!demuxer.has_elementary_unit());
        assert_eq!(demuxer.stats().dropped_pes, 1);
        assert!(demuxer.assemblies.is_empty());

        // Reassembly resumes at the next unit start
        let frame = [0, 0, 0, 1, 0x65, 0x88];
        demuxer.feed(&ts_packet(256, true, cc, &pes(0xE0, 7200, None, &frame, true)));
        let unit = demuxer.pop_elementary_unit().unwrap();
        assert_eq!(unit.pts, 7200);
        assert_eq!(unit.payload.as_ref(), &frame);
    }

    #[test]
    fn test_bounded_pes_is_emitted_immediately() {
        let mut demuxer = TsDemuxer::new();
        demuxer.feed(&program());

        let frame = vec![0xFF, 0xF1, 0x50, 0x80, 0x02, 0x1F, 0xFC];
        demuxer.feed(&packetize(257, 0, &pes(0xC0, 90_000, None, &frame, true)));

        assert!(demuxer.has_elementary_unit());
        let unit = demuxer.pop_elementary_unit().unwrap();
        assert_eq!(unit.track_id, 257);
        assert_eq!(unit.kind, MediaKind::Audio);
        assert_eq!(unit.pts, 90_000);
        assert_eq!(unit.dts, 90_000);
        assert_eq!(unit.payload.as_ref(), frame.as_slice());
    }

    #[test]
    fn test_unbounded_pes_split_across_feeds() {
        let mut demuxer = TsDemuxer::new();
        demuxer.feed(&program());

        let nalus: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let first = packetize(256, 0, &pes(0xE0, 3600, Some(0), &nalus, false));
        let next_cc = (first.len() / TS_PACKET_SIZE) as u8;
        let second = packetize(256, next_cc, &pes(0xE0, 7200, Some(3600), &[0, 0, 0, 1, 0x09], false));

        // Split mid-packet to exercise carry-over
        let (a, b) = first.split_at(200);
        demuxer.feed(a);
        demuxer.feed(b);
        assert!(!demuxer.has_elementary_unit());

        demuxer.feed(&second);
        let unit = demuxer.pop_elementary_unit().unwrap();
        assert_eq!(unit.track_id, 256);
        assert_eq!(unit.pts, 3600);
        assert_eq!(unit.dts, 0);
        assert_eq!(unit.payload.as_ref(), nalus.as_slice());
        assert!(demuxer.pop_elementary_unit().is_none());
    }

    #[test]
    fn test_garbage_before_sync_is_skipped() {
        let mut demuxer = TsDemuxer::new();
        let mut data = vec![0x00, 0x13, 0x37];
        data.extend(program());
        demuxer.feed(&data);

        assert!(demuxer.has_track_info());
        assert_eq!(demuxer.stats().skipped_bytes, 3);
    }

    #[test]
    fn test_pes_without_pts_is_dropped() {
        let mut demuxer = TsDemuxer::new();
        demuxer.feed(&program());

        let mut broken = pes(0xC0, 0, None, &[1, 2, 3], true);
        broken[7] = 0x00;
        demuxer.feed(&packetize(257, 0, &broken));

        assert!(!demuxer.has_elementary_unit());
        assert_eq!(demuxer.stats().dropped_pes, 1);
    }

    #[test]
    fn test_timestamp_roundtrip_33_bits() {
        let mut out = Vec::new();
        let ts = 0x1_FFFF_FFFF_i64;
        write_timestamp(&mut out, 0x20, ts);
        assert_eq!(read_timestamp(&out), ts);
    }

    #[test]
    fn test_pmt_version_change_republishes_info() {
        let mut demuxer = TsDemuxer::new();
        demuxer.feed(&program());
        demuxer.take_tracks();

        // Same version is ignored
        demuxer.feed(&pmt(0x1000, 0, &[(stream_type::H264, 256)]));
        assert!(!demuxer.has_track_info());

        demuxer.feed(&pmt(0x1000, 1, &[(stream_type::H264, 256)]));
        assert!(demuxer.has_track_info());
        assert_eq!(demuxer.take_tracks().len(), 1);
    }
}
