//! Reed-Solomon forward error correction over packet shards.
//!
//! [`split_to_packets`] lays a message out with [`new_segments`], encodes parity
//! for each segment with `reed-solomon-erasure` over GF(2^8), and seals every
//! shard as its own packet. [`join_packets`] reverses this: shards that never
//! arrived or failed authentication are erasures, and a segment decodes as long
//! as it still holds at least as many shards as it has data shards.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use reed_solomon_erasure::galois_8::ReedSolomon;
use strata_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use strata_types::Id;
use tracing::{debug, trace};

use crate::packet::{encode_packet, Packet, PacketParams, Packets, PACKET_OVERHEAD};
use crate::segment::{new_segments, total_shards, Segment};
use crate::{Result, TransportError};

/// Sequence numbers are 16 bits wide.
pub const MAX_SHARDS: usize = u16::MAX as usize + 1;

/// Message ids remembered after reassembly so late shards are ignored.
const COMPLETED_HISTORY: usize = 1024;

/// How long an incomplete message may wait for more shards.
pub const REASSEMBLY_TTL: Duration = Duration::from_secs(10);

/// Inputs for splitting one message.
pub struct SplitParams<'a> {
    pub id: Id,
    pub to: &'a X25519PublicKey,
    pub from: &'a X25519StaticSecret,
    pub parity: u8,
    pub data: &'a [u8],
}

/// Split a message into sealed packets of exactly `seg_size` bytes each.
pub fn split_to_packets(p: &SplitParams<'_>, seg_size: usize) -> Result<Vec<Vec<u8>>> {
    if seg_size <= PACKET_OVERHEAD {
        return Err(TransportError::InvalidPacket(format!(
            "segment size {seg_size} leaves no room after {PACKET_OVERHEAD} bytes of overhead"
        )));
    }
    let length = u32::try_from(p.data.len())
        .map_err(|_| TransportError::InvalidPacket("message longer than u32::MAX".into()))?;

    let segments = new_segments(p.data.len(), seg_size, PACKET_OVERHEAD, p.parity);
    let total = total_shards(&segments);
    if total > MAX_SHARDS {
        return Err(TransportError::InvalidPacket(format!(
            "{total} shards exceed the {MAX_SHARDS} sequence space"
        )));
    }

    let shard_len = seg_size - PACKET_OVERHEAD;
    let mut offset = 0;
    let mut out = Vec::with_capacity(total);
    for segment in &segments {
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(segment.total_shards());
        for _ in 0..segment.data_shards() {
            let end = (offset + shard_len).min(p.data.len());
            let mut shard = p.data[offset..end].to_vec();
            shard.resize(shard_len, 0);
            shards.push(shard);
            offset = end;
        }
        if segment.parity_shards() > 0 {
            shards.resize(segment.total_shards(), vec![0u8; shard_len]);
            let rs = ReedSolomon::new(segment.data_shards(), segment.parity_shards())
                .map_err(|e| TransportError::Fec(e.to_string()))?;
            rs.encode(&mut shards)
                .map_err(|e| TransportError::Fec(e.to_string()))?;
        }

        for (k, shard) in shards.iter().enumerate() {
            let seq = u16::try_from(segment.d_start + k)
                .map_err(|_| TransportError::Internal("sequence overflow".into()))?;
            out.push(encode_packet(&PacketParams {
                id: p.id,
                to: p.to,
                from: p.from,
                parity: p.parity,
                seq,
                length,
                data: shard,
            })?);
        }
    }
    Ok(out)
}

/// Rebuild a message from whatever shards of it were received.
///
/// Fails if packets disagree about the message, or if any segment lost more
/// shards than it has parity.
pub fn join_packets(mut packets: Packets) -> Result<Vec<u8>> {
    packets.sort();
    let packets = packets.into_vec();

    let first = packets
        .first()
        .ok_or_else(|| TransportError::Fec("no packets".into()))?;
    let (id, length, parity, shard_len) = (first.id, first.length, first.parity, first.data.len());
    if packets.iter().any(|p| {
        p.id != id || p.length != length || p.parity != parity || p.data.len() != shard_len
    }) {
        return Err(TransportError::InvalidPacket(format!(
            "packets of message {id} disagree on layout"
        )));
    }

    let segments = packet_layout(first)?;
    let total = total_shards(&segments);
    if let Some(p) = packets.iter().find(|p| usize::from(p.seq) >= total) {
        return Err(TransportError::InvalidPacket(format!(
            "shard {} of message {id} is past its {total} shards",
            p.seq
        )));
    }

    let length = length as usize;
    let mut out = Vec::with_capacity(length);
    for (n, segment) in segments.iter().enumerate() {
        let mut shards: Vec<Option<Vec<u8>>> = vec![None; segment.total_shards()];
        for p in packets.iter().filter(|p| segment.contains(usize::from(p.seq))) {
            shards[usize::from(p.seq) - segment.d_start] = Some(p.data.clone());
        }

        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < segment.data_shards() {
            return Err(TransportError::Fec(format!(
                "segment {n} of message {id}: {present} shards received, {} needed",
                segment.data_shards()
            )));
        }
        if shards[..segment.data_shards()].iter().any(Option::is_none) {
            let rs = ReedSolomon::new(segment.data_shards(), segment.parity_shards())
                .map_err(|e| TransportError::Fec(e.to_string()))?;
            rs.reconstruct_data(&mut shards)
                .map_err(|e| TransportError::Fec(e.to_string()))?;
            debug!(%id, segment = n, present, "reconstructed segment");
        }

        append_segment(&mut out, segment, shards)?;
    }

    if out.len() != length {
        return Err(TransportError::Fec(format!(
            "message {id}: rebuilt {} bytes, expected {length}",
            out.len()
        )));
    }
    Ok(out)
}

fn append_segment(out: &mut Vec<u8>, segment: &Segment, shards: Vec<Option<Vec<u8>>>) -> Result<()> {
    let data_shards = segment.data_shards();
    for (k, shard) in shards.into_iter().take(data_shards).enumerate() {
        let shard = shard.ok_or_else(|| TransportError::Internal("data shard missing after decode".into()))?;
        let take = if k + 1 == data_shards {
            segment.last_shard_len
        } else {
            segment.shard_len
        };
        out.extend_from_slice(&shard[..take.min(shard.len())]);
    }
    Ok(())
}

/// The segment layout a received packet declares.
///
/// The sizes come from the wire, so the shard count is bounded before any
/// layout is planned. Fails if the layout cannot fit the sequence space or
/// the packet's own sequence number lies outside it.
fn packet_layout(p: &Packet) -> Result<Vec<Segment>> {
    let shard_len = p.data.len();
    if shard_len == 0 {
        return Err(TransportError::InvalidPacket(format!("empty shard in message {}", p.id)));
    }
    let length = p.length as usize;
    let data_shards = length.div_ceil(shard_len);
    if data_shards > MAX_SHARDS {
        return Err(TransportError::InvalidPacket(format!(
            "message {} claims {data_shards} data shards",
            p.id
        )));
    }
    let segments = new_segments(length, shard_len, 0, p.parity);
    let total = total_shards(&segments);
    if total > MAX_SHARDS {
        return Err(TransportError::InvalidPacket(format!(
            "message {}: {total} shards exceed the {MAX_SHARDS} sequence space",
            p.id
        )));
    }
    if usize::from(p.seq) >= total {
        return Err(TransportError::InvalidPacket(format!(
            "shard {} of message {} is past its {total} shards",
            p.seq, p.id
        )));
    }
    Ok(segments)
}

/// Whether every segment of the message has enough shards to decode.
fn decodable(packets: &[Packet]) -> bool {
    let Some(first) = packets.first() else {
        return false;
    };
    let Ok(segments) = packet_layout(first) else {
        return false;
    };
    !segments.is_empty()
        && segments.iter().all(|segment| {
            let mut seen = vec![false; segment.total_shards()];
            for p in packets.iter().filter(|p| segment.contains(usize::from(p.seq))) {
                seen[usize::from(p.seq) - segment.d_start] = true;
            }
            seen.iter().filter(|s| **s).count() >= segment.data_shards()
        })
}

struct Partial {
    first_seen: Instant,
    packets: Packets,
}

/// Collects packets per message until each message becomes decodable.
///
/// Messages that never become decodable linger until [`Reassembler::expire`]
/// drops them.
#[derive(Default)]
pub struct Reassembler {
    partial: HashMap<Id, Partial>,
    completed: VecDeque<Id>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one packet. Returns the message's packets once they can be joined.
    pub fn push(&mut self, packet: Packet) -> Option<Packets> {
        let id = packet.id;
        if self.completed.contains(&id) {
            return None;
        }
        if let Err(e) = packet_layout(&packet) {
            debug!(%id, error = %e, "packet rejected");
            return None;
        }
        let entry = self.partial.entry(id).or_insert_with(|| Partial {
            first_seen: Instant::now(),
            packets: Packets::default(),
        });
        entry.packets.push(packet);
        if !decodable(entry.packets.as_slice()) {
            return None;
        }

        let ready = self.partial.remove(&id)?.packets;
        if self.completed.len() == COMPLETED_HISTORY {
            self.completed.pop_front();
        }
        self.completed.push_back(id);
        Some(ready)
    }

    /// Messages still waiting for shards.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Drop messages whose first shard arrived more than `ttl` before `now`.
    /// Returns how many were dropped.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.partial.len();
        self.partial.retain(|id, p| {
            let keep = now.saturating_duration_since(p.first_seen) <= ttl;
            if !keep {
                trace!(%id, shards = p.packets.len(), "incomplete message expired");
            }
            keep
        });
        before - self.partial.len()
    }
}
