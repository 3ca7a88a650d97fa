//! Segment layout for erasure-coded messages.
//!
//! A message is cut into shards of `seg_size - overhead` bytes. Shards are
//! grouped into sections of at most 256 (the GF(2^8) limit): a full section
//! holds `256 - parity` data shards followed by `parity` parity shards. The
//! remainder forms a final partial section whose parity count is scaled to its
//! data count, rounding up:
//!
//! ```text
//! parity_shards(r) = ceil(r * parity / (256 - parity))
//! ```
//!
//! `parity == 0` disables coding. The layout depends only on its inputs, and
//! shard indexes (packet sequence numbers) run contiguously across segments.

/// Shards per full section: the GF(2^8) field size.
pub const SECTION_SHARDS: usize = 256;

/// One erasure-coded group of shards.
///
/// Indexes are global shard sequence numbers. `d_start..d_end` are data
/// shards, `d_end..p_end` parity shards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub d_start: usize,
    pub d_end: usize,
    pub p_end: usize,
    pub shard_len: usize,
    /// Byte length of the final data shard in this segment.
    pub last_shard_len: usize,
}

impl Segment {
    pub fn data_shards(&self) -> usize {
        self.d_end - self.d_start
    }

    pub fn parity_shards(&self) -> usize {
        self.p_end - self.d_end
    }

    pub fn total_shards(&self) -> usize {
        self.p_end - self.d_start
    }

    pub fn contains(&self, seq: usize) -> bool {
        (self.d_start..self.p_end).contains(&seq)
    }
}

/// Compute the segment layout of a `msg_len`-byte message.
///
/// Returns an empty layout for an empty message or when `seg_size` leaves no
/// room for shard data after `overhead`.
pub fn new_segments(msg_len: usize, seg_size: usize, overhead: usize, parity: u8) -> Vec<Segment> {
    let shard_len = match seg_size.checked_sub(overhead) {
        Some(len) if len > 0 => len,
        _ => return Vec::new(),
    };
    if msg_len == 0 {
        return Vec::new();
    }

    let data_total = msg_len.div_ceil(shard_len);
    let last_len = match msg_len % shard_len {
        0 => shard_len,
        rem => rem,
    };

    let parity = usize::from(parity);
    let section_data = SECTION_SHARDS - parity;
    let full_sections = data_total / section_data;
    let remainder = data_total % section_data;

    let mut segments = Vec::with_capacity(full_sections + usize::from(remainder > 0));
    for i in 0..full_sections {
        let d_start = i * SECTION_SHARDS;
        let is_final = i + 1 == full_sections && remainder == 0;
        segments.push(Segment {
            d_start,
            d_end: d_start + section_data,
            p_end: d_start + SECTION_SHARDS,
            shard_len,
            last_shard_len: if is_final { last_len } else { shard_len },
        });
    }

    if remainder > 0 {
        let d_start = full_sections * SECTION_SHARDS;
        let d_end = d_start + remainder;
        let parity_count = (remainder * parity).div_ceil(section_data);
        segments.push(Segment {
            d_start,
            d_end,
            p_end: d_end + parity_count,
            shard_len,
            last_shard_len: last_len,
        });
    }

    segments
}

/// Total shard count across a layout.
pub fn total_shards(segments: &[Segment]) -> usize {
    segments.last().map_or(0, |s| s.p_end)
}
