use crate::protocol::{MIN_FRAME_LEN, PKT_MAGIC};

/// Stash capacity. A burst that would overflow it resets the buffer instead
/// of growing; losing stale unparsed bytes is acceptable, overflowing is not.
const STASH_CAPACITY: usize = 4096;

/// Resynchronizing accumulator that turns raw USB reads into discrete,
/// length-delimited frames.
///
/// Feed reads via [`append`](Self::append), then drain complete frames with
/// [`next_packet`](Self::next_packet) until it returns `None`. Bytes that do
/// not start with the sync byte are discarded during the scan, so the parser
/// recovers from torn reads and mid-stream attach.
pub struct PacketAssembler {
    stash: [u8; STASH_CAPACITY],
    len: usize,
}

impl PacketAssembler {
    pub fn new() -> Self {
        Self {
            stash: [0u8; STASH_CAPACITY],
            len: 0,
        }
    }

    /// Append a raw read to the stash.
    ///
    /// If the chunk alone exceeds capacity, or would overflow the remaining
    /// space, the stash is reset first and only the leading bytes that fit
    /// are kept.
    pub fn append(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        if chunk.len() >= STASH_CAPACITY || self.len + chunk.len() > STASH_CAPACITY {
            log::trace!("assembler overflow, dropping {} buffered bytes", self.len);
            self.len = 0;
        }

        let copy_len = chunk.len().min(STASH_CAPACITY - self.len);
        self.stash[self.len..self.len + copy_len].copy_from_slice(&chunk[..copy_len]);
        self.len += copy_len;
    }

    /// Extract the next complete frame, or `None` if no full frame is
    /// buffered yet.
    ///
    /// Scans for the sync byte, skipping noise byte-by-byte; a declared
    /// length below the minimum header size is treated as noise too. A frame
    /// whose declared length exceeds the buffered bytes is left in place
    /// until more data arrives. Consumed bytes (frame plus any leading
    /// noise) are compacted out.
    pub fn next_packet(&mut self) -> Option<Vec<u8>> {
        let mut offset = 0;
        while offset + MIN_FRAME_LEN <= self.len {
            if self.stash[offset] != PKT_MAGIC {
                offset += 1;
                continue;
            }

            let packet_len = self.stash[offset + 2] as usize;
            if packet_len < MIN_FRAME_LEN {
                offset += 1;
                continue;
            }
            if offset + packet_len > self.len {
                break;
            }

            let packet = self.stash[offset..offset + packet_len].to_vec();
            self.compact(offset + packet_len);
            return Some(packet);
        }

        if offset > 0 {
            self.compact(offset);
        }
        None
    }

    fn compact(&mut self, consumed: usize) {
        if consumed == 0 {
            return;
        }
        if consumed >= self.len {
            self.len = 0;
            return;
        }
        self.stash.copy_within(consumed..self.len, 0);
        self.len -= consumed;
    }
}

impl Default for PacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}
