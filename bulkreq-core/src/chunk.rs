//! Chunk source: owns the outgoing payload and hands it out as fixed-size chunks.

use std::ops::Range;

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// One dispatched slice of the payload: `[offset, offset + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub offset: usize,
    pub len: usize,
    /// True on the chunk that ends the payload (and on the single empty chunk of an empty payload).
    pub is_last: bool,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

/// Outgoing payload plus a dispatch cursor.
///
/// The cursor advances when a chunk is handed out, not when the transport
/// confirms it, so completion order never affects which bytes go next.
pub struct ChunkSource {
    payload: Vec<u8>,
    position: usize,
    /// Set once the `is_last` chunk has been handed out.
    exhausted: bool,
}

impl ChunkSource {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            position: 0,
            exhausted: false,
        }
    }

    /// Next chunk of at most `max_len` bytes, or `None` once the last chunk went out.
    /// Every call that returns `Some` is a dispatch; it is not idempotent.
    pub fn next_chunk(&mut self, max_len: usize) -> Option<Chunk> {
        if self.exhausted {
            return None;
        }
        let max_len = if max_len == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            max_len
        };
        let len = max_len.min(self.payload.len() - self.position);
        let chunk = Chunk {
            offset: self.position,
            len,
            is_last: self.position + len == self.payload.len(),
        };
        self.position += len;
        self.exhausted = chunk.is_last;
        Some(chunk)
    }

    /// Give back the most recently handed-out chunk so the next call returns it again.
    pub fn unget(&mut self, chunk: &Chunk) {
        debug_assert_eq!(chunk.end(), self.position);
        self.position = chunk.offset;
        self.exhausted = false;
    }

    /// Payload bytes covered by `chunk`.
    pub fn bytes(&self, chunk: &Chunk) -> &[u8] {
        &self.payload[chunk.range()]
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn total_len(&self) -> usize {
        self.payload.len()
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.position
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Rewind to the start of the payload.
    pub fn reset(&mut self) {
        self.position = 0;
        self.exhausted = false;
    }

    /// Swap in a new payload and rewind.
    pub fn replace_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(source: &mut ChunkSource, max_len: usize) -> Vec<Chunk> {
        let mut out = Vec::new();
        while let Some(c) = source.next_chunk(max_len) {
            out.push(c);
        }
        out
    }

    #[test]
    fn split_large_payload() {
        let mut source = ChunkSource::new(vec![0u8; 10_000]);
        let chunks = drain(&mut source, 4096);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].range(), 0..4096);
        assert_eq!(chunks[1].range(), 4096..8192);
        assert_eq!(chunks[2].range(), 8192..10_000);
        assert!(!chunks[0].is_last);
        assert!(!chunks[1].is_last);
        assert!(chunks[2].is_last);
        assert_eq!(source.position(), 10_000);
        assert!(source.is_exhausted());
    }

    #[test]
    fn split_exact_multiple() {
        let mut source = ChunkSource::new(vec![0u8; 90]);
        let chunks = drain(&mut source, 30);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].end(), 90);
        assert!(chunks[2].is_last);
    }

    #[test]
    fn empty_payload_yields_one_empty_last_chunk() {
        let mut source = ChunkSource::new(Vec::new());
        let first = source.next_chunk(4096);
        assert_eq!(
            first,
            Some(Chunk {
                offset: 0,
                len: 0,
                is_last: true
            })
        );
        assert!(source.is_exhausted());
        assert_eq!(source.next_chunk(4096), None);
    }

    #[test]
    fn coverage_for_many_lengths() {
        for total in [0usize, 1, 2, 63, 64, 65, 4095, 4096, 4097, 12_288, 32_768] {
            for size in [1usize, 7, 64, 4096] {
                let mut source = ChunkSource::new(vec![0u8; total]);
                let chunks = drain(&mut source, size);
                let mut expected = 0usize;
                for (i, c) in chunks.iter().enumerate() {
                    assert_eq!(c.offset, expected, "gap or overlap at chunk {i}");
                    assert!(c.len <= size);
                    assert_eq!(c.is_last, i == chunks.len() - 1);
                    expected = c.end();
                }
                assert_eq!(expected, total);
                let want = if total == 0 { 1 } else { total.div_ceil(size) };
                assert_eq!(chunks.len(), want, "L={total} C={size}");
            }
        }
    }

    #[test]
    fn zero_max_len_uses_default() {
        let mut source = ChunkSource::new(vec![0u8; DEFAULT_CHUNK_SIZE * 2]);
        let chunks = drain(&mut source, 0);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn unget_returns_the_same_chunk_again() {
        let mut source = ChunkSource::new(vec![0u8; 100]);
        source.next_chunk(40);
        let second = source.next_chunk(80).unwrap();
        assert!(second.is_last);
        source.unget(&second);
        assert_eq!(source.position(), 40);
        assert_eq!(source.remaining(), 60);
        assert!(!source.is_exhausted());
        assert_eq!(source.next_chunk(80), Some(second));
    }

    #[test]
    fn reset_rewinds_cursor() {
        let mut source = ChunkSource::new(vec![1u8; 100]);
        drain(&mut source, 30);
        source.reset();
        assert_eq!(source.position(), 0);
        assert!(!source.is_exhausted());
        assert_eq!(source.remaining(), 100);
        assert_eq!(source.next_chunk(30).map(|c| c.range()), Some(0..30));
    }

    #[test]
    fn bytes_match_range() {
        let payload: Vec<u8> = (0..100u32).map(|i| i as u8).collect();
        let mut source = ChunkSource::new(payload);
        source.next_chunk(40);
        let second = source.next_chunk(40).unwrap();
        let bytes = source.bytes(&second);
        assert_eq!(bytes.len(), 40);
        assert_eq!(bytes[0], 40);
        assert_eq!(bytes[39], 79);
    }

    #[test]
    fn replace_payload_rewinds() {
        let mut source = ChunkSource::new(vec![0u8; 10]);
        drain(&mut source, 4);
        source.replace_payload(vec![0u8; 3]);
        assert_eq!(source.total_len(), 3);
        assert_eq!(source.position(), 0);
        assert_eq!(drain(&mut source, 4).len(), 1);
    }
}
