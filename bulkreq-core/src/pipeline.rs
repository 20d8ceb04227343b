//! Send pipeline: a fixed pool of send slots kept saturated from the chunk source.
//!
//! At most `slot_count` chunks are in flight at once, whatever the payload size.
//! Each dispatched chunk carries a [`SlotToken`] that the transport hands back on
//! completion; the token's generation ties it to one connection so completions
//! that arrive after a reset are recognised and dropped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkSource};
use crate::transport::{Transport, TransportError};

/// Default number of concurrent send slots.
pub const DEFAULT_SEND_SLOTS: usize = 2;

/// Correlation handle for one in-flight chunk: slot index plus pool generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotToken {
    pub slot: u16,
    pub generation: u32,
}

impl SlotToken {
    /// Pack into a single integer for the modem link.
    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation) << 16) | u64::from(self.slot)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            slot: (raw & 0xffff) as u16,
            generation: (raw >> 16) as u32,
        }
    }
}

impl fmt::Display for SlotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

/// What a completion did to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotCompletion {
    /// Chunk confirmed; slot is idle again.
    Sent(Chunk),
    /// Transport reported failure; slot is idle and the pipeline is halted.
    Failed(Chunk),
    /// Token from an earlier generation, unknown slot, or a slot that was already idle.
    Stale,
}

/// The transport refused a chunk synchronously. The slot was released and the pipeline halted.
#[derive(Debug, thiserror::Error)]
#[error("dispatch of {len} bytes at offset {offset} on slot {token} failed: {source}")]
pub struct DispatchError {
    pub token: SlotToken,
    pub offset: usize,
    pub len: usize,
    #[source]
    pub source: TransportError,
}

#[derive(Debug, Clone, Copy, Default)]
struct SendSlot {
    in_flight: Option<Chunk>,
}

pub struct SendPipeline {
    slots: Vec<SendSlot>,
    chunk_size: usize,
    generation: u32,
    /// No further dispatches for this request; in-flight slots still drain.
    halted: bool,
    bytes_dispatched: usize,
    bytes_acknowledged: usize,
    peak_busy: usize,
}

impl SendPipeline {
    /// `slot_count` must be in `1..=u16::MAX` (checked by `EngineConfig::validate`).
    pub fn new(slot_count: usize, chunk_size: usize) -> Self {
        Self {
            slots: vec![SendSlot::default(); slot_count.clamp(1, usize::from(u16::MAX))],
            chunk_size,
            generation: 0,
            halted: false,
            bytes_dispatched: 0,
            bytes_acknowledged: 0,
            peak_busy: 0,
        }
    }

    /// Fill idle slots in index order until the source runs out.
    /// Returns the number of chunks handed to the transport.
    pub fn refill<T: Transport>(
        &mut self,
        source: &mut ChunkSource,
        transport: &mut T,
    ) -> Result<usize, DispatchError> {
        if self.halted {
            return Ok(0);
        }
        let mut dispatched = 0;
        for index in 0..self.slots.len() {
            if self.slots[index].in_flight.is_some() {
                continue;
            }
            let Some(chunk) = source.next_chunk(self.chunk_size) else {
                break;
            };
            let token = SlotToken {
                slot: index as u16,
                generation: self.generation,
            };
            self.slots[index].in_flight = Some(chunk);
            if let Err(e) = transport.send_chunk(token, source.bytes(&chunk), chunk.is_last) {
                self.slots[index].in_flight = None;
                source.unget(&chunk);
                self.halted = true;
                return Err(DispatchError {
                    token,
                    offset: chunk.offset,
                    len: chunk.len,
                    source: e,
                });
            }
            tracing::debug!(
                slot = %token,
                offset = chunk.offset,
                len = chunk.len,
                is_last = chunk.is_last,
                "chunk dispatched"
            );
            self.bytes_dispatched += chunk.len;
            dispatched += 1;
            self.peak_busy = self.peak_busy.max(self.busy_count());
            if chunk.is_last {
                break;
            }
        }
        Ok(dispatched)
    }

    /// Release the slot named by `token`. Does not refill; the caller decides.
    pub fn on_chunk_sent(&mut self, token: SlotToken, success: bool) -> SlotCompletion {
        if token.generation != self.generation {
            return SlotCompletion::Stale;
        }
        let Some(slot) = self.slots.get_mut(usize::from(token.slot)) else {
            return SlotCompletion::Stale;
        };
        let Some(chunk) = slot.in_flight.take() else {
            return SlotCompletion::Stale;
        };
        if success {
            self.bytes_acknowledged += chunk.len;
            SlotCompletion::Sent(chunk)
        } else {
            self.halted = true;
            SlotCompletion::Failed(chunk)
        }
    }

    /// Forget everything in flight and start a new generation.
    pub fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        for slot in &mut self.slots {
            slot.in_flight = None;
        }
        self.halted = false;
        self.bytes_dispatched = 0;
        self.bytes_acknowledged = 0;
        self.peak_busy = 0;
    }

    /// Sending is done: nothing in flight and nothing more will be dispatched.
    pub fn is_drained(&self, source: &ChunkSource) -> bool {
        self.busy_count() == 0 && (source.is_exhausted() || self.halted)
    }

    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.in_flight.is_some()).count()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn bytes_dispatched(&self) -> usize {
        self.bytes_dispatched
    }

    pub fn bytes_acknowledged(&self) -> usize {
        self.bytes_acknowledged
    }

    /// Highest number of simultaneously busy slots since the last reset.
    pub fn peak_busy(&self) -> usize {
        self.peak_busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::RecordingTransport;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn in_flight(transport: &RecordingTransport, done: &[SlotToken]) -> Vec<SlotToken> {
        let mut pending: Vec<SlotToken> = transport.sends().iter().map(|s| s.0).collect();
        for d in done {
            if let Some(pos) = pending.iter().position(|t| t == d) {
                pending.remove(pos);
            }
        }
        pending
    }

    #[test]
    fn token_raw_roundtrip() {
        let token = SlotToken {
            slot: 3,
            generation: 0xdead_beef,
        };
        assert_eq!(SlotToken::from_raw(token.to_raw()), token);
    }

    #[test]
    fn scenario_ten_thousand_bytes_two_slots() {
        let mut source = ChunkSource::new(vec![0u8; 10_000]);
        let mut pipeline = SendPipeline::new(2, 4096);
        let mut transport = RecordingTransport::default();

        assert_eq!(pipeline.refill(&mut source, &mut transport).unwrap(), 2);
        assert_eq!(pipeline.busy_count(), 2);
        // Both slots busy: nothing more goes out.
        assert_eq!(pipeline.refill(&mut source, &mut transport).unwrap(), 0);

        let first = transport.sends()[0].0;
        assert!(matches!(
            pipeline.on_chunk_sent(first, true),
            SlotCompletion::Sent(_)
        ));
        assert_eq!(pipeline.refill(&mut source, &mut transport).unwrap(), 1);

        let sends = transport.sends();
        assert_eq!(sends.len(), 3);
        assert_eq!(
            sends.iter().map(|s| (s.1, s.2)).collect::<Vec<_>>(),
            vec![(4096, false), (4096, false), (1808, true)]
        );
        assert_eq!(pipeline.bytes_dispatched(), 10_000);
        assert!(pipeline.peak_busy() <= 2);

        for token in in_flight(&transport, &[first]) {
            pipeline.on_chunk_sent(token, true);
        }
        assert!(pipeline.is_drained(&source));
        assert_eq!(pipeline.bytes_acknowledged(), 10_000);
    }

    #[test]
    fn empty_payload_sends_single_last_chunk() {
        let mut source = ChunkSource::new(Vec::new());
        let mut pipeline = SendPipeline::new(2, 4096);
        let mut transport = RecordingTransport::default();
        assert_eq!(pipeline.refill(&mut source, &mut transport).unwrap(), 1);
        let sends = transport.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!((sends[0].1, sends[0].2), (0, true));
        // Second slot stays idle.
        assert_eq!(pipeline.busy_count(), 1);
    }

    #[test]
    fn reordered_completions_cover_payload_once() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for slots in 1..=4usize {
            for round in 0..20 {
                let total = 1 + round * 997;
                let mut source = ChunkSource::new(vec![0u8; total]);
                let mut pipeline = SendPipeline::new(slots, 512);
                let mut transport = RecordingTransport::default();
                let mut completed: Vec<Chunk> = Vec::new();
                let mut done: Vec<SlotToken> = Vec::new();

                pipeline.refill(&mut source, &mut transport).unwrap();
                loop {
                    assert!(pipeline.busy_count() <= slots);
                    let mut pending = in_flight(&transport, &done);
                    if pending.is_empty() {
                        break;
                    }
                    pending.shuffle(&mut rng);
                    let token = pending[0];
                    done.push(token);
                    match pipeline.on_chunk_sent(token, true) {
                        SlotCompletion::Sent(chunk) => completed.push(chunk),
                        other => panic!("unexpected completion {other:?}"),
                    }
                    pipeline.refill(&mut source, &mut transport).unwrap();
                }

                completed.sort_by_key(|c| c.offset);
                let mut expected = 0;
                for c in &completed {
                    assert_eq!(c.offset, expected);
                    expected = c.end();
                }
                assert_eq!(expected, total);
                assert_eq!(transport.sends().len(), completed.len());
                assert!(pipeline.peak_busy() <= slots);
                assert!(pipeline.is_drained(&source));
            }
        }
    }

    #[test]
    fn failed_completion_halts_dispatch_but_drains() {
        let mut source = ChunkSource::new(vec![0u8; 32_768]);
        let mut pipeline = SendPipeline::new(2, 4096);
        let mut transport = RecordingTransport::default();
        pipeline.refill(&mut source, &mut transport).unwrap();
        let tokens: Vec<SlotToken> = transport.sends().iter().map(|s| s.0).collect();

        assert!(matches!(
            pipeline.on_chunk_sent(tokens[0], false),
            SlotCompletion::Failed(_)
        ));
        assert!(pipeline.is_halted());
        assert_eq!(pipeline.refill(&mut source, &mut transport).unwrap(), 0);
        assert!(!pipeline.is_drained(&source));

        assert!(matches!(
            pipeline.on_chunk_sent(tokens[1], false),
            SlotCompletion::Failed(_)
        ));
        assert_eq!(pipeline.busy_count(), 0);
        assert!(pipeline.is_drained(&source));
        assert_eq!(transport.sends().len(), 2);
    }

    #[test]
    fn duplicate_and_stale_completions_are_ignored() {
        let mut source = ChunkSource::new(vec![0u8; 10_000]);
        let mut pipeline = SendPipeline::new(2, 4096);
        let mut transport = RecordingTransport::default();
        pipeline.refill(&mut source, &mut transport).unwrap();
        let old = transport.sends()[0].0;

        assert!(matches!(
            pipeline.on_chunk_sent(old, true),
            SlotCompletion::Sent(_)
        ));
        assert_eq!(pipeline.on_chunk_sent(old, true), SlotCompletion::Stale);

        pipeline.reset();
        source.reset();
        pipeline.refill(&mut source, &mut transport).unwrap();
        // Same slot index, previous generation.
        let stale = transport.sends()[1].0;
        assert_eq!(pipeline.on_chunk_sent(stale, true), SlotCompletion::Stale);
        assert_eq!(pipeline.busy_count(), 2);

        let bogus = SlotToken {
            slot: 9,
            generation: pipeline.generation(),
        };
        assert_eq!(pipeline.on_chunk_sent(bogus, true), SlotCompletion::Stale);
    }

    #[test]
    fn reset_twice_matches_single_reset() {
        let mut source = ChunkSource::new(vec![0u8; 10_000]);
        let mut pipeline = SendPipeline::new(2, 4096);
        let mut transport = RecordingTransport::default();
        pipeline.refill(&mut source, &mut transport).unwrap();

        pipeline.reset();
        source.reset();
        let once = (pipeline.busy_count(), source.position(), pipeline.is_halted());
        pipeline.reset();
        source.reset();
        let twice = (pipeline.busy_count(), source.position(), pipeline.is_halted());
        assert_eq!(once, (0, 0, false));
        assert_eq!(once, twice);
    }

    #[test]
    fn synchronous_send_error_releases_slot() {
        let mut source = ChunkSource::new(vec![0u8; 10_000]);
        let mut pipeline = SendPipeline::new(2, 4096);
        let mut transport = RecordingTransport::failing_send_after(1);
        let err = pipeline.refill(&mut source, &mut transport).unwrap_err();
        assert_eq!(err.token.slot, 1);
        assert_eq!(err.offset, 4096);
        assert_eq!(pipeline.busy_count(), 1);
        assert!(pipeline.is_halted());
        assert_eq!(pipeline.bytes_dispatched(), 4096);

        // The refused range goes back to the unsent suffix: in flight + remaining covers the payload.
        assert_eq!(source.position(), 4096);
        assert_eq!(pipeline.bytes_dispatched() + source.remaining(), 10_000);
        assert!(!pipeline.is_drained(&source));
        assert_eq!(pipeline.refill(&mut source, &mut transport).unwrap(), 0);
    }
}
