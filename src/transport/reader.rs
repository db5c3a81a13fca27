// MIT License - Copyright (c) 2026 Peter Wright
// Frame reassembly over the raw byte stream

use tracing::{debug, warn};

use crate::config::ResyncPolicy;
use crate::constants::hex_bytes;
use crate::protocol::{FrameKind, FrameMatch, match_frame};

/// Running totals for the decode path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames recognized and removed from the buffer
    pub frames: u64,
    /// Frames of kinds that carry no state
    pub discarded: u64,
    /// Frames that matched the catalog but failed to decode
    pub invalid: u64,
    /// Bytes thrown away by resync or the pending-buffer cap
    pub bytes_dropped: u64,
}

/// Accumulates socket reads and splits complete frames off the head.
///
/// Frames are never split or skipped: a frame is only returned once all of
/// its declared length is buffered. Under `ResyncPolicy::Stall` an
/// unrecognized head is kept until the next read arrives, then dropped.
pub struct FrameReader {
    pending: Vec<u8>,
    max_pending: usize,
    policy: ResyncPolicy,
    stats: FrameStats,
    /// The head matched nothing on the last pass.
    stalled: bool,
}

impl FrameReader {
    pub fn new(policy: ResyncPolicy, max_pending: usize) -> Self {
        Self {
            pending: Vec::with_capacity(max_pending),
            max_pending,
            policy,
            stats: FrameStats::default(),
            stalled: false,
        }
    }

    /// Append newly read bytes.
    ///
    /// A head left unrecognized by the previous pass can never become a frame,
    /// so it is dropped before the new bytes go in. Otherwise, if the pending
    /// buffer would grow past its cap, the stale bytes are dropped first.
    pub fn extend(&mut self, data: &[u8]) {
        if std::mem::take(&mut self.stalled) {
            warn!(
                "Dropping {} unrecognized bytes: {}",
                self.pending.len(),
                hex_bytes(&self.pending)
            );
            self.stats.bytes_dropped += self.pending.len() as u64;
            self.pending.clear();
        } else if self.pending.len() + data.len() > self.max_pending {
            warn!(
                "Dropping {} unparsed bytes (head: {})",
                self.pending.len(),
                hex_bytes(&self.pending[..self.pending.len().min(8)])
            );
            self.stats.bytes_dropped += self.pending.len() as u64;
            self.pending.clear();
        }
        self.pending.extend_from_slice(data);
    }

    /// Remove the next complete frame from the head of the buffer.
    ///
    /// Returns `None` when more bytes are needed or, under `ResyncPolicy::Stall`,
    /// when the head matches nothing. Every `Some` consumes at least one byte,
    /// so looping until `None` always terminates.
    pub fn next_frame(&mut self) -> Option<(FrameKind, Vec<u8>)> {
        loop {
            match match_frame(&self.pending) {
                FrameMatch::Complete { kind, len } => {
                    self.stats.frames += 1;
                    let frame: Vec<u8> = self.pending.drain(..len).collect();
                    return Some((kind, frame));
                }
                FrameMatch::Incomplete => return None,
                FrameMatch::Unrecognized => match self.policy {
                    ResyncPolicy::Stall => {
                        debug!(
                            "Unrecognized bytes at buffer head, waiting: {}",
                            hex_bytes(&self.pending[..self.pending.len().min(8)])
                        );
                        self.stalled = true;
                        return None;
                    }
                    ResyncPolicy::ScanForward => self.skip_to_candidate(),
                },
            }
        }
    }

    /// Drop leading bytes up to the next position a catalog frame could start.
    fn skip_to_candidate(&mut self) {
        let skip = (1..self.pending.len())
            .find(|&i| match_frame(&self.pending[i..]) != FrameMatch::Unrecognized)
            .unwrap_or(self.pending.len());
        warn!("Resync: skipped {} bytes: {}", skip, hex_bytes(&self.pending[..skip]));
        self.stats.bytes_dropped += skip as u64;
        self.pending.drain(..skip);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.stalled = false;
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn record_discarded(&mut self) {
        self.stats.discarded += 1;
    }

    pub fn record_invalid(&mut self) {
        self.stats.invalid += 1;
    }
}
