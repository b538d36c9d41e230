//! Playable units and the ledger that tracks them.
//!
//! Every synthesized clip the pipeline holds is leased from a
//! [`ResourceLedger`]. The lease is released when the unit is dropped,
//! whether it finished playing, was skipped by `stop()`, or belonged to a
//! cancelled session, so the ledger's count returning to zero proves no
//! audio buffer outlived its session.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;

use crate::synthesis::AudioClip;

/// Counts live [`PlayableUnit`]s.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    live: Arc<AtomicUsize>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `clip` for chunk `index`, counting it until dropped.
    pub fn lease(&self, index: usize, clip: AudioClip) -> PlayableUnit {
        self.live.fetch_add(1, Ordering::SeqCst);
        PlayableUnit {
            index,
            clip,
            live: Arc::clone(&self.live),
        }
    }

    /// Units leased and not yet released.
    pub fn outstanding(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// A synthesized chunk ready for playback.
#[derive(Debug)]
pub struct PlayableUnit {
    index: usize,
    clip: AudioClip,
    live: Arc<AtomicUsize>,
}

impl PlayableUnit {
    pub const fn index(&self) -> usize {
        self.index
    }

    /// The WAV container (cheap to clone).
    pub fn wav(&self) -> Bytes {
        self.clip.wav.clone()
    }

    pub const fn duration(&self) -> Duration {
        self.clip.duration
    }
}

impl Drop for PlayableUnit {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip() -> AudioClip {
        AudioClip {
            wav: Bytes::from_static(b"RIFF"),
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_lease_and_release() {
        let ledger = ResourceLedger::new();
        let a = ledger.lease(0, clip());
        let b = ledger.lease(1, clip());
        assert_eq!(ledger.outstanding(), 2);
        assert_eq!(b.index(), 1);

        drop(a);
        assert_eq!(ledger.outstanding(), 1);
        drop(b);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_clones_share_count() {
        let ledger = ResourceLedger::new();
        let unit = ledger.clone().lease(0, clip());
        assert_eq!(ledger.outstanding(), 1);
        assert_eq!(unit.wav(), Bytes::from_static(b"RIFF"));
        assert_eq!(unit.duration(), Duration::from_millis(10));
    }
}
