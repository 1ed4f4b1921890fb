//! Single-entry holder for the most recent undelivered frame.
//!
//! The slot keeps at most one video frame and one audio packet. A newer
//! arrival of either kind displaces the pending one, which is released;
//! nothing is queued. The lock is held only to swap handles: displaced
//! handles are released after it is dropped, and byte copies happen on the
//! consumer side after `drain` returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::trace;

use crate::handle::{RetainedAudio, RetainedVideo};

#[derive(Debug, Default)]
struct Pending {
    video: Option<RetainedVideo>,
    audio: Option<RetainedAudio>,
}

/// Counters describing what passed through a slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    /// `store` calls that carried at least one handle
    pub arrivals: u64,
    /// Video frames displaced before they were drained
    pub video_dropped: u64,
    /// Audio packets displaced before they were drained
    pub audio_dropped: u64,
    /// `drain` calls that returned at least one handle
    pub drains: u64,
}

#[derive(Debug, Default)]
pub struct FrameSlot {
    pending: Mutex<Pending>,
    arrivals: AtomicU64,
    video_dropped: AtomicU64,
    audio_dropped: AtomicU64,
    drains: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the given handles, replacing any undelivered handle of the
    /// same kind. An absent component leaves that side of the slot as is.
    pub fn store(&self, video: Option<RetainedVideo>, audio: Option<RetainedAudio>) {
        if video.is_none() && audio.is_none() {
            return;
        }

        let (old_video, old_audio) = {
            let mut pending = self.lock();
            let old_video = match video {
                Some(v) => pending.video.replace(v),
                None => None,
            };
            let old_audio = match audio {
                Some(a) => pending.audio.replace(a),
                None => None,
            };
            (old_video, old_audio)
        };

        self.arrivals.fetch_add(1, Ordering::Relaxed);
        if old_video.is_some() {
            self.video_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Frame slot: undelivered video frame dropped");
        }
        if old_audio.is_some() {
            self.audio_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Frame slot: undelivered audio packet dropped");
        }
        // Displaced handles are released here, outside the lock.
        drop((old_video, old_audio));
    }

    /// Take whatever is pending and leave the slot empty.
    pub fn drain(&self) -> (Option<RetainedVideo>, Option<RetainedAudio>) {
        let taken = {
            let mut pending = self.lock();
            (pending.video.take(), pending.audio.take())
        };
        if taken.0.is_some() || taken.1.is_some() {
            self.drains.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }

    pub fn is_empty(&self) -> bool {
        let pending = self.lock();
        pending.video.is_none() && pending.audio.is_none()
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            arrivals: self.arrivals.load(Ordering::Relaxed),
            video_dropped: self.video_dropped.load(Ordering::Relaxed),
            audio_dropped: self.audio_dropped.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use framebridge_driver::synthetic::{SyntheticFrame, SyntheticInput, SyntheticPacket};
    use framebridge_driver::{AudioInputPacket, AudioPacketRef, RefCounted, VideoFrameRef, VideoInputFrame};

    use crate::handle::Retained;

    /// Retain a handle the way the arrival callback does, then drop the
    /// creator's reference as the driver would after the callback returns.
    fn arrive_video(frame: &Arc<SyntheticFrame>) -> RetainedVideo {
        let handle: VideoFrameRef = frame.clone();
        let retained = Retained::retain(&handle);
        frame.release();
        retained
    }

    fn arrive_audio(packet: &Arc<SyntheticPacket>) -> RetainedAudio {
        let handle: AudioPacketRef = packet.clone();
        let retained = Retained::retain(&handle);
        packet.release();
        retained
    }

    #[test]
    fn test_drain_empty_slot() {
        let slot = FrameSlot::new();
        let (video, audio) = slot.drain();
        assert!(video.is_none());
        assert!(audio.is_none());
        assert!(slot.is_empty());
        assert_eq!(slot.stats(), SlotStats::default());
    }

    #[test]
    fn test_freshest_wins_per_kind() {
        let input = SyntheticInput::manual();
        let slot = FrameSlot::new();

        let frames: Vec<_> = (0..3u8).map(|i| input.make_video_frame(4, 1, i)).collect();
        let packets: Vec<_> = (0..2u8).map(|i| input.make_audio_packet(2, i)).collect();

        slot.store(Some(arrive_video(&frames[0])), Some(arrive_audio(&packets[0])));
        slot.store(Some(arrive_video(&frames[1])), None);
        slot.store(None, Some(arrive_audio(&packets[1])));
        slot.store(Some(arrive_video(&frames[2])), None);

        // Everything but the last of each kind has already been released.
        assert_eq!(frames[0].ref_count(), 0);
        assert_eq!(frames[1].ref_count(), 0);
        assert_eq!(packets[0].ref_count(), 0);
        assert_eq!(input.ledger().live(), 2);

        let (video, audio) = slot.drain();
        let video = video.unwrap();
        let audio = audio.unwrap();
        assert_eq!(unsafe { *video.bytes() }, 2);
        assert_eq!(unsafe { *audio.bytes() }, 1);
        assert!(slot.is_empty());

        drop(video);
        drop(audio);
        assert_eq!(input.ledger().live(), 0);
        assert_eq!(input.ledger().over_released(), 0);

        let stats = slot.stats();
        assert_eq!(stats.arrivals, 4);
        assert_eq!(stats.video_dropped, 2);
        assert_eq!(stats.audio_dropped, 1);
        assert_eq!(stats.drains, 1);
    }

    #[test]
    fn test_null_component_leaves_slot_untouched() {
        let input = SyntheticInput::manual();
        let slot = FrameSlot::new();

        let packet = input.make_audio_packet(2, 7);
        slot.store(None, Some(arrive_audio(&packet)));
        slot.store(None, None);

        let (video, audio) = slot.drain();
        assert!(video.is_none());
        assert!(audio.is_some());
        assert_eq!(slot.stats().arrivals, 1);
    }

    #[test]
    fn test_concurrent_store_and_drain_balance_references() {
        let input = SyntheticInput::manual();
        let slot = Arc::new(FrameSlot::new());

        let producer = {
            let slot = slot.clone();
            let input = input.clone();
            thread::spawn(move || {
                for i in 0..500u32 {
                    let frame = input.make_video_frame(16, 4, i as u8);
                    let audio = (i % 3 == 0).then(|| arrive_audio(&input.make_audio_packet(4, 0)));
                    slot.store(Some(arrive_video(&frame)), audio);
                }
            })
        };

        let mut drained = 0;
        while !producer.is_finished() {
            let (video, audio) = slot.drain();
            drained += video.is_some() as u32 + audio.is_some() as u32;
        }
        producer.join().unwrap();
        let (video, audio) = slot.drain();
        drained += video.is_some() as u32 + audio.is_some() as u32;
        drop((video, audio));

        let stats = slot.stats();
        let total = 500 + 167;
        assert_eq!(
            drained as u64 + stats.video_dropped + stats.audio_dropped,
            total
        );
        assert_eq!(input.ledger().created(), total);
        assert_eq!(input.ledger().live(), 0);
        assert_eq!(input.ledger().over_released(), 0);
    }
}
