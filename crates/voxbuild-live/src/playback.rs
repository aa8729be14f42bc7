//! Gapless scheduling of model audio against the output clock.
//!
//! Units are laid end to end: each one starts at `max(next_start, clock)` and
//! pushes `next_start` forward by its duration. An interruption stops every
//! unit in flight and rewinds the cursor to zero.

use crate::audio::{PlaybackDevice, PlaybackId};
use crate::codec::DecodedAudio;
use crate::error::LiveResult;
use std::collections::HashSet;
use tracing::{debug, info};

/// Where a unit landed on the clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    pub id: PlaybackId,
    pub start: f64,
    pub end: f64,
}

pub struct PlaybackScheduler {
    device: Option<Box<dyn PlaybackDevice>>,
    next_start: f64,
    in_flight: HashSet<PlaybackId>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn PlaybackDevice>) -> Self {
        Self {
            device: Some(device),
            next_start: 0.0,
            in_flight: HashSet::new(),
            next_id: 0,
        }
    }

    /// Schedule one decoded chunk. The flag is true when this unit starts the
    /// model speaking (the in-flight set was empty).
    pub fn enqueue(&mut self, audio: DecodedAudio) -> LiveResult<Option<(ScheduledUnit, bool)>> {
        let device = match self.device.as_mut() {
            Some(d) => d,
            None => return Ok(None),
        };
        if audio.is_empty() {
            return Ok(None);
        }

        let start = self.next_start.max(device.current_time());
        let end = start + audio.duration_secs();
        let id = PlaybackId(self.next_id);
        self.next_id += 1;

        device.schedule(id, audio, start)?;
        let started_speaking = self.in_flight.is_empty();
        self.in_flight.insert(id);
        self.next_start = end;

        debug!(target: "voxbuild::live", "Unit {:?} scheduled {:.3}..{:.3}", id, start, end);
        Ok(Some((ScheduledUnit { id, start, end }, started_speaking)))
    }

    /// Record a completion. True when this was the last unit in flight.
    /// Unknown ids (already stopped by an interruption) are ignored.
    pub fn finish(&mut self, id: PlaybackId) -> bool {
        self.in_flight.remove(&id) && self.in_flight.is_empty()
    }

    /// Barge-in: hard-stop everything and rewind. True if anything was playing.
    pub fn interrupt(&mut self) -> bool {
        let was_playing = !self.in_flight.is_empty();
        if let Some(device) = self.device.as_mut() {
            for id in self.in_flight.drain() {
                device.stop(id);
            }
        }
        self.in_flight.clear();
        self.next_start = 0.0;
        if was_playing {
            info!(target: "voxbuild::live", "Playback interrupted");
        }
        was_playing
    }

    pub fn is_speaking(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Stop everything and release the device. Idempotent.
    pub fn close(&mut self) {
        self.interrupt();
        if let Some(mut device) = self.device.take() {
            device.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.device.is_none()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
