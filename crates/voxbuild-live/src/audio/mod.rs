//! Audio device seams.
//!
//! The session never touches cpal or rodio directly. It acquires a
//! [`CaptureDevice`] and a [`PlaybackDevice`] from an [`AudioBackend`];
//! [`system::SystemAudio`] is the real binding, tests use in-memory devices.

pub mod system;

use crate::codec::DecodedAudio;
use crate::config::LiveConfig;
use crate::error::LiveResult;
use std::time::Instant;
use tokio::sync::mpsc;

pub use system::SystemAudio;

/// Capture parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Mono rate delivered to the session (default: 16000)
    pub sample_rate: u32,

    /// Samples per frame (default: 4096, ~256 ms at 16 kHz)
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 4096,
        }
    }
}

impl From<&LiveConfig> for CaptureConfig {
    fn from(config: &LiveConfig) -> Self {
        Self {
            sample_rate: config.capture_sample_rate,
            frame_size: config.capture_frame_size,
        }
    }
}

/// One fixed-size microphone frame.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Mono f32 samples in -1.0..1.0
    pub samples: Vec<f32>,

    /// When the frame filled up
    pub captured_at: Instant,
}

/// Handle for one scheduled playback unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(pub u64);

/// Splits an arbitrary sample stream into frames of exactly `frame_size`.
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_size: usize,
    buffer: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            buffer: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples; returns every frame completed by this push.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        for &sample in samples {
            self.buffer.push(sample);
            if self.buffer.len() >= self.frame_size {
                frames.push(std::mem::replace(
                    &mut self.buffer,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }
        frames
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Microphone side. Frames are pushed into `frame_tx` until `close`.
pub trait CaptureDevice: Send {
    fn start(&mut self, frame_tx: mpsc::UnboundedSender<CaptureFrame>) -> LiveResult<()>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

/// Speaker side with a monotonic clock in seconds.
///
/// Completion of each scheduled unit is reported on the channel handed to
/// [`AudioBackend::open_playback`]. Stopped units may or may not report.
pub trait PlaybackDevice: Send {
    fn current_time(&self) -> f64;

    /// Start `audio` at clock time `start_at` (immediately if already past).
    fn schedule(&mut self, id: PlaybackId, audio: DecodedAudio, start_at: f64) -> LiveResult<()>;

    /// Hard stop of one unit.
    fn stop(&mut self, id: PlaybackId);

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

/// Acquires audio devices for a session.
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self, config: &CaptureConfig) -> LiveResult<Box<dyn CaptureDevice>>;

    fn open_playback(
        &self,
        sample_rate: u32,
        done_tx: mpsc::UnboundedSender<PlaybackId>,
    ) -> LiveResult<Box<dyn PlaybackDevice>>;
}
