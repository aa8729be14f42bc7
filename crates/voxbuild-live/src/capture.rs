//! Microphone → live link.
//!
//! Frames from the capture device are encoded and pushed onto the outbound
//! channel without waiting for acknowledgment. Capture keeps running while the
//! model is speaking.

use crate::audio::{CaptureDevice, CaptureFrame};
use crate::codec::encode_frame;
use crate::error::LiveResult;
use crate::transport::ClientMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Running encoder task for one session.
pub struct CapturePipeline {
    task: Option<JoinHandle<()>>,
    frames_sent: Arc<AtomicU64>,
}

impl CapturePipeline {
    /// Start `device` and forward every frame to `outbound` as realtime input.
    pub fn start(
        device: &mut dyn CaptureDevice,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        sample_rate: u32,
    ) -> LiveResult<Self> {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        device.start(frame_tx)?;

        let frames_sent = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(forward_frames(
            frame_rx,
            outbound,
            sample_rate,
            Arc::clone(&frames_sent),
        ));
        info!(target: "voxbuild::live", "Capture pipeline running at {} Hz", sample_rate);

        Ok(Self {
            task: Some(task),
            frames_sent,
        })
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(target: "voxbuild::live", "Capture pipeline stopped after {} frames", self.frames_sent());
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn forward_frames(
    mut frame_rx: mpsc::UnboundedReceiver<CaptureFrame>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    sample_rate: u32,
    frames_sent: Arc<AtomicU64>,
) {
    while let Some(frame) = frame_rx.recv().await {
        let blob = encode_frame(&frame.samples, sample_rate);
        if outbound.send(ClientMessage::RealtimeInput(blob)).is_err() {
            warn!(target: "voxbuild::live", "Live link closed; dropping capture frames");
            break;
        }
        frames_sent.fetch_add(1, Ordering::Relaxed);
    }
}
