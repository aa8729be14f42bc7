//! System audio using CPAL (capture) and Rodio (playback).
//!
//! cpal streams and rodio output streams are `!Send`, so each device lives on
//! its own thread and is driven through a std channel of commands. The session
//! only holds the command sender.

use super::{
    AudioBackend, CaptureConfig, CaptureDevice, CaptureFrame, FrameAccumulator, PlaybackDevice,
    PlaybackId,
};
use crate::codec::{downmix, resample, DecodedAudio};
use crate::error::{LiveError, LiveResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, PlayError, Sink, Source};
use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default host devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAudio;

impl SystemAudio {
    pub fn new() -> Self {
        Self
    }

    /// List available input devices
    pub fn list_input_devices() -> LiveResult<Vec<String>> {
        let host = cpal::default_host();
        Ok(host.input_devices()?.filter_map(|d| d.name().ok()).collect())
    }

    /// List available output devices
    pub fn list_output_devices() -> LiveResult<Vec<String>> {
        let host = cpal::default_host();
        Ok(host.output_devices()?.filter_map(|d| d.name().ok()).collect())
    }
}

impl AudioBackend for SystemAudio {
    fn open_capture(&self, config: &CaptureConfig) -> LiveResult<Box<dyn CaptureDevice>> {
        Ok(Box::new(SystemCapture::open(*config)?))
    }

    fn open_playback(
        &self,
        sample_rate: u32,
        done_tx: mpsc::UnboundedSender<PlaybackId>,
    ) -> LiveResult<Box<dyn PlaybackDevice>> {
        Ok(Box::new(SystemPlayback::open(sample_rate, done_tx)?))
    }
}

fn device_thread_gone() -> LiveError {
    LiveError::AudioDevice("audio device thread exited".to_string())
}

enum CaptureCommand {
    Start(
        mpsc::UnboundedSender<CaptureFrame>,
        std_mpsc::Sender<LiveResult<()>>,
    ),
    Close,
}

/// Default input device on a dedicated thread.
pub struct SystemCapture {
    cmd_tx: std_mpsc::Sender<CaptureCommand>,
    thread: Option<JoinHandle<()>>,
}

impl SystemCapture {
    /// Acquire the default input device; fails if none is available.
    pub fn open(config: CaptureConfig) -> LiveResult<Self> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (init_tx, init_rx) = std_mpsc::sync_channel::<LiveResult<()>>(1);

        let thread = std::thread::Builder::new()
            .name("voxbuild-capture".to_string())
            .spawn(move || capture_thread(config, cmd_rx, init_tx))?;

        init_rx.recv().map_err(|_| device_thread_gone())??;
        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }
}

impl CaptureDevice for SystemCapture {
    fn start(&mut self, frame_tx: mpsc::UnboundedSender<CaptureFrame>) -> LiveResult<()> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.cmd_tx
            .send(CaptureCommand::Start(frame_tx, reply_tx))
            .map_err(|_| device_thread_gone())?;
        reply_rx.recv().map_err(|_| device_thread_gone())?
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.cmd_tx.send(CaptureCommand::Close);
            let _ = thread.join();
            info!(target: "voxbuild::live", "🎤 Capture device released");
        }
    }
}

impl Drop for SystemCapture {
    fn drop(&mut self) {
        self.close();
    }
}

fn capture_thread(
    config: CaptureConfig,
    cmd_rx: std_mpsc::Receiver<CaptureCommand>,
    init_tx: std_mpsc::SyncSender<LiveResult<()>>,
) {
    let opened = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| LiveError::AudioDevice("No input device available".to_string()))
        .and_then(|device| {
            let supported = device.default_input_config()?;
            Ok((device, supported))
        });
    let (device, supported) = match opened {
        Ok(v) => {
            let _ = init_tx.send(Ok(()));
            v
        }
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };
    info!(
        target: "voxbuild::live",
        "🎤 Using input device: {} ({:?})",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        supported
    );

    // Held until Close; dropping it stops the callback.
    let mut _stream: Option<Stream> = None;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            CaptureCommand::Start(frame_tx, reply) => {
                let result = build_capture_stream(&device, &supported, config, frame_tx)
                    .and_then(|stream| {
                        stream.play()?;
                        Ok(stream)
                    });
                match result {
                    Ok(stream) => {
                        _stream = Some(stream);
                        info!(target: "voxbuild::live", "▶️ Audio capture started");
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            CaptureCommand::Close => break,
        }
    }
}

fn build_capture_stream(
    device: &cpal::Device,
    supported: &cpal::SupportedStreamConfig,
    config: CaptureConfig,
    frame_tx: mpsc::UnboundedSender<CaptureFrame>,
) -> LiveResult<Stream> {
    let stream_config: StreamConfig = supported.config();
    match supported.sample_format() {
        SampleFormat::F32 => input_stream::<f32>(device, &stream_config, config, frame_tx),
        SampleFormat::I16 => input_stream::<i16>(device, &stream_config, config, frame_tx),
        SampleFormat::U16 => input_stream::<u16>(device, &stream_config, config, frame_tx),
        other => Err(LiveError::AudioDevice(format!(
            "Unsupported sample format {:?} (need F32, I16 or U16)",
            other
        ))),
    }
}

fn input_stream<T>(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    config: CaptureConfig,
    frame_tx: mpsc::UnboundedSender<CaptureFrame>,
) -> LiveResult<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = stream_config.channels as usize;
    let device_rate = stream_config.sample_rate.0;
    let mut accumulator = FrameAccumulator::new(config.frame_size);

    let stream = device.build_input_stream(
        stream_config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
            let mono = downmix(&samples, channels);
            let mono = resample(&mono, device_rate, config.sample_rate);
            for samples in accumulator.push(&mono) {
                let frame = CaptureFrame {
                    samples,
                    captured_at: Instant::now(),
                };
                if frame_tx.send(frame).is_err() {
                    debug!(target: "voxbuild::live", "Capture frame dropped: receiver gone");
                }
            }
        },
        move |err| {
            warn!(target: "voxbuild::live", "Audio stream error: {}", err);
        },
        None,
    )?;
    Ok(stream)
}

enum PlaybackCommand {
    Schedule {
        id: PlaybackId,
        audio: DecodedAudio,
        start_at: f64,
    },
    Stop(PlaybackId),
    Close,
}

/// Default output device on a dedicated thread, one sink per scheduled unit.
pub struct SystemPlayback {
    cmd_tx: std_mpsc::Sender<PlaybackCommand>,
    epoch: Instant,
    thread: Option<JoinHandle<()>>,
}

impl SystemPlayback {
    pub fn open(sample_rate: u32, done_tx: mpsc::UnboundedSender<PlaybackId>) -> LiveResult<Self> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (init_tx, init_rx) = std_mpsc::sync_channel::<LiveResult<()>>(1);
        let epoch = Instant::now();

        let thread = std::thread::Builder::new()
            .name("voxbuild-playback".to_string())
            .spawn(move || playback_thread(epoch, cmd_rx, init_tx, done_tx))?;

        init_rx.recv().map_err(|_| device_thread_gone())??;
        info!(target: "voxbuild::live", "🔊 Audio playback initialized ({} Hz)", sample_rate);
        Ok(Self {
            cmd_tx,
            epoch,
            thread: Some(thread),
        })
    }
}

impl PlaybackDevice for SystemPlayback {
    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, id: PlaybackId, audio: DecodedAudio, start_at: f64) -> LiveResult<()> {
        self.cmd_tx
            .send(PlaybackCommand::Schedule {
                id,
                audio,
                start_at,
            })
            .map_err(|_| LiveError::Playback("playback thread exited".to_string()))
    }

    fn stop(&mut self, id: PlaybackId) {
        let _ = self.cmd_tx.send(PlaybackCommand::Stop(id));
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.cmd_tx.send(PlaybackCommand::Close);
            let _ = thread.join();
            info!(target: "voxbuild::live", "⏹️ Playback device released");
        }
    }
}

impl Drop for SystemPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

fn playback_thread(
    epoch: Instant,
    cmd_rx: std_mpsc::Receiver<PlaybackCommand>,
    init_tx: std_mpsc::SyncSender<LiveResult<()>>,
    done_tx: mpsc::UnboundedSender<PlaybackId>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(v) => {
            let _ = init_tx.send(Ok(()));
            v
        }
        Err(e) => {
            let _ = init_tx.send(Err(LiveError::Playback(e.to_string())));
            return;
        }
    };

    let mut sinks: HashMap<PlaybackId, Sink> = HashMap::new();

    while let Ok(cmd) = cmd_rx.recv() {
        sinks.retain(|_, sink| !sink.empty());
        match cmd {
            PlaybackCommand::Schedule {
                id,
                audio,
                start_at,
            } => {
                let lead = (start_at - epoch.elapsed().as_secs_f64()).max(0.0);
                if let Some(sink) = load_unit(Sink::try_new(&handle), id, audio, lead, &done_tx) {
                    sinks.insert(id, sink);
                }
            }
            PlaybackCommand::Stop(id) => {
                if let Some(sink) = sinks.remove(&id) {
                    sink.stop();
                }
            }
            PlaybackCommand::Close => break,
        }
    }

    for (_, sink) in sinks.drain() {
        sink.stop();
    }
}

/// Queue one unit on its own sink, delayed by `lead` seconds.
///
/// A unit that cannot get a sink is reported done right away so the scheduler
/// never waits on it.
fn load_unit(
    sink: Result<Sink, PlayError>,
    id: PlaybackId,
    audio: DecodedAudio,
    lead: f64,
    done_tx: &mpsc::UnboundedSender<PlaybackId>,
) -> Option<Sink> {
    let sink = match sink {
        Ok(sink) => sink,
        Err(e) => {
            warn!(target: "voxbuild::live", "Failed to open sink for {:?}: {}", id, e);
            let _ = done_tx.send(id);
            return None;
        }
    };
    let source = SamplesBuffer::new(audio.channels, audio.sample_rate, audio.samples)
        .delay(Duration::from_secs_f64(lead));
    sink.append(source);

    let done = done_tx.clone();
    sink.append(EmptyCallback::<f32>::new(Box::new(move || {
        let _ = done.send(id);
    })));
    debug!(target: "voxbuild::live", "Scheduled unit {:?} in {:.3}s", id, lead);
    Some(sink)
}
