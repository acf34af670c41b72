//! Microphone and speaker devices via CPAL.
//!
//! CPAL streams cannot move between threads, so each device owns a worker
//! thread that builds the stream and then services play/pause/close
//! commands. Devices run at their native rate and channel count; audio is
//! converted to and from the session's 16-bit layout at the boundary.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::{Condvar, Mutex};

use super::capture::{FrameHandler, InputDevice};
use super::playback::OutputDevice;
use super::resample::FormatAdapter;
use super::types::AudioConfig;
use crate::error::VoiceError;

/// Longest a speaker write may wait for the device to drain before failing.
const OUTPUT_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Names of the available input and output devices.
pub fn list_devices() -> Result<(Vec<String>, Vec<String>), VoiceError> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()
        .map_err(|error| VoiceError::hardware("input", error.to_string()))?
        .filter_map(|device| device.name().ok())
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|error| VoiceError::hardware("output", error.to_string()))?
        .filter_map(|device| device.name().ok())
        .collect();
    Ok((inputs, outputs))
}

fn find_input(preferred: Option<&str>) -> Result<cpal::Device, VoiceError> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => host
            .input_devices()
            .map_err(|error| VoiceError::hardware(name, error.to_string()))?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| VoiceError::hardware(name, "input device not found")),
        None => host
            .default_input_device()
            .ok_or_else(|| VoiceError::hardware("default input", "no default input device available")),
    }
}

fn find_output(preferred: Option<&str>) -> Result<cpal::Device, VoiceError> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => host
            .output_devices()
            .map_err(|error| VoiceError::hardware(name, error.to_string()))?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| VoiceError::hardware(name, "output device not found")),
        None => host
            .default_output_device()
            .ok_or_else(|| VoiceError::hardware("default output", "no default output device available")),
    }
}

fn device_name(device: &cpal::Device) -> String {
    device
        .name()
        .unwrap_or_else(|_| "unknown audio device".to_string())
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

enum Command {
    Play(std_mpsc::Sender<Result<(), VoiceError>>),
    Pause(std_mpsc::Sender<Result<(), VoiceError>>),
    Close,
}

/// Worker thread that owns a CPAL stream.
struct StreamWorker {
    name: String,
    commands: std_mpsc::Sender<Command>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StreamWorker {
    /// Spawn a worker that builds its stream with `build` and reports the outcome.
    fn spawn<F>(name: String, build: F) -> Result<Self, VoiceError>
    where
        F: FnOnce() -> Result<cpal::Stream, VoiceError> + Send + 'static,
    {
        let (commands, command_rx) = std_mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), VoiceError>>();
        let thread_name = format!("bidi-voice-{name}");
        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(error) => {
                        let _ = ready_tx.send(Err(error));
                        return;
                    }
                };
                while let Ok(command) = command_rx.recv() {
                    match command {
                        Command::Play(reply) => {
                            let _ = reply.send(stream.play().map_err(|error| {
                                VoiceError::hardware("stream", error.to_string())
                            }));
                        }
                        Command::Pause(reply) => {
                            let _ = reply.send(stream.pause().map_err(|error| {
                                VoiceError::hardware("stream", error.to_string())
                            }));
                        }
                        Command::Close => break,
                    }
                }
                drop(stream);
            })
            .map_err(|error| VoiceError::hardware(name.clone(), error.to_string()))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| VoiceError::hardware(name.clone(), "device worker exited during open"))?;
        ready?;
        Ok(Self {
            name,
            commands,
            thread: Some(thread),
        })
    }

    fn request(
        &self,
        make: impl FnOnce(std_mpsc::Sender<Result<(), VoiceError>>) -> Command,
    ) -> Result<(), VoiceError> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.commands
            .send(make(reply_tx))
            .map_err(|_| VoiceError::hardware(self.name.clone(), "device worker is gone"))?;
        reply_rx
            .recv()
            .map_err(|_| VoiceError::hardware(self.name.clone(), "device worker is gone"))?
    }

    fn play(&self) -> Result<(), VoiceError> {
        self.request(Command::Play)
    }

    fn pause(&self) -> Result<(), VoiceError> {
        self.request(Command::Pause)
    }

    fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(device = %self.name, "Audio worker thread panicked");
            }
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Microphone input delivering fixed-size 16-bit frames.
pub struct CpalInput {
    device: Option<cpal::Device>,
    name: String,
    config: AudioConfig,
    worker: Option<StreamWorker>,
}

impl CpalInput {
    /// Select an input device by name, or the host default.
    pub fn new(preferred: Option<&str>, config: AudioConfig) -> Result<Self, VoiceError> {
        let device = find_input(preferred)?;
        let name = device_name(&device);
        Ok(Self {
            device: Some(device),
            name,
            config,
            worker: None,
        })
    }
}

impl InputDevice for CpalInput {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&mut self, handler: FrameHandler) -> Result<(), VoiceError> {
        let device = self
            .device
            .take()
            .ok_or_else(|| VoiceError::InvalidState("input device already opened".into()))?;
        let config = self.config.clone();
        let name = self.name.clone();
        self.worker = Some(StreamWorker::spawn(self.name.clone(), move || {
            build_input_stream(&device, &name, &config, handler)
        })?);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), VoiceError> {
        match &self.worker {
            Some(worker) => worker.play(),
            None => Err(VoiceError::InvalidState("input device is not open".into())),
        }
    }

    fn pause(&mut self) -> Result<(), VoiceError> {
        match &self.worker {
            Some(worker) => worker.pause(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), VoiceError> {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        Ok(())
    }
}

fn build_input_stream(
    device: &cpal::Device,
    name: &str,
    audio: &AudioConfig,
    mut handler: FrameHandler,
) -> Result<cpal::Stream, VoiceError> {
    let supported = device
        .default_input_config()
        .map_err(|error| VoiceError::hardware(name, error.to_string()))?;
    let sample_format = supported.sample_format();
    let stream_config = supported.config();
    tracing::debug!(
        device = %name,
        rate = stream_config.sample_rate.0,
        channels = stream_config.channels,
        "Opening input at native config"
    );
    let mut capture = InputConverter {
        adapter: FormatAdapter::new(
            stream_config.sample_rate.0,
            stream_config.channels,
            audio.input_sample_rate,
            audio.channels,
        ),
        samples: Vec::new(),
        converted: Vec::new(),
        pending: Vec::with_capacity(audio.frame_bytes() * 2),
        frame_bytes: audio.frame_bytes(),
    };
    let error_name = name.to_string();
    let on_error = move |error: cpal::StreamError| {
        tracing::warn!(device = %error_name, error = %error, "Input stream error");
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                capture.push(data.iter().copied().map(i16_to_f32), &mut handler);
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                capture.push(data.iter().copied(), &mut handler);
            },
            on_error,
            None,
        ),
        other => {
            return Err(VoiceError::hardware(
                name,
                format!("unsupported input sample format: {other:?}"),
            ))
        }
    };
    stream.map_err(|error| VoiceError::hardware(name, error.to_string()))
}

/// Turns native device samples into session-layout 16-bit frames.
struct InputConverter {
    adapter: FormatAdapter,
    samples: Vec<f32>,
    converted: Vec<f32>,
    pending: Vec<u8>,
    frame_bytes: usize,
}

impl InputConverter {
    fn push(&mut self, data: impl Iterator<Item = f32>, handler: &mut FrameHandler) {
        self.samples.clear();
        self.samples.extend(data);
        self.converted.clear();
        self.adapter.process(&self.samples, &mut self.converted);
        for sample in &self.converted {
            self.pending
                .extend_from_slice(&f32_to_i16(*sample).to_le_bytes());
        }
        dispatch_frames(&mut self.pending, self.frame_bytes, handler);
    }
}

fn dispatch_frames(pending: &mut Vec<u8>, frame_bytes: usize, handler: &mut FrameHandler) {
    let frame_bytes = frame_bytes.max(2);
    while pending.len() >= frame_bytes {
        handler(&pending[..frame_bytes]);
        pending.drain(..frame_bytes);
    }
}

/// Samples written but not yet pulled by the output callback, in the
/// device's native layout.
struct OutputBuffer {
    samples: Mutex<VecDeque<f32>>,
    drained: Condvar,
}

/// Speaker output whose `write` blocks at the device's real-time pace.
pub struct CpalOutput {
    name: String,
    buffer: Arc<OutputBuffer>,
    adapter: FormatAdapter,
    decoded: Vec<f32>,
    converted: Vec<f32>,
    max_buffered: usize,
    worker: Option<StreamWorker>,
}

impl CpalOutput {
    /// Open an output device by name, or the host default, and start it at
    /// its native rate and channel count.
    pub fn open(preferred: Option<&str>, config: AudioConfig) -> Result<Self, VoiceError> {
        let device = find_output(preferred)?;
        let name = device_name(&device);
        let supported = device
            .default_output_config()
            .map_err(|error| VoiceError::hardware(name.clone(), error.to_string()))?;
        let sample_format = supported.sample_format();
        let stream_config = supported.config();
        tracing::debug!(
            device = %name,
            rate = stream_config.sample_rate.0,
            channels = stream_config.channels,
            "Opening output at native config"
        );

        let adapter = FormatAdapter::new(
            config.output_sample_rate,
            config.channels,
            stream_config.sample_rate.0,
            stream_config.channels,
        );
        let frame_samples = config.frame_size * usize::from(config.channels.max(1));
        let max_buffered = adapter.estimate(frame_samples).max(1) * 2;
        let buffer = Arc::new(OutputBuffer {
            samples: Mutex::new(VecDeque::new()),
            drained: Condvar::new(),
        });

        let worker = {
            let buffer = Arc::clone(&buffer);
            let name = name.clone();
            StreamWorker::spawn(name.clone(), move || {
                build_output_stream(&device, &name, sample_format, &stream_config, buffer)
            })?
        };
        worker.play()?;

        Ok(Self {
            name,
            buffer,
            adapter,
            decoded: Vec::new(),
            converted: Vec::new(),
            max_buffered,
            worker: Some(worker),
        })
    }
}

impl OutputDevice for CpalOutput {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn write(&mut self, pcm: &[u8]) -> Result<(), VoiceError> {
        if self.worker.is_none() {
            return Err(VoiceError::hardware(self.name.clone(), "device is closed"));
        }
        self.decoded.clear();
        self.decoded.extend(
            pcm.chunks_exact(2)
                .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]]))),
        );
        self.converted.clear();
        self.adapter.process(&self.decoded, &mut self.converted);

        let mut samples = self.buffer.samples.lock();
        samples.extend(self.converted.iter().copied());
        while samples.len() > self.max_buffered {
            let timed_out = self
                .buffer
                .drained
                .wait_for(&mut samples, OUTPUT_STALL_TIMEOUT)
                .timed_out();
            if timed_out {
                samples.clear();
                return Err(VoiceError::hardware(
                    self.name.clone(),
                    "output device stopped consuming audio",
                ));
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), VoiceError> {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        self.buffer.samples.lock().clear();
        Ok(())
    }
}

fn build_output_stream(
    device: &cpal::Device,
    name: &str,
    sample_format: SampleFormat,
    stream_config: &StreamConfig,
    buffer: Arc<OutputBuffer>,
) -> Result<cpal::Stream, VoiceError> {
    let error_name = name.to_string();
    let on_error = move |error: cpal::StreamError| {
        tracing::warn!(device = %error_name, error = %error, "Output stream error");
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_output_stream(
            stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                fill_output(&buffer, data, f32_to_i16);
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_output_stream(
            stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill_output(&buffer, data, |sample| sample);
            },
            on_error,
            None,
        ),
        other => {
            return Err(VoiceError::hardware(
                name,
                format!("unsupported output sample format: {other:?}"),
            ))
        }
    };
    stream.map_err(|error| VoiceError::hardware(name, error.to_string()))
}

fn fill_output<T: Copy + Default>(buffer: &OutputBuffer, data: &mut [T], convert: impl Fn(f32) -> T) {
    let mut samples = buffer.samples.lock();
    for slot in data.iter_mut() {
        *slot = samples.pop_front().map(&convert).unwrap_or_default();
    }
    drop(samples);
    buffer.drained.notify_all();
}
