//! Ordered playback of response audio
//!
//! [`PlaybackQueue`] buffers decoded frames in strict arrival order;
//! [`PlaybackSink`] owns the output device and drains the queue from the
//! device callback, one frame at a time with no gaps and no overlap. The
//! cpal stream is confined to a dedicated thread because `cpal::Stream`
//! is not `Send`.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// A frame mid-playback
struct CurrentFrame {
    samples: Vec<f32>,
    position: usize,
}

#[derive(Default)]
struct QueueInner {
    frames: VecDeque<Vec<f32>>,
    current: Option<CurrentFrame>,
}

/// FIFO buffer of not-yet-played response frames
///
/// `enqueue` never blocks producers; the device callback pops the head
/// only after the previous frame played to completion. `flush` empties
/// the queue and stops the currently playing frame at the callback's
/// next checkpoint. Queue depth is unbounded; only an explicit flush
/// drops frames.
#[derive(Clone, Default)]
pub struct PlaybackQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl PlaybackQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decoded frame to the tail
    pub fn enqueue(&self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        if let Ok(mut inner) = self.inner.lock() {
            inner.frames.push_back(samples);
        }
    }

    /// Drop all queued frames and stop the frame currently playing
    ///
    /// Used only on interruption. Frames enqueued after the flush are
    /// unaffected and become the new head.
    pub fn flush(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            let dropped = inner.frames.len() + usize::from(inner.current.is_some());
            inner.frames.clear();
            inner.current = None;
            if dropped > 0 {
                tracing::debug!(frames = dropped, "playback queue flushed");
            }
        }
    }

    /// Number of frames waiting behind the one currently playing
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.lock().map(|inner| inner.frames.len()).unwrap_or(0)
    }

    /// True when nothing is queued and nothing is playing
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.frames.is_empty() && inner.current.is_none())
            .unwrap_or(true)
    }

    /// Fill an interleaved output buffer from the queue
    ///
    /// Pops the head frame only when the previous one is exhausted, so
    /// playback is strictly sequential. Pads with silence when the queue
    /// runs dry. Returns the number of real (non-padding) mono samples
    /// written.
    pub fn fill_into(&self, out: &mut [f32], channels: usize) -> usize {
        let Ok(mut inner) = self.inner.lock() else {
            out.fill(0.0);
            return 0;
        };

        let mut written = 0;
        for frame_out in out.chunks_mut(channels.max(1)) {
            if inner.current.is_none() {
                inner.current = inner
                    .frames
                    .pop_front()
                    .map(|samples| CurrentFrame { samples, position: 0 });
            }

            let sample = match inner.current.as_mut() {
                Some(current) => {
                    let sample = current.samples[current.position];
                    current.position += 1;
                    if current.position >= current.samples.len() {
                        inner.current = None;
                    }
                    written += 1;
                    sample
                }
                None => 0.0,
            };

            for slot in frame_out.iter_mut() {
                *slot = sample;
            }
        }

        written
    }
}

enum SinkControl {
    Shutdown,
}

/// Owns the output audio device and drains a [`PlaybackQueue`]
pub struct PlaybackSink {
    control: mpsc::Sender<SinkControl>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackSink {
    /// Open the default output device and start draining the queue
    ///
    /// The device is opened on a dedicated thread that owns the cpal
    /// stream for the sink's entire lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if no suitable output device
    /// or configuration exists.
    pub fn open(queue: PlaybackQueue, sample_rate: u32) -> Result<Self> {
        let (control_tx, control_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("voicelink-playback".into())
            .spawn(move || run_sink_thread(&queue, sample_rate, &ready_tx, &control_rx))
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                control: control_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::DeviceUnavailable(
                    "playback thread exited before reporting ready".to_string(),
                ))
            }
        }
    }

    /// Release the output device
    ///
    /// Joins the device thread; no callback runs after this returns.
    pub fn close(mut self) {
        let _ = self.control.send(SinkControl::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!("playback sink closed");
    }
}

impl Drop for PlaybackSink {
    fn drop(&mut self) {
        let _ = self.control.send(SinkControl::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_sink_thread(
    queue: &PlaybackQueue,
    sample_rate: u32,
    ready: &mpsc::Sender<Result<()>>,
    control: &mpsc::Receiver<SinkControl>,
) {
    let stream = match build_output_stream(queue.clone(), sample_rate) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Park until told to shut down; the stream drains the queue from its
    // own callback the whole time.
    let _ = control.recv();
    drop(stream);
}

fn build_output_stream(queue: PlaybackQueue, sample_rate: u32) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: stereo, mono samples duplicated across channels
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::DeviceUnavailable("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = config.channels as usize;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                queue.fill_into(data, channels);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok(stream)
}
