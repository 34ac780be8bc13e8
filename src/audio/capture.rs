//! Audio capture from microphone
//!
//! Owns the input device on a dedicated thread (cpal streams are not
//! `Send`) and turns the device callback into a sequence of fixed-size
//! [`CapturedBlock`] messages on an ordered channel. Blocks are delivered
//! in capture order with no skips or duplicates while the stream runs.

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::audio::pcm::CapturedBlock;
use crate::{Error, Result};

enum CaptureControl {
    Shutdown,
}

/// Captures audio from the default input device
///
/// Mute is not handled here: the source keeps capturing while muted so
/// the level meter stays live and unmuting has no device reacquisition
/// latency. The session decides whether a block reaches the transport.
pub struct CaptureSource {
    control: mpsc::Sender<CaptureControl>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureSource {
    /// Open the default input device and start producing blocks
    ///
    /// Returns the source handle and the receiving end of the block
    /// channel. Exactly one consumer reads the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if no input device exists or
    /// the requested mono configuration is unsupported.
    pub fn open(
        sample_rate: u32,
        block_size: usize,
    ) -> Result<(Self, UnboundedReceiver<CapturedBlock>)> {
        if block_size == 0 {
            return Err(Error::Config("capture block size must be non-zero".to_string()));
        }

        let (blocks_tx, blocks_rx) = unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("voicelink-capture".into())
            .spawn(move || {
                run_capture_thread(sample_rate, block_size, &blocks_tx, &ready_tx, &control_rx);
            })
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok((
                Self {
                    control: control_tx,
                    thread: Some(thread),
                },
                blocks_rx,
            )),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::DeviceUnavailable(
                    "capture thread exited before reporting ready".to_string(),
                ))
            }
        }
    }

    /// Release the input device
    ///
    /// Joins the device thread; no block is produced after this returns.
    pub fn close(mut self) {
        let _ = self.control.send(CaptureControl::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!("audio capture stopped");
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        let _ = self.control.send(CaptureControl::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_capture_thread(
    sample_rate: u32,
    block_size: usize,
    blocks: &UnboundedSender<CapturedBlock>,
    ready: &mpsc::Sender<Result<()>>,
    control: &mpsc::Receiver<CaptureControl>,
) {
    let stream = match build_input_stream(sample_rate, block_size, blocks.clone()) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Park until shutdown; the device callback produces blocks meanwhile.
    let _ = control.recv();
    drop(stream);
}

fn build_input_stream(
    sample_rate: u32,
    block_size: usize,
    blocks: UnboundedSender<CapturedBlock>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| Error::DeviceUnavailable("no suitable input config found".to_string()))?;

    let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        block_size,
        "audio capture initialized"
    );

    // Accumulate device callbacks into fixed-size blocks. Leftover
    // samples carry over to the next callback, preserving order.
    let mut pending: Vec<f32> = Vec::with_capacity(block_size * 2);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                pending.extend_from_slice(data);
                while pending.len() >= block_size {
                    let rest = pending.split_off(block_size);
                    let samples = std::mem::replace(&mut pending, rest);
                    if blocks
                        .send(CapturedBlock {
                            samples,
                            sample_rate,
                        })
                        .is_err()
                    {
                        // Consumer gone; keep draining silently until close
                        pending.clear();
                        return;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_block_size_rejected() {
        let result = CaptureSource::open(16000, 0);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_open_close_default_device() {
        let (source, mut blocks) = CaptureSource::open(16000, 1600).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(300));
        source.close();

        // After close the channel eventually ends and no new blocks arrive
        while blocks.try_recv().is_ok() {}
        assert!(blocks.try_recv().is_err());
    }
}
