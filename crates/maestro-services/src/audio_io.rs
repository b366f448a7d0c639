//! Output sinks: the realtime device stream and an in-memory collector

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, bounded};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("No audio output devices found")]
    NoDevices,
    #[error("Failed to get default output config: {0}")]
    Config(String),
    #[error("Output stream failed: {0}")]
    Stream(String),
    #[error("Output stalled: no block consumed within {0:?}")]
    Stalled(Duration),
    #[error("Output stream disconnected")]
    Disconnected,
}

/// Destination for rendered mono blocks
pub trait OutputSink {
    fn sample_rate(&self) -> u32;
    fn write_block(&mut self, block: &[f32]) -> Result<(), SinkError>;
    /// Wait until queued audio has been handed to the device
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Device-side half of the block exchange
struct Playback {
    filled: Receiver<Vec<f32>>,
    free: Sender<Vec<f32>>,
    current: Option<Vec<f32>>,
    pos: usize,
    underruns: Arc<AtomicU64>,
}

impl Playback {
    /// Fill an interleaved device buffer. Never blocks: an empty queue plays silence.
    fn fill(&mut self, data: &mut [f32], channels: usize) {
        let mut frames = data.chunks_mut(channels.max(1));
        while let Some(frame) = frames.next() {
            if self.current.as_ref().is_none_or(|b| self.pos >= b.len()) {
                if let Some(done) = self.current.take() {
                    let _ = self.free.try_send(done);
                }
                match self.filled.try_recv() {
                    Ok(block) => {
                        self.current = Some(block);
                        self.pos = 0;
                    }
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                        self.underruns.fetch_add(1, Ordering::Relaxed);
                        frame.fill(0.0);
                        for rest in frames {
                            rest.fill(0.0);
                        }
                        return;
                    }
                }
            }
            let sample = self.current.as_ref().map_or(0.0, |b| b[self.pos]);
            self.pos += 1;
            frame.fill(sample);
        }
    }
}

/// Default output device fed through a bounded pool of preallocated blocks
pub struct CpalSink {
    sample_rate: u32,
    channels: u16,
    filled: Sender<Vec<f32>>,
    free: Receiver<Vec<f32>>,
    errors: Receiver<String>,
    underruns: Arc<AtomicU64>,
    stall_timeout: Duration,
    _stream: cpal::Stream,
}

impl CpalSink {
    pub fn open(block_size: usize, queue_blocks: usize, stall_timeout: Duration) -> Result<Self, SinkError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(SinkError::NoDevices)?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| SinkError::Config(e.to_string()))?;
        let sample_rate = supported_config.sample_rate().0;
        let channels = supported_config.channels();

        let queue_blocks = queue_blocks.max(1);
        let (filled_tx, filled_rx) = bounded::<Vec<f32>>(queue_blocks);
        let (free_tx, free_rx) = bounded::<Vec<f32>>(queue_blocks + 1);
        for _ in 0..queue_blocks {
            let _ = free_tx.try_send(Vec::with_capacity(block_size));
        }
        let (error_tx, error_rx) = bounded::<String>(1);
        let underruns = Arc::new(AtomicU64::new(0));

        let mut playback = Playback {
            filled: filled_rx,
            free: free_tx,
            current: None,
            pos: 0,
            underruns: underruns.clone(),
        };
        let device_channels = channels as usize;
        let config: StreamConfig = supported_config.into();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    playback.fill(data, device_channels);
                },
                move |err| {
                    error!("Output stream error: {}", err);
                    let _ = error_tx.try_send(err.to_string());
                },
                None,
            )
            .map_err(|e| SinkError::Stream(e.to_string()))?;
        stream.play().map_err(|e| SinkError::Stream(e.to_string()))?;

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels,
            queue_blocks,
            "Started output stream"
        );

        Ok(Self {
            sample_rate,
            channels,
            filled: filled_tx,
            free: free_rx,
            errors: error_rx,
            underruns,
            stall_timeout,
            _stream: stream,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Device callbacks that found no block ready
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn check_stream(&self) -> Result<(), SinkError> {
        match self.errors.try_recv() {
            Ok(message) => Err(SinkError::Stream(message)),
            Err(_) => Ok(()),
        }
    }
}

impl OutputSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_block(&mut self, block: &[f32]) -> Result<(), SinkError> {
        self.check_stream()?;

        let mut buffer = match self.free.recv_timeout(self.stall_timeout) {
            Ok(buffer) => buffer,
            Err(RecvTimeoutError::Timeout) => return Err(SinkError::Stalled(self.stall_timeout)),
            Err(RecvTimeoutError::Disconnected) => return Err(SinkError::Disconnected),
        };
        buffer.clear();
        buffer.extend_from_slice(block);

        match self.filled.send_timeout(buffer, self.stall_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SinkError::Stalled(self.stall_timeout)),
            Err(SendTimeoutError::Disconnected(_)) => Err(SinkError::Disconnected),
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let step = Duration::from_millis(5);
        let mut waited = Duration::ZERO;
        while !self.filled.is_empty() {
            self.check_stream()?;
            if waited >= self.stall_timeout {
                warn!("Output did not drain within {:?}", self.stall_timeout);
                return Err(SinkError::Stalled(self.stall_timeout));
            }
            std::thread::sleep(step);
            waited += step;
        }
        let underruns = self.underruns();
        if underruns > 0 {
            warn!(underruns, "Output underran during the session");
        }
        Ok(())
    }
}

/// Collects blocks in memory; for tests and offline checks
#[derive(Debug, Default)]
pub struct MemorySink {
    sample_rate: u32,
    blocks: Vec<Vec<f32>>,
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate, blocks: Vec::new(), fail_after: None }
    }

    /// Report a disconnect on every write after the first `blocks`
    pub fn failing_after(sample_rate: u32, blocks: usize) -> Self {
        Self { fail_after: Some(blocks), ..Self::new(sample_rate) }
    }

    pub fn blocks(&self) -> &[Vec<f32>] {
        &self.blocks
    }

    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.blocks.iter().flatten().copied()
    }
}

impl OutputSink for MemorySink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_block(&mut self, block: &[f32]) -> Result<(), SinkError> {
        if self.fail_after.is_some_and(|n| self.blocks.len() >= n) {
            return Err(SinkError::Disconnected);
        }
        self.blocks.push(block.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playback(queue: usize) -> (Sender<Vec<f32>>, Receiver<Vec<f32>>, Playback) {
        let (filled_tx, filled_rx) = bounded(queue);
        let (free_tx, free_rx) = bounded(queue + 1);
        let pb = Playback {
            filled: filled_rx,
            free: free_tx,
            current: None,
            pos: 0,
            underruns: Arc::new(AtomicU64::new(0)),
        };
        (filled_tx, free_rx, pb)
    }

    #[test]
    fn test_mono_block_duplicated_into_channels() {
        let (tx, _free, mut pb) = playback(2);
        tx.send(vec![0.1, 0.2, 0.3]).unwrap();
        let mut data = vec![9.0; 6];
        pb.fill(&mut data, 2);
        assert_eq!(data, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_empty_queue_plays_silence_and_counts_underrun() {
        let (tx, free, mut pb) = playback(2);
        tx.send(vec![0.5, 0.5]).unwrap();
        let mut data = vec![9.0; 8];
        pb.fill(&mut data, 2);
        assert_eq!(data, [0.5, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(pb.underruns.load(Ordering::Relaxed), 1);
        // Spent block goes back to the pool
        assert_eq!(free.try_recv().map(|b| b.len()), Ok(2));
    }

    #[test]
    fn test_blocks_continue_across_callbacks() {
        let (tx, _free, mut pb) = playback(2);
        tx.send(vec![1.0, 2.0, 3.0]).unwrap();
        tx.send(vec![4.0]).unwrap();
        let mut first = vec![0.0; 2];
        pb.fill(&mut first, 1);
        let mut second = vec![0.0; 2];
        pb.fill(&mut second, 1);
        assert_eq!(first, [1.0, 2.0]);
        assert_eq!(second, [3.0, 4.0]);
        assert_eq!(pb.underruns.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_memory_sink_failure_injection() {
        let mut sink = MemorySink::failing_after(8000, 1);
        assert!(sink.write_block(&[0.0; 4]).is_ok());
        assert_eq!(sink.write_block(&[0.0; 4]), Err(SinkError::Disconnected));
        assert_eq!(sink.blocks().len(), 1);
    }
}
