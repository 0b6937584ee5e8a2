use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::models::stats::CaptureStats;
use crate::processing::frame_sink::FrameSink;
use crate::traits::capture_stream::{CaptureStream, WaitOutcome};

/// Metadata of the packet most recently copied out of the engine buffer.
#[derive(Debug, Clone, Copy)]
struct PacketMeta {
    frames: u32,
    silent: bool,
    discontinuity: bool,
    short: bool,
}

/// Drains a negotiated stream into a [`FrameSink`] on the capture thread.
///
/// Each iteration waits (bounded) for the stream, then copies every
/// available packet into an owned block of exactly
/// `frames * block_align` bytes before the packet is released, and forwards
/// it. Silent packets are forwarded as zeros. Discontinuities are counted
/// and logged; the packet itself is still forwarded.
///
/// The stop flag is checked between packets, so a stop never truncates a
/// block.
///
/// With [`filling_gaps`](Self::filling_gaps) enabled (loopback streams, which
/// deliver nothing while the device plays nothing) every empty wait tops the
/// output up with zero frames until it matches the time elapsed since the
/// stream started.
pub struct CaptureLoop<S: CaptureStream, W: Write> {
    stream: S,
    sink: FrameSink<W>,
    format: CaptureFormat,
    wait_timeout: Duration,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<CaptureStats>>,
    fill_gaps: bool,
    /// Frames forwarded so far, real and filled.
    position: u64,
}

/// Largest zero block written at once while filling a gap (100 ms).
const MAX_GAP_BLOCK_FRAMES: u64 = 4_800;

impl<S: CaptureStream, W: Write> CaptureLoop<S, W> {
    pub fn new(
        stream: S,
        sink: FrameSink<W>,
        format: CaptureFormat,
        wait_timeout: Duration,
        stop: Arc<AtomicBool>,
        stats: Arc<Mutex<CaptureStats>>,
    ) -> Self {
        Self {
            stream,
            sink,
            format,
            wait_timeout,
            stop,
            stats,
            fill_gaps: false,
            position: 0,
        }
    }

    pub fn filling_gaps(mut self, enabled: bool) -> Self {
        self.fill_gaps = enabled;
        self
    }

    /// Run until stopped or until the stream or consumer fails.
    ///
    /// The stream is stopped and dropped before this returns.
    pub fn run(mut self) -> Result<(), CaptureError> {
        self.stream.start()?;
        let started = Instant::now();

        let result = self.pump(started);

        if let Err(e) = self.stream.stop() {
            log::warn!("Failed to stop capture stream: {}", e);
        }
        result
    }

    fn pump(&mut self, started: Instant) -> Result<(), CaptureError> {
        let mut block = Vec::new();

        while !self.stop.load(Ordering::SeqCst) {
            let outcome = self.stream.wait(self.wait_timeout)?;

            // Drain even after a timeout; a missed signal must not strand data.
            let packets = self.drain(&mut block)?;

            if packets == 0 && outcome == WaitOutcome::TimedOut {
                self.stats.lock().empty_waits += 1;
                if self.fill_gaps {
                    self.fill_gap(started, &mut block)?;
                }
            }
        }
        Ok(())
    }

    /// Write zero frames until the output covers the time since `started`.
    fn fill_gap(&mut self, started: Instant, block: &mut Vec<u8>) -> Result<(), CaptureError> {
        let due = started.elapsed().as_micros() as u64 * self.format.sample_rate as u64 / 1_000_000;
        let mut missing = due.saturating_sub(self.position);
        if missing > 0 {
            log::debug!("No packets from loopback stream, filling {} frames of silence", missing);
        }

        while missing > 0 && !self.stop.load(Ordering::SeqCst) {
            let frames = missing.min(MAX_GAP_BLOCK_FRAMES) as u32;
            block.clear();
            block.resize(self.format.frames_to_bytes(frames), 0);

            let written = self.sink.write(block);
            {
                let mut stats = self.stats.lock();
                stats.bytes_written = self.sink.bytes_written();
                if let Ok(ref outcome) = written {
                    stats.frames_forwarded += frames as u64;
                    stats.gap_frames += frames as u64;
                    stats.backpressure_ms += outcome.backpressure.as_millis() as u64;
                }
            }
            written?;

            self.position += frames as u64;
            missing -= frames as u64;
        }
        Ok(())
    }

    /// Forward every packet currently available. Returns how many there were.
    fn drain(&mut self, block: &mut Vec<u8>) -> Result<usize, CaptureError> {
        let block_align = self.format.bytes_per_frame();
        let mut packets = 0;

        loop {
            let mut meta = None;
            let available = self.stream.next_packet(&mut |view| {
                let len = view.frames as usize * block_align;
                block.clear();
                let short = !view.silent && view.data.len() < len;
                if view.silent || short {
                    block.resize(len, 0);
                } else {
                    block.extend_from_slice(&view.data[..len]);
                }
                meta = Some(PacketMeta {
                    frames: view.frames,
                    silent: view.silent,
                    discontinuity: view.discontinuity,
                    short,
                });
            })?;

            let Some(meta) = meta.filter(|_| available) else {
                break;
            };
            if meta.short {
                return Err(CaptureError::StreamInterrupted(format!(
                    "packet of {} frames shorter than {} bytes",
                    meta.frames,
                    block.len()
                )));
            }
            packets += 1;

            if meta.discontinuity {
                let total = {
                    let mut stats = self.stats.lock();
                    stats.discontinuities += 1;
                    stats.discontinuities
                };
                log::warn!("Capture discontinuity: frames dropped before retrieval ({} so far)", total);
            }

            let written = self.sink.write(block);

            {
                let mut stats = self.stats.lock();
                stats.packets += 1;
                stats.bytes_written = self.sink.bytes_written();
                if meta.silent {
                    stats.silent_packets += 1;
                }
                if let Ok(ref outcome) = written {
                    stats.frames_forwarded += meta.frames as u64;
                    stats.backpressure_ms += outcome.backpressure.as_millis() as u64;
                }
            }
            written?;
            self.position += meta.frames as u64;

            if self.stop.load(Ordering::SeqCst) {
                break;
            }
        }
        Ok(packets)
    }
}
