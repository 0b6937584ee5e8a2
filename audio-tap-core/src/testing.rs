//! Scripted in-memory backend for tests.
//!
//! Stands in for the OS audio subsystem and the consuming process so the
//! session state machine, capture loop and frame sink can be driven
//! deterministically without an audio device.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::device::{AudioDevice, Direction, DirectionFilter};
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::traits::capture_stream::{CaptureStream, PacketView, WaitOutcome};
use crate::traits::device_catalog::DeviceCatalog;
use crate::traits::stream_negotiator::{NegotiatedStream, StreamNegotiator};

/// Catalog over a fixed device list.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCatalog {
    devices: Vec<AudioDevice>,
    default_capture: Option<String>,
    default_render: Option<String>,
    enumeration_error: Option<CaptureError>,
    enumerations: Arc<AtomicUsize>,
}

impl ScriptedCatalog {
    pub fn new(devices: Vec<AudioDevice>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    /// A catalog with one microphone and one speaker.
    pub fn mic_and_speaker() -> Self {
        Self::new(vec![
            AudioDevice::new("{0.0.1.00000000}.{mic}", "Microphone Array", Direction::Capture),
            AudioDevice::new("{0.0.0.00000000}.{spk}", "Speakers", Direction::Render),
        ])
    }

    pub fn with_default(mut self, direction: Direction, id: &str) -> Self {
        match direction {
            Direction::Capture => self.default_capture = Some(id.to_string()),
            Direction::Render => self.default_render = Some(id.to_string()),
        }
        self
    }

    /// Every enumeration fails with `error`.
    pub fn failing(mut self, error: CaptureError) -> Self {
        self.enumeration_error = Some(error);
        self
    }

    /// Number of enumerations performed so far.
    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl DeviceCatalog for ScriptedCatalog {
    fn enumerate(&self, filter: DirectionFilter) -> Result<Vec<AudioDevice>, CaptureError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if let Some(ref e) = self.enumeration_error {
            return Err(e.clone());
        }
        Ok(self
            .devices
            .iter()
            .filter(|d| filter.includes(d.direction))
            .cloned()
            .collect())
    }

    fn default_device(&self, direction: Direction) -> Result<AudioDevice, CaptureError> {
        let preferred = match direction {
            Direction::Capture => self.default_capture.as_deref(),
            Direction::Render => self.default_render.as_deref(),
        };
        let devices = self.enumerate(direction.into())?;
        let found = match preferred {
            Some(id) => devices.into_iter().find(|d| d.id == id),
            None => devices.into_iter().next(),
        };
        found.ok_or_else(|| CaptureError::DeviceNotFound(format!("no default {} device", direction)))
    }
}

/// One step of a scripted stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// A packet of `frames` frames whose bytes are all `fill`.
    Packet {
        frames: u32,
        fill: u8,
        silent: bool,
        discontinuity: bool,
    },
    /// The next wait times out with nothing available.
    Idle,
    /// The next wait fails.
    Fail(CaptureError),
}

impl ScriptStep {
    pub fn packet(frames: u32, fill: u8) -> Self {
        Self::Packet {
            frames,
            fill,
            silent: false,
            discontinuity: false,
        }
    }

    /// A packet flagged silent whose buffer holds `garbage`.
    pub fn silent(frames: u32, garbage: u8) -> Self {
        Self::Packet {
            frames,
            fill: garbage,
            silent: true,
            discontinuity: false,
        }
    }

    pub fn after_gap(frames: u32, fill: u8) -> Self {
        Self::Packet {
            frames,
            fill,
            silent: false,
            discontinuity: true,
        }
    }
}

/// Observes a scripted stream from the test thread.
#[derive(Debug, Clone, Default)]
pub struct StreamTracker {
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
    outstanding_views: Arc<AtomicUsize>,
}

impl StreamTracker {
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The stream handle was dropped.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Views handed out and not yet released. Always zero between packets.
    pub fn outstanding_views(&self) -> usize {
        self.outstanding_views.load(Ordering::SeqCst)
    }
}

/// A stream that plays back a fixed script, then idles.
pub struct ScriptedStream {
    steps: VecDeque<ScriptStep>,
    block_align: usize,
    tracker: StreamTracker,
}

impl ScriptedStream {
    pub fn new(steps: Vec<ScriptStep>, format: &CaptureFormat) -> Self {
        Self {
            steps: steps.into(),
            block_align: format.bytes_per_frame(),
            tracker: StreamTracker::default(),
        }
    }

    pub fn tracker(&self) -> StreamTracker {
        self.tracker.clone()
    }
}

impl CaptureStream for ScriptedStream {
    fn start(&mut self) -> Result<(), CaptureError> {
        self.tracker.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, CaptureError> {
        match self.steps.front() {
            Some(ScriptStep::Packet { .. }) => Ok(WaitOutcome::Ready),
            Some(ScriptStep::Fail(_)) => match self.steps.pop_front() {
                Some(ScriptStep::Fail(e)) => Err(e),
                _ => Ok(WaitOutcome::TimedOut),
            },
            Some(ScriptStep::Idle) => {
                self.steps.pop_front();
                thread::sleep(timeout);
                Ok(WaitOutcome::TimedOut)
            }
            None => {
                thread::sleep(timeout);
                Ok(WaitOutcome::TimedOut)
            }
        }
    }

    fn next_packet(&mut self, visit: &mut dyn FnMut(PacketView<'_>)) -> Result<bool, CaptureError> {
        if !matches!(self.steps.front(), Some(ScriptStep::Packet { .. })) {
            return Ok(false);
        }
        let Some(ScriptStep::Packet {
            frames,
            fill,
            silent,
            discontinuity,
        }) = self.steps.pop_front()
        else {
            return Ok(false);
        };

        let data = vec![fill; frames as usize * self.block_align];
        self.tracker.outstanding_views.fetch_add(1, Ordering::SeqCst);
        visit(PacketView {
            data: &data,
            frames,
            silent,
            discontinuity,
        });
        self.tracker.outstanding_views.fetch_sub(1, Ordering::SeqCst);
        Ok(true)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.tracker.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.tracker.released.store(true, Ordering::SeqCst);
    }
}

/// Negotiator that hands out one scripted stream.
pub struct ScriptedNegotiator {
    steps: Mutex<Option<Vec<ScriptStep>>>,
    error: Option<CaptureError>,
    periodicity: Duration,
    opened: Mutex<Vec<(String, bool)>>,
    tracker: Mutex<Option<StreamTracker>>,
}

impl ScriptedNegotiator {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(Some(steps)),
            error: None,
            periodicity: Duration::from_millis(10),
            opened: Mutex::new(Vec::new()),
            tracker: Mutex::new(None),
        }
    }

    /// Every `open` fails with `error`.
    pub fn failing(error: CaptureError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_periodicity(mut self, periodicity: Duration) -> Self {
        self.periodicity = periodicity;
        self
    }

    /// `(device id, as_loopback)` for every successful open.
    pub fn opened(&self) -> Vec<(String, bool)> {
        self.opened.lock().clone()
    }

    /// Tracker for the most recently opened stream.
    pub fn tracker(&self) -> Option<StreamTracker> {
        self.tracker.lock().clone()
    }
}

impl StreamNegotiator for ScriptedNegotiator {
    type Stream = ScriptedStream;

    fn open(
        &self,
        device: &AudioDevice,
        as_loopback: bool,
        format: &CaptureFormat,
        _buffer_duration: Duration,
    ) -> Result<NegotiatedStream<ScriptedStream>, CaptureError> {
        if let Some(ref e) = self.error {
            return Err(e.clone());
        }
        if !format.is_supported() {
            return Err(CaptureError::FormatNegotiation(format!("{} not supported", format)));
        }
        let steps = self
            .steps
            .lock()
            .take()
            .ok_or_else(|| CaptureError::DeviceInUse(device.id.clone()))?;

        let stream = ScriptedStream::new(steps, format);
        *self.tracker.lock() = Some(stream.tracker());
        self.opened.lock().push((device.id.clone(), as_loopback));

        let buffer_frames = format.sample_rate / 10;
        Ok(NegotiatedStream {
            stream,
            buffer_frames,
            periodicity: self.periodicity,
        })
    }
}

#[derive(Debug, Default)]
struct WriterState {
    data: Vec<u8>,
    would_block: usize,
    always_block: bool,
    close_after: Option<usize>,
    pause_at: Option<usize>,
    pause_for: usize,
    max_chunk: Option<usize>,
    flushes: usize,
}

/// In-memory consumer. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWriter {
    state: Arc<Mutex<WriterState>>,
}

impl ScriptedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` writes report `WouldBlock`.
    pub fn blocking(self, times: usize) -> Self {
        self.state.lock().would_block = times;
        self
    }

    /// Every write reports `WouldBlock`.
    pub fn stalled(self) -> Self {
        self.state.lock().always_block = true;
        self
    }

    /// Accept `bytes` bytes, then report a broken pipe.
    pub fn closing_after(self, bytes: usize) -> Self {
        self.state.lock().close_after = Some(bytes);
        self
    }

    /// Accept `bytes` bytes, then report `WouldBlock` for the next `times` writes.
    pub fn pausing_after(self, bytes: usize, times: usize) -> Self {
        {
            let mut state = self.state.lock();
            state.pause_at = Some(bytes);
            state.pause_for = times;
        }
        self
    }

    /// Accept at most `bytes` per write call.
    pub fn with_max_chunk(self, bytes: usize) -> Self {
        self.state.lock().max_chunk = Some(bytes);
        self
    }

    pub fn data(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }
}

impl Write for ScriptedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.always_block {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        if state.would_block > 0 {
            state.would_block -= 1;
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let mut n = buf.len();
        if let Some(at) = state.pause_at {
            if state.data.len() >= at && state.pause_for > 0 {
                state.pause_for -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            if state.data.len() < at {
                n = n.min(at - state.data.len());
            }
        }
        if let Some(max) = state.max_chunk {
            n = n.min(max);
        }
        if let Some(limit) = state.close_after {
            let room = limit.saturating_sub(state.data.len());
            if room == 0 {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            n = n.min(room);
        }
        state.data.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.lock().flushes += 1;
        Ok(())
    }
}
