use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::config::EngineConfiguration;
use crate::models::device::{AudioDevice, DeviceSelector, Direction};
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::models::state::SessionState;
use crate::models::stats::CaptureStats;
use crate::models::summary::SessionSummary;
use crate::processing::capture_loop::CaptureLoop;
use crate::processing::frame_sink::FrameSink;
use crate::traits::device_catalog::DeviceCatalog;
use crate::traits::stream_negotiator::StreamNegotiator;

/// The one live capture session. Owned by the controller.
struct CaptureSession {
    id: String,
    device: AudioDevice,
    loopback: bool,
    started_at: DateTime<Utc>,
    stop_flag: Arc<AtomicBool>,
    stats: Arc<Mutex<CaptureStats>>,
    capture_handle: Option<thread::JoinHandle<Result<(), CaptureError>>>,
}

impl CaptureSession {
    fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    fn join(&mut self) -> Result<(), CaptureError> {
        match self.capture_handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(CaptureError::Platform("capture thread panicked".into()))),
            None => Ok(()),
        }
    }

    fn is_finished(&self) -> bool {
        self.capture_handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

/// Orchestrates one capture session at a time.
///
/// Runs on the controlling thread. Negotiation happens synchronously inside
/// [`start`](Self::start); the capture loop then runs on a dedicated thread
/// that owns the stream handle. The controller only talks to that thread
/// through a stop flag and its join handle.
///
/// ```text
/// [DeviceCatalog] → [StreamNegotiator] → capture thread: [CaptureLoop] → [FrameSink] → consumer
/// ```
pub struct SessionController<C: DeviceCatalog, N: StreamNegotiator> {
    catalog: C,
    negotiator: N,
    config: EngineConfiguration,
    state: SessionState,
    session: Option<CaptureSession>,
    last_summary: Option<SessionSummary>,
}

impl<C: DeviceCatalog, N: StreamNegotiator> SessionController<C, N> {
    pub fn new(catalog: C, negotiator: N, config: EngineConfiguration) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::InvalidConfiguration)?;
        Ok(Self {
            catalog,
            negotiator,
            config,
            state: SessionState::Idle,
            session: None,
            last_summary: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.clone()
    }

    pub fn negotiator(&self) -> &N {
        &self.negotiator
    }

    /// The device of the live session, if any.
    pub fn device(&self) -> Option<&AudioDevice> {
        self.session.as_ref().map(|s| &s.device)
    }

    /// Live counters of the running session.
    pub fn stats(&self) -> Option<CaptureStats> {
        self.session.as_ref().map(|s| s.stats.lock().clone())
    }

    /// Report of the most recently finished session.
    pub fn summary(&self) -> Option<&SessionSummary> {
        self.last_summary.as_ref()
    }

    /// Negotiate a stream and start capturing into `output`.
    ///
    /// `Capture` records from an input device; `Render` taps what an output
    /// device is playing. Transitions: idle → negotiating → capturing, or
    /// negotiating → failed on any negotiation error.
    pub fn start<W>(
        &mut self,
        direction: Direction,
        selector: &DeviceSelector,
        format: CaptureFormat,
        output: W,
    ) -> Result<(), CaptureError>
    where
        W: Write + Send + 'static,
    {
        if !self.state.is_idle() {
            return Err(self.invalid("start"));
        }

        self.set_state(SessionState::Negotiating);

        match self.negotiate_and_spawn(direction, selector, format, output) {
            Ok(session) => {
                self.session = Some(session);
                self.set_state(SessionState::Capturing);
                Ok(())
            }
            Err(e) => {
                log::error!("Negotiation failed: {}", e);
                self.set_state(SessionState::Failed(e.clone()));
                Err(e)
            }
        }
    }

    /// Stop the running session and wait for the capture thread to exit.
    ///
    /// Transitions: capturing → draining → stopped, or → failed if the loop
    /// had already ended on a stream or consumer failure. On failure the
    /// error is returned and the summary is still available via
    /// [`summary`](Self::summary).
    pub fn stop(&mut self) -> Result<SessionSummary, CaptureError> {
        if !self.state.is_capturing() {
            return Err(self.invalid("stop"));
        }
        let Some(mut session) = self.session.take() else {
            return Err(self.invalid("stop"));
        };

        session.request_stop();
        self.set_state(SessionState::Draining);
        let result = session.join();
        self.finish(session, result)
    }

    /// Check whether the capture thread ended on its own.
    ///
    /// Returns `None` while capture is still running (or nothing is running).
    /// Otherwise finalizes the session like [`stop`](Self::stop) does.
    pub fn poll(&mut self) -> Option<Result<SessionSummary, CaptureError>> {
        if !self.state.is_capturing() {
            return None;
        }
        if !self.session.as_ref().is_some_and(CaptureSession::is_finished) {
            return None;
        }
        let mut session = self.session.take()?;

        self.set_state(SessionState::Draining);
        let result = session.join();
        Some(self.finish(session, result))
    }

    /// Return a terminal controller to idle so a new session may start.
    pub fn reset(&mut self) -> Result<(), CaptureError> {
        if !self.state.is_terminal() {
            return Err(self.invalid("reset"));
        }
        self.set_state(SessionState::Idle);
        Ok(())
    }

    // --- Internal helpers ---

    fn negotiate_and_spawn<W>(
        &self,
        direction: Direction,
        selector: &DeviceSelector,
        format: CaptureFormat,
        output: W,
    ) -> Result<CaptureSession, CaptureError>
    where
        W: Write + Send + 'static,
    {
        if !format.is_supported() {
            return Err(CaptureError::FormatNegotiation(format!(
                "unsupported output format {}",
                format
            )));
        }

        let device = self.catalog.resolve(direction, selector)?;
        if device.direction != direction {
            return Err(CaptureError::DeviceNotFound(format!(
                "{} is a {} device, not {}",
                device.id, device.direction, direction
            )));
        }

        let loopback = direction == Direction::Render;
        let negotiated = self
            .negotiator
            .open(&device, loopback, &format, self.config.buffer_duration)?;

        let wait_timeout = self.config.wait_timeout(negotiated.periodicity);
        log::info!(
            "Negotiated {} on \"{}\" ({}): buffer {} frames, period {} us, wait {} ms{}",
            format,
            device.name,
            device.id,
            negotiated.buffer_frames,
            negotiated.periodicity.as_micros(),
            wait_timeout.as_millis(),
            if loopback { ", loopback" } else { "" }
        );

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(CaptureStats::default()));
        let sink = FrameSink::new(output, format.bytes_per_frame(), self.config.stall_timeout);
        let capture_loop = CaptureLoop::new(
            negotiated.stream,
            sink,
            format,
            wait_timeout,
            Arc::clone(&stop_flag),
            Arc::clone(&stats),
        )
        .filling_gaps(loopback);

        let handle = thread::Builder::new()
            .name("audio-tap-capture".into())
            .spawn(move || capture_loop.run())
            .map_err(|e| CaptureError::Platform(format!("failed to spawn capture thread: {}", e)))?;

        Ok(CaptureSession {
            id: uuid::Uuid::new_v4().to_string(),
            device,
            loopback,
            started_at: Utc::now(),
            stop_flag,
            stats,
            capture_handle: Some(handle),
        })
    }

    /// Release the session and record how it ended.
    fn finish(
        &mut self,
        session: CaptureSession,
        result: Result<(), CaptureError>,
    ) -> Result<SessionSummary, CaptureError> {
        let stats = session.stats.lock().clone();
        let summary = SessionSummary::new(
            &session.id,
            &session.device,
            session.loopback,
            &session.started_at.to_rfc3339(),
            &stats,
            result.as_ref().map(|_| ()),
        );
        self.last_summary = Some(summary.clone());
        drop(session);

        match result {
            Ok(()) => {
                log::info!("Capture stopped after {} frames", stats.frames_forwarded);
                self.set_state(SessionState::Stopped);
                Ok(summary)
            }
            Err(e) if e.is_clean_stop() => {
                log::info!("Consumer closed the stream after {} frames", stats.frames_forwarded);
                self.set_state(SessionState::Stopped);
                Ok(summary)
            }
            Err(e) => {
                log::error!("Capture failed: {}", e);
                self.set_state(SessionState::Failed(e.clone()));
                Err(e)
            }
        }
    }

    fn set_state(&mut self, new_state: SessionState) {
        log::debug!("Session state: {} -> {}", self.state, new_state);
        self.state = new_state;
    }

    fn invalid(&self, operation: &'static str) -> CaptureError {
        CaptureError::InvalidStateTransition {
            operation,
            state: self.state.to_string(),
        }
    }
}

impl<C: DeviceCatalog, N: StreamNegotiator> Drop for SessionController<C, N> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.request_stop();
            let _ = session.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format::CAPTURE_FORMAT;
    use crate::models::summary::SessionOutcome;
    use crate::testing::{ScriptStep, ScriptedCatalog, ScriptedNegotiator, ScriptedWriter};
    use std::time::{Duration, Instant};

    type Controller = SessionController<ScriptedCatalog, ScriptedNegotiator>;

    fn controller(steps: Vec<ScriptStep>) -> Controller {
        controller_with(steps, EngineConfiguration::default())
    }

    fn controller_with(steps: Vec<ScriptStep>, config: EngineConfiguration) -> Controller {
        SessionController::new(ScriptedCatalog::mic_and_speaker(), ScriptedNegotiator::new(steps), config).unwrap()
    }

    fn wait_for_packets(controller: &Controller, packets: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.stats().map_or(0, |s| s.packets) < packets && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn wait_for_exit(controller: &mut Controller) -> Result<SessionSummary, CaptureError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = controller.poll() {
                return result;
            }
            assert!(Instant::now() < deadline, "capture thread did not exit");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn start_then_stop_reaches_stopped() {
        let mut controller = controller(vec![ScriptStep::packet(480, 1)]);
        let writer = ScriptedWriter::new();

        controller
            .start(Direction::Capture, &DeviceSelector::Default, CAPTURE_FORMAT, writer.clone())
            .unwrap();
        assert_eq!(controller.state(), SessionState::Capturing);
        assert_eq!(controller.device().unwrap().direction, Direction::Capture);

        wait_for_packets(&controller, 1);
        let summary = controller.stop().unwrap();

        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(summary.outcome, SessionOutcome::Stopped);
        assert_eq!(summary.bytes_written, 1920);
        assert_eq!(writer.len(), 1920);
        assert!(!summary.loopback);

        let tracker = controller.negotiator().tracker().unwrap();
        assert!(tracker.stopped());
        assert!(tracker.released());
    }

    #[test]
    fn render_direction_opens_loopback() {
        let mut controller = controller(Vec::new());

        controller
            .start(Direction::Render, &DeviceSelector::Default, CAPTURE_FORMAT, ScriptedWriter::new())
            .unwrap();
        let summary = controller.stop().unwrap();

        assert_eq!(
            controller.negotiator().opened(),
            vec![("{0.0.0.00000000}.{spk}".to_string(), true)]
        );
        assert!(summary.loopback);
        assert_eq!(summary.direction, Direction::Render);
    }

    #[test]
    fn idle_loopback_keeps_real_time_byte_count() {
        let mut controller = controller(Vec::new());
        let writer = ScriptedWriter::new();

        let launched = Instant::now();
        controller
            .start(Direction::Render, &DeviceSelector::Default, CAPTURE_FORMAT, writer.clone())
            .unwrap();
        thread::sleep(Duration::from_millis(500));
        let summary = controller.stop().unwrap();
        let elapsed_ms = launched.elapsed().as_millis() as u64 + 1;

        // 192 bytes per millisecond, within one 40 ms wait of the session length.
        let bytes = writer.len() as u64;
        assert_eq!(bytes % 4, 0);
        assert!(bytes >= (500 - 100) * 192, "only {} bytes", bytes);
        assert!(bytes <= elapsed_ms * 192);
        assert!(writer.data().iter().all(|&b| b == 0));
        assert_eq!(summary.gap_frames, summary.frames_forwarded);
        assert_eq!(summary.bytes_written, bytes);
    }

    #[test]
    fn idle_microphone_writes_nothing() {
        let mut controller = controller(Vec::new());
        let writer = ScriptedWriter::new();

        controller
            .start(Direction::Capture, &DeviceSelector::Default, CAPTURE_FORMAT, writer.clone())
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        let summary = controller.stop().unwrap();

        assert!(writer.is_empty());
        assert_eq!(summary.gap_frames, 0);
    }

    #[test]
    fn second_start_is_rejected_without_disturbing_first() {
        let mut controller = controller(vec![ScriptStep::packet(480, 1)]);

        controller
            .start(Direction::Capture, &DeviceSelector::Default, CAPTURE_FORMAT, ScriptedWriter::new())
            .unwrap();
        let err = controller
            .start(Direction::Render, &DeviceSelector::Default, CAPTURE_FORMAT, ScriptedWriter::new())
            .unwrap_err();

        assert!(matches!(err, CaptureError::InvalidStateTransition { operation: "start", .. }));
        assert_eq!(controller.state(), SessionState::Capturing);
        assert_eq!(controller.negotiator().opened().len(), 1);

        controller.stop().unwrap();
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    #[test]
    fn stop_outside_capturing_is_rejected() {
        let mut controller = controller(Vec::new());

        let err = controller.stop().unwrap_err();
        assert_eq!(
            err,
            CaptureError::InvalidStateTransition {
                operation: "stop",
                state: "idle".into()
            }
        );

        controller
            .start(Direction::Capture, &DeviceSelector::Default, CAPTURE_FORMAT, ScriptedWriter::new())
            .unwrap();
        controller.stop().unwrap();

        assert!(matches!(
            controller.stop(),
            Err(CaptureError::InvalidStateTransition { operation: "stop", .. })
        ));
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    #[test]
    fn unknown_device_fails_negotiation_without_audio() {
        let mut controller = controller(vec![ScriptStep::packet(480, 1)]);
        let writer = ScriptedWriter::new();

        let err = controller
            .start(
                Direction::Capture,
                &DeviceSelector::Id("{gone}".into()),
                CAPTURE_FORMAT,
                writer.clone(),
            )
            .unwrap_err();

        assert!(matches!(err, CaptureError::DeviceNotFound(_)));
        assert!(matches!(controller.state(), SessionState::Failed(CaptureError::DeviceNotFound(_))));
        assert!(controller.negotiator().opened().is_empty());
        assert!(writer.is_empty());
    }

    #[test]
    fn device_of_wrong_direction_is_not_found() {
        let mut controller = controller(Vec::new());

        let err = controller
            .start(
                Direction::Capture,
                &DeviceSelector::Id("{0.0.0.00000000}.{spk}".into()),
                CAPTURE_FORMAT,
                ScriptedWriter::new(),
            )
            .unwrap_err();

        assert!(matches!(err, CaptureError::DeviceNotFound(_)));
    }

    #[test]
    fn negotiation_errors_are_surfaced() {
        let mut controller = SessionController::new(
            ScriptedCatalog::mic_and_speaker(),
            ScriptedNegotiator::failing(CaptureError::AccessDenied("microphone privacy".into())),
            EngineConfiguration::default(),
        )
        .unwrap();

        let err = controller
            .start(Direction::Capture, &DeviceSelector::Default, CAPTURE_FORMAT, ScriptedWriter::new())
            .unwrap_err();

        assert_eq!(err, CaptureError::AccessDenied("microphone privacy".into()));
        assert_eq!(controller.state(), SessionState::Failed(err));
        assert!(controller.summary().is_none());
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let mut controller = controller(Vec::new());
        let mono = CaptureFormat {
            channels: 1,
            ..CAPTURE_FORMAT
        };

        let err = controller
            .start(Direction::Capture, &DeviceSelector::Default, mono, ScriptedWriter::new())
            .unwrap_err();

        assert!(matches!(err, CaptureError::FormatNegotiation(_)));
    }

    #[test]
    fn silence_for_two_seconds_is_exact_length_of_zeros() {
        // 200 packets of 10 ms = 2 s at 48 kHz.
        let steps = (0..200).map(|_| ScriptStep::silent(480, 0x5A)).collect();
        let mut controller = controller(steps);
        let writer = ScriptedWriter::new();

        controller
            .start(Direction::Capture, &DeviceSelector::Default, CAPTURE_FORMAT, writer.clone())
            .unwrap();
        wait_for_packets(&controller, 200);
        let summary = controller.stop().unwrap();

        let data = writer.data();
        assert_eq!(data.len(), 2 * 48_000 * 2 * 2);
        assert!(data.iter().all(|&b| b == 0));
        assert_eq!(summary.silent_packets, 200);
        assert_eq!(summary.discontinuities, 0);
        approx::assert_relative_eq!(summary.duration_secs, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn consumer_closing_is_a_clean_stop() {
        let steps = (0..10).map(|i| ScriptStep::packet(480, i)).collect();
        let mut controller = controller(steps);

        controller
            .start(
                Direction::Capture,
                &DeviceSelector::Default,
                CAPTURE_FORMAT,
                ScriptedWriter::new().closing_after(1920 * 3),
            )
            .unwrap();
        let summary = wait_for_exit(&mut controller).unwrap();

        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(summary.outcome, SessionOutcome::ConsumerClosed);
        assert_eq!(summary.frames_forwarded, 480 * 3);
    }

    #[test]
    fn stalled_consumer_fails_session() {
        let config = EngineConfiguration {
            stall_timeout: Duration::from_millis(30),
            ..Default::default()
        };
        let mut controller = controller_with(vec![ScriptStep::packet(480, 1)], config);

        controller
            .start(
                Direction::Capture,
                &DeviceSelector::Default,
                CAPTURE_FORMAT,
                ScriptedWriter::new().stalled(),
            )
            .unwrap();
        let err = wait_for_exit(&mut controller).unwrap_err();

        assert!(matches!(err, CaptureError::ConsumerStalled { .. }));
        assert!(matches!(controller.state(), SessionState::Failed(CaptureError::ConsumerStalled { .. })));
        assert!(controller.summary().unwrap().is_failure());
    }

    #[test]
    fn device_loss_fails_session_with_summary() {
        let steps = vec![
            ScriptStep::packet(480, 1),
            ScriptStep::after_gap(480, 2),
            ScriptStep::Fail(CaptureError::StreamInterrupted("device invalidated".into())),
        ];
        let mut controller = controller(steps);

        controller
            .start(Direction::Capture, &DeviceSelector::Default, CAPTURE_FORMAT, ScriptedWriter::new())
            .unwrap();
        let err = wait_for_exit(&mut controller).unwrap_err();

        assert!(matches!(err, CaptureError::StreamInterrupted(_)));
        let summary = controller.summary().unwrap();
        assert_eq!(summary.discontinuities, 1);
        assert_eq!(summary.frames_forwarded, 960);
        assert_eq!(summary.outcome, SessionOutcome::Failed);
    }

    #[test]
    fn stop_latency_is_bounded_by_wait() {
        let negotiator = ScriptedNegotiator::new(Vec::new()).with_periodicity(Duration::from_millis(10));
        let mut controller = SessionController::new(
            ScriptedCatalog::mic_and_speaker(),
            negotiator,
            EngineConfiguration::default(),
        )
        .unwrap();

        controller
            .start(Direction::Capture, &DeviceSelector::Default, CAPTURE_FORMAT, ScriptedWriter::new())
            .unwrap();
        thread::sleep(Duration::from_millis(25));

        let requested = Instant::now();
        controller.stop().unwrap();

        // One wait of 4 periods, with generous slack for scheduling.
        assert!(requested.elapsed() < Duration::from_millis(400));
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    #[test]
    fn reset_allows_a_new_session() {
        let mut controller = controller(Vec::new());

        assert!(controller.reset().is_err());
        controller
            .start(Direction::Capture, &DeviceSelector::Default, CAPTURE_FORMAT, ScriptedWriter::new())
            .unwrap();
        assert!(controller.reset().is_err());
        controller.stop().unwrap();

        assert!(controller
            .start(Direction::Capture, &DeviceSelector::Default, CAPTURE_FORMAT, ScriptedWriter::new())
            .is_err());
        controller.reset().unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = EngineConfiguration {
            wait_period_multiple: 0,
            ..Default::default()
        };
        let result = SessionController::new(
            ScriptedCatalog::mic_and_speaker(),
            ScriptedNegotiator::new(Vec::new()),
            config,
        );
        assert!(matches!(result, Err(CaptureError::InvalidConfiguration(_))));
    }
}
