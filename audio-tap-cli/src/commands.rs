//! Command implementations, generic over the platform backend.

#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use audio_tap_core::{
    AudioDevice, CaptureError, DeviceCatalog, DeviceSelector, Direction, DirectionFilter, SessionController,
    SessionSummary, StreamNegotiator, CAPTURE_FORMAT,
};
use clap::ValueEnum;

/// How often the controlling thread checks for Ctrl+C and a finished capture thread.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Prefix of the summary line on stderr.
pub const SUMMARY_PREFIX: &str = "SUMMARY:";

/// How the end-of-session report is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SummaryFormat {
    /// One `SUMMARY:` JSON line on stderr
    Json,
    None,
}

/// Write one `ID:` / `Name:` / `Type:` record per device, in enumeration order.
pub fn list_devices<C, W>(catalog: &C, filter: DirectionFilter, out: &mut W) -> Result<usize, CaptureError>
where
    C: DeviceCatalog,
    W: Write,
{
    let devices = catalog.enumerate(filter)?;
    log::debug!("Found {} device(s)", devices.len());

    for device in &devices {
        write_record(out, device).map_err(output_failed)?;
    }
    out.flush().map_err(output_failed)?;
    Ok(devices.len())
}

fn write_record<W: Write>(out: &mut W, device: &AudioDevice) -> io::Result<()> {
    writeln!(out, "ID:{}", device.id)?;
    writeln!(out, "Name:{}", device.name)?;
    writeln!(out, "Type:{}", device.direction.label())
}

fn output_failed(e: io::Error) -> CaptureError {
    CaptureError::OutputFailed(e.to_string())
}

/// Flag raised by Ctrl+C (and console close) for the capture loop below.
pub fn install_shutdown_handler() -> Result<Arc<AtomicBool>, CaptureError> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CaptureError::Platform(format!("failed to install Ctrl+C handler: {}", e)))?;
    Ok(shutdown)
}

/// Run one capture session into `output` until `shutdown` is raised or the
/// capture thread ends on its own.
///
/// The session summary goes to `diagnostics` whenever a session was started,
/// including failed ones.
pub fn run_capture<C, N, W>(
    controller: &mut SessionController<C, N>,
    direction: Direction,
    selector: &DeviceSelector,
    output: W,
    shutdown: &AtomicBool,
    summary: SummaryFormat,
    diagnostics: &mut dyn Write,
) -> Result<(), CaptureError>
where
    C: DeviceCatalog,
    N: StreamNegotiator,
    W: Write + Send + 'static,
{
    controller.start(direction, selector, CAPTURE_FORMAT, output)?;

    let result = loop {
        if let Some(result) = controller.poll() {
            break result;
        }
        if shutdown.load(Ordering::SeqCst) {
            log::info!("Shutdown requested, draining");
            break controller.stop();
        }
        thread::sleep(POLL_INTERVAL);
    };

    if summary == SummaryFormat::Json {
        if let Some(report) = controller.summary() {
            if let Err(e) = write_summary(diagnostics, report) {
                log::warn!("Could not write session summary: {}", e);
            }
        }
    }

    result.map(|_| ())
}

fn write_summary(diagnostics: &mut dyn Write, summary: &SessionSummary) -> Result<(), CaptureError> {
    let json = summary.to_json()?;
    writeln!(diagnostics, "{}{}", SUMMARY_PREFIX, json).map_err(output_failed)?;
    diagnostics.flush().map_err(output_failed)
}

/// Process exit status for a command result.
pub fn exit_code(result: &Result<(), CaptureError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.exit_code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_tap_core::testing::{ScriptStep, ScriptedCatalog, ScriptedNegotiator, ScriptedWriter};
    use audio_tap_core::{EngineConfiguration, SessionState};

    fn controller(
        negotiator: ScriptedNegotiator,
        config: EngineConfiguration,
    ) -> SessionController<ScriptedCatalog, ScriptedNegotiator> {
        SessionController::new(ScriptedCatalog::mic_and_speaker(), negotiator, config).unwrap()
    }

    fn summary_line(diagnostics: &[u8]) -> String {
        let text = String::from_utf8(diagnostics.to_vec()).unwrap();
        let line = text
            .lines()
            .find(|l| l.starts_with(SUMMARY_PREFIX))
            .expect("summary line");
        line.to_string()
    }

    #[test]
    fn list_renders_one_record_per_device() {
        let catalog = ScriptedCatalog::mic_and_speaker();
        let mut out = Vec::new();

        let count = list_devices(&catalog, DirectionFilter::Both, &mut out).unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "ID:{0.0.1.00000000}.{mic}\nName:Microphone Array\nType:Capture\n\
             ID:{0.0.0.00000000}.{spk}\nName:Speakers\nType:Render\n"
        );
    }

    #[test]
    fn list_honors_direction_filter() {
        let catalog = ScriptedCatalog::mic_and_speaker();
        let mut out = Vec::new();

        list_devices(&catalog, DirectionFilter::Render, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("Type:Render"));
        assert!(!text.contains("Type:Capture"));
    }

    #[test]
    fn list_with_no_devices_writes_nothing() {
        let catalog = ScriptedCatalog::new(Vec::new());
        let mut out = Vec::new();

        assert_eq!(list_devices(&catalog, DirectionFilter::Both, &mut out).unwrap(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn list_enumeration_failure_exits_non_zero() {
        let catalog = ScriptedCatalog::mic_and_speaker()
            .failing(CaptureError::Enumeration("audio service unavailable".into()));
        let mut out = Vec::new();

        let result = list_devices(&catalog, DirectionFilter::Both, &mut out).map(|_| ());

        assert!(matches!(result, Err(CaptureError::Enumeration(_))));
        assert_eq!(exit_code(&result), 10);
        assert!(out.is_empty());
    }

    #[test]
    fn capture_stops_cleanly_on_shutdown() {
        let steps = (0..3).map(|i| ScriptStep::packet(480, i + 1)).collect();
        let mut controller = controller(ScriptedNegotiator::new(steps), EngineConfiguration::default());
        let writer = ScriptedWriter::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut diagnostics = Vec::new();

        // Ctrl+C arrives once audio is flowing.
        let trigger = {
            let writer = writer.clone();
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                let deadline = std::time::Instant::now() + Duration::from_secs(5);
                while writer.len() < 1920 && std::time::Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(2));
                }
                shutdown.store(true, Ordering::SeqCst);
            })
        };

        let result = run_capture(
            &mut controller,
            Direction::Capture,
            &DeviceSelector::Default,
            writer.clone(),
            &shutdown,
            SummaryFormat::Json,
            &mut diagnostics,
        );
        trigger.join().unwrap();

        assert_eq!(exit_code(&result), 0);
        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(writer.len() >= 1920);
        assert_eq!(writer.len() % CAPTURE_FORMAT.bytes_per_frame(), 0);
        assert!(writer.data()[..1920].iter().all(|&b| b == 1));

        let line = summary_line(&diagnostics);
        assert!(line.contains("\"outcome\":\"stopped\""));
        assert!(line.contains("\"device_name\":\"Microphone Array\""));
        assert!(line.contains("\"loopback\":false"));
    }

    #[test]
    fn loopback_opens_the_render_endpoint() {
        let mut controller = controller(ScriptedNegotiator::new(Vec::new()), EngineConfiguration::default());
        let shutdown = AtomicBool::new(true);

        let result = run_capture(
            &mut controller,
            Direction::Render,
            &DeviceSelector::Default,
            ScriptedWriter::new(),
            &shutdown,
            SummaryFormat::None,
            &mut io::sink(),
        );

        assert!(result.is_ok());
        assert_eq!(
            controller.negotiator().opened(),
            vec![("{0.0.0.00000000}.{spk}".to_string(), true)]
        );
    }

    #[test]
    fn consumer_closing_is_a_clean_exit() {
        let mut controller = controller(
            ScriptedNegotiator::new(vec![ScriptStep::packet(480, 1), ScriptStep::packet(480, 2)]),
            EngineConfiguration::default(),
        );
        let writer = ScriptedWriter::new().closing_after(480 * 4);
        let shutdown = AtomicBool::new(false);
        let mut diagnostics = Vec::new();

        let result = run_capture(
            &mut controller,
            Direction::Capture,
            &DeviceSelector::Default,
            writer.clone(),
            &shutdown,
            SummaryFormat::Json,
            &mut diagnostics,
        );

        assert_eq!(exit_code(&result), 0);
        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(writer.len(), 480 * 4);
        assert!(summary_line(&diagnostics).contains("\"outcome\":\"consumer_closed\""));
    }

    #[test]
    fn stalled_consumer_fails_with_its_own_exit_code() {
        let config = EngineConfiguration {
            stall_timeout: Duration::from_millis(50),
            ..EngineConfiguration::default()
        };
        let mut controller = controller(ScriptedNegotiator::new(vec![ScriptStep::packet(480, 7)]), config);
        let shutdown = AtomicBool::new(false);
        let mut diagnostics = Vec::new();

        let result = run_capture(
            &mut controller,
            Direction::Capture,
            &DeviceSelector::Default,
            ScriptedWriter::new().stalled(),
            &shutdown,
            SummaryFormat::Json,
            &mut diagnostics,
        );

        assert!(matches!(result, Err(CaptureError::ConsumerStalled { .. })));
        assert_eq!(exit_code(&result), 16);
        assert!(controller.state().is_terminal());

        let line = summary_line(&diagnostics);
        assert!(line.contains("\"outcome\":\"failed\""));
        assert!(line.contains("\"error\":"));
    }

    #[test]
    fn unknown_device_fails_before_any_output() {
        let mut controller = controller(
            ScriptedNegotiator::new(vec![ScriptStep::packet(480, 1)]),
            EngineConfiguration::default(),
        );
        let writer = ScriptedWriter::new();
        let mut diagnostics = Vec::new();

        let result = run_capture(
            &mut controller,
            Direction::Capture,
            &DeviceSelector::Id("{0.0.1.00000000}.{gone}".into()),
            writer.clone(),
            &AtomicBool::new(false),
            SummaryFormat::Json,
            &mut diagnostics,
        );

        assert!(matches!(result, Err(CaptureError::DeviceNotFound(_))));
        assert_eq!(exit_code(&result), 11);
        assert!(writer.is_empty());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn negotiation_errors_keep_their_exit_codes() {
        let cases = [
            (CaptureError::DeviceInUse("exclusive".into()), 12),
            (CaptureError::AccessDenied("privacy settings".into()), 13),
            (CaptureError::FormatNegotiation("mix is 44100 Hz".into()), 14),
        ];

        for (error, code) in cases {
            let mut controller = controller(ScriptedNegotiator::failing(error.clone()), EngineConfiguration::default());

            let result = run_capture(
                &mut controller,
                Direction::Capture,
                &DeviceSelector::Default,
                ScriptedWriter::new(),
                &AtomicBool::new(false),
                SummaryFormat::Json,
                &mut io::sink(),
            );

            assert_eq!(result, Err(error.clone()));
            assert_eq!(exit_code(&result), code);
            assert_eq!(controller.state(), SessionState::Failed(error));
        }
    }

    #[test]
    fn summary_can_be_disabled() {
        let mut controller = controller(ScriptedNegotiator::new(Vec::new()), EngineConfiguration::default());
        let mut diagnostics = Vec::new();

        run_capture(
            &mut controller,
            Direction::Capture,
            &DeviceSelector::Default,
            ScriptedWriter::new(),
            &AtomicBool::new(true),
            SummaryFormat::None,
            &mut diagnostics,
        )
        .unwrap();

        assert!(diagnostics.is_empty());
        assert!(controller.summary().is_some());
    }
}
