//! `audio-tap`: stream live audio as raw PCM on stdout.
//!
//! ```text
//! audio-tap list [--direction capture|render|both]
//! audio-tap capture <mic|loopback> <deviceId|default> [engine options]
//! ```
//!
//! Audio bytes are the only thing written to stdout during `capture`.
//! Logs and the end-of-session summary go to stderr.

mod commands;

use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use audio_tap_core::{Direction, DirectionFilter, EngineConfiguration};

use commands::SummaryFormat;

/// Exit status of a build with no audio backend.
#[cfg(not(target_os = "windows"))]
const UNSUPPORTED_PLATFORM: u8 = 20;

#[derive(Parser)]
#[command(name = "audio-tap")]
#[command(about = "Stream raw s16le 48 kHz stereo PCM from a microphone or loopback tap to stdout")]
#[command(version)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List active audio endpoints
    List {
        /// Which endpoints to include
        #[arg(short, long, value_enum, default_value_t = ListFilter::Both)]
        direction: ListFilter,
    },

    /// Stream PCM to stdout until Ctrl+C or until the reader goes away
    Capture {
        /// `mic` records an input device, `loopback` taps what an output device plays
        #[arg(value_enum)]
        source: Source,

        /// Device id from `audio-tap list`, or `default`
        device: String,

        #[command(flatten)]
        engine: EngineArgs,

        /// End-of-session report on stderr
        #[arg(long, value_enum, default_value_t = SummaryFormat::Json)]
        summary: SummaryFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    Mic,
    Loopback,
}

impl From<Source> for Direction {
    fn from(source: Source) -> Self {
        match source {
            Source::Mic => Direction::Capture,
            Source::Loopback => Direction::Render,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ListFilter {
    Capture,
    Render,
    Both,
}

impl From<ListFilter> for DirectionFilter {
    fn from(filter: ListFilter) -> Self {
        match filter {
            ListFilter::Capture => DirectionFilter::Capture,
            ListFilter::Render => DirectionFilter::Render,
            ListFilter::Both => DirectionFilter::Both,
        }
    }
}

#[derive(Args)]
struct EngineArgs {
    /// Requested engine buffer length in milliseconds
    #[arg(long, default_value_t = 100)]
    buffer_ms: u64,

    /// Longest wait for the stream event, in device periods
    #[arg(long, default_value_t = 4)]
    wait_multiple: u32,

    /// Give up after the reader has not accepted data for this long
    #[arg(long, default_value_t = 2000)]
    stall_timeout_ms: u64,
}

impl From<&EngineArgs> for EngineConfiguration {
    fn from(args: &EngineArgs) -> Self {
        Self {
            buffer_duration: Duration::from_millis(args.buffer_ms),
            wait_period_multiple: args.wait_multiple,
            stall_timeout: Duration::from_millis(args.stall_timeout_ms),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli.command)
}

/// Logs go to stderr only; stdout carries audio.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();
}

#[cfg(target_os = "windows")]
fn run(command: Commands) -> ExitCode {
    let result = match command {
        Commands::List { direction } => platform::list(direction.into()),
        Commands::Capture {
            source,
            device,
            engine,
            summary,
        } => platform::capture(source.into(), &device, EngineConfiguration::from(&engine), summary),
    };

    if let Err(ref e) = result {
        if !e.is_clean_stop() {
            log::error!("{}", e);
        }
    }
    let code = commands::exit_code(&result);
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[cfg(not(target_os = "windows"))]
fn run(command: Commands) -> ExitCode {
    let name = match command {
        Commands::List { .. } => "list",
        Commands::Capture { .. } => "capture",
    };
    log::error!("`{}` needs WASAPI; this build has no audio backend for this platform", name);
    ExitCode::from(UNSUPPORTED_PLATFORM)
}

#[cfg(target_os = "windows")]
mod platform {
    use std::io;

    use audio_tap_core::{CaptureError, DeviceSelector, Direction, DirectionFilter, EngineConfiguration, SessionController};
    use audio_tap_windows::{StdoutPipe, WasapiDeviceCatalog, WasapiNegotiator};

    use crate::commands::{self, SummaryFormat};

    pub fn list(filter: DirectionFilter) -> Result<(), CaptureError> {
        let catalog = WasapiDeviceCatalog::new()?;
        commands::list_devices(&catalog, filter, &mut io::stdout().lock())?;
        Ok(())
    }

    pub fn capture(
        direction: Direction,
        device: &str,
        config: EngineConfiguration,
        summary: SummaryFormat,
    ) -> Result<(), CaptureError> {
        let selector: DeviceSelector = device.parse()?;

        let mut controller = SessionController::new(WasapiDeviceCatalog::new()?, WasapiNegotiator::new()?, config)?;
        let shutdown = commands::install_shutdown_handler()?;
        let output = StdoutPipe::open()?;

        commands::run_capture(
            &mut controller,
            direction,
            &selector,
            output,
            &shutdown,
            summary,
            &mut io::stderr(),
        )
    }
}
