//! # Tuner - Headless Vocal Tuner
//!
//! Command line driver for the tuner core. It captures the microphone,
//! streams detected pitches to the note-mapping service and prints the
//! enriched readings it sends back.
//!
//! ## Architecture
//! - **Main Thread**: rendering, service events and keepalive pings
//! - **Analysis Thread**: owns the audio stream and runs the frame scheduler
//! - **WebSocket Thread**: owned by the streaming client
//! - **Communication**: Crossbeam channels between the threads

mod display;

use std::io::BufRead;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, Sender, select};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tuner_core::audio::{self, CaptureSource};
use tuner_core::config::TunerConfig;
use tuner_core::meter::SensitivityRating;
use tuner_core::scheduler::{FrameScheduler, ListenHandle, PitchSink};
use tuner_core::streaming::ws::WsConnector;
use tuner_core::streaming::{StreamingClient, ThreadTimer};
use tuner_core::tuning::{NoteCatalog, TargetNote};
use tuner_core::{FrameAnalysis, PitchEstimate, TunerError};

use display::StatusPrinter;

/// How long the calibration listens.
const CALIBRATION_WINDOW: Duration = Duration::from_secs(3);

/// Keepalive interval on the service link.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Analysis reports buffered between the analysis thread and the display.
const REPORT_QUEUE: usize = 32;

#[derive(Parser)]
#[command(name = "tuner")]
#[command(about = "real-time vocal tuner backed by a note-mapping service")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// base URL of the note-mapping service, e.g. http://localhost:8001
    #[arg(short, long)]
    server: Option<String>,

    /// target note to tune towards, e.g. A4
    #[arg(short, long)]
    target: Option<String>,

    /// list available input devices and exit
    #[arg(long)]
    list_devices: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// listen and print readings until Enter is pressed (default)
    Listen,
    /// measure the microphone level for a few seconds and rate it
    Calibrate,
    /// print the target notes offered by the service
    Notes,
}

/// Sink for runs that only watch the level.
struct DiscardSink;

impl PitchSink for DiscardSink {
    fn publish(&self, _estimate: &PitchEstimate) {}
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.list_devices {
        for (index, name) in audio::list_input_devices()?.iter().enumerate() {
            println!("{index}: {name}");
        }
        return Ok(());
    }

    match cli.command.unwrap_or(Command::Listen) {
        Command::Listen => listen(&config),
        Command::Calibrate => calibrate(&config),
        Command::Notes => {
            let catalog = fetch_catalog(&config.notes_url())?;
            for note in &catalog.notes {
                println!("{:<5} {:>9.2} Hz", note.display, note.frequency);
            }
            Ok(())
        }
    }
}

/// Reads the configuration file, if any, then applies command line overrides.
fn load_config(cli: &Cli) -> Result<TunerConfig> {
    let mut config = match &cli.config {
        Some(path) => TunerConfig::load(path)?,
        None => TunerConfig::default(),
    };
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }
    if let Some(target) = &cli.target {
        config.target_note = Some(target.clone());
    }
    Ok(config)
}

fn fetch_catalog(url: &str) -> Result<NoteCatalog> {
    let body = reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .with_context(|| format!("fetching note catalog from {url}"))?;
    Ok(NoteCatalog::from_json(&body)?)
}

/// Resolves the configured target note against the service catalog.
fn resolve_target(config: &TunerConfig) -> Option<TargetNote> {
    let label = config.target_note.as_deref()?;
    match fetch_catalog(&config.notes_url()) {
        Ok(catalog) => {
            let target = catalog.find(label).cloned();
            if target.is_none() {
                warn!(target = label, "target note not offered by the service");
            }
            target
        }
        Err(e) => {
            warn!(error = %e, "note catalog unavailable, tuning without a target");
            None
        }
    }
}

/// Starts the scheduler on its own thread.
///
/// The capture stream is opened on that thread because it cannot move
/// between threads. Returns once the microphone is open.
fn spawn_analysis<K>(
    config: &TunerConfig,
    sink: K,
    observer: Sender<FrameAnalysis>,
) -> Result<(ListenHandle, JoinHandle<Result<(), TunerError>>)>
where
    K: PitchSink + Send + 'static,
{
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
    let sample_rate = config.sample_rate;
    let interval = config.tick_interval();

    let join = thread::Builder::new()
        .name("tuner-analysis".to_string())
        .spawn(move || {
            let source = match CaptureSource::open(sample_rate) {
                Ok(source) => source,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return Ok(());
                }
            };
            info!(sample_rate = source.sample_rate(), "microphone open");

            let mut scheduler = FrameScheduler::new(sink);
            scheduler.attach_source(Box::new(source));
            scheduler.set_observer(observer);
            scheduler.start();
            let _ = ready_tx.send(Ok(scheduler.handle()));

            scheduler.run(&crossbeam_channel::tick(interval))
        })?;

    let handle = ready_rx
        .recv()
        .context("analysis thread exited during startup")?
        .context("could not start audio capture")?;
    Ok((handle, join))
}

fn join_analysis(join: JoinHandle<Result<(), TunerError>>) -> Result<()> {
    match join.join() {
        Ok(result) => Ok(result?),
        Err(_) => bail!("analysis thread panicked"),
    }
}

/// Stops `handle` when the user presses Enter. End of input is ignored so
/// that a closed stdin does not end the session.
fn stop_on_enter(handle: ListenHandle) {
    thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = std::io::stdin().lock().read_line(&mut line) {
            if n > 0 {
                handle.stop();
            }
        }
    });
}

fn listen(config: &TunerConfig) -> Result<()> {
    let target = resolve_target(config);
    if let Some(target) = &target {
        info!(target = %target.display, frequency = target.frequency, "tuning towards target");
    }

    let client = StreamingClient::new(config.websocket_url(), WsConnector, ThreadTimer);
    let events = client.events();
    client.connect();

    let (report_tx, report_rx) = crossbeam_channel::bounded(REPORT_QUEUE);
    let (handle, join) = match spawn_analysis(config, client.clone(), report_tx) {
        Ok(started) => started,
        Err(e) => {
            client.close();
            return Err(e);
        }
    };
    stop_on_enter(handle);
    println!("listening, press Enter to stop");

    let mut printer = StatusPrinter::new(target, config.in_tune_cents);
    let ping = crossbeam_channel::tick(PING_INTERVAL);
    loop {
        select! {
            recv(report_rx) -> report => match report {
                Ok(report) => printer.analysis(report),
                // The scheduler dropped its observer: listening is over
                Err(_) => break,
            },
            recv(events) -> event => {
                if let Ok(event) = event {
                    printer.event(event);
                }
            },
            recv(ping) -> _ => {
                client.ping();
            },
        }
        printer.draw(client.is_connected())?;
    }
    printer.finish()?;

    client.close();
    let snapshot = client.snapshot();
    info!(sent = snapshot.sent, dropped = snapshot.dropped, "session finished");
    join_analysis(join)
}

fn calibrate(config: &TunerConfig) -> Result<()> {
    let (report_tx, report_rx) = crossbeam_channel::bounded(REPORT_QUEUE);
    let (handle, join) = spawn_analysis(config, DiscardSink, report_tx)?;
    println!("speak normally for {} seconds...", CALIBRATION_WINDOW.as_secs());

    let peak = peak_level(&report_rx, Instant::now() + CALIBRATION_WINDOW);
    handle.stop();
    join_analysis(join)?;

    let peak = peak.ok_or_else(|| anyhow!("no audio frames were analysed"))?;
    let rating = SensitivityRating::from_level(peak);
    println!("peak level {peak:.0}%: {}", rating.advice());
    Ok(())
}

/// Highest level reported before `deadline`, or `None` if nothing arrived.
fn peak_level(reports: &Receiver<FrameAnalysis>, deadline: Instant) -> Option<f32> {
    let mut peak: Option<f32> = None;
    while let Ok(report) = reports.recv_deadline(deadline) {
        let level = report.loudness.level_percent;
        peak = Some(peak.map_or(level, |p| p.max(level)));
    }
    peak
}
