mod signals;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use firebeat_core::{prepare_show, AppCore, Event, OutputFactory, ShowStatus};
use firebeat_domain_chart::{list_map_files_in_path, ChannelPolicy, ChartPackage};
use firebeat_infra_audio_cpal::CpalPlayback;
use firebeat_infra_plc_modbus::{ModbusOutput, PlcConfig};
use firebeat_infra_sim::{SilentPlayback, SimulatedOutput};
use firebeat_infra_storage_fs::FsStorage;
use firebeat_ports::audio::AudioPlaybackPort;
use firebeat_ports::hardware::HardwareOutputPort;
use firebeat_ports::storage::{SettingsDto, StoragePort};
use parking_lot::Mutex;
use signals::Interrupts;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const FIRE_TEST_SINGLE: Duration = Duration::from_millis(250);
const FIRE_TEST_ALL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "firebeat")]
#[command(about = "Fire propane igniters in time with a beatmap")]
struct Cli {
    /// Log filter, e.g. "debug" or "firebeat_core=trace". RUST_LOG wins when set.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Directory holding settings.json. Defaults to the user config dir.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a map and fire along with it. Ctrl-C or SIGTERM stops the show.
    Run {
        archive: PathBuf,
        #[arg(long)]
        map: String,
        /// Channel policy: modulus or position.
        #[arg(long)]
        method: Option<String>,
        /// Drive the PLC and the sound card instead of the simulator.
        #[arg(long)]
        live: bool,
    },

    /// Print the firing schedule without touching hardware.
    Schedule {
        archive: PathBuf,
        #[arg(long)]
        map: String,
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// List the difficulty files in an archive.
    Maps { archive: PathBuf },

    /// Pulse every channel in turn, then all together.
    FireTest {
        #[arg(long)]
        live: bool,
    },

    /// Switch every channel off and shut the igniters.
    Off {
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let storage = match cli.config_dir.clone() {
        Some(dir) => FsStorage::new(dir),
        None => FsStorage::default(),
    };
    let settings = storage.load_settings();
    init_tracing(cli.log_level.as_deref(), settings.as_ref().ok());
    let settings = settings.unwrap_or_else(|err| {
        warn!(error = %err, "could not read settings; using defaults");
        SettingsDto::default()
    });

    match cli.command {
        Commands::Run {
            archive,
            map,
            method,
            live,
        } => run_show(settings, archive, map, method, live).await,
        Commands::Schedule {
            archive,
            map,
            method,
            json,
        } => print_schedule(&settings, archive, &map, method.as_deref(), json),
        Commands::Maps { archive } => {
            for name in list_map_files_in_path(&archive)? {
                println!("{name}");
            }
            Ok(())
        }
        Commands::FireTest { live } => fire_test(settings, live).await,
        Commands::Off { live } => {
            let mut core = build_core(settings, live)?;
            core.all_off();
            info!(output = %core.interlock().output_description(), "all off");
            Ok(())
        }
    }
}

fn init_tracing(cli_level: Option<&str>, settings: Option<&SettingsDto>) {
    let fallback = cli_level
        .map(str::to_string)
        .or_else(|| settings.and_then(|s| s.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn output_factory(settings: &SettingsDto) -> OutputFactory {
    let plc = PlcConfig::new(settings.plc_host.clone(), settings.plc_port);
    Box::new(move |dry_run| {
        let output: Arc<dyn HardwareOutputPort> = if dry_run {
            Arc::new(SimulatedOutput::new())
        } else {
            Arc::new(ModbusOutput::connect(plc.clone())?)
        };
        Ok(output)
    })
}

/// Flags only apply to this run, so the core gets no storage to write back to.
fn build_core(mut settings: SettingsDto, live: bool) -> anyhow::Result<AppCore> {
    settings.dry_run = !live;
    let audio: Arc<dyn AudioPlaybackPort> = if live {
        Arc::new(CpalPlayback::new())
    } else {
        Arc::new(SilentPlayback::new())
    };
    let outputs = output_factory(&settings);
    AppCore::with_settings(settings, audio, outputs, None).context("starting core")
}

async fn run_show(
    settings: SettingsDto,
    archive: PathBuf,
    map: String,
    method: Option<String>,
    live: bool,
) -> anyhow::Result<()> {
    if live {
        warn!("live mode: igniters will fire");
    }
    let core = Arc::new(Mutex::new(build_core(settings, live)?));
    let show_id = core
        .lock()
        .start_show(&archive, &map, method.as_deref())
        .context("show rejected")?;

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut interrupts = Interrupts::install().context("installing signal handlers")?;
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            signal = interrupts.next() => {
                if interrupted {
                    error!(signal, "second interrupt: forcing all off");
                    core.lock().all_off();
                    bail!("interrupted by {signal} before the show stopped");
                }
                warn!(signal, "interrupt: stopping show");
                interrupted = true;
                core.lock().stop_show(&show_id)?;
            }
        }
        let mut core = core.lock();
        log_events(core.drain_events());
        if core.show_status(&show_id).is_some_and(ShowStatus::is_terminal) {
            break;
        }
    }

    let mut core = core.lock();
    let status = core.wait_show(&show_id);
    log_events(core.drain_events());
    core.all_off();
    match status {
        Some(ShowStatus::Done) | Some(ShowStatus::Stopped) => Ok(()),
        other => {
            let message = core
                .show_summaries()
                .into_iter()
                .find(|summary| summary.show_id == show_id)
                .map(|summary| summary.message)
                .unwrap_or_default();
            bail!("show ended as {other:?}: {message}")
        }
    }
}

fn log_events(events: Vec<Event>) {
    for event in events {
        match event {
            Event::ShowStatusUpdated {
                show_id,
                status,
                message,
            } => info!(%show_id, status = status.as_str(), "{message}"),
            Event::AutoReleased { channel, after_s } => {
                warn!(channel, after_s, "channel auto-released")
            }
            other => debug!(?other, "event"),
        }
    }
}

fn print_schedule(
    settings: &SettingsDto,
    archive: PathBuf,
    map: &str,
    method: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let policy: ChannelPolicy = method
        .unwrap_or(settings.channel_policy.as_str())
        .parse()?;
    let package = ChartPackage::from_zip_path(&archive, map)?;
    let bpm = package.info.bpm;
    let show = prepare_show(
        package,
        policy,
        settings.channel_map().len(),
        settings.note_duration_s,
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&show.schedule)?);
        return Ok(());
    }
    println!(
        "{} ({}, {bpm} bpm, {policy}): {} pulses, {:.2}s, {} skipped",
        show.map_file,
        show.generation,
        show.schedule.len(),
        show.schedule.duration_s(),
        show.report.skipped
    );
    for pulse in show.schedule.pulses() {
        println!(
            "{:>9.3} {:>9.3}  ch{}",
            pulse.start_s, pulse.end_s, pulse.channel
        );
    }
    Ok(())
}

async fn fire_test(settings: SettingsDto, live: bool) -> anyhow::Result<()> {
    let mut core = build_core(settings, live)?;
    let mut interrupts = Interrupts::install().context("installing signal handlers")?;
    let result = tokio::select! {
        result = fire_sequence(&mut core) => result,
        signal = interrupts.next() => {
            warn!(signal, "interrupt: aborting fire test");
            Ok(())
        }
    };
    core.all_off();
    result
}

async fn fire_sequence(core: &mut AppCore) -> anyhow::Result<()> {
    let interlock = Arc::clone(core.interlock());
    let channels: Vec<usize> = interlock.channel_map().mapped().map(|(idx, _)| idx).collect();
    if channels.is_empty() {
        bail!("no channel is mapped to a coil");
    }

    interlock.arm()?;
    for &channel in &channels {
        info!(channel, "fire");
        core.set_channel(channel, true)?;
        tokio::time::sleep(FIRE_TEST_SINGLE).await;
        core.set_channel(channel, false)?;
    }
    info!("fire all");
    for &channel in &channels {
        core.set_channel(channel, true)?;
    }
    tokio::time::sleep(FIRE_TEST_ALL).await;
    for &channel in &channels {
        core.set_channel(channel, false)?;
    }
    Ok(())
}
