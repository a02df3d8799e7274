use crate::interlock::{
    ChannelState, InterlockConfig, InterlockError, InterlockNotice, SafetyInterlock,
};
use crate::ipc::{Command, Event, ShowStatus, ShowSummary};
use crate::show::{prepare_show, ShowError, ShowRunner, ShowSettings};
use crate::stop::StopToken;
use firebeat_domain_chart::{ChannelPolicy, ChannelPolicyError, ChartPackage};
use firebeat_ports::audio::AudioPlaybackPort;
use firebeat_ports::hardware::{HardwareError, HardwareOutputPort};
use firebeat_ports::storage::{SettingsDto, StorageError, StoragePort};
use firebeat_ports::types::ChannelIndex;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("interlock error: {0}")]
    Interlock(#[from] InterlockError),
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Policy(#[from] ChannelPolicyError),
    #[error("show rejected: {0}")]
    Show(#[from] ShowError),
    #[error("show {0} is still running")]
    ShowRunning(String),
    #[error("unknown show {0}")]
    UnknownShow(String),
    #[error("could not start show worker: {0}")]
    Spawn(String),
}

/// Builds the hardware output for a mode: `true` is dry-run, `false` is live.
pub type OutputFactory =
    Box<dyn Fn(bool) -> Result<Arc<dyn HardwareOutputPort>, HardwareError> + Send + Sync>;

type EventQueue = Arc<Mutex<VecDeque<Event>>>;

struct ShowEntry {
    map_file: String,
    status: ShowStatus,
    message: String,
    stop: StopToken,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

impl ShowEntry {
    fn summary(&self, show_id: &str) -> ShowSummary {
        let elapsed_s = self.started_at.map(|start| {
            self.ended_at
                .unwrap_or_else(Instant::now)
                .duration_since(start)
                .as_secs_f64()
        });
        ShowSummary {
            show_id: show_id.to_string(),
            map_file: self.map_file.clone(),
            status: self.status,
            message: self.message.clone(),
            elapsed_s,
        }
    }
}

#[derive(Default)]
struct ShowRegistry {
    order: Vec<String>,
    entries: HashMap<String, ShowEntry>,
}

impl ShowRegistry {
    fn running(&self) -> Option<&str> {
        self.order
            .iter()
            .find(|id| {
                self.entries
                    .get(id.as_str())
                    .is_some_and(|entry| !entry.status.is_terminal())
            })
            .map(String::as_str)
    }
}

/// Records a status change and queues the matching event.
fn publish(
    shows: &Mutex<ShowRegistry>,
    events: &Mutex<VecDeque<Event>>,
    show_id: &str,
    status: ShowStatus,
    message: String,
) {
    if let Some(entry) = shows.lock().entries.get_mut(show_id) {
        match status {
            ShowStatus::Running => entry.started_at = Some(Instant::now()),
            s if s.is_terminal() => entry.ended_at = Some(Instant::now()),
            _ => {}
        }
        entry.status = status;
        entry.message = message.clone();
    }
    info!(show_id, status = status.as_str(), %message, "show status");
    events.lock().push_back(Event::ShowStatusUpdated {
        show_id: show_id.to_string(),
        status,
        message,
    });
}

pub struct AppCore {
    storage: Option<Box<dyn StoragePort>>,
    settings: SettingsDto,
    interlock: Arc<SafetyInterlock>,
    audio: Arc<dyn AudioPlaybackPort>,
    outputs: OutputFactory,
    dry_run: bool,
    shows: Arc<Mutex<ShowRegistry>>,
    workers: HashMap<String, JoinHandle<()>>,
    events: EventQueue,
    next_show: u64,
}

impl AppCore {
    pub fn new(
        audio: Arc<dyn AudioPlaybackPort>,
        outputs: OutputFactory,
        storage: Option<Box<dyn StoragePort>>,
    ) -> Result<Self, AppError> {
        let settings = if let Some(storage) = storage.as_ref() {
            storage.load_settings().unwrap_or_else(|err| {
                warn!(error = %err, "could not load settings, using defaults");
                SettingsDto::default()
            })
        } else {
            SettingsDto::default()
        };
        Self::with_settings(settings, audio, outputs, storage)
    }

    pub fn with_settings(
        settings: SettingsDto,
        audio: Arc<dyn AudioPlaybackPort>,
        outputs: OutputFactory,
        storage: Option<Box<dyn StoragePort>>,
    ) -> Result<Self, AppError> {
        let dry_run = settings.dry_run;
        let output = outputs(dry_run)?;
        let interlock = Arc::new(SafetyInterlock::new(
            settings.channel_map(),
            InterlockConfig::from_settings(&settings),
            output,
        ));

        let events: EventQueue = Arc::new(Mutex::new(VecDeque::new()));
        let sink = Arc::clone(&events);
        interlock.set_notifier(Arc::new(move |notice| match notice {
            InterlockNotice::AutoReleased { channel, after_s } => {
                let mut queue = sink.lock();
                queue.push_back(Event::AutoReleased { channel, after_s });
                queue.push_back(Event::ChannelStateUpdated {
                    channel,
                    state: ChannelState::Off,
                });
            }
        }));

        info!(
            dry_run,
            output = %interlock.output_description(),
            channels = interlock.channel_count(),
            "core ready"
        );

        Ok(Self {
            storage,
            settings,
            interlock,
            audio,
            outputs,
            dry_run,
            shows: Arc::new(Mutex::new(ShowRegistry::default())),
            workers: HashMap::new(),
            events,
            next_show: 1,
        })
    }

    pub fn handle_command(&mut self, cmd: Command) -> Result<(), AppError> {
        match cmd {
            Command::SetArmed { armed: true } => {
                self.interlock.arm()?;
                self.emit_interlock();
            }
            Command::SetArmed { armed: false } => {
                self.all_off();
            }
            Command::SetChannel { channel, on } => {
                self.set_channel(channel, on)?;
            }
            Command::AllOff => {
                self.all_off();
            }
            Command::StartShow {
                archive,
                map_file,
                method,
            } => {
                self.start_show(Path::new(&archive), &map_file, method.as_deref())?;
            }
            Command::StopShow { show_id } => {
                self.stop_show(&show_id)?;
            }
            Command::SetDryRun { on } => {
                self.set_dry_run(on)?;
            }
            Command::QueryStatus => {
                let shows = self.show_summaries();
                self.events.lock().push_back(Event::StatusReport {
                    interlock: self.interlock.snapshot(),
                    dry_run: self.dry_run,
                    shows,
                    settings: self.settings.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.lock().drain(..).collect()
    }

    pub fn settings(&self) -> &SettingsDto {
        &self.settings
    }

    pub fn interlock(&self) -> &Arc<SafetyInterlock> {
        &self.interlock
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn set_channel(&mut self, channel: ChannelIndex, on: bool) -> Result<(), AppError> {
        self.interlock.set_channel(channel, on)?;
        let state = if on { ChannelState::On } else { ChannelState::Off };
        self.events
            .lock()
            .push_back(Event::ChannelStateUpdated { channel, state });
        Ok(())
    }

    /// Every channel off and the igniters shut. Write failures are logged, not
    /// returned.
    pub fn all_off(&mut self) {
        self.interlock.all_off_and_disarm();
        self.emit_interlock();
        let mut queue = self.events.lock();
        for channel in 0..self.interlock.channel_count() {
            queue.push_back(Event::ChannelStateUpdated {
                channel,
                state: ChannelState::Off,
            });
        }
    }

    /// Validates and schedules the chart up front; only a show that passed every
    /// check gets an id and a worker thread.
    pub fn start_show(
        &mut self,
        archive: &Path,
        map_file: &str,
        method: Option<&str>,
    ) -> Result<String, AppError> {
        if let Some(running) = self.running_show() {
            return Err(AppError::ShowRunning(running));
        }
        let policy: ChannelPolicy = method
            .unwrap_or(self.settings.channel_policy.as_str())
            .parse()?;

        let package = ChartPackage::from_zip_path(archive, map_file).map_err(ShowError::from)?;
        let prepared = prepare_show(
            package,
            policy,
            self.interlock.channel_count(),
            self.settings.note_duration_s,
        )?;

        let show_id = format!("show-{}", self.next_show);
        self.next_show += 1;
        let stop = StopToken::new();
        self.shows.lock().order.push(show_id.clone());
        self.shows.lock().entries.insert(
            show_id.clone(),
            ShowEntry {
                map_file: map_file.to_string(),
                status: ShowStatus::Queued,
                message: String::new(),
                stop: stop.clone(),
                started_at: None,
                ended_at: None,
            },
        );
        publish(
            &self.shows,
            &self.events,
            &show_id,
            ShowStatus::Queued,
            format!("Queued {map_file} ({policy})"),
        );

        let mut show_settings = ShowSettings::from_settings(&self.settings);
        if self.dry_run {
            show_settings.arm_delay = std::time::Duration::ZERO;
        }
        let runner = ShowRunner::new(
            Arc::clone(&self.interlock),
            Arc::clone(&self.audio),
            show_settings,
        );
        let shows = Arc::clone(&self.shows);
        let events = Arc::clone(&self.events);
        let interlock = Arc::clone(&self.interlock);
        let worker_id = show_id.clone();

        let spawned = thread::Builder::new()
            .name(show_id.clone())
            .spawn(move || {
                let ran = panic::catch_unwind(AssertUnwindSafe(|| {
                    runner.run(prepared, &stop, &mut |status, message| {
                        publish(&shows, &events, &worker_id, status, message)
                    })
                }));
                let (status, message) = match ran {
                    Ok(report) => (report.status, report.message),
                    Err(_) => {
                        error!(show_id = %worker_id, "show worker panicked");
                        interlock.all_off_and_disarm();
                        (ShowStatus::Error, "worker panicked".to_string())
                    }
                };
                publish(&shows, &events, &worker_id, status, message);
            });
        match spawned {
            Ok(handle) => {
                self.workers.insert(show_id.clone(), handle);
                Ok(show_id)
            }
            Err(err) => {
                publish(
                    &self.shows,
                    &self.events,
                    &show_id,
                    ShowStatus::Error,
                    err.to_string(),
                );
                Err(AppError::Spawn(err.to_string()))
            }
        }
    }

    /// Stopping a show that already finished is a no-op.
    pub fn stop_show(&mut self, show_id: &str) -> Result<(), AppError> {
        let shows = self.shows.lock();
        let entry = shows
            .entries
            .get(show_id)
            .ok_or_else(|| AppError::UnknownShow(show_id.to_string()))?;
        if !entry.status.is_terminal() {
            info!(show_id, "stop requested");
            entry.stop.request_stop();
        }
        Ok(())
    }

    /// Blocks until the show's worker exits and returns its final status.
    pub fn wait_show(&mut self, show_id: &str) -> Option<ShowStatus> {
        if let Some(handle) = self.workers.remove(show_id) {
            if handle.join().is_err() {
                error!(show_id, "show worker panicked");
                self.interlock.all_off_and_disarm();
                publish(
                    &self.shows,
                    &self.events,
                    show_id,
                    ShowStatus::Error,
                    "worker panicked".to_string(),
                );
            }
        }
        self.show_status(show_id)
    }

    pub fn show_status(&self, show_id: &str) -> Option<ShowStatus> {
        self.shows.lock().entries.get(show_id).map(|entry| entry.status)
    }

    pub fn running_show(&self) -> Option<String> {
        self.shows.lock().running().map(str::to_string)
    }

    pub fn show_summaries(&self) -> Vec<ShowSummary> {
        let shows = self.shows.lock();
        shows
            .order
            .iter()
            .filter_map(|id| shows.entries.get(id).map(|entry| entry.summary(id)))
            .collect()
    }

    /// Swaps the hardware output. The outgoing output is swept first.
    pub fn set_dry_run(&mut self, on: bool) -> Result<(), AppError> {
        if let Some(running) = self.running_show() {
            return Err(AppError::ShowRunning(running));
        }
        if on == self.dry_run {
            return Ok(());
        }
        let output = (self.outputs)(on)?;
        let report = self.interlock.replace_output(output);
        if !report.is_clean() {
            warn!(?report, "sweep before output swap was not clean");
        }
        self.dry_run = on;
        self.settings.dry_run = on;
        self.save_settings();
        self.emit_interlock();
        self.events.lock().push_back(Event::DryRunUpdated {
            on,
            output: self.interlock.output_description(),
        });
        Ok(())
    }

    /// Stops every show, waits for the workers and leaves the hardware safe.
    pub fn shutdown(&mut self) {
        for entry in self.shows.lock().entries.values() {
            entry.stop.request_stop();
        }
        let ids: Vec<String> = self.workers.keys().cloned().collect();
        for id in ids {
            self.wait_show(&id);
        }
        self.interlock.all_off_and_disarm();
    }

    fn emit_interlock(&mut self) {
        let arm = self.interlock.arm_state();
        self.events.lock().push_back(Event::InterlockUpdated { arm });
    }

    fn save_settings(&self) {
        if let Some(storage) = self.storage.as_ref() {
            if let Err(err) = storage.save_settings(&self.settings) {
                warn!(error = %err, "failed to save settings");
            }
        }
    }
}

impl Drop for AppCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
