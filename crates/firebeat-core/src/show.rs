use crate::dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig};
use crate::interlock::{InterlockError, SafetyInterlock};
use crate::ipc::ShowStatus;
use crate::stop::StopToken;
use firebeat_domain_chart::{
    select_reader, ChannelPolicy, ChartError, ChartPackage, ExtractionReport, PackageError,
    Schedule, ScheduleBuilder, ScheduleError, SchemaGeneration,
};
use firebeat_ports::audio::{AudioError, AudioPlaybackPort, SongFile};
use firebeat_ports::storage::SettingsDto;
use firebeat_ports::types::Seconds;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum ShowError {
    #[error("package error: {0}")]
    Package(#[from] PackageError),
    #[error("chart error: {0}")]
    Chart(#[from] ChartError),
    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("interlock error: {0}")]
    Interlock(#[from] InterlockError),
    #[error("audio error: {0}")]
    Audio(#[from] AudioError),
}

/// Per-show constants taken from settings when the show is queued.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShowSettings {
    pub note_duration_s: Seconds,
    pub latency_compensation_s: Seconds,
    pub arm_delay: Duration,
    pub poll_interval: Duration,
}

impl ShowSettings {
    pub fn from_settings(settings: &SettingsDto) -> Self {
        let arm_delay = Duration::try_from_secs_f64(settings.igniter_arm_delay_s.max(0.0))
            .unwrap_or(Duration::ZERO);
        Self {
            note_duration_s: settings.note_duration_s,
            latency_compensation_s: settings.latency_compensation_s,
            arm_delay,
            poll_interval: Duration::from_millis(settings.poll_interval_ms()),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: self.poll_interval,
            latency_compensation_s: self.latency_compensation_s,
        }
    }
}

impl Default for ShowSettings {
    fn default() -> Self {
        Self::from_settings(&SettingsDto::default())
    }
}

/// A show that passed every configuration check. Nothing has touched hardware yet.
#[derive(Clone, Debug)]
pub struct PreparedShow {
    pub map_file: String,
    pub generation: SchemaGeneration,
    pub schedule: Schedule,
    pub report: ExtractionReport,
    pub song: SongFile,
}

pub fn prepare_show(
    package: ChartPackage,
    policy: ChannelPolicy,
    channel_count: usize,
    note_duration_s: Seconds,
) -> Result<PreparedShow, ShowError> {
    let bound = select_reader(&package.map_bytes)?;
    if bound.degraded() {
        warn!(map_file = %package.map_file, "chart version marker unusable; read as legacy");
    }
    let builder = ScheduleBuilder::new(package.info.bpm, note_duration_s, policy, channel_count);
    let extraction = bound.extract_notes(&builder)?;
    info!(
        map_file = %package.map_file,
        pulses = extraction.schedule.len(),
        skipped = extraction.report.skipped,
        duration_s = extraction.schedule.duration_s(),
        "show prepared"
    );
    Ok(PreparedShow {
        map_file: package.map_file,
        generation: bound.generation(),
        schedule: extraction.schedule,
        report: extraction.report,
        song: package.song,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShowReport {
    pub status: ShowStatus,
    pub message: String,
}

/// Sweeps the interlock when dropped, so every exit path of a show ends all-off.
struct FailSafe<'a> {
    interlock: &'a SafetyInterlock,
}

impl Drop for FailSafe<'_> {
    fn drop(&mut self) {
        let report = self.interlock.all_off_and_disarm();
        if !report.is_clean() {
            warn!(?report, "shutdown sweep after show was not clean");
        }
    }
}

pub struct ShowRunner {
    interlock: Arc<SafetyInterlock>,
    audio: Arc<dyn AudioPlaybackPort>,
    settings: ShowSettings,
}

impl ShowRunner {
    pub fn new(
        interlock: Arc<SafetyInterlock>,
        audio: Arc<dyn AudioPlaybackPort>,
        settings: ShowSettings,
    ) -> Self {
        Self {
            interlock,
            audio,
            settings,
        }
    }

    /// Runs one show to a terminal status. `on_status` sees `running` once the song
    /// starts and is never called with the terminal status; that is the return value.
    pub fn run(
        &self,
        show: PreparedShow,
        stop: &StopToken,
        on_status: &mut dyn FnMut(ShowStatus, String),
    ) -> ShowReport {
        let map_file = show.map_file.clone();
        match self.execute(show, stop, on_status) {
            Ok(DispatchOutcome::Completed { applied }) => {
                info!(%map_file, applied, "show done");
                ShowReport {
                    status: ShowStatus::Done,
                    message: "Completed successfully".to_string(),
                }
            }
            Ok(DispatchOutcome::Stopped { .. }) | Err(Interrupted::Stopped) => ShowReport {
                status: ShowStatus::Stopped,
                message: "Stopped by user".to_string(),
            },
            Ok(DispatchOutcome::Failed { edge, error, .. }) => ShowReport {
                status: ShowStatus::Error,
                message: format!("channel {} failed: {error}", edge.channel),
            },
            Err(Interrupted::Failed(err)) => {
                warn!(%map_file, error = %err, "show failed");
                ShowReport {
                    status: ShowStatus::Error,
                    message: err.to_string(),
                }
            }
        }
    }

    fn execute(
        &self,
        show: PreparedShow,
        stop: &StopToken,
        on_status: &mut dyn FnMut(ShowStatus, String),
    ) -> Result<DispatchOutcome, Interrupted> {
        let _fail_safe = FailSafe {
            interlock: &self.interlock,
        };

        self.interlock.arm().map_err(ShowError::from)?;
        if !self.settings.arm_delay.is_zero() {
            info!(delay_s = self.settings.arm_delay.as_secs_f64(), "waiting for igniters");
            if stop.wait_timeout(self.settings.arm_delay) {
                return Err(Interrupted::Stopped);
            }
        }
        if stop.is_stopped() {
            return Err(Interrupted::Stopped);
        }

        let playback = self.audio.start(&show.song).map_err(ShowError::from)?;
        let clock = playback.clock();
        on_status(
            ShowStatus::Running,
            format!("Playback started - map: {}", show.map_file),
        );

        let mut dispatcher =
            Dispatcher::new(Arc::clone(&self.interlock), self.settings.dispatcher_config());
        let outcome = dispatcher.run(show.schedule, clock.as_ref(), stop);
        playback.stop();
        Ok(outcome)
    }
}

enum Interrupted {
    Stopped,
    Failed(ShowError),
}

impl From<ShowError> for Interrupted {
    fn from(err: ShowError) -> Self {
        Interrupted::Failed(err)
    }
}
