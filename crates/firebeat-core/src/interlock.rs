use firebeat_ports::hardware::{HardwareError, HardwareOutputPort};
use firebeat_ports::storage::SettingsDto;
use firebeat_ports::types::{ChannelIndex, ChannelMap, CoilAddress};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InterlockError {
    #[error("igniter not armed")]
    NotArmed,
    #[error("invalid channel index {0}")]
    InvalidChannel(ChannelIndex),
    #[error("no coil mapped for channel {0}")]
    Unmapped(ChannelIndex),
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmState {
    Disarmed,
    Armed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Off,
    On,
}

impl ChannelState {
    pub fn is_on(self) -> bool {
        self == ChannelState::On
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterlockConfig {
    /// Refuse to switch channels on while disarmed.
    pub arm_required: bool,
    /// Force a channel off after this long. `None` holds indefinitely.
    pub max_hold: Option<Duration>,
    /// Writing `true` here shuts the igniters off; arming writes `false`.
    pub igniter_shutoff: Option<CoilAddress>,
}

impl InterlockConfig {
    pub fn from_settings(settings: &SettingsDto) -> Self {
        let max_hold = Duration::try_from_secs_f64(settings.max_hold_s)
            .ok()
            .filter(|hold| !hold.is_zero());
        Self {
            arm_required: settings.arm_required,
            max_hold,
            igniter_shutoff: settings.igniter_shutoff_coil.map(CoilAddress),
        }
    }
}

impl Default for InterlockConfig {
    fn default() -> Self {
        Self {
            arm_required: true,
            max_hold: None,
            igniter_shutoff: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InterlockNotice {
    AutoReleased { channel: ChannelIndex, after_s: f64 },
}

pub type NoticeCallback = Arc<dyn Fn(InterlockNotice) + Send + Sync + 'static>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterlockSnapshot {
    pub arm: ArmState,
    pub channels: Vec<ChannelState>,
}

impl InterlockSnapshot {
    pub fn all_off(&self) -> bool {
        self.channels.iter().all(|state| !state.is_on())
    }
}

/// Result of the fail-safe sweep. Failures were logged, never propagated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub channel_failures: Vec<(ChannelIndex, HardwareError)>,
    pub disarm_failure: Option<HardwareError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.channel_failures.is_empty() && self.disarm_failure.is_none()
    }
}

#[derive(Clone, Copy, Debug)]
struct ChannelSlot {
    state: ChannelState,
    // Bumped on every write so a stale auto-release timer can tell it lost.
    generation: u64,
}

struct InterlockInner {
    arm: ArmState,
    channels: Vec<ChannelSlot>,
    output: Arc<dyn HardwareOutputPort>,
    notifier: Option<NoticeCallback>,
}

/// The arm/disarm gate and the owner of every channel write. All mutation goes
/// through one lock, shared with auto-release timers.
pub struct SafetyInterlock {
    map: ChannelMap,
    config: InterlockConfig,
    inner: Arc<Mutex<InterlockInner>>,
}

impl SafetyInterlock {
    pub fn new(
        map: ChannelMap,
        config: InterlockConfig,
        output: Arc<dyn HardwareOutputPort>,
    ) -> Self {
        let channels = vec![
            ChannelSlot {
                state: ChannelState::Off,
                generation: 0,
            };
            map.len()
        ];
        Self {
            map,
            config,
            inner: Arc::new(Mutex::new(InterlockInner {
                arm: ArmState::Disarmed,
                channels,
                output,
                notifier: None,
            })),
        }
    }

    pub fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    pub fn config(&self) -> InterlockConfig {
        self.config
    }

    pub fn channel_count(&self) -> usize {
        self.map.len()
    }

    pub fn set_notifier(&self, notifier: NoticeCallback) {
        self.inner.lock().notifier = Some(notifier);
    }

    pub fn output_description(&self) -> String {
        self.inner.lock().output.describe()
    }

    pub fn snapshot(&self) -> InterlockSnapshot {
        let inner = self.inner.lock();
        InterlockSnapshot {
            arm: inner.arm,
            channels: inner.channels.iter().map(|slot| slot.state).collect(),
        }
    }

    pub fn arm_state(&self) -> ArmState {
        self.inner.lock().arm
    }

    pub fn is_armed(&self) -> bool {
        self.arm_state() == ArmState::Armed
    }

    pub fn channel_state(&self, channel: ChannelIndex) -> Option<ChannelState> {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(|slot| slot.state)
    }

    /// If the igniter gate cannot be opened the interlock stays disarmed.
    pub fn arm(&self) -> Result<(), InterlockError> {
        let mut inner = self.inner.lock();
        if let Some(coil) = self.config.igniter_shutoff {
            inner.output.write_coil(coil, false)?;
        }
        inner.arm = ArmState::Armed;
        warn!("igniter armed");
        Ok(())
    }

    /// Always ends `Disarmed`; a failed gate write is still returned. Channel
    /// states are left alone, see [`Self::all_off_and_disarm`].
    pub fn disarm(&self) -> Result<(), InterlockError> {
        let mut inner = self.inner.lock();
        let result = Self::close_gate(&self.config, &mut inner);
        warn!("igniter disarmed");
        result.map_err(InterlockError::from)
    }

    pub fn set_channel(&self, channel: ChannelIndex, on: bool) -> Result<(), InterlockError> {
        if channel >= self.map.len() {
            return Err(InterlockError::InvalidChannel(channel));
        }
        let coil = self
            .map
            .coil(channel)
            .ok_or(InterlockError::Unmapped(channel))?;

        let mut inner = self.inner.lock();
        if on && self.config.arm_required && inner.arm == ArmState::Disarmed {
            return Err(InterlockError::NotArmed);
        }
        inner.output.write_coil(coil, on)?;

        let slot = &mut inner.channels[channel];
        slot.state = if on { ChannelState::On } else { ChannelState::Off };
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;
        debug!(channel, %coil, on, "channel set");
        drop(inner);

        if on {
            if let Some(max_hold) = self.config.max_hold {
                self.start_hold_timer(channel, coil, generation, max_hold);
            }
        }
        Ok(())
    }

    /// The fail-safe primitive: every mapped channel off, then disarm. Individual
    /// write errors are logged and collected, never raised, so one bad channel
    /// cannot keep the others live.
    pub fn all_off_and_disarm(&self) -> ShutdownReport {
        let mut inner = self.inner.lock();
        let mut report = ShutdownReport::default();

        for (channel, coil) in self.map.mapped() {
            if let Err(err) = inner.output.write_coil(coil, false) {
                error!(channel, %coil, error = %err, "channel off failed during shutdown");
                report.channel_failures.push((channel, err));
            }
            let slot = &mut inner.channels[channel];
            slot.state = ChannelState::Off;
            slot.generation = slot.generation.wrapping_add(1);
        }

        if let Err(err) = Self::close_gate(&self.config, &mut inner) {
            error!(error = %err, "failed to close igniter gate during shutdown");
            report.disarm_failure = Some(err);
        }
        warn!("all channels off; igniter disarmed");
        report
    }

    /// Sweeps the current output, then swaps in `output`.
    pub fn replace_output(&self, output: Arc<dyn HardwareOutputPort>) -> ShutdownReport {
        let report = self.all_off_and_disarm();
        let mut inner = self.inner.lock();
        inner.output.close();
        inner.output = output;
        report
    }

    fn close_gate(
        config: &InterlockConfig,
        inner: &mut InterlockInner,
    ) -> Result<(), HardwareError> {
        inner.arm = ArmState::Disarmed;
        match config.igniter_shutoff {
            Some(coil) => inner.output.write_coil(coil, true),
            None => Ok(()),
        }
    }

    fn start_hold_timer(
        &self,
        channel: ChannelIndex,
        coil: CoilAddress,
        generation: u64,
        max_hold: Duration,
    ) {
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("hold-timer-{channel}"))
            .spawn(move || {
                thread::sleep(max_hold);
                let notifier = {
                    let mut guard = inner.lock();
                    let slot = guard.channels[channel];
                    if slot.generation != generation || !slot.state.is_on() {
                        return;
                    }
                    if let Err(err) = guard.output.write_coil(coil, false) {
                        error!(channel, %coil, error = %err, "auto-release write failed");
                        return;
                    }
                    let slot = &mut guard.channels[channel];
                    slot.state = ChannelState::Off;
                    slot.generation = slot.generation.wrapping_add(1);
                    guard.notifier.clone()
                };
                let after_s = max_hold.as_secs_f64();
                warn!(channel, after_s, "channel auto-released after max hold");
                if let Some(notify) = notifier {
                    notify(InterlockNotice::AutoReleased { channel, after_s });
                }
            });
        if let Err(err) = spawned {
            error!(channel, error = %err, "could not start hold timer");
        }
    }
}

impl Drop for SafetyInterlock {
    fn drop(&mut self) {
        let snapshot = self.snapshot();
        if snapshot.arm == ArmState::Armed || !snapshot.all_off() {
            self.all_off_and_disarm();
        }
    }
}
