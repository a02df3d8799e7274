use firebeat_ports::audio::{
    AudioError, AudioPlaybackPort, PlaybackClock, PlaybackHandle, SongFile,
};
use firebeat_ports::hardware::{HardwareError, HardwareOutputPort};
use firebeat_ports::types::{CoilAddress, Seconds};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoilWrite {
    pub coil: CoilAddress,
    pub on: bool,
}

#[derive(Debug, Default)]
struct OutputState {
    coils: BTreeMap<CoilAddress, bool>,
    writes: Vec<CoilWrite>,
    failing: BTreeSet<CoilAddress>,
}

/// Dry-run controller. Keeps the last value of every coil and a log of all
/// accepted writes; coils marked failing reject writes without changing state.
#[derive(Debug, Default)]
pub struct SimulatedOutput {
    state: Mutex<OutputState>,
}

impl SimulatedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(coils: impl IntoIterator<Item = CoilAddress>) -> Self {
        let output = Self::new();
        output.state.lock().failing.extend(coils);
        output
    }

    pub fn set_failing(&self, coil: CoilAddress, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(coil);
        } else {
            state.failing.remove(&coil);
        }
    }

    pub fn coil(&self, coil: CoilAddress) -> bool {
        self.state.lock().coils.get(&coil).copied().unwrap_or(false)
    }

    pub fn writes(&self) -> Vec<CoilWrite> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }
}

impl HardwareOutputPort for SimulatedOutput {
    fn write_coil(&self, coil: CoilAddress, on: bool) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        if state.failing.contains(&coil) {
            return Err(HardwareError::Write {
                coil,
                reason: "simulated failure".to_string(),
            });
        }
        state.coils.insert(coil, on);
        state.writes.push(CoilWrite { coil, on });
        debug!(%coil, on, "simulated write");
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}

/// Monotonic clock for runs without an audio device. `rate` scales elapsed
/// real time, so tests can play a long chart quickly.
pub struct TimerClock {
    started: Instant,
    rate: f64,
}

impl TimerClock {
    pub fn new(rate: f64) -> Self {
        Self {
            started: Instant::now(),
            rate,
        }
    }
}

impl PlaybackClock for TimerClock {
    fn now(&self) -> Seconds {
        self.started.elapsed().as_secs_f64() * self.rate
    }
}

pub struct SilentPlayback {
    rate: f64,
}

impl SilentPlayback {
    pub fn new() -> Self {
        Self::with_rate(1.0)
    }

    pub fn with_rate(rate: f64) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        Self { rate }
    }
}

impl Default for SilentPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlaybackPort for SilentPlayback {
    fn start(&self, song: &SongFile) -> Result<Box<dyn PlaybackHandle>, AudioError> {
        info!(
            song = %song.filename,
            bytes = song.bytes.len(),
            rate = self.rate,
            "silent playback started"
        );
        Ok(Box::new(SilentHandle {
            clock: Arc::new(TimerClock::new(self.rate)),
        }))
    }
}

// Never finishes on its own; the clock runs until the handle is stopped.
struct SilentHandle {
    clock: Arc<TimerClock>,
}

impl PlaybackHandle for SilentHandle {
    fn clock(&self) -> Arc<dyn PlaybackClock> {
        self.clock.clone()
    }

    fn is_finished(&self) -> bool {
        false
    }

    fn stop(self: Box<Self>) {
        debug!("silent playback stopped");
    }
}
