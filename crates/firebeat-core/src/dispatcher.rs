use crate::interlock::{InterlockError, SafetyInterlock};
use crate::stop::StopToken;
use firebeat_domain_chart::Schedule;
use firebeat_ports::audio::PlaybackClock;
use firebeat_ports::types::{ChannelIndex, ChannelMap, Seconds};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// A channel switching on or off at a playback-clock time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeEvent {
    pub at_s: Seconds,
    pub channel: ChannelIndex,
    pub on: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DispatcherConfig {
    /// Upper bound on a single sleep; also how quickly a stop is noticed.
    pub poll_interval: Duration,
    /// Added to every edge once, when the show starts.
    pub latency_compensation_s: Seconds,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            latency_compensation_s: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    Completed {
        applied: usize,
    },
    Stopped {
        applied: usize,
        pending: usize,
    },
    Failed {
        applied: usize,
        edge: EdgeEvent,
        error: InterlockError,
    },
}

impl DispatchOutcome {
    pub fn state(&self) -> DispatchState {
        match self {
            DispatchOutcome::Completed { .. } => DispatchState::Completed,
            DispatchOutcome::Stopped { .. } => DispatchState::Stopped,
            DispatchOutcome::Failed { .. } => DispatchState::Failed,
        }
    }
}

/// Splits pulses into on/off edges sorted by time. Ties keep pulse order with each
/// pulse's on before its off. Pulses on unmapped channels are dropped.
pub fn flatten_edges(
    schedule: &Schedule,
    offset_s: Seconds,
    map: &ChannelMap,
) -> Vec<EdgeEvent> {
    let mut edges = Vec::with_capacity(schedule.len() * 2);
    for pulse in schedule.pulses() {
        if !map.is_mapped(pulse.channel) {
            warn!(
                channel = pulse.channel,
                start_s = pulse.start_s,
                "skipping pulse on unmapped channel"
            );
            continue;
        }
        edges.push(EdgeEvent {
            at_s: pulse.start_s + offset_s,
            channel: pulse.channel,
            on: true,
        });
        edges.push(EdgeEvent {
            at_s: pulse.end_s + offset_s,
            channel: pulse.channel,
            on: false,
        });
    }
    edges.sort_by(|a, b| a.at_s.total_cmp(&b.at_s));
    edges
}

enum Wait {
    Due,
    Stopped,
}

/// Walks one show's edges against the playback clock.
pub struct Dispatcher {
    interlock: Arc<SafetyInterlock>,
    config: DispatcherConfig,
    state: DispatchState,
}

impl Dispatcher {
    pub fn new(interlock: Arc<SafetyInterlock>, config: DispatcherConfig) -> Self {
        let poll_interval = config
            .poll_interval
            .clamp(Duration::from_millis(1), MAX_POLL_INTERVAL);
        Self {
            interlock,
            config: DispatcherConfig {
                poll_interval,
                ..config
            },
            state: DispatchState::Idle,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Consumes the schedule. Whatever the outcome, channels this run switched on
    /// are switched off again before returning.
    pub fn run(
        &mut self,
        schedule: Schedule,
        clock: &dyn PlaybackClock,
        stop: &StopToken,
    ) -> DispatchOutcome {
        let edges = flatten_edges(
            &schedule,
            self.config.latency_compensation_s,
            self.interlock.channel_map(),
        );
        drop(schedule);

        self.state = DispatchState::Running;
        info!(edges = edges.len(), "dispatch started");

        let mut live = vec![false; self.interlock.channel_count()];
        let outcome = self.walk(&edges, clock, stop, &mut live);
        self.release(&live);

        self.state = outcome.state();
        match &outcome {
            DispatchOutcome::Completed { applied } => info!(applied, "dispatch completed"),
            DispatchOutcome::Stopped { applied, pending } => {
                info!(applied, pending, "dispatch stopped")
            }
            DispatchOutcome::Failed { edge, error, .. } => {
                error!(channel = edge.channel, on = edge.on, %error, "dispatch failed")
            }
        }
        outcome
    }

    fn walk(
        &self,
        edges: &[EdgeEvent],
        clock: &dyn PlaybackClock,
        stop: &StopToken,
        live: &mut [bool],
    ) -> DispatchOutcome {
        for (applied, edge) in edges.iter().enumerate() {
            if let Wait::Stopped = self.wait_until(edge.at_s, clock, stop) {
                return DispatchOutcome::Stopped {
                    applied,
                    pending: edges.len() - applied,
                };
            }
            if let Err(error) = self.interlock.set_channel(edge.channel, edge.on) {
                return DispatchOutcome::Failed {
                    applied,
                    edge: *edge,
                    error,
                };
            }
            live[edge.channel] = edge.on;
            debug!(channel = edge.channel, on = edge.on, at_s = edge.at_s, "edge applied");
        }
        DispatchOutcome::Completed {
            applied: edges.len(),
        }
    }

    fn wait_until(&self, at_s: Seconds, clock: &dyn PlaybackClock, stop: &StopToken) -> Wait {
        loop {
            if stop.is_stopped() {
                return Wait::Stopped;
            }
            let remaining = at_s - clock.now();
            if remaining <= 0.0 {
                return Wait::Due;
            }
            // Re-read the clock after every bounded sleep; audio and OS jitter
            // make a single long sleep unreliable.
            let sleep = Duration::from_secs_f64(
                remaining.min(self.config.poll_interval.as_secs_f64()),
            );
            if stop.wait_timeout(sleep) {
                return Wait::Stopped;
            }
        }
    }

    fn release(&self, live: &[bool]) {
        for (channel, _) in live.iter().enumerate().filter(|(_, on)| **on) {
            if let Err(err) = self.interlock.set_channel(channel, false) {
                error!(channel, error = %err, "release after dispatch failed");
            }
        }
    }
}
