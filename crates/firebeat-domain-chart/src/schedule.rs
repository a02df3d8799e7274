use crate::model::{ChannelPolicy, NormalizedNote, Pulse, Schedule};
use firebeat_ports::types::Seconds;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("bpm must be a positive number, got {0}")]
    InvalidBpm(f64),
    #[error("note duration must be a non-negative number, got {0}")]
    InvalidNoteDuration(f64),
    #[error("channel count must be at least 1")]
    InvalidChannelCount,
    #[error("no notes to schedule")]
    EmptySchedule,
    #[error("note at beat {beat_offset} does not map to a finite time at {bpm} bpm")]
    NonFiniteTime { beat_offset: f64, bpm: f64 },
}

/// Beats to seconds at a fixed tempo. Callers validate `bpm` first.
pub fn beats_to_seconds(beat_offset: f64, bpm: f64) -> Seconds {
    beat_offset / (bpm / 60.0)
}

pub fn validate_bpm(bpm: f64) -> Result<(), ScheduleError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(())
    } else {
        Err(ScheduleError::InvalidBpm(bpm))
    }
}

/// Turns normalized notes into an ordered pulse list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduleBuilder {
    pub bpm: f64,
    pub note_duration_s: Seconds,
    pub policy: ChannelPolicy,
    pub channel_count: usize,
}

impl ScheduleBuilder {
    pub fn new(
        bpm: f64,
        note_duration_s: Seconds,
        policy: ChannelPolicy,
        channel_count: usize,
    ) -> Self {
        Self {
            bpm,
            note_duration_s,
            policy,
            channel_count,
        }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        validate_bpm(self.bpm)?;
        if !(self.note_duration_s.is_finite() && self.note_duration_s >= 0.0) {
            return Err(ScheduleError::InvalidNoteDuration(self.note_duration_s));
        }
        if self.channel_count == 0 {
            return Err(ScheduleError::InvalidChannelCount);
        }
        Ok(())
    }

    /// Channels are assigned in input order, then pulses are stable-sorted by start,
    /// so identical inputs always give identical schedules.
    pub fn build(&self, notes: &[NormalizedNote]) -> Result<Schedule, ScheduleError> {
        self.validate()?;
        if notes.is_empty() {
            return Err(ScheduleError::EmptySchedule);
        }

        let mut pulses: Vec<Pulse> = notes
            .iter()
            .enumerate()
            .map(|(index, note)| {
                let start_s = beats_to_seconds(note.beat_offset, self.bpm);
                let end_s = start_s + self.note_duration_s;
                if !end_s.is_finite() {
                    return Err(ScheduleError::NonFiniteTime {
                        beat_offset: note.beat_offset,
                        bpm: self.bpm,
                    });
                }
                Ok(Pulse {
                    start_s,
                    end_s,
                    channel: self.policy.channel_for(index, note, self.channel_count),
                })
            })
            .collect::<Result<_, _>>()?;
        pulses.sort_by(|a, b| a.start_s.total_cmp(&b.start_s));

        Ok(Schedule::new(self.bpm, self.channel_count, pulses))
    }
}
