use firebeat_ports::types::{ChannelIndex, Seconds};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaGeneration {
    /// Underscore-prefixed keys, `_version` "2.x".
    Legacy,
    /// Bare keys, `version` "3.x".
    Modern,
}

impl fmt::Display for SchemaGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaGeneration::Legacy => write!(f, "legacy"),
            SchemaGeneration::Modern => write!(f, "modern"),
        }
    }
}

/// A timed note, independent of the schema it came from. `beat_offset` is in beats.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedNote {
    pub beat_offset: f64,
    pub lane_hint: i64,
}

/// One firing instruction: `channel` is on during `[start_s, end_s]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    pub start_s: Seconds,
    pub end_s: Seconds,
    pub channel: ChannelIndex,
}

/// Pulses ordered by start time, built at a fixed BPM. Never empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub bpm: f64,
    pub channel_count: usize,
    pulses: Vec<Pulse>,
}

impl Schedule {
    pub(crate) fn new(bpm: f64, channel_count: usize, pulses: Vec<Pulse>) -> Self {
        Self {
            bpm,
            channel_count,
            pulses,
        }
    }

    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    pub fn duration_s(&self) -> Seconds {
        self.pulses
            .iter()
            .map(|pulse| pulse.end_s)
            .fold(0.0, f64::max)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelPolicyError {
    #[error("unknown channel assignment method: {0:?}")]
    Unknown(String),
}

/// How a note picks its output channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPolicy {
    /// Round-robin: note `i` goes to `i mod channel_count`.
    #[default]
    Modulus,
    /// Lane-driven: note goes to `lane_hint mod channel_count`.
    Position,
}

impl ChannelPolicy {
    pub fn channel_for(
        self,
        note_index: usize,
        note: &NormalizedNote,
        channel_count: usize,
    ) -> ChannelIndex {
        match self {
            ChannelPolicy::Modulus => note_index % channel_count,
            ChannelPolicy::Position => note.lane_hint.rem_euclid(channel_count as i64) as usize,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelPolicy::Modulus => "modulus",
            ChannelPolicy::Position => "position",
        }
    }
}

impl FromStr for ChannelPolicy {
    type Err = ChannelPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            // "normal" is what older control panels send for round-robin.
            "modulus" | "mod" | "normal" => Ok(ChannelPolicy::Modulus),
            "position" | "lane" => Ok(ChannelPolicy::Position),
            _ => Err(ChannelPolicyError::Unknown(s.to_string())),
        }
    }
}

impl fmt::Display for ChannelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
