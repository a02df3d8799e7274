use crate::interlock::{ArmState, ChannelState, InterlockSnapshot};
use firebeat_ports::storage::SettingsDto;
use firebeat_ports::types::ChannelIndex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Command {
    SetArmed { armed: bool },
    SetChannel { channel: ChannelIndex, on: bool },
    AllOff,
    StartShow {
        archive: String,
        map_file: String,
        method: Option<String>,
    },
    StopShow { show_id: String },
    SetDryRun { on: bool },
    QueryStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShowStatus {
    Queued,
    Running,
    Stopped,
    Done,
    Error,
}

impl ShowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ShowStatus::Stopped | ShowStatus::Done | ShowStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShowStatus::Queued => "queued",
            ShowStatus::Running => "running",
            ShowStatus::Stopped => "stopped",
            ShowStatus::Done => "done",
            ShowStatus::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShowSummary {
    pub show_id: String,
    pub map_file: String,
    pub status: ShowStatus,
    pub message: String,
    pub elapsed_s: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    InterlockUpdated { arm: ArmState },
    ChannelStateUpdated {
        channel: ChannelIndex,
        state: ChannelState,
    },
    AutoReleased { channel: ChannelIndex, after_s: f64 },
    ShowStatusUpdated {
        show_id: String,
        status: ShowStatus,
        message: String,
    },
    DryRunUpdated { on: bool, output: String },
    StatusReport {
        interlock: InterlockSnapshot,
        dry_run: bool,
        shows: Vec<ShowSummary>,
        settings: SettingsDto,
    },
}
