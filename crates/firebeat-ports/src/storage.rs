use crate::types::ChannelMap;
use serde::{Deserialize, Serialize};

fn default_channel_map() -> Vec<Option<u16>> {
    vec![Some(0), Some(1), Some(2), Some(3)]
}

fn default_igniter_shutoff_coil() -> Option<u16> {
    Some(8)
}

fn default_note_duration_s() -> f64 {
    0.1
}

fn default_igniter_arm_delay_s() -> f64 {
    2.0
}

fn default_arm_required() -> bool {
    true
}

fn default_dry_run() -> bool {
    true
}

fn default_plc_host() -> String {
    "192.168.1.10".to_string()
}

fn default_plc_port() -> u16 {
    502
}

fn default_channel_policy() -> String {
    "modulus".to_string()
}

fn default_poll_interval_ms() -> u64 {
    50
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// Layer/height pairs assumed for legacy walls that carry no explicit extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallDefaults {
    pub ceiling_layer: i64,
    pub ceiling_height: i64,
    pub full_layer: i64,
    pub full_height: i64,
}

impl Default for WallDefaults {
    fn default() -> Self {
        Self {
            ceiling_layer: 2,
            ceiling_height: 3,
            full_layer: 0,
            full_height: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDto {
    #[serde(default = "default_channel_map")]
    pub channel_map: Vec<Option<u16>>,
    #[serde(default = "default_igniter_shutoff_coil")]
    pub igniter_shutoff_coil: Option<u16>,
    #[serde(default = "default_note_duration_s")]
    pub note_duration_s: f64,
    pub latency_compensation_s: f64,
    #[serde(default = "default_igniter_arm_delay_s")]
    pub igniter_arm_delay_s: f64,
    #[serde(default = "default_arm_required")]
    pub arm_required: bool,
    /// 0 disables the auto-release timer.
    pub max_hold_s: f64,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default = "default_plc_host")]
    pub plc_host: String,
    #[serde(default = "default_plc_port")]
    pub plc_port: u16,
    #[serde(default = "default_channel_policy")]
    pub channel_policy: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub wall_defaults: WallDefaults,
    pub log_level: Option<String>,
}

impl SettingsDto {
    pub fn channel_map(&self) -> ChannelMap {
        ChannelMap::from_raw(&self.channel_map)
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms.clamp(1, 100)
    }
}

impl Default for SettingsDto {
    fn default() -> Self {
        Self {
            channel_map: default_channel_map(),
            igniter_shutoff_coil: default_igniter_shutoff_coil(),
            note_duration_s: default_note_duration_s(),
            latency_compensation_s: 0.0,
            igniter_arm_delay_s: default_igniter_arm_delay_s(),
            arm_required: default_arm_required(),
            max_hold_s: 0.0,
            dry_run: default_dry_run(),
            plc_host: default_plc_host(),
            plc_port: default_plc_port(),
            channel_policy: default_channel_policy(),
            poll_interval_ms: default_poll_interval_ms(),
            wall_defaults: WallDefaults::default(),
            log_level: None,
        }
    }
}

pub trait StoragePort: Send + Sync {
    fn load_settings(&self) -> Result<SettingsDto, StorageError>;
    fn save_settings(&self, s: &SettingsDto) -> Result<(), StorageError>;
}
