use serde::{Deserialize, Serialize};
use std::fmt;

pub type ChannelIndex = usize; // logical pumpkin index, 0..ChannelMap::len()
pub type Seconds = f64; // playback-clock time

/// Physical output identifier on the controller (a PLC coil).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoilAddress(pub u16);

impl fmt::Display for CoilAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coil {}", self.0)
    }
}

/// Fixed-size mapping from logical channel to coil. Unmapped slots stay `None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap {
    slots: Vec<Option<CoilAddress>>,
}

impl ChannelMap {
    pub fn new(slots: Vec<Option<CoilAddress>>) -> Self {
        Self { slots }
    }

    pub fn from_raw(slots: &[Option<u16>]) -> Self {
        Self::new(slots.iter().map(|slot| slot.map(CoilAddress)).collect())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn coil(&self, channel: ChannelIndex) -> Option<CoilAddress> {
        self.slots.get(channel).copied().flatten()
    }

    pub fn is_mapped(&self, channel: ChannelIndex) -> bool {
        self.coil(channel).is_some()
    }

    pub fn mapped(&self) -> impl Iterator<Item = (ChannelIndex, CoilAddress)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.map(|coil| (idx, coil)))
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::from_raw(&[Some(0), Some(1), Some(2), Some(3)])
    }
}
