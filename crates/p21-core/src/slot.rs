//! Storage slot selection
//!
//! The live and demo snapshots are persisted independently. Every storage
//! call names its slot explicitly so demo data can never land in the live
//! record by way of ambient settings state.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Snapshot slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    /// Real user data
    Live,
    /// Sample data shown while demo mode is on
    Demo,
}

impl Slot {
    /// All slots
    pub const ALL: [Slot; 2] = [Slot::Live, Slot::Demo];

    /// Stable storage key for this slot
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Live => "live",
            Slot::Demo => "demo",
        }
    }

    /// Slot that should be shown for the given demo-mode flag
    pub fn for_demo_mode(demo_mode: bool) -> Self {
        if demo_mode {
            Slot::Demo
        } else {
            Slot::Live
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "live" => Ok(Slot::Live),
            "demo" => Ok(Slot::Demo),
            other => Err(Error::InvalidSlot(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_names_round_trip() {
        for slot in Slot::ALL {
            assert_eq!(slot.as_str().parse::<Slot>().unwrap(), slot);
        }
    }

    #[test]
    fn test_unknown_slot_rejected() {
        assert!("Live".parse::<Slot>().is_err());
        assert!("".parse::<Slot>().is_err());
    }

    #[test]
    fn test_demo_mode_selection() {
        assert_eq!(Slot::for_demo_mode(true), Slot::Demo);
        assert_eq!(Slot::for_demo_mode(false), Slot::Live);
    }
}
