//! Instrument identifiers carried by note events.
//!
//! The core only names voice families and patches; the synthesis parameters
//! behind each patch live with the voices.

use serde::{Deserialize, Serialize};

/// Plucked-string articulations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringPatch {
    Clean,
    Crunch,
    /// Palm muted: lowered loop decay, darker excitation
    Muted,
}

/// Subtractive synth patches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynthPatch {
    Bass,
    Pad,
    Arp,
    Lead,
    /// Filter closes quickly after the attack
    Piano,
    Strings,
    /// Cutoff rises over the note
    Riser,
    /// Cutoff falls over the note
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrumKind {
    Kick,
    Snare,
    ClosedHat,
    OpenHat,
    LowTom,
    MidTom,
    HighTom,
}

impl DrumKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Kick => "Kick",
            Self::Snare => "Snare",
            Self::ClosedHat => "Closed HH",
            Self::OpenHat => "Open HH",
            Self::LowTom => "Low Tom",
            Self::MidTom => "Mid Tom",
            Self::HighTom => "High Tom",
        }
    }

    pub fn is_hat(&self) -> bool {
        matches!(self, Self::ClosedHat | Self::OpenHat)
    }
}

/// Voice family plus patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instrument {
    String(StringPatch),
    Synth(SynthPatch),
    Drum(DrumKind),
}

/// Mix group a layer renders into before the master bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bus {
    Drums,
    Bass,
    Harmony,
    Lead,
}

impl Bus {
    pub const COUNT: usize = 4;

    pub fn index(&self) -> usize {
        match self {
            Self::Drums => 0,
            Self::Bass => 1,
            Self::Harmony => 2,
            Self::Lead => 3,
        }
    }
}
