//! Arrangement sections

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MaestroError, Result};
use crate::style::{Layer, LayerSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    Intro,
    #[default]
    Verse,
    Chorus,
    Build,
    Break,
}

impl Section {
    pub const ALL: [Section; 5] = [Self::Intro, Self::Verse, Self::Chorus, Self::Build, Self::Break];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Verse => "verse",
            Self::Chorus => "chorus",
            Self::Build => "build",
            Self::Break => "break",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| MaestroError::UnknownSection(name.to_string()))
    }

    /// Beats each chord of the progression lasts
    pub fn beats_per_chord(&self) -> u32 {
        match self {
            Self::Intro | Self::Break => 8,
            Self::Verse | Self::Chorus => 4,
            Self::Build => 2,
        }
    }

    /// Intensity the section sets when entered
    pub fn entry_intensity(&self) -> u8 {
        match self {
            Self::Intro => 20,
            Self::Verse => 40,
            Self::Chorus => 80,
            Self::Build => 70,
            Self::Break => 10,
        }
    }

    /// Layers the section lets through from the intensity-derived set
    pub fn allowed(&self) -> LayerSet {
        use Layer::*;
        match self {
            Self::Intro => LayerSet::of(&[Pad, Arp]),
            Self::Verse => LayerSet::of(&[Kick, Snare, Hihat, Bass, Rhythm, Pad, Lead]),
            Self::Chorus => LayerSet::of(&[Kick, Snare, Hihat, Bass, Rhythm, Pad, Arp, Lead, Harmony]),
            Self::Build => LayerSet::all(),
            Self::Break => LayerSet::of(&[Bass, Pad, Riser]),
        }
    }

    /// Layers the section plays regardless of intensity or enabled flags
    pub fn forced(&self) -> LayerSet {
        use Layer::*;
        match self {
            Self::Intro | Self::Break => LayerSet::of(&[Pad]),
            Self::Verse => LayerSet::empty(),
            Self::Chorus => LayerSet::of(&[Kick, Bass]),
            Self::Build => LayerSet::of(&[Kick, Snare, Riser]),
        }
    }

    /// ((enabled ∩ gate) ∩ allowed) ∪ forced
    pub fn active_layers(&self, enabled: LayerSet, intensity: u8) -> LayerSet {
        enabled
            .intersection(LayerSet::intensity_gate(intensity))
            .intersection(self.allowed())
            .union(self.forced())
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
