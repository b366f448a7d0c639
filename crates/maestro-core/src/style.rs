//! Styles, layers and effect levels

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MaestroError, Result};
use crate::patch::{Bus, DrumKind, Instrument, StringPatch, SynthPatch};

// ============================================================================
// Layers
// ============================================================================

/// A named instrument part that can be enabled independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    Kick,
    Snare,
    Hihat,
    Bass,
    Rhythm,
    Pad,
    Arp,
    Lead,
    Harmony,
    Riser,
}

impl Layer {
    pub const ALL: [Layer; 10] = [
        Self::Kick,
        Self::Snare,
        Self::Hihat,
        Self::Bass,
        Self::Rhythm,
        Self::Pad,
        Self::Arp,
        Self::Lead,
        Self::Harmony,
        Self::Riser,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Kick => "kick",
            Self::Snare => "snare",
            Self::Hihat => "hihat",
            Self::Bass => "bass",
            Self::Rhythm => "rhythm",
            Self::Pad => "pad",
            Self::Arp => "arp",
            Self::Lead => "lead",
            Self::Harmony => "harmony",
            Self::Riser => "riser",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|l| l.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| MaestroError::UnknownLayer(name.to_string()))
    }

    /// Minimum intensity at which the layer joins the arrangement
    pub fn intensity_threshold(&self) -> u8 {
        match self {
            Self::Pad | Self::Lead => 0,
            Self::Bass => 10,
            Self::Kick => 20,
            Self::Hihat => 30,
            Self::Snare => 35,
            Self::Rhythm => 45,
            Self::Arp => 55,
            Self::Harmony => 65,
            Self::Riser => 75,
        }
    }

    pub fn bus(&self) -> Bus {
        match self {
            Self::Kick | Self::Snare | Self::Hihat => Bus::Drums,
            Self::Bass => Bus::Bass,
            Self::Rhythm | Self::Pad | Self::Arp | Self::Riser => Bus::Harmony,
            Self::Lead | Self::Harmony => Bus::Lead,
        }
    }

    /// Velocity at full intensity
    pub fn base_velocity(&self) -> f32 {
        match self {
            Self::Kick => 0.9,
            Self::Snare => 0.8,
            Self::Hihat => 0.55,
            Self::Bass => 0.8,
            Self::Rhythm => 0.75,
            Self::Pad => 0.5,
            Self::Arp => 0.45,
            Self::Lead => 0.85,
            Self::Harmony => 0.6,
            Self::Riser => 0.4,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of layers packed into a bitmask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerSet(u16);

impl LayerSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self((1 << Layer::ALL.len()) - 1)
    }

    pub fn of(layers: &[Layer]) -> Self {
        let mut set = Self::empty();
        for &layer in layers {
            set.insert(layer);
        }
        set
    }

    /// Layers whose threshold is at or below `intensity`
    pub fn intensity_gate(intensity: u8) -> Self {
        let mut set = Self::empty();
        for layer in Layer::ALL {
            if layer.intensity_threshold() <= intensity {
                set.insert(layer);
            }
        }
        set
    }

    pub fn contains(&self, layer: Layer) -> bool {
        self.0 & (1 << layer.index()) != 0
    }

    pub fn insert(&mut self, layer: Layer) {
        self.0 |= 1 << layer.index();
    }

    pub fn remove(&mut self, layer: Layer) {
        self.0 &= !(1 << layer.index());
    }

    pub fn set(&mut self, layer: Layer, on: bool) {
        if on {
            self.insert(layer);
        } else {
            self.remove(layer);
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Layer> + '_ {
        Layer::ALL.into_iter().filter(|l| self.contains(*l))
    }
}

impl fmt::Display for LayerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        for (i, layer) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(layer.name())?;
        }
        Ok(())
    }
}

// ============================================================================
// Effect levels
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    Distortion,
    Chorus,
    Delay,
    Reverb,
}

impl EffectKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Distortion => "distortion",
            Self::Chorus => "chorus",
            Self::Delay => "delay",
            Self::Reverb => "reverb",
        }
    }
}

/// Mix levels 0-100 for each effect in the chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectLevels {
    pub distortion: u8,
    pub chorus: u8,
    pub delay: u8,
    pub reverb: u8,
}

impl EffectLevels {
    pub fn get(&self, kind: EffectKind) -> u8 {
        match kind {
            EffectKind::Distortion => self.distortion,
            EffectKind::Chorus => self.chorus,
            EffectKind::Delay => self.delay,
            EffectKind::Reverb => self.reverb,
        }
    }

    /// Store `level`, clamped to 0-100
    pub fn set(&mut self, kind: EffectKind, level: u8) {
        let level = level.min(100);
        match kind {
            EffectKind::Distortion => self.distortion = level,
            EffectKind::Chorus => self.chorus = level,
            EffectKind::Delay => self.delay = level,
            EffectKind::Reverb => self.reverb = level,
        }
    }

    /// Copy with `amount` added to one effect, saturating at 100
    pub fn boosted(mut self, kind: EffectKind, amount: u8) -> Self {
        let level = self.get(kind).saturating_add(amount);
        self.set(kind, level);
        self
    }
}

// ============================================================================
// Styles
// ============================================================================

/// One-shot gesture a style plays when the outro reaches its cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flourish {
    /// Distorted power chord ringing into a boosted delay
    PowerChord,
    /// Slow clean strum under heavy chorus
    ChorusShimmer,
    /// Saw pad whose cutoff falls across the beat
    FilterSweep,
    /// Bowed chord with a swell envelope
    StringSwell,
}

/// Defaults a style resets when applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StylePreset {
    pub layers: LayerSet,
    pub effects: EffectLevels,
    pub sustain: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Style {
    #[default]
    Rock,
    Pop,
    Edm,
    Classical,
}

impl Style {
    pub const ALL: [Style; 4] = [Self::Rock, Self::Pop, Self::Edm, Self::Classical];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rock => "rock",
            Self::Pop => "pop",
            Self::Edm => "edm",
            Self::Classical => "classical",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| MaestroError::UnknownStyle(name.to_string()))
    }

    pub fn preset(&self) -> StylePreset {
        use Layer::*;
        let (layers, effects, sustain): (&[Layer], _, _) = match self {
            Self::Rock => (
                &[Kick, Snare, Hihat, Bass, Rhythm, Lead],
                EffectLevels { distortion: 60, chorus: 10, delay: 20, reverb: 15 },
                60,
            ),
            Self::Pop => (
                &[Kick, Snare, Hihat, Bass, Rhythm, Pad, Lead],
                EffectLevels { distortion: 10, chorus: 30, delay: 30, reverb: 25 },
                70,
            ),
            Self::Edm => (
                &[Kick, Snare, Hihat, Bass, Pad, Arp, Lead, Riser],
                EffectLevels { distortion: 0, chorus: 20, delay: 40, reverb: 30 },
                50,
            ),
            Self::Classical => (
                &[Bass, Pad, Arp, Lead, Harmony],
                EffectLevels { distortion: 0, chorus: 20, delay: 15, reverb: 40 },
                85,
            ),
        };
        StylePreset { layers: LayerSet::of(layers), effects, sustain }
    }

    /// Instrument a layer plays in this style
    pub fn instrument(&self, layer: Layer) -> Instrument {
        match (self, layer) {
            (_, Layer::Kick) => Instrument::Drum(DrumKind::Kick),
            (_, Layer::Snare) => Instrument::Drum(DrumKind::Snare),
            (_, Layer::Hihat) => Instrument::Drum(DrumKind::ClosedHat),
            (_, Layer::Bass) => Instrument::Synth(SynthPatch::Bass),
            (_, Layer::Riser) => Instrument::Synth(SynthPatch::Riser),
            (Self::Classical, Layer::Pad) => Instrument::Synth(SynthPatch::Strings),
            (_, Layer::Pad) => Instrument::Synth(SynthPatch::Pad),
            (Self::Classical, Layer::Arp) => Instrument::Synth(SynthPatch::Piano),
            (_, Layer::Arp) => Instrument::Synth(SynthPatch::Arp),

            (Self::Rock, Layer::Rhythm) => Instrument::String(StringPatch::Crunch),
            (Self::Pop, Layer::Rhythm) => Instrument::String(StringPatch::Clean),
            (Self::Edm, Layer::Rhythm) => Instrument::Synth(SynthPatch::Pad),
            (Self::Classical, Layer::Rhythm) => Instrument::Synth(SynthPatch::Piano),

            (Self::Rock | Self::Pop, Layer::Lead) => Instrument::String(StringPatch::Clean),
            (Self::Edm, Layer::Lead) => Instrument::Synth(SynthPatch::Lead),
            (Self::Classical, Layer::Lead) => Instrument::Synth(SynthPatch::Strings),

            (Self::Rock, Layer::Harmony) => Instrument::String(StringPatch::Crunch),
            (Self::Pop, Layer::Harmony) => Instrument::String(StringPatch::Clean),
            (Self::Edm, Layer::Harmony) => Instrument::Synth(SynthPatch::Lead),
            (Self::Classical, Layer::Harmony) => Instrument::Synth(SynthPatch::Strings),
        }
    }

    pub fn flourish(&self) -> Flourish {
        match self {
            Self::Rock => Flourish::PowerChord,
            Self::Pop => Flourish::ChorusShimmer,
            Self::Edm => Flourish::FilterSweep,
            Self::Classical => Flourish::StringSwell,
        }
    }

    /// Effect boost that accompanies the flourish during the cadence
    pub fn flourish_boost(&self) -> Option<(EffectKind, u8)> {
        match self.flourish() {
            Flourish::PowerChord => Some((EffectKind::Delay, 30)),
            Flourish::ChorusShimmer => Some((EffectKind::Chorus, 30)),
            Flourish::FilterSweep | Flourish::StringSwell => None,
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
