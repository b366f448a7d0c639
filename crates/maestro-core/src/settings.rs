//! Control-owned session settings and parameter parsing

use serde::{Deserialize, Serialize};

use crate::error::{MaestroError, Result};
use crate::section::Section;
use crate::style::{EffectKind, EffectLevels, Layer, LayerSet, Style};
use crate::theory::Key;

pub const MIN_TEMPO: f32 = 20.0;
pub const MAX_TEMPO: f32 = 300.0;

/// Everything the operator controls. Published as a whole on every change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub style: Style,
    pub key: Key,
    /// Base tempo in BPM, always within [MIN_TEMPO, MAX_TEMPO]
    pub tempo: f32,
    pub intensity: u8,
    pub section: Section,
    pub enabled: LayerSet,
    pub effects: EffectLevels,
    pub sustain: u8,
    pub started: bool,
    pub outro_requested: bool,
    /// Bumped on every accepted mutation
    pub revision: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let mut settings = Self {
            style: Style::Rock,
            key: Key::default(),
            tempo: 110.0,
            intensity: 50,
            section: Section::Verse,
            enabled: LayerSet::empty(),
            effects: EffectLevels::default(),
            sustain: 70,
            started: false,
            outro_requested: false,
            revision: 0,
        };
        settings.apply_style(Style::Rock);
        settings
    }
}

/// Names accepted by `set_param`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Intensity,
    Tempo,
    Key,
    Section,
    Layer,
    Effect(EffectKind),
    Sustain,
}

impl Param {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "intensity" => Ok(Self::Intensity),
            "bpm" | "tempo" => Ok(Self::Tempo),
            "key" => Ok(Self::Key),
            "section" => Ok(Self::Section),
            "layer" => Ok(Self::Layer),
            "dist" | "distortion" => Ok(Self::Effect(EffectKind::Distortion)),
            "delay" => Ok(Self::Effect(EffectKind::Delay)),
            "reverb" => Ok(Self::Effect(EffectKind::Reverb)),
            "chorus" => Ok(Self::Effect(EffectKind::Chorus)),
            "sustain" => Ok(Self::Sustain),
            _ => Err(MaestroError::UnknownParam(name.to_string())),
        }
    }
}

/// Parse a number and clamp it into `[lo, hi]`. NaN and non-numbers are rejected.
fn parse_clamped(param: &str, value: &str, lo: f32, hi: f32) -> Result<f32> {
    let v: f32 = value
        .trim()
        .parse()
        .map_err(|_| MaestroError::invalid_value(param, value))?;
    if v.is_nan() {
        return Err(MaestroError::invalid_value(param, value));
    }
    Ok(v.clamp(lo, hi))
}

fn parse_percent(param: &str, value: &str) -> Result<u8> {
    Ok(parse_clamped(param, value, 0.0, 100.0)?.round() as u8)
}

fn parse_switch(param: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(MaestroError::invalid_value(param, value)),
    }
}

impl Settings {
    /// Reset layers, effect levels and sustain to the style's preset
    pub fn apply_style(&mut self, style: Style) {
        let preset = style.preset();
        self.style = style;
        self.enabled = preset.layers;
        self.effects = preset.effects;
        self.sustain = preset.sustain;
    }

    /// Apply one named parameter. On error `self` is left untouched.
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        match Param::parse(name)? {
            Param::Intensity => self.intensity = parse_percent(name, value)?,
            Param::Tempo => self.tempo = parse_clamped(name, value, MIN_TEMPO, MAX_TEMPO)?,
            Param::Key => {
                let mut words = value.split_whitespace();
                let note = words
                    .next()
                    .ok_or_else(|| MaestroError::invalid_value(name, value))?;
                self.key = Key::parse(note, words.next())?;
            }
            Param::Section => {
                let section = Section::parse(value)?;
                self.section = section;
                self.intensity = section.entry_intensity();
            }
            Param::Layer => {
                let mut words = value.split_whitespace();
                let (Some(layer), Some(state), None) = (words.next(), words.next(), words.next()) else {
                    return Err(MaestroError::invalid_value(name, value));
                };
                let layer = Layer::parse(layer)?;
                let on = parse_switch(name, state)?;
                self.enabled.set(layer, on);
            }
            Param::Effect(kind) => {
                let level = parse_percent(name, value)?;
                self.effects.set(kind, level);
            }
            Param::Sustain => self.sustain = parse_percent(name, value)?,
        }
        Ok(())
    }

    pub fn beat_seconds(&self) -> f32 {
        60.0 / self.tempo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intensity_always_in_range() {
        let mut s = Settings::default();
        for (input, expected) in [("-5", 0), ("0", 0), ("42", 42), ("99.6", 100), ("250", 100), ("inf", 100)] {
            s.set_param("intensity", input).unwrap();
            assert_eq!(s.intensity, expected, "input {input}");
        }
    }

    #[test]
    fn test_malformed_values_leave_state_unchanged() {
        let mut s = Settings::default();
        let before = s;
        assert!(matches!(s.set_param("intensity", "loud"), Err(MaestroError::InvalidValue { .. })));
        assert!(s.set_param("bpm", "NaN").is_err());
        assert!(s.set_param("key", "").is_err());
        assert!(s.set_param("key", "H min").is_err());
        assert!(s.set_param("key", "C pentatonic").is_err());
        assert!(s.set_param("layer", "kick").is_err());
        assert!(s.set_param("layer", "kick maybe").is_err());
        assert!(s.set_param("layer", "cowbell on").is_err());
        assert_eq!(s.set_param("volume", "3"), Err(MaestroError::UnknownParam("volume".into())));
        assert_eq!(s, before);
    }

    #[test]
    fn test_tempo_clamped_and_positive() {
        let mut s = Settings::default();
        s.set_param("bpm", "0").unwrap();
        assert_eq!(s.tempo, MIN_TEMPO);
        s.set_param("tempo", "1000").unwrap();
        assert_eq!(s.tempo, MAX_TEMPO);
        s.set_param("bpm", "128.5").unwrap();
        assert_eq!(s.tempo, 128.5);
    }

    #[test]
    fn test_set_key_layer_and_effects() {
        let mut s = Settings::default();
        s.set_param("key", "E maj").unwrap();
        assert_eq!(s.key.root(), 4);
        s.set_param("key", "d").unwrap();
        assert_eq!(s.key.name(), "D minor");

        s.set_param("layer", "harmony on").unwrap();
        assert!(s.enabled.contains(Layer::Harmony));
        s.set_param("layer", "kick off").unwrap();
        assert!(!s.enabled.contains(Layer::Kick));

        s.set_param("dist", "150").unwrap();
        assert_eq!(s.effects.distortion, 100);
        s.set_param("reverb", "33").unwrap();
        assert_eq!(s.effects.reverb, 33);
    }

    #[test]
    fn test_section_sets_entry_intensity() {
        let mut s = Settings::default();
        s.set_param("section", "break").unwrap();
        assert_eq!(s.section, Section::Break);
        assert_eq!(s.intensity, 10);
        assert!(matches!(s.set_param("section", "bridge"), Err(MaestroError::UnknownSection(_))));
    }

    #[test]
    fn test_style_round_trip_matches_fresh_application() {
        let mut fresh = Settings::default();
        fresh.apply_style(Style::Rock);

        let mut s = Settings::default();
        s.set_param("reverb", "90").unwrap();
        s.apply_style(Style::Rock);
        s.apply_style(Style::Classical);
        s.apply_style(Style::Rock);

        assert_eq!(s.enabled, fresh.enabled);
        assert_eq!(s.effects, fresh.effects);
        assert_eq!(s.sustain, fresh.sustain);
    }
}
