//! Three-phase ending: approach, cadence, ring-out.
//!
//! The machine advances one step per beat and only ever moves forward.
//! Each step yields an [`OutroBeat`] describing what the ensemble plays on
//! that beat; the conductor turns it into chords, layers and note events.

use serde::{Deserialize, Serialize};

use crate::settings::MIN_TEMPO;
use crate::style::{Layer, LayerSet};
use crate::theory::HarmonicRole;

/// Beats spent in each of Approach, Cadence and RingOut
pub const PHASE_BEATS: u32 = 8;

/// Order in which non-harmonic layers leave during the approach, one per beat
const DROP_ORDER: [Layer; 7] = [
    Layer::Riser,
    Layer::Kick,
    Layer::Hihat,
    Layer::Snare,
    Layer::Arp,
    Layer::Rhythm,
    Layer::Bass,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OutroPhase {
    #[default]
    Inactive,
    Approach,
    Cadence,
    RingOut,
    Done,
}

impl OutroPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Approach => "approach",
            Self::Cadence => "cadence",
            Self::RingOut => "ring-out",
            Self::Done => "done",
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Inactive => Self::Inactive,
            Self::Approach => Self::Cadence,
            Self::Cadence => Self::RingOut,
            Self::RingOut | Self::Done => Self::Done,
        }
    }
}

/// What the ensemble does on one outro beat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutroBeat {
    pub phase: OutroPhase,
    pub role: HarmonicRole,
    pub seventh: bool,
    pub tempo: f32,
    pub intensity: u8,
    pub layers: LayerSet,
    /// Master gain the engine ramps toward across this beat
    pub gain: f32,
    pub reverb_boost: u8,
    /// True exactly once: the first cadence beat
    pub flourish: bool,
    pub phase_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutroState {
    pub phase: OutroPhase,
    /// Zero-based index of the sounding beat within `phase`
    pub beats_in_phase: u32,
    pub entry_tempo: f32,
    pub entry_intensity: u8,
    pub entry_layers: LayerSet,
    pub gain: f32,
    fresh: bool,
}

impl Default for OutroState {
    fn default() -> Self {
        Self {
            phase: OutroPhase::Inactive,
            beats_in_phase: 0,
            entry_tempo: 0.0,
            entry_intensity: 0,
            entry_layers: LayerSet::empty(),
            gain: 1.0,
            fresh: false,
        }
    }
}

impl OutroState {
    /// Enter the approach, capturing where the performance stood
    pub fn begin(tempo: f32, intensity: u8, layers: LayerSet) -> Self {
        Self {
            phase: OutroPhase::Approach,
            beats_in_phase: 0,
            entry_tempo: tempo,
            entry_intensity: intensity,
            entry_layers: layers,
            gain: 1.0,
            fresh: true,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.phase, OutroPhase::Inactive | OutroPhase::Done)
    }

    pub fn is_done(&self) -> bool {
        self.phase == OutroPhase::Done
    }

    fn approach_tempo(&self) -> f32 {
        (self.entry_tempo * 0.8).max(MIN_TEMPO)
    }

    fn floor_tempo(&self) -> f32 {
        (self.entry_tempo * 0.6).max(MIN_TEMPO)
    }

    /// Move to the next beat and describe it. Calling on an inactive state
    /// returns a silent beat without changing anything.
    pub fn step(&mut self) -> OutroBeat {
        let before = self.phase;
        let first = self.fresh;
        if self.fresh {
            self.fresh = false;
        } else if self.is_active() {
            self.beats_in_phase += 1;
            if self.beats_in_phase >= PHASE_BEATS {
                self.phase = self.phase.next();
                self.beats_in_phase = 0;
            }
        }

        let b = self.beats_in_phase;
        // Progress through the phase after this beat, in (0, 1]
        let p = (b + 1) as f32 / PHASE_BEATS as f32;
        let entry = self.entry_intensity as f32;
        let harmonic = LayerSet::of(&[Layer::Pad, Layer::Harmony]);

        let mut beat = OutroBeat {
            phase: self.phase,
            role: HarmonicRole::Tonic,
            seventh: false,
            tempo: self.floor_tempo(),
            intensity: 0,
            layers: LayerSet::empty(),
            gain: 0.0,
            reverb_boost: 0,
            flourish: false,
            phase_changed: first || self.phase != before,
        };

        match self.phase {
            OutroPhase::Approach => {
                beat.tempo = self.entry_tempo + (self.approach_tempo() - self.entry_tempo) * p;
                beat.role = if b < 4 { HarmonicRole::Subdominant } else { HarmonicRole::Supertonic };
                let mut layers = self.entry_layers;
                for layer in DROP_ORDER.iter().take(b as usize + 1) {
                    layers.remove(*layer);
                }
                beat.layers = layers;
                beat.intensity = (entry * (1.0 - 0.4 * p)).round() as u8;
                beat.gain = 1.0;
            }
            OutroPhase::Cadence => {
                beat.tempo = self.approach_tempo() + (self.floor_tempo() - self.approach_tempo()) * p;
                beat.role = if b < 4 { HarmonicRole::Dominant } else { HarmonicRole::Tonic };
                beat.seventh = b < 4;
                beat.layers = harmonic;
                beat.intensity = (entry * (0.6 - 0.2 * p)).round() as u8;
                beat.gain = 1.0;
                beat.reverb_boost = 15;
                beat.flourish = b == 0;
            }
            OutroPhase::RingOut => {
                beat.layers = if b < 4 { harmonic } else { LayerSet::of(&[Layer::Pad]) };
                beat.intensity = (entry * (0.4 - 0.3 * p)).round() as u8;
                beat.gain = (1.0 - p).max(0.0);
                beat.reverb_boost = 30;
            }
            OutroPhase::Done => {
                beat.reverb_boost = 30;
            }
            OutroPhase::Inactive => {
                beat.tempo = self.entry_tempo;
                beat.gain = 1.0;
            }
        }

        beat.tempo = beat.tempo.max(MIN_TEMPO);
        self.gain = beat.gain;
        beat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_end(state: &mut OutroState) -> Vec<OutroBeat> {
        let mut beats = Vec::new();
        for _ in 0..(PHASE_BEATS * 3 + 4) {
            beats.push(state.step());
        }
        beats
    }

    #[test]
    fn test_phases_visit_in_order_and_never_revisit() {
        let mut state = OutroState::begin(120.0, 80, LayerSet::all());
        let beats = run_to_end(&mut state);

        let mut order: Vec<OutroPhase> = beats.iter().map(|b| b.phase).collect();
        order.dedup();
        assert_eq!(
            order,
            vec![OutroPhase::Approach, OutroPhase::Cadence, OutroPhase::RingOut, OutroPhase::Done]
        );
        assert!(beats.windows(2).all(|w| w[0].phase <= w[1].phase));
        assert!(state.is_done());
    }

    #[test]
    fn test_gain_never_rises_after_cadence() {
        let mut state = OutroState::begin(100.0, 60, LayerSet::all());
        let beats = run_to_end(&mut state);
        let tail: Vec<f32> = beats
            .iter()
            .filter(|b| b.phase >= OutroPhase::Cadence)
            .map(|b| b.gain)
            .collect();
        assert!(tail.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(*tail.last().unwrap(), 0.0);

        let last_ring = beats.iter().rev().find(|b| b.phase == OutroPhase::RingOut).unwrap();
        assert_eq!(last_ring.gain, 0.0);
    }

    #[test]
    fn test_approach_ritardando_and_chords() {
        let mut state = OutroState::begin(100.0, 60, LayerSet::all());
        let beats = run_to_end(&mut state);

        let approach: Vec<&OutroBeat> = beats.iter().filter(|b| b.phase == OutroPhase::Approach).collect();
        assert_eq!(approach.len(), PHASE_BEATS as usize);
        assert!(approach.windows(2).all(|w| w[1].tempo < w[0].tempo));
        assert!((approach[7].tempo - 80.0).abs() < 1e-3);
        assert_eq!(approach[0].role, HarmonicRole::Subdominant);
        assert_eq!(approach[4].role, HarmonicRole::Supertonic);

        // One layer per beat leaves, harmonic ones stay
        assert!(!approach[0].layers.contains(Layer::Riser));
        assert!(approach[0].layers.contains(Layer::Kick));
        assert!(!approach[1].layers.contains(Layer::Kick));
        assert!(!approach[6].layers.contains(Layer::Bass));
        assert!(approach[7].layers.contains(Layer::Pad));

        let cadence: Vec<&OutroBeat> = beats.iter().filter(|b| b.phase == OutroPhase::Cadence).collect();
        assert!((cadence[7].tempo - 60.0).abs() < 1e-3);
        assert_eq!((cadence[0].role, cadence[0].seventh), (HarmonicRole::Dominant, true));
        assert_eq!(cadence[4].role, HarmonicRole::Tonic);
        assert_eq!(cadence.iter().filter(|b| b.flourish).count(), 1);
        assert!(cadence[0].flourish);
    }

    #[test]
    fn test_tempo_floor_never_below_minimum() {
        let mut state = OutroState::begin(MIN_TEMPO, 50, LayerSet::all());
        for beat in run_to_end(&mut state) {
            assert!(beat.tempo >= MIN_TEMPO);
        }
    }

    #[test]
    fn test_inactive_step_is_inert() {
        let mut state = OutroState::default();
        let beat = state.step();
        assert_eq!(beat.phase, OutroPhase::Inactive);
        assert_eq!(state.phase, OutroPhase::Inactive);
    }
}
