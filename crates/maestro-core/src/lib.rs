//! maestro-core: Music theory, arrangement and the conductor for the maestro engine

pub mod conductor;
pub mod control;
mod error;
pub mod outro;
pub mod patch;
pub mod section;
pub mod settings;
pub mod style;
pub mod theory;

pub use conductor::{Conductor, ConductorState, MAX_EVENTS_PER_BEAT, NoteEvent, gate_fraction};
pub use control::{ConductorHandle, Status};
pub use error::{MaestroError, Result};
pub use outro::{OutroBeat, OutroPhase, OutroState, PHASE_BEATS};
pub use patch::{Bus, DrumKind, Instrument, StringPatch, SynthPatch};
pub use section::Section;
pub use settings::{MAX_TEMPO, MIN_TEMPO, Param, Settings};
pub use style::{EffectKind, EffectLevels, Flourish, Layer, LayerSet, Style, StylePreset};
pub use theory::{
    Chord, ChordQuality, HarmonicRole, Key, Pitches, Progression, ProgressionGenerator, ScaleMode, StepPattern,
    euclidean_rhythm, lead_to_nearest, midi_to_freq, nearest_with_pitch_class, parse_pitch_class, voice_chord,
};
