//! maestro-services: Voices, effects, the render engine and audio output

pub mod audio_io;
pub mod effects;
pub mod engine;
pub mod voices;

pub use audio_io::{CpalSink, MemorySink, OutputSink, SinkError};
pub use effects::{AudioEffect, EffectChain, LinearRamp};
pub use engine::{AudioEngine, EngineConfig, EngineError, RunOutcome};
pub use voices::{DrumVoice, StringVoice, SynthVoice, Voice, VoiceParams, VoicePool};
