//! Render-side decision process.
//!
//! `Conductor` is owned by the audio engine and called once per beat
//! boundary. It reads the published [`Settings`], keeps the timeline
//! (beat index, chord, progression, outro) and turns each beat into a batch
//! of [`NoteEvent`]s. Nothing here blocks or grows without bound.

use std::sync::{Arc, PoisonError};

use tracing::{debug, info};

use crate::control::{ConductorHandle, Shared};
use crate::outro::{OutroBeat, OutroPhase, OutroState};
use crate::patch::{DrumKind, Instrument, StringPatch, SynthPatch};
use crate::section::Section;
use crate::settings::Settings;
use crate::style::{EffectKind, EffectLevels, Flourish, Layer, LayerSet, Style};
use crate::theory::{
    Chord, HarmonicRole, Key, Pitches, Progression, ProgressionGenerator, euclidean_rhythm, lead_to_nearest,
    nearest_with_pitch_class, voice_chord,
};

/// Upper bound on events a single beat can emit
pub const MAX_EVENTS_PER_BEAT: usize = 64;

/// One note (or chord) the engine should start on the current beat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub layer: Layer,
    pub instrument: Instrument,
    pub pitches: Pitches,
    /// 0..1
    pub velocity: f32,
    /// Onset within the beat, in beats [0, 1)
    pub offset: f32,
    /// Rhythmic value of the note, in beats
    pub span: f32,
    /// Sounding length after the sustain gate, in beats
    pub length: f32,
    /// Sounding length in seconds at the effective tempo
    pub seconds: f32,
    /// Delay between successive chord tones (strings only)
    pub strum_ms: f32,
}

/// Snapshot of what the render side is doing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConductorState {
    pub settings: Settings,
    pub beat: u64,
    pub chord: Chord,
    pub tempo: f32,
    pub intensity: u8,
    pub layers: LayerSet,
    pub effects: EffectLevels,
    /// Master gain target for the current beat
    pub gain: f32,
    pub outro: OutroState,
}

impl ConductorState {
    fn initial(settings: Settings) -> Self {
        Self {
            settings,
            beat: 0,
            chord: settings.key.chord(HarmonicRole::Tonic, false),
            tempo: settings.tempo,
            intensity: settings.intensity,
            layers: LayerSet::empty(),
            effects: settings.effects,
            gain: 1.0,
            outro: OutroState::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outro.is_done()
    }
}

/// Fraction of a note span that sounds for a sustain setting
pub fn gate_fraction(sustain: u8) -> f32 {
    (10.0 + 0.9 * sustain.min(100) as f32) / 100.0
}

/// Effect levels after intensity lift. Effects set to zero stay off.
fn lifted_effects(levels: EffectLevels, intensity: u8) -> EffectLevels {
    let lift = intensity.saturating_sub(50) / 5;
    let mut out = levels;
    for kind in [EffectKind::Distortion, EffectKind::Chorus, EffectKind::Delay, EffectKind::Reverb] {
        if levels.get(kind) > 0 {
            out = out.boosted(kind, lift);
        }
    }
    out
}

/// Scale-step melody with a pull toward the middle of its range
#[derive(Debug, Clone)]
struct MelodyWalker {
    idx: i32,
    len: i32,
}

impl MelodyWalker {
    fn new(len: i32) -> Self {
        Self { idx: len / 2, len }
    }

    fn step(&mut self, rng: &mut fastrand::Rng) -> i32 {
        let center = self.len / 2;
        let roll = rng.f32();
        let pick = rng.f32();
        let step = if roll < 0.7 {
            if self.idx < center - 2 {
                if pick < 0.5 { 1 } else { 2 }
            } else if self.idx > center + 2 {
                if pick < 0.5 { -1 } else { -2 }
            } else if pick < 0.35 {
                -1
            } else if pick < 0.55 {
                0
            } else {
                1
            }
        } else if roll < 0.9 {
            match pick {
                p if p < 0.15 => -2,
                p if p < 0.5 => -1,
                p if p < 0.85 => 1,
                _ => 2,
            }
        } else {
            match pick {
                p if p < 0.2 => -4,
                p if p < 0.5 => -3,
                p if p < 0.8 => 3,
                _ => 4,
            }
        };
        self.idx = (self.idx + step).clamp(0, self.len - 1);
        self.idx
    }
}

/// Identity of the settings that shape the progression
#[derive(Debug, Clone, Copy, PartialEq)]
struct HarmonicContext {
    key: Key,
    style: Style,
    section: Section,
}

impl From<&Settings> for HarmonicContext {
    fn from(s: &Settings) -> Self {
        Self { key: s.key, style: s.style, section: s.section }
    }
}

pub struct Conductor {
    shared: Arc<Shared>,
    state: ConductorState,
    context: HarmonicContext,
    dirty: bool,
    progression: Progression,
    generator: ProgressionGenerator,
    chord_beats_left: u32,
    chord_changed: bool,
    outro: OutroState,
    rng: fastrand::Rng,
    melody: MelodyWalker,
    prev_bass: Option<u8>,
    prev_pad: Pitches,
    prev_harmony: Pitches,
    prev_rhythm: Pitches,
}

const LEAD_RANGE: i32 = 14;

impl Conductor {
    pub fn new(handle: &ConductorHandle, seed: u64) -> Self {
        let shared = handle.shared.clone();
        let settings = **shared.settings.load();
        Self {
            shared,
            state: ConductorState::initial(settings),
            context: HarmonicContext::from(&settings),
            dirty: true,
            progression: Progression::default(),
            generator: ProgressionGenerator::new(seed),
            chord_beats_left: 0,
            chord_changed: false,
            outro: OutroState::default(),
            rng: fastrand::Rng::with_seed(seed.wrapping_add(1)),
            melody: MelodyWalker::new(LEAD_RANGE),
            prev_bass: None,
            prev_pad: Pitches::default(),
            prev_harmony: Pitches::default(),
            prev_rhythm: Pitches::default(),
        }
    }

    /// Latest published settings. Never blocks.
    pub fn load_settings(&self) -> Settings {
        **self.shared.settings.load()
    }

    pub fn state(&self) -> &ConductorState {
        &self.state
    }

    /// Offer the snapshot to the status board; skipped if a reader holds it
    pub fn publish(&self) {
        if let Ok(mut slot) = self.shared.board.try_lock() {
            *slot = Some(self.state);
        }
    }

    /// Advance one beat and write its note events into `events` (cleared first)
    pub fn advance_beat(&mut self, settings: &Settings, events: &mut Vec<NoteEvent>) {
        events.clear();
        self.state.settings = *settings;

        if !settings.started {
            self.state.tempo = settings.tempo;
            return;
        }

        let context = HarmonicContext::from(settings);
        if context != self.context {
            self.context = context;
            self.dirty = true;
        }

        if settings.outro_requested && self.outro.phase == OutroPhase::Inactive {
            self.outro = OutroState::begin(self.state.tempo, self.state.intensity, self.state.layers);
        }

        if self.outro.phase != OutroPhase::Inactive {
            let beat = self.outro.step();
            self.apply_outro_beat(settings, &beat);
            if !beat.layers.is_empty() || beat.flourish {
                self.emit(settings, events);
            }
            if beat.flourish {
                self.emit_flourish(settings, events);
            }
        } else {
            self.advance_chord(settings);
            self.state.tempo = settings.tempo;
            self.state.intensity = settings.intensity;
            self.state.layers = settings.section.active_layers(settings.enabled, settings.intensity);
            self.state.effects = lifted_effects(settings.effects, settings.intensity);
            self.state.gain = 1.0;
            self.emit(settings, events);
        }

        self.state.outro = self.outro;
        debug!(
            "beat {} chord {} tempo {:.1} layers [{}] events {}",
            self.state.beat,
            self.state.chord,
            self.state.tempo,
            self.state.layers,
            events.len()
        );
        self.state.beat += 1;
    }

    fn advance_chord(&mut self, settings: &Settings) {
        self.chord_changed = false;
        if self.chord_beats_left == 0 {
            if self.dirty || self.progression.is_exhausted() {
                let roles = self.generator.next_roles();
                let sevenths = settings.style != Style::Rock;
                self.progression.refill(&settings.key, roles, settings.section.beats_per_chord(), sevenths);
                self.dirty = false;
            }
            if let Some(step) = self.progression.next_step() {
                self.state.chord = step.chord;
                self.chord_beats_left = step.beats;
                self.chord_changed = true;
            }
        }
        self.chord_beats_left = self.chord_beats_left.saturating_sub(1);
    }

    fn apply_outro_beat(&mut self, settings: &Settings, beat: &OutroBeat) {
        if beat.phase_changed {
            info!("Outro phase: {}", beat.phase.name());
        }
        let chord = settings.key.chord(beat.role, beat.seventh);
        self.chord_changed = chord != self.state.chord || beat.phase_changed;
        self.state.chord = chord;
        self.state.tempo = beat.tempo;
        self.state.intensity = beat.intensity;
        self.state.layers = beat.layers;
        self.state.gain = beat.gain;

        let mut effects = settings.effects.boosted(EffectKind::Reverb, beat.reverb_boost);
        if beat.phase == OutroPhase::Cadence {
            if let Some((kind, amount)) = settings.style.flourish_boost() {
                effects = effects.boosted(kind, amount);
            }
        }
        self.state.effects = effects;
    }

    /// Build an event with gate, velocity and duration derived from the state
    fn note(&self, layer: Layer, instrument: Instrument, pitches: Pitches, accent: f32, offset: f32, span: f32) -> NoteEvent {
        let length = span * gate_fraction(self.state.settings.sustain);
        let intensity = self.state.intensity as f32 / 100.0;
        NoteEvent {
            layer,
            instrument,
            pitches,
            velocity: (layer.base_velocity() * (0.4 + 0.6 * intensity) * accent).clamp(0.0, 1.0),
            offset,
            span,
            length,
            seconds: length * 60.0 / self.state.tempo,
            strum_ms: 0.0,
        }
    }

    fn push(events: &mut Vec<NoteEvent>, event: NoteEvent) {
        if events.len() < MAX_EVENTS_PER_BEAT && !event.pitches.is_empty() {
            events.push(event);
        }
    }

    fn emit(&mut self, settings: &Settings, events: &mut Vec<NoteEvent>) {
        let layers = self.state.layers;
        for layer in layers.iter() {
            match layer {
                Layer::Kick => self.emit_kick(events),
                Layer::Snare => self.emit_snare(events),
                Layer::Hihat => self.emit_hihat(events),
                Layer::Bass => self.emit_bass(settings, events),
                Layer::Rhythm => self.emit_rhythm(settings, events),
                Layer::Pad => self.emit_pad(settings, events),
                Layer::Arp => self.emit_arp(settings, events),
                Layer::Lead => self.emit_lead(settings, events),
                Layer::Harmony => self.emit_harmony(settings, events),
                Layer::Riser => self.emit_riser(settings, events),
            }
        }
    }

    fn bar_position(&self) -> u64 {
        self.state.beat % 4
    }

    fn emit_kick(&mut self, events: &mut Vec<NoteEvent>) {
        let pos = self.bar_position();
        if pos == 0 || (pos == 2 && self.state.intensity > 50) {
            let kick = Instrument::Drum(DrumKind::Kick);
            Self::push(events, self.note(Layer::Kick, kick, Pitches::one(36), 1.0, 0.0, 1.0));
        }
    }

    fn emit_snare(&mut self, events: &mut Vec<NoteEvent>) {
        let pos = self.bar_position();
        let snare = Instrument::Drum(DrumKind::Snare);
        if pos % 2 == 1 {
            Self::push(events, self.note(Layer::Snare, snare, Pitches::one(38), 1.0, 0.0, 1.0));
        }
        if self.state.intensity > 60 && self.rng.f32() < 0.2 {
            Self::push(events, self.note(Layer::Snare, snare, Pitches::one(38), 0.4, 0.75, 0.25));
        }

        // Tom fill closing every fourth bar
        if self.state.beat % 16 == 15 && self.state.intensity > 70 {
            let fill = [DrumKind::HighTom, DrumKind::MidTom, DrumKind::MidTom, DrumKind::LowTom];
            for (i, kind) in fill.into_iter().enumerate() {
                let accent = if i % 2 == 0 { 1.0 } else { 0.85 };
                let tom = self.note(Layer::Snare, Instrument::Drum(kind), Pitches::one(45), accent, i as f32 * 0.25, 0.25);
                Self::push(events, tom);
            }
        }
    }

    fn emit_hihat(&mut self, events: &mut Vec<NoteEvent>) {
        let hits = match self.state.intensity {
            0..=49 => 2,
            50..=79 => 3,
            _ => 4,
        };
        let pattern = euclidean_rhythm(4, hits, 0);
        let open_last = self.state.intensity > 70 && self.bar_position() == 3;
        for step in pattern.hits() {
            let open = open_last && step == 3;
            let kind = if open { DrumKind::OpenHat } else { DrumKind::ClosedHat };
            let accent = if step % 2 == 0 { 1.0 } else { 0.8 };
            let hat = self.note(Layer::Hihat, Instrument::Drum(kind), Pitches::one(42), accent, step as f32 * 0.25, 0.25);
            Self::push(events, hat);
        }
    }

    fn emit_bass(&mut self, settings: &Settings, events: &mut Vec<NoteEvent>) {
        let chord = self.state.chord;
        let root = lead_to_nearest(self.prev_bass, &[chord.root], 28, 52);
        self.prev_bass = Some(root);
        let bass = settings.style.instrument(Layer::Bass);

        if self.state.intensity > 60 && self.bar_position() % 2 == 1 {
            let fifth = chord.pitch_classes().get(2).copied().unwrap_or(chord.root);
            let fifth = nearest_with_pitch_class(fifth, root + 7, 28, 60);
            Self::push(events, self.note(Layer::Bass, bass, Pitches::one(root), 1.0, 0.0, 0.5));
            Self::push(events, self.note(Layer::Bass, bass, Pitches::one(fifth), 0.85, 0.5, 0.5));
        } else {
            Self::push(events, self.note(Layer::Bass, bass, Pitches::one(root), 1.0, 0.0, 1.0));
        }
    }

    fn emit_rhythm(&mut self, settings: &Settings, events: &mut Vec<NoteEvent>) {
        let chord = self.state.chord;
        let pos = self.bar_position();
        let intensity = self.state.intensity;
        let instrument = settings.style.instrument(Layer::Rhythm);

        match instrument {
            Instrument::String(StringPatch::Crunch) | Instrument::String(StringPatch::Muted) => {
                // Power chord: root, fifth, octave
                let root = nearest_with_pitch_class(chord.root, 43, 40, 55);
                let power = Pitches::from_slice(&[root, root + 7, root + 12]);
                if pos % 2 == 0 {
                    let mut hit = self.note(Layer::Rhythm, instrument, power, 1.0, 0.0, 1.0);
                    hit.strum_ms = 10.0;
                    Self::push(events, hit);
                } else if intensity > 70 {
                    let muted = Instrument::String(StringPatch::Muted);
                    for half in 0..2 {
                        let chug = self.note(Layer::Rhythm, muted, Pitches::one(root), 0.6, half as f32 * 0.5, 0.5);
                        Self::push(events, chug);
                    }
                } else if intensity > 50 {
                    let mut hit = self.note(Layer::Rhythm, instrument, power, 0.7, 0.0, 0.5);
                    hit.strum_ms = 10.0;
                    Self::push(events, hit);
                }
            }
            Instrument::String(StringPatch::Clean) => {
                let voiced = voice_chord(self.prev_rhythm.as_slice(), &chord, 52, 76);
                self.prev_rhythm = voiced;
                let accent = if pos % 2 == 0 { 1.0 } else { 0.75 };
                let mut down = self.note(Layer::Rhythm, instrument, voiced, accent, 0.0, 0.5);
                down.strum_ms = 30.0;
                Self::push(events, down);

                if intensity > 30 {
                    let notes = voiced.as_slice();
                    let top = Pitches::from_slice(&notes[notes.len().saturating_sub(3)..]);
                    let mut up = self.note(Layer::Rhythm, instrument, top, 0.6, 0.5, 0.25);
                    up.strum_ms = 15.0;
                    Self::push(events, up);
                }
            }
            _ => {
                let voiced = voice_chord(self.prev_rhythm.as_slice(), &chord, 52, 76);
                self.prev_rhythm = voiced;
                let offset = if instrument == Instrument::Synth(SynthPatch::Pad) { 0.5 } else { 0.0 };
                Self::push(events, self.note(Layer::Rhythm, instrument, voiced, 0.8, offset, 0.5));
            }
        }
    }

    fn emit_pad(&mut self, settings: &Settings, events: &mut Vec<NoteEvent>) {
        if !(self.chord_changed || self.bar_position() == 0) {
            return;
        }
        let voiced = voice_chord(self.prev_pad.as_slice(), &self.state.chord, 48, 72);
        self.prev_pad = voiced;
        let span = if self.outro.is_active() {
            1.0
        } else {
            (self.chord_beats_left + 1).min(4) as f32
        };
        let pad = settings.style.instrument(Layer::Pad);
        Self::push(events, self.note(Layer::Pad, pad, voiced, 1.0, 0.0, span));
    }

    fn emit_arp(&mut self, settings: &Settings, events: &mut Vec<NoteEvent>) {
        let voiced = voice_chord(&[], &self.state.chord, 72, 96);
        let notes = voiced.as_slice();
        if notes.is_empty() {
            return;
        }
        let arp = settings.style.instrument(Layer::Arp);
        for i in 0..4u64 {
            let note = notes[((self.state.beat * 4 + i) % notes.len() as u64) as usize];
            let accent = if i == 0 { 1.0 } else { 0.8 };
            Self::push(events, self.note(Layer::Arp, arp, Pitches::one(note), accent, i as f32 * 0.25, 0.25));
        }
    }

    fn lead_base(&self, settings: &Settings) -> u8 {
        let octave = match settings.style {
            Style::Edm => 60,
            _ => 48,
        };
        octave + settings.key.root()
    }

    fn emit_lead(&mut self, settings: &Settings, events: &mut Vec<NoteEvent>) {
        let base = self.lead_base(settings);
        let lead = settings.style.instrument(Layer::Lead);
        let intensity = self.state.intensity;

        // (offset, span) pairs for this beat
        let mut rhythm = [(0.0f32, 1.0f32); 4];
        let count = match settings.style {
            Style::Rock if intensity > 70 => {
                rhythm[0] = (0.0, 0.5);
                rhythm[1] = (0.5, 0.5);
                2
            }
            Style::Edm if intensity > 70 => {
                for (i, slot) in rhythm.iter_mut().enumerate() {
                    *slot = (i as f32 * 0.25, 0.25);
                }
                4
            }
            Style::Pop if intensity > 60 && self.rng.f32() < 0.6 => {
                rhythm[0] = (0.0, 0.5);
                rhythm[1] = (0.5, 0.5);
                2
            }
            Style::Classical => {
                let roll = self.rng.f32();
                if intensity > 60 && roll < 0.3 {
                    for (i, slot) in rhythm.iter_mut().enumerate() {
                        *slot = (i as f32 * 0.25, 0.25);
                    }
                    4
                } else if roll < 0.5 {
                    rhythm[0] = (0.0, 0.75);
                    rhythm[1] = (0.75, 0.25);
                    2
                } else if roll < 0.75 {
                    rhythm[0] = (0.0, 0.5);
                    rhythm[1] = (0.5, 0.5);
                    2
                } else {
                    1
                }
            }
            _ => 1,
        };

        for &(offset, span) in &rhythm[..count] {
            let idx = self.melody.step(&mut self.rng);
            let mut note = settings.key.scale_note(base, idx);
            if settings.style == Style::Pop && intensity > 50 && self.rng.f32() < 0.15 {
                note = note.saturating_add(12).min(96);
            }
            let accent = if offset == 0.0 { 1.0 } else { 0.85 };
            Self::push(events, self.note(Layer::Lead, lead, Pitches::one(note), accent, offset, span));
        }
    }

    fn emit_harmony(&mut self, settings: &Settings, events: &mut Vec<NoteEvent>) {
        let pos = self.bar_position();
        if pos % 2 != 0 && !self.chord_changed {
            return;
        }
        let chord = self.state.chord;
        // Upper chord tones only; the bass and pad carry the root
        let upper = &chord.pitch_classes()[1..];
        let mut voiced = Pitches::default();
        let prev = self.prev_harmony.as_slice();
        for (i, &pc) in upper.iter().enumerate() {
            let target = prev.get(i).copied().unwrap_or(64 + 4 * i as u8);
            voiced.push(nearest_with_pitch_class(pc, target, 60, 84));
        }
        voiced.sort();
        self.prev_harmony = voiced;
        let span = if self.outro.is_active() { 1.0 } else { 2.0 };
        let harmony = settings.style.instrument(Layer::Harmony);
        let mut event = self.note(Layer::Harmony, harmony, voiced, 1.0, 0.0, span);
        if matches!(harmony, Instrument::String(_)) {
            event.strum_ms = 20.0;
        }
        Self::push(events, event);
    }

    fn emit_riser(&mut self, settings: &Settings, events: &mut Vec<NoteEvent>) {
        let loop_pos = self.state.beat % 16;
        if loop_pos < 12 || self.state.intensity <= 40 {
            return;
        }
        let progress = (loop_pos - 11) as f32 / 4.0;
        let root = nearest_with_pitch_class(self.state.chord.root, 60, 48, 72);
        let riser = settings.style.instrument(Layer::Riser);
        Self::push(events, self.note(Layer::Riser, riser, Pitches::one(root), progress, 0.0, 1.0));
    }

    fn emit_flourish(&mut self, settings: &Settings, events: &mut Vec<NoteEvent>) {
        let chord = self.state.chord;
        let flourish = settings.style.flourish();
        info!("Cadence flourish: {:?}", flourish);
        let (instrument, pitches, strum_ms) = match flourish {
            Flourish::PowerChord => {
                let root = nearest_with_pitch_class(chord.root, 43, 40, 55);
                (
                    Instrument::String(StringPatch::Crunch),
                    Pitches::from_slice(&[root, root + 7, root + 12]),
                    20.0,
                )
            }
            Flourish::ChorusShimmer => {
                let voiced = voice_chord(&[], &chord, 60, 84);
                let notes = voiced.as_slice();
                (Instrument::String(StringPatch::Clean), Pitches::from_slice(&notes[..notes.len().min(3)]), 40.0)
            }
            Flourish::FilterSweep => {
                let voiced = voice_chord(&[], &chord, 48, 72);
                let notes = voiced.as_slice();
                (Instrument::Synth(SynthPatch::Sweep), Pitches::from_slice(&notes[..notes.len().min(3)]), 0.0)
            }
            Flourish::StringSwell => {
                let voiced = voice_chord(&[], &chord, 43, 67);
                let notes = voiced.as_slice();
                (Instrument::Synth(SynthPatch::Strings), Pitches::from_slice(&notes[..notes.len().min(3)]), 0.0)
            }
        };
        let mut event = self.note(Layer::Harmony, instrument, pitches, 1.0, 0.0, 1.5);
        event.strum_ms = strum_ms;
        Self::push(events, event);
    }

    pub fn is_finished(&self) -> bool {
        self.outro.is_done()
    }
}

impl Drop for Conductor {
    fn drop(&mut self) {
        // Leave the final snapshot for late status readers
        let mut slot = self.shared.board.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(handle: &ConductorHandle) -> Conductor {
        handle.start();
        Conductor::new(handle, 7)
    }

    fn run_beats(conductor: &mut Conductor, beats: usize) -> Vec<Vec<NoteEvent>> {
        let mut out = Vec::new();
        for _ in 0..beats {
            let settings = conductor.load_settings();
            let mut events = Vec::with_capacity(MAX_EVENTS_PER_BEAT);
            conductor.advance_beat(&settings, &mut events);
            out.push(events);
        }
        out
    }

    #[test]
    fn test_setup_is_silent() {
        let handle = ConductorHandle::default();
        let mut conductor = Conductor::new(&handle, 1);
        let beats = run_beats(&mut conductor, 4);
        assert!(beats.iter().all(|e| e.is_empty()));
        assert_eq!(conductor.state().beat, 0);
    }

    #[test]
    fn test_sustain_gates_bass_duration() {
        for (sustain, expected) in [("100", 0.5f32), ("0", 0.05f32)] {
            let handle = ConductorHandle::default();
            handle.set_param("bpm", "120").unwrap();
            handle.set_param("intensity", "50").unwrap();
            handle.set_param("sustain", sustain).unwrap();
            let mut conductor = started(&handle);

            let beats = run_beats(&mut conductor, 8);
            let quarters: Vec<&NoteEvent> = beats
                .iter()
                .flatten()
                .filter(|e| e.layer == Layer::Bass && e.span == 1.0)
                .collect();
            assert!(!quarters.is_empty());
            for event in quarters {
                assert!((event.seconds - expected).abs() < 1e-5, "sustain {sustain}: {}", event.seconds);
            }
        }
    }

    #[test]
    fn test_legato_fills_span() {
        let handle = ConductorHandle::default();
        handle.set_param("sustain", "100").unwrap();
        let mut conductor = started(&handle);
        for event in run_beats(&mut conductor, 8).iter().flatten() {
            assert_eq!(event.length, event.span);
        }
    }

    #[test]
    fn test_only_active_layers_emit() {
        let handle = ConductorHandle::default();
        handle.set_param("section", "break").unwrap();
        let mut conductor = started(&handle);
        let beats = run_beats(&mut conductor, 16);
        let allowed = Section::Break.allowed().union(Section::Break.forced());
        for event in beats.iter().flatten() {
            assert!(allowed.contains(event.layer), "{} leaked", event.layer);
        }
        assert!(beats.iter().flatten().any(|e| e.layer == Layer::Pad));
    }

    #[test]
    fn test_velocity_tracks_intensity() {
        let handle = ConductorHandle::default();
        handle.set_param("intensity", "100").unwrap();
        let mut conductor = started(&handle);
        let loud = run_beats(&mut conductor, 1)[0]
            .iter()
            .find(|e| e.layer == Layer::Kick)
            .map(|e| e.velocity)
            .unwrap();
        assert!((loud - Layer::Kick.base_velocity()).abs() < 1e-5);

        let handle = ConductorHandle::default();
        handle.set_param("intensity", "20").unwrap();
        let mut conductor = started(&handle);
        let soft = run_beats(&mut conductor, 1)[0]
            .iter()
            .find(|e| e.layer == Layer::Kick)
            .map(|e| e.velocity)
            .unwrap();
        assert!(soft < loud);
    }

    #[test]
    fn test_key_change_regenerates_progression_at_next_chord() {
        let handle = ConductorHandle::default();
        let mut conductor = started(&handle);
        run_beats(&mut conductor, 2);
        handle.set_param("key", "E maj").unwrap();
        run_beats(&mut conductor, 4);
        let key = handle.settings().key;
        let chord = conductor.state().chord;
        let diatonic = (0..7).any(|d| key.degree_pitch_class(d) == chord.root);
        assert!(diatonic, "{chord} not in {}", key.name());
    }

    #[test]
    fn test_outro_runs_to_done_and_ignores_second_trigger() {
        let handle = ConductorHandle::default();
        handle.set_param("intensity", "90").unwrap();
        let mut conductor = started(&handle);
        run_beats(&mut conductor, 5);
        let entry_tempo = conductor.state().tempo;

        handle.trigger_outro();
        run_beats(&mut conductor, 3);
        assert_eq!(conductor.state().outro.phase, OutroPhase::Approach);
        let beats_in = conductor.state().outro.beats_in_phase;

        // Mid-approach retrigger changes nothing
        assert!(!handle.trigger_outro());
        run_beats(&mut conductor, 1);
        assert_eq!(conductor.state().outro.phase, OutroPhase::Approach);
        assert_eq!(conductor.state().outro.beats_in_phase, beats_in + 1);

        let mut phases = vec![OutroPhase::Approach];
        let mut gains = Vec::new();
        let mut flourishes = 0;
        for _ in 0..40 {
            let settings = conductor.load_settings();
            let mut events = Vec::new();
            conductor.advance_beat(&settings, &mut events);
            let state = conductor.state();
            if phases.last() != Some(&state.outro.phase) {
                phases.push(state.outro.phase);
            }
            if state.outro.phase >= OutroPhase::Cadence {
                gains.push(state.gain);
            }
            if state.outro.phase == OutroPhase::Cadence && state.outro.beats_in_phase == 0 {
                flourishes += events.iter().filter(|e| e.span == 1.5).count();
            }
            assert!(state.tempo <= entry_tempo + 1e-3);
        }
        assert_eq!(
            phases,
            vec![OutroPhase::Approach, OutroPhase::Cadence, OutroPhase::RingOut, OutroPhase::Done]
        );
        assert!(gains.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(flourishes, 1);
        assert!(conductor.is_finished());
    }

    #[test]
    fn test_cadence_keeps_only_harmonic_layers() {
        let handle = ConductorHandle::default();
        handle.set_param("intensity", "100").unwrap();
        let mut conductor = started(&handle);
        run_beats(&mut conductor, 4);
        handle.trigger_outro();
        let beats = run_beats(&mut conductor, 16);
        // Beats 8..16 after the trigger are the cadence
        for event in beats[8..].iter().flatten() {
            assert!(matches!(event.layer, Layer::Pad | Layer::Harmony));
        }
        assert!(conductor.state().effects.reverb >= 15);
    }

    #[test]
    fn test_events_stay_bounded() {
        let handle = ConductorHandle::default();
        handle.set_param("intensity", "100").unwrap();
        handle.set_param("section", "build").unwrap();
        handle.set_param("intensity", "100").unwrap();
        for layer in Layer::ALL {
            handle.set_param("layer", &format!("{} on", layer.name())).unwrap();
        }
        let mut conductor = started(&handle);
        for events in run_beats(&mut conductor, 64) {
            assert!(events.len() <= MAX_EVENTS_PER_BEAT);
            for e in &events {
                assert!(e.offset >= 0.0 && e.offset < 1.0);
                assert!(e.velocity > 0.0 && e.velocity <= 1.0);
            }
        }
    }

    #[test]
    fn test_snapshot_reaches_status_board() {
        let handle = ConductorHandle::default();
        let mut conductor = started(&handle);
        run_beats(&mut conductor, 3);
        conductor.publish();
        let snapshot = handle.status().snapshot.unwrap();
        assert_eq!(snapshot.beat, 3);
        assert!(snapshot.settings.started);
    }
}
