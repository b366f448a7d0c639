//! Music theory: keys, diatonic chords, progressions, voice leading and step patterns

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MaestroError, Result};

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Parse a note name (`C`, `c#`, `Db`, `Bb`...) into a pitch class 0-11
pub fn parse_pitch_class(name: &str) -> Result<u8> {
    let mut chars = name.trim().chars();
    let letter = chars
        .next()
        .ok_or_else(|| MaestroError::UnknownNote(name.to_string()))?;

    let natural: i8 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(MaestroError::UnknownNote(name.to_string())),
    };

    let accidental: i8 = match chars.as_str() {
        "" => 0,
        "#" | "s" => 1,
        "b" => -1,
        _ => return Err(MaestroError::UnknownNote(name.to_string())),
    };

    Ok((natural + accidental).rem_euclid(12) as u8)
}

pub fn pitch_class_name(pc: u8) -> &'static str {
    NOTE_NAMES[(pc % 12) as usize]
}

/// Frequency in Hz of a MIDI note (A4 = 69 = 440 Hz)
pub fn midi_to_freq(note: f32) -> f32 {
    440.0 * 2.0_f32.powf((note - 69.0) / 12.0)
}

// ============================================================================
// Euclidean step patterns
// ============================================================================

/// Up to 16 steps packed into a bitmask, step 0 in the lowest bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPattern {
    mask: u16,
    steps: u8,
}

impl StepPattern {
    pub fn steps(&self) -> u8 {
        self.steps
    }

    pub fn is_hit(&self, step: u8) -> bool {
        step < self.steps && self.mask & (1 << step) != 0
    }

    pub fn hits(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.steps).filter(|&s| self.is_hit(s))
    }
}

/// Distribute `hits` onsets as evenly as possible over `steps` (max 16).
///
/// Uses the modular form of Bjorklund's distribution; it needs no scratch
/// buffers so it is safe to call from the render thread.
///
/// # Example
/// ```
/// use maestro_core::euclidean_rhythm;
/// let p = euclidean_rhythm(8, 3, 0);
/// assert_eq!(p.hits().collect::<Vec<_>>(), vec![0, 3, 6]);
/// ```
pub fn euclidean_rhythm(steps: u8, hits: u8, rotation: u8) -> StepPattern {
    let steps = steps.min(16);
    if steps == 0 {
        return StepPattern { mask: 0, steps: 0 };
    }
    let hits = hits.min(steps) as u32;
    let mut mask = 0u16;
    for i in 0..steps as u32 {
        if (i * hits) % (steps as u32) < hits {
            let rotated = (i + steps as u32 - (rotation as u32 % steps as u32)) % steps as u32;
            mask |= 1 << rotated;
        }
    }
    StepPattern { mask, steps }
}

// ============================================================================
// Scale and Chord Types
// ============================================================================

/// Scale/mode types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleMode {
    Major,
    Minor,
    HarmonicMinor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    Pentatonic,
    Blues,
    Chromatic,
}

impl ScaleMode {
    /// Get scale intervals (semitones from root)
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            Self::Major => &[0, 2, 4, 5, 7, 9, 11],
            Self::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Self::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Self::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Self::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            Self::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            Self::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Self::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            Self::Pentatonic => &[0, 3, 5, 7, 10],
            Self::Blues => &[0, 3, 5, 6, 7, 10],
            Self::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::HarmonicMinor => "harmonic minor",
            Self::Dorian => "dorian",
            Self::Phrygian => "phrygian",
            Self::Lydian => "lydian",
            Self::Mixolydian => "mixolydian",
            Self::Locrian => "locrian",
            Self::Pentatonic => "pentatonic",
            Self::Blues => "blues",
            Self::Chromatic => "chromatic",
        }
    }

    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "maj" | "major" | "ionian" => Some(Self::Major),
            "min" | "minor" | "aeolian" => Some(Self::Minor),
            "harm" | "harmonic" => Some(Self::HarmonicMinor),
            "dorian" => Some(Self::Dorian),
            "phrygian" => Some(Self::Phrygian),
            "lydian" => Some(Self::Lydian),
            "mixolydian" | "mixo" => Some(Self::Mixolydian),
            "locrian" => Some(Self::Locrian),
            "pent" | "pentatonic" => Some(Self::Pentatonic),
            "blues" => Some(Self::Blues),
            "chromatic" => Some(Self::Chromatic),
            _ => None,
        }
    }

    /// Seven-note modes can stack diatonic thirds on every degree
    pub fn is_heptatonic(&self) -> bool {
        self.intervals().len() == 7
    }

    /// Minor-family modes borrow the raised leading tone for their dominant
    fn raises_leading_tone(&self) -> bool {
        matches!(self, Self::Minor | Self::HarmonicMinor | Self::Dorian)
    }
}

/// Chord quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Major7,
    Minor7,
    Dominant7,
    Diminished7,
    HalfDiminished7,
    MinorMajor7,
}

impl ChordQuality {
    /// Classify stacked thirds given semitone offsets of third, fifth and optional seventh
    fn from_intervals(third: u8, fifth: u8, seventh: Option<u8>) -> Self {
        let triad = match (third, fifth) {
            (4, 7) => Self::Major,
            (3, 6) => Self::Diminished,
            (4, 8) => Self::Augmented,
            _ => Self::Minor,
        };
        match (triad, seventh) {
            (_, None) => triad,
            (Self::Major, Some(10)) => Self::Dominant7,
            (Self::Major, Some(_)) => Self::Major7,
            (Self::Minor, Some(10)) => Self::Minor7,
            (Self::Minor, Some(_)) => Self::MinorMajor7,
            (Self::Diminished, Some(9)) => Self::Diminished7,
            (Self::Diminished, Some(_)) => Self::HalfDiminished7,
            (_, Some(_)) => Self::Major7,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Major => "",
            Self::Minor => "m",
            Self::Diminished => "dim",
            Self::Augmented => "aug",
            Self::Major7 => "maj7",
            Self::Minor7 => "m7",
            Self::Dominant7 => "7",
            Self::Diminished7 => "dim7",
            Self::HalfDiminished7 => "m7b5",
            Self::MinorMajor7 => "m(maj7)",
        }
    }
}

/// Functional role of a chord within a key (scale degrees I-VII)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarmonicRole {
    Tonic,
    Supertonic,
    Mediant,
    Subdominant,
    Dominant,
    Submediant,
    LeadingTone,
}

impl HarmonicRole {
    /// Zero-based scale degree index
    pub fn degree_index(&self) -> usize {
        match self {
            Self::Tonic => 0,
            Self::Supertonic => 1,
            Self::Mediant => 2,
            Self::Subdominant => 3,
            Self::Dominant => 4,
            Self::Submediant => 5,
            Self::LeadingTone => 6,
        }
    }
}

// ============================================================================
// Key and Chord
// ============================================================================

/// A root pitch class plus a mode that can carry functional harmony
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    root: u8,
    mode: ScaleMode,
}

impl Default for Key {
    fn default() -> Self {
        Self { root: 9, mode: ScaleMode::Minor }
    }
}

impl Key {
    pub fn new(root: u8, mode: ScaleMode) -> Result<Self> {
        if !mode.is_heptatonic() {
            return Err(MaestroError::InvalidScale(mode.name().to_string()));
        }
        Ok(Self { root: root % 12, mode })
    }

    /// Parse `"A"`, `"A min"`, `"F# dorian"`; the mode defaults to minor
    pub fn parse(note: &str, mode: Option<&str>) -> Result<Self> {
        let root = parse_pitch_class(note)?;
        let mode = match mode {
            None => ScaleMode::Minor,
            Some(word) => ScaleMode::parse(word)
                .ok_or_else(|| MaestroError::InvalidScale(word.to_string()))?,
        };
        Self::new(root, mode)
    }

    pub fn root(&self) -> u8 {
        self.root
    }

    pub fn mode(&self) -> ScaleMode {
        self.mode
    }

    /// Pitch class of a zero-based scale degree, wrapping across octaves
    pub fn degree_pitch_class(&self, degree: usize) -> u8 {
        let intervals = self.mode.intervals();
        (self.root + intervals[degree % intervals.len()]) % 12
    }

    /// MIDI note of scale step `index` counted upward from the tonic at `base`
    pub fn scale_note(&self, base: u8, index: i32) -> u8 {
        let intervals = self.mode.intervals();
        let len = intervals.len() as i32;
        let octave = index.div_euclid(len);
        let step = index.rem_euclid(len) as usize;
        let note = base as i32 + octave * 12 + intervals[step] as i32;
        note.clamp(0, 127) as u8
    }

    /// Diatonic chord (stacked thirds) on the degree of `role`
    pub fn chord(&self, role: HarmonicRole, seventh: bool) -> Chord {
        let intervals = self.mode.intervals();
        let idx = role.degree_index();
        let root_interval = intervals[idx];

        let above_root = |offset: usize| -> u8 {
            let i = idx + offset;
            let mut interval = intervals[i % 7] + if i >= 7 { 12 } else { 0 };
            // V in minor takes the raised leading tone (harmonic minor)
            if role == HarmonicRole::Dominant && offset == 2 && self.mode.raises_leading_tone() {
                interval = 11 + if i >= 7 { 12 } else { 0 };
            }
            interval - root_interval
        };

        let third = above_root(2);
        let fifth = above_root(4);
        let seventh_iv = seventh.then(|| above_root(6));

        let root = (self.root + root_interval) % 12;
        let mut tones = [root; 4];
        tones[1] = (root + third) % 12;
        tones[2] = (root + fifth) % 12;
        let len = if let Some(s) = seventh_iv {
            tones[3] = (root + s) % 12;
            4
        } else {
            3
        };

        Chord {
            root,
            quality: ChordQuality::from_intervals(third, fifth, seventh_iv),
            tones,
            len,
            role,
        }
    }

    pub fn name(&self) -> String {
        format!("{} {}", pitch_class_name(self.root), self.mode.name())
    }
}

/// Concrete chord: root, quality and pitch classes in stacking order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chord {
    pub root: u8,
    pub quality: ChordQuality,
    tones: [u8; 4],
    len: u8,
    pub role: HarmonicRole,
}

impl Chord {
    pub fn pitch_classes(&self) -> &[u8] {
        &self.tones[..self.len as usize]
    }

    pub fn contains(&self, pc: u8) -> bool {
        self.pitch_classes().contains(&(pc % 12))
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", pitch_class_name(self.root), self.quality.suffix())
    }
}

// ============================================================================
// Progressions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressionStep {
    pub chord: Chord,
    pub beats: u32,
}

/// Ordered chords with per-chord durations, consumed one chord at a time
#[derive(Debug, Clone, Default)]
pub struct Progression {
    steps: Vec<ProgressionStep>,
    cursor: usize,
}

impl Progression {
    pub fn from_roles(key: &Key, roles: &[HarmonicRole], beats_per_chord: u32, seventh_on_dominant: bool) -> Self {
        let mut progression = Self::default();
        progression.refill(key, roles, beats_per_chord, seventh_on_dominant);
        progression
    }

    /// Rebuild in place, reusing the existing allocation
    pub fn refill(&mut self, key: &Key, roles: &[HarmonicRole], beats_per_chord: u32, seventh_on_dominant: bool) {
        self.steps.clear();
        self.cursor = 0;
        for &role in roles {
            let seventh = seventh_on_dominant && role == HarmonicRole::Dominant;
            self.steps.push(ProgressionStep {
                chord: key.chord(role, seventh),
                beats: beats_per_chord.max(1),
            });
        }
    }

    pub fn steps(&self) -> &[ProgressionStep] {
        &self.steps
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Pop the next chord, or `None` once every step has been consumed
    pub fn next_step(&mut self) -> Option<ProgressionStep> {
        let step = self.steps.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(step)
    }
}

use HarmonicRole::{Dominant as V, Subdominant as IV, Submediant as VI, Supertonic as II, Tonic as I};

/// Common pop/rock loops: I-V-vi-IV, vi-IV-I-V, I-IV-I-V, I-vi-IV-V, I-V-ii-IV
const COMMON_LOOPS: [[HarmonicRole; 4]; 5] = [
    [I, V, VI, IV],
    [VI, IV, I, V],
    [I, IV, I, V],
    [I, VI, IV, V],
    [I, V, II, IV],
];

/// Picks which role loop the next progression follows
#[derive(Debug, Clone)]
pub struct ProgressionGenerator {
    rng: fastrand::Rng,
    loop_idx: usize,
}

impl ProgressionGenerator {
    pub fn new(seed: u64) -> Self {
        Self { rng: fastrand::Rng::with_seed(seed), loop_idx: 0 }
    }

    /// Roles for the next loop; occasionally switches to another common loop
    pub fn next_roles(&mut self) -> &'static [HarmonicRole] {
        if self.rng.f32() < 0.1 {
            self.loop_idx = self.rng.usize(..COMMON_LOOPS.len());
        }
        &COMMON_LOOPS[self.loop_idx]
    }
}

// ============================================================================
// Voice leading
// ============================================================================

/// Up to six MIDI notes, stored inline so events stay `Copy`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pitches {
    notes: [u8; 6],
    len: u8,
}

impl Pitches {
    pub fn one(note: u8) -> Self {
        let mut p = Self::default();
        p.push(note);
        p
    }

    pub fn from_slice(notes: &[u8]) -> Self {
        let mut p = Self::default();
        for &n in notes {
            p.push(n);
        }
        p
    }

    /// Silently drops notes past capacity
    pub fn push(&mut self, note: u8) {
        if (self.len as usize) < self.notes.len() {
            self.notes[self.len as usize] = note;
            self.len += 1;
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.notes[..self.len as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn sort(&mut self) {
        self.notes[..self.len as usize].sort_unstable();
    }
}

/// Note with pitch class `pc` inside `[low, high]` closest to `target`
pub fn nearest_with_pitch_class(pc: u8, target: u8, low: u8, high: u8) -> u8 {
    let pc = (pc % 12) as i32;
    let target = target as i32;
    let base = target - (target - pc).rem_euclid(12);
    [base - 12, base, base + 12, base + 24]
        .into_iter()
        .filter(|&n| n >= low as i32 && n <= high as i32)
        .min_by_key(|&n| (n - target).abs())
        .unwrap_or_else(|| (base).clamp(low as i32, high as i32))
        .clamp(0, 127) as u8
}

/// Move a single line to the nearest allowed pitch class (centre of range when there is no history)
pub fn lead_to_nearest(prev: Option<u8>, pitch_classes: &[u8], low: u8, high: u8) -> u8 {
    let target = prev.unwrap_or(((low as u16 + high as u16) / 2) as u8);
    pitch_classes
        .iter()
        .map(|&pc| nearest_with_pitch_class(pc, target, low, high))
        .min_by_key(|&n| (n as i16 - target as i16).abs())
        .unwrap_or(target)
}

/// Voice `chord` inside `[low, high]` keeping each voice close to the previous chord's voice
pub fn voice_chord(prev: &[u8], chord: &Chord, low: u8, high: u8) -> Pitches {
    let pcs = chord.pitch_classes();
    let mut voiced = Pitches::default();

    if prev.is_empty() {
        // Close position stacked upward from the root nearest the bottom
        let mut note = nearest_with_pitch_class(chord.root, low, low, high);
        voiced.push(note);
        for &pc in &pcs[1..] {
            let step = (pc as i16 - note as i16).rem_euclid(12) as u8;
            note = note.saturating_add(step.max(1)).min(high);
            voiced.push(note);
        }
        voiced.sort();
        return voiced;
    }

    let mut used = [false; 4];
    for &previous in prev.iter().take(pcs.len()) {
        let best = pcs
            .iter()
            .enumerate()
            .filter(|(i, _)| !used[*i])
            .map(|(i, &pc)| (i, nearest_with_pitch_class(pc, previous, low, high)))
            .min_by_key(|&(_, n)| (n as i16 - previous as i16).abs());
        if let Some((i, note)) = best {
            used[i] = true;
            voiced.push(note);
        }
    }

    // Tones left over when the new chord has more voices than the last one
    let top = voiced.as_slice().iter().copied().max().unwrap_or(low);
    for (i, &pc) in pcs.iter().enumerate() {
        if !used[i] {
            voiced.push(nearest_with_pitch_class(pc, top, low, high));
        }
    }

    voiced.sort();
    voiced
}
