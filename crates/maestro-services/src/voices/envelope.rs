/// ADSR times in seconds and a sustain level
#[derive(Debug, Clone, Copy)]
pub struct Adsr {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Adsr {
    pub const fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self { attack, decay, sustain, release }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Running envelope, advanced one sample at a time
#[derive(Debug, Clone, Copy)]
pub struct AdsrState {
    phase: Phase,
    level: f32,
    attack_step: f32,
    decay_step: f32,
    sustain: f32,
    release_step: f32,
}

fn step_for(seconds: f32, sample_rate: f32) -> f32 {
    let samples = (seconds * sample_rate).max(1.0);
    1.0 / samples
}

impl AdsrState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            level: 0.0,
            attack_step: 1.0,
            decay_step: 1.0,
            sustain: 1.0,
            release_step: 1.0,
        }
    }

    /// Restart from the current level so retriggers don't click
    pub fn note_on(&mut self, adsr: &Adsr, sample_rate: f32) {
        self.attack_step = step_for(adsr.attack, sample_rate);
        self.decay_step = step_for(adsr.decay, sample_rate);
        self.sustain = adsr.sustain.clamp(0.0, 1.0);
        // Release always covers the full range from 1.0
        self.release_step = step_for(adsr.release, sample_rate);
        self.phase = Phase::Attack;
    }

    pub fn note_off(&mut self) {
        if self.phase != Phase::Idle {
            self.phase = Phase::Release;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    #[inline]
    pub fn tick(&mut self) -> f32 {
        match self.phase {
            Phase::Idle => {}
            Phase::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.phase = Phase::Decay;
                }
            }
            Phase::Decay => {
                self.level -= self.decay_step * (1.0 - self.sustain);
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.phase = Phase::Sustain;
                }
            }
            Phase::Sustain => {
                if self.sustain <= 0.0 {
                    self.level = 0.0;
                    self.phase = Phase::Idle;
                }
            }
            Phase::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.phase = Phase::Idle;
                }
            }
        }
        self.level
    }
}

impl Default for AdsrState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 1000.0;

    #[test]
    fn test_attack_reaches_peak() {
        let mut env = AdsrState::new();
        env.note_on(&Adsr::new(0.01, 0.1, 0.5, 0.1), SR);
        let peak = (0..12).map(|_| env.tick()).fold(0.0f32, f32::max);
        assert!((peak - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_settles_at_sustain_then_releases() {
        let mut env = AdsrState::new();
        env.note_on(&Adsr::new(0.01, 0.05, 0.4, 0.02), SR);
        for _ in 0..200 {
            env.tick();
        }
        assert!((env.level() - 0.4).abs() < 1e-4);
        env.note_off();
        for _ in 0..25 {
            env.tick();
        }
        assert!(env.is_idle());
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn test_zero_sustain_goes_idle_without_release() {
        let mut env = AdsrState::new();
        env.note_on(&Adsr::new(0.001, 0.05, 0.0, 0.1), SR);
        for _ in 0..100 {
            env.tick();
        }
        assert!(env.is_idle());
    }
}
