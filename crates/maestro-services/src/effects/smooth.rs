/// Linear parameter ramp, stepped once per sample
#[derive(Debug, Clone, Copy)]
pub struct LinearRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
    length: usize,
}

impl LinearRamp {
    /// Start settled at `value`; later targets are reached over `length` samples
    pub fn new(value: f32, length: usize) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
            length: length.max(1),
        }
    }

    pub fn set_target(&mut self, target: f32) {
        self.ramp_to(target, self.length);
    }

    /// Ramp to `target` over an explicit number of samples
    pub fn ramp_to(&mut self, target: f32, samples: usize) {
        if target == self.target {
            return;
        }
        self.target = target;
        let samples = samples.max(1);
        self.step = (target - self.current) / samples as f32;
        self.remaining = samples;
    }

    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 { self.target } else { self.current + self.step };
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaches_target_exactly_after_length() {
        let mut ramp = LinearRamp::new(0.0, 4);
        ramp.set_target(1.0);
        let values: Vec<f32> = (0..5).map(|_| ramp.next_value()).collect();
        assert_eq!(values, [0.25, 0.5, 0.75, 1.0, 1.0]);
        assert!(ramp.is_settled());
    }

    #[test]
    fn test_retarget_midway_starts_from_current() {
        let mut ramp = LinearRamp::new(0.0, 4);
        ramp.set_target(1.0);
        ramp.next_value();
        ramp.next_value();
        ramp.ramp_to(0.0, 2);
        assert_eq!(ramp.next_value(), 0.25);
        assert_eq!(ramp.next_value(), 0.0);
    }

    #[test]
    fn test_same_target_does_not_restart() {
        let mut ramp = LinearRamp::new(0.0, 10);
        ramp.set_target(1.0);
        for _ in 0..9 {
            ramp.next_value();
        }
        ramp.set_target(1.0);
        assert_eq!(ramp.next_value(), 1.0);
    }
}
