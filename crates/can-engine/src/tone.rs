//! Test tone generator (debug aid)

use std::f64::consts::TAU;

use can_core::Sample;

pub const TEST_TONE_FREQUENCY: f64 = 440.0;
pub const TEST_TONE_AMPLITUDE: f64 = 0.3;

/// Sine source that replaces the live input when enabled
#[derive(Debug, Clone)]
pub struct TestTone {
    phase: f64,
    frequency: f64,
    sample_rate: f64,
    amplitude: f64,
}

impl TestTone {
    pub fn new(frequency: f64, sample_rate: f64) -> Self {
        Self {
            phase: 0.0,
            frequency,
            sample_rate,
            amplitude: TEST_TONE_AMPLITUDE,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.phase = 0.0;
    }

    /// Write the same tone into every channel
    pub fn fill(&mut self, block: &mut [&mut [Sample]]) {
        let Some(frames) = block.iter().map(|c| c.len()).min() else {
            return;
        };
        let phase_inc = self.frequency * TAU / self.sample_rate;

        for i in 0..frames {
            let sample = (self.phase.sin() * self.amplitude) as Sample;
            for channel in block.iter_mut() {
                channel[i] = sample;
            }

            self.phase += phase_inc;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
    }
}

impl Default for TestTone {
    fn default() -> Self {
        Self::new(TEST_TONE_FREQUENCY, 48000.0)
    }
}
