use std::time::Duration;

use rodio::Source;

/// An infinite square-wave beep.
///
/// Always has a rate of 48kHz and one channel.
#[derive(Clone, Debug)]
pub struct Beeper {
    frequency: f32,
    current_sample: usize,
}

impl Beeper {
    const AMPLITUDE: f32 = 0.25;

    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            current_sample: 0,
        }
    }
}

impl Iterator for Beeper {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let time = self.current_sample as f32 / self.sample_rate() as f32;
        self.current_sample = self.current_sample.wrapping_add(1);

        let phase = (time * self.frequency).fract();
        Some(if phase < 0.5 {
            Self::AMPLITUDE
        } else {
            -Self::AMPLITUDE
        })
    }
}

impl Source for Beeper {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
