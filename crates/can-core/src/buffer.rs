//! Sample buffer definitions

use crate::{ChannelLayout, CoreError, CoreResult, Sample};

/// Planar (channel x sample) audio buffer tagged with its sample rate.
///
/// Channel and sample counts are fixed at construction. The only mutations
/// allowed afterwards are in-place amplitude scaling and shortening, so a
/// buffer handed across a thread boundary never reallocates underneath its
/// new owner.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<Sample>>,
    sample_rate: f64,
}

impl SampleBuffer {
    /// Create a buffer from per-channel sample vectors
    pub fn new(channels: Vec<Vec<Sample>>, sample_rate: f64) -> CoreResult<Self> {
        if ChannelLayout::from_count(channels.len()).is_none() {
            return Err(CoreError::UnsupportedChannelCount(channels.len()));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(CoreError::InvalidSampleRate(sample_rate));
        }

        let expected = channels[0].len();
        for (channel, samples) in channels.iter().enumerate().skip(1) {
            if samples.len() != expected {
                return Err(CoreError::ChannelLengthMismatch {
                    channel,
                    expected,
                    actual: samples.len(),
                });
            }
        }

        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Mono buffer
    pub fn mono(samples: Vec<Sample>, sample_rate: f64) -> CoreResult<Self> {
        Self::new(vec![samples], sample_rate)
    }

    /// Stereo buffer
    pub fn stereo(left: Vec<Sample>, right: Vec<Sample>, sample_rate: f64) -> CoreResult<Self> {
        Self::new(vec![left, right], sample_rate)
    }

    /// Zero-filled buffer
    pub fn silent(num_channels: usize, num_samples: usize, sample_rate: f64) -> CoreResult<Self> {
        Self::new(vec![vec![0.0; num_samples]; num_channels], sample_rate)
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.channels[0].len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_samples() == 0
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn layout(&self) -> ChannelLayout {
        if self.channels.len() == 2 {
            ChannelLayout::Stereo
        } else {
            ChannelLayout::Mono
        }
    }

    /// Samples of one channel
    ///
    /// # Panics
    /// Panics if `index >= num_channels()`.
    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index]
    }

    /// Iterate over channels
    pub fn channels(&self) -> impl Iterator<Item = &[Sample]> {
        self.channels.iter().map(Vec::as_slice)
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.num_samples() as f64 / self.sample_rate
    }

    /// Absolute peak across all channels
    pub fn peak(&self) -> Sample {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0, |max: Sample, &s| max.max(s.abs()))
    }

    /// Sum of squares of one channel
    pub fn channel_energy(&self, index: usize) -> f64 {
        self.channels[index]
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum()
    }

    /// Largest per-channel energy
    pub fn max_channel_energy(&self) -> f64 {
        (0..self.num_channels())
            .map(|ch| self.channel_energy(ch))
            .fold(0.0, f64::max)
    }

    /// Multiply every sample by `gain`
    pub fn scale(&mut self, gain: Sample) {
        for channel in &mut self.channels {
            for sample in channel.iter_mut() {
                *sample *= gain;
            }
        }
    }

    /// Shorten every channel to at most `len` samples (never grows)
    pub fn truncate(&mut self, len: usize) {
        for channel in &mut self.channels {
            channel.truncate(len);
        }
    }

    /// Drop the trailing run of samples quieter than `threshold` on every channel.
    ///
    /// Returns the number of samples removed. At least one sample is kept.
    pub fn trim_trailing_silence(&mut self, threshold: Sample) -> usize {
        let len = self.num_samples();
        let last_loud = (0..len)
            .rev()
            .find(|&i| self.channels.iter().any(|c| c[i].abs() > threshold));
        let keep = last_loud.map(|i| i + 1).unwrap_or(1).min(len);
        self.truncate(keep);
        len - keep
    }

    /// Take the per-channel storage out of the buffer
    pub fn into_channels(self) -> Vec<Vec<Sample>> {
        self.channels
    }
}
