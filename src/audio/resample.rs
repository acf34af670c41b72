//! Sample-rate and channel conversion between hardware and session layouts.
//!
//! Devices are opened at their native configuration; audio is converted on
//! the way in and out. Resampling is linear interpolation that carries its
//! phase across buffers, so a stream cut into callbacks of any size yields the
//! same samples as one long buffer.

/// Streaming linear-interpolation resampler for one mono channel.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    step: f64,
    position: f64,
    last: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let step = if from_rate == 0 || to_rate == 0 {
            1.0
        } else {
            f64::from(from_rate) / f64::from(to_rate)
        };
        Self {
            from_rate,
            to_rate,
            step,
            position: 0.0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0
    }

    /// Resample `input` and append the result to `output`.
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if self.is_passthrough() {
            output.extend_from_slice(input);
            return;
        }
        let Some(&tail) = input.last() else {
            return;
        };

        // The last sample of the previous buffer sits at index 0.
        let head = self.last;
        let offset = usize::from(head.is_some());
        let len = input.len() + offset;
        let sample = |index: usize| match index.checked_sub(offset) {
            Some(index) => input[index],
            None => head.unwrap_or(0.0),
        };

        loop {
            let index = self.position.floor() as usize;
            if index + 1 >= len {
                break;
            }
            let frac = (self.position - index as f64) as f32;
            output.push(sample(index) * (1.0 - frac) + sample(index + 1) * frac);
            self.position += self.step;
        }
        self.position -= (len - 1) as f64;
        self.last = Some(tail);
    }
}

/// Converts interleaved audio from one rate and channel count to another.
#[derive(Debug, Clone)]
pub struct FormatAdapter {
    from_channels: usize,
    to_channels: usize,
    resampler: LinearResampler,
    mono: Vec<f32>,
    resampled: Vec<f32>,
}

impl FormatAdapter {
    pub fn new(from_rate: u32, from_channels: u16, to_rate: u32, to_channels: u16) -> Self {
        Self {
            from_channels: usize::from(from_channels.max(1)),
            to_channels: usize::from(to_channels.max(1)),
            resampler: LinearResampler::new(from_rate, to_rate),
            mono: Vec::new(),
            resampled: Vec::new(),
        }
    }

    /// Convert `input` and append interleaved samples to `output`.
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if self.resampler.is_passthrough() && self.from_channels == self.to_channels {
            output.extend_from_slice(input);
            return;
        }
        self.mono.clear();
        downmix(input, self.from_channels, &mut self.mono);
        self.resampled.clear();
        self.resampler.process(&self.mono, &mut self.resampled);
        upmix(&self.resampled, self.to_channels, output);
    }

    /// Output samples produced for `input_samples` interleaved input samples.
    pub fn estimate(&self, input_samples: usize) -> usize {
        let frames = input_samples / self.from_channels;
        let frames = if self.resampler.is_passthrough() {
            frames
        } else {
            (frames as f64 / self.resampler.step).ceil() as usize
        };
        frames * self.to_channels
    }
}

/// Average each interleaved frame into one sample.
pub fn downmix(input: &[f32], channels: usize, output: &mut Vec<f32>) {
    if channels <= 1 {
        output.extend_from_slice(input);
        return;
    }
    output.extend(
        input
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

/// Repeat each mono sample across `channels`.
pub fn upmix(input: &[f32], channels: usize, output: &mut Vec<f32>) {
    if channels <= 1 {
        output.extend_from_slice(input);
        return;
    }
    output.reserve(input.len() * channels);
    for &sample in input {
        output.extend(std::iter::repeat(sample).take(channels));
    }
}
