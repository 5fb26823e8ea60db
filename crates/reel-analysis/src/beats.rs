//! Beat detection over a mono audio slice.

use std::f32::consts::PI;
use std::path::Path;

use rustfft::{num_complex::Complex, FftPlanner};
use tracing::{debug, info};

use reel_models::{BeatPlan, CutCandidate};

use crate::error::{AnalysisError, AnalysisResult};

/// Analyzer tuning. Defaults follow the usual onset-detection
/// settings for 22 050 Hz material.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// FFT window size in samples
    pub n_fft: usize,
    /// Hop between windows in samples
    pub hop_length: usize,
    /// Lowest tempo considered, BPM
    pub min_bpm: f64,
    /// Highest tempo considered, BPM
    pub max_bpm: f64,
    /// Candidates closer than this to a stronger one are suppressed
    pub min_spacing_sec: f64,
    /// Beats per bar for the downbeat bonus
    pub beats_per_bar: usize,
    /// Salience bonus granted to downbeats
    pub downbeat_bonus: f64,
    /// Shortest analyzable slice, seconds
    pub min_duration_sec: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            min_bpm: 60.0,
            max_bpm: 200.0,
            min_spacing_sec: 0.8,
            beats_per_bar: 4,
            downbeat_bonus: 0.25,
            min_duration_sec: 2.0,
        }
    }
}

/// Beat analyzer.
pub struct BeatAnalyzer {
    config: AnalyzerConfig,
}

impl Default for BeatAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl BeatAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyze a WAV file and produce a beat plan.
    pub fn analyze_file(&self, path: impl AsRef<Path>) -> AnalysisResult<BeatPlan> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| AnalysisError::Unreadable(format!("{}: {e}", path.display())))?;

        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        // Mix down to mono f32 regardless of the source format.
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                let raw: Result<Vec<i32>, _> = reader.samples::<i32>().collect();
                mono_mix(&raw?.iter().map(|&s| s as f32 / max).collect::<Vec<_>>(), channels)
            }
            hound::SampleFormat::Float => {
                let raw: Result<Vec<f32>, _> = reader.samples::<f32>().collect();
                mono_mix(&raw?, channels)
            }
        };

        self.analyze_samples(&samples, spec.sample_rate)
    }

    /// Analyze raw mono samples.
    pub fn analyze_samples(&self, samples: &[f32], sample_rate: u32) -> AnalysisResult<BeatPlan> {
        let duration = samples.len() as f64 / f64::from(sample_rate);
        if duration < self.config.min_duration_sec || samples.len() < self.config.n_fft {
            return Err(AnalysisError::TooShort {
                actual_sec: duration,
                min_sec: self.config.min_duration_sec,
            });
        }

        let envelope = self.onset_envelope(samples);
        let frame_rate = f64::from(sample_rate) / self.config.hop_length as f64;

        let tempo_bpm = self.estimate_tempo(&envelope, frame_rate);
        let beats = self.track_beats(&envelope, frame_rate, tempo_bpm, duration);
        let cut_candidates = self.score_candidates(&envelope, frame_rate, &beats);

        info!(
            "Detected {} beats at {:.1} BPM, {} cut candidates",
            beats.len(),
            tempo_bpm,
            cut_candidates.len()
        );

        Ok(BeatPlan {
            tempo_bpm,
            beats,
            cut_candidates,
        })
    }

    /// Half-wave-rectified spectral flux per analysis frame.
    fn onset_envelope(&self, samples: &[f32]) -> Vec<f64> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;

        let window: Vec<f32> = (0..n_fft)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n_fft as f32).cos()))
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);

        let num_frames = (samples.len() - n_fft) / hop + 1;
        let bins = n_fft / 2;

        let mut prev_mags = vec![0.0f64; bins];
        let mut envelope = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0f32, 0.0f32); n_fft];

        for frame in 0..num_frames {
            let start = frame * hop;
            for i in 0..n_fft {
                buffer[i] = Complex::new(samples[start + i] * window[i], 0.0);
            }
            fft.process(&mut buffer);

            let mut flux = 0.0f64;
            for (k, prev) in prev_mags.iter_mut().enumerate() {
                let mag = f64::from(buffer[k].norm());
                let diff = mag - *prev;
                if diff > 0.0 {
                    flux += diff;
                }
                *prev = mag;
            }
            // First frame has no predecessor to flux against
            envelope.push(if frame == 0 { 0.0 } else { flux });
        }

        normalize(&mut envelope);
        debug!("Onset envelope: {} frames", envelope.len());
        envelope
    }

    /// Tempo by autocorrelation of the onset envelope, constrained to
    /// the configured BPM band.
    ///
    /// A log-normal prior centered at 120 BPM keeps half- and
    /// double-tempo harmonics from winning on near-equal correlation.
    fn estimate_tempo(&self, envelope: &[f64], frame_rate: f64) -> f64 {
        let min_lag = ((60.0 / self.config.max_bpm) * frame_rate).floor().max(1.0) as usize;
        let max_lag = ((60.0 / self.config.min_bpm) * frame_rate).ceil() as usize;
        let max_lag = max_lag.min(envelope.len().saturating_sub(1)).max(min_lag + 1);

        let mut best_lag = min_lag;
        let mut best_score = f64::NEG_INFINITY;

        for lag in min_lag..=max_lag {
            let mut score = 0.0;
            for i in lag..envelope.len() {
                score += envelope[i] * envelope[i - lag];
            }
            score /= (envelope.len() - lag) as f64;

            let bpm = 60.0 * frame_rate / lag as f64;
            let octaves = (bpm / 120.0).log2();
            score *= (-0.5 * octaves * octaves).exp();

            if score > best_score {
                best_score = score;
                best_lag = lag;
            }
        }

        60.0 * frame_rate / best_lag as f64
    }

    /// Track beats by stepping one period at a time and snapping each
    /// prediction to the strongest onset within a quarter period, so
    /// small tempo rounding errors do not accumulate into drift.
    fn track_beats(
        &self,
        envelope: &[f64],
        frame_rate: f64,
        tempo_bpm: f64,
        duration: f64,
    ) -> Vec<f64> {
        let period_frames = (60.0 / tempo_bpm * frame_rate).round().max(1.0) as usize;
        let search = (period_frames / 4).max(2);

        let peak_near = |center: usize| -> usize {
            let lo = center.saturating_sub(search);
            let hi = (center + search).min(envelope.len().saturating_sub(1));
            (lo..=hi)
                .max_by(|&a, &b| {
                    envelope[a]
                        .partial_cmp(&envelope[b])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(center)
        };

        // Anchor on the strongest onset within the first period
        let first_window = period_frames.min(envelope.len().saturating_sub(1));
        let mut frame = (0..=first_window)
            .max_by(|&a, &b| {
                envelope[a]
                    .partial_cmp(&envelope[b])
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(0);

        let mut beats = Vec::new();
        loop {
            let t = frame as f64 / frame_rate;
            if t > duration {
                break;
            }
            if beats.last().map_or(true, |&prev| t > prev) {
                beats.push(t);
            }

            let predicted = frame + period_frames;
            if predicted >= envelope.len() {
                break;
            }
            frame = peak_near(predicted).max(frame + 1);
        }

        beats
    }

    /// Salience scores: onset strength plus a downbeat bonus, then
    /// greedy suppression of candidates crowding a stronger one.
    fn score_candidates(
        &self,
        envelope: &[f64],
        frame_rate: f64,
        beats: &[f64],
    ) -> Vec<CutCandidate> {
        if beats.is_empty() {
            return Vec::new();
        }

        // Raw strength: local envelope peak around each beat
        let mut strengths: Vec<f64> = beats
            .iter()
            .map(|&t| {
                let frame = (t * frame_rate).round() as usize;
                let lo = frame.saturating_sub(2);
                let hi = (frame + 2).min(envelope.len().saturating_sub(1));
                (lo..=hi).map(|i| envelope[i]).fold(0.0, f64::max)
            })
            .collect();
        normalize(&mut strengths);

        // Downbeat bonus: the bar phase with the strongest beats wins
        let bar = self.config.beats_per_bar.max(1);
        let mut best_offset = 0usize;
        let mut best_sum = f64::NEG_INFINITY;
        for offset in 0..bar.min(beats.len()) {
            let sum: f64 = strengths.iter().skip(offset).step_by(bar).sum();
            if sum > best_sum {
                best_sum = sum;
                best_offset = offset;
            }
        }

        let mut scored: Vec<CutCandidate> = beats
            .iter()
            .zip(strengths.iter())
            .enumerate()
            .map(|(i, (&time_sec, &strength))| {
                let bonus = if i % bar == best_offset % bar {
                    self.config.downbeat_bonus
                } else {
                    0.0
                };
                CutCandidate {
                    time_sec,
                    score: (strength + bonus).min(1.0),
                }
            })
            .collect();

        // Strongest first, earlier time breaking ties
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.time_sec
                        .partial_cmp(&b.time_sec)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        let mut kept: Vec<CutCandidate> = Vec::new();
        for candidate in scored {
            let crowded = kept
                .iter()
                .any(|k| (k.time_sec - candidate.time_sec).abs() < self.config.min_spacing_sec);
            if !crowded {
                kept.push(candidate);
            }
        }

        kept
    }
}

/// Average interleaved channels down to mono.
fn mono_mix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Scale a sequence so its maximum is 1.0 (no-op for silence).
fn normalize(values: &mut [f64]) {
    let max = values.iter().copied().fold(0.0f64, f64::max);
    if max > 0.0 {
        for v in values.iter_mut() {
            *v /= max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22_050;

    /// Click track: short noise bursts every `period` seconds.
    fn click_track(duration_sec: f64, period_sec: f64, first_click_sec: f64) -> Vec<f32> {
        let total = (duration_sec * SR as f64) as usize;
        let mut samples = vec![0.0f32; total];
        let click_len = SR as usize / 100; // 10 ms

        let mut t = first_click_sec;
        while t < duration_sec {
            let start = (t * SR as f64) as usize;
            for i in 0..click_len.min(total.saturating_sub(start)) {
                // Decaying burst, deterministic
                let phase = i as f32 / click_len as f32;
                samples[start + i] = (1.0 - phase) * if i % 2 == 0 { 0.9 } else { -0.9 };
            }
            t += period_sec;
        }
        samples
    }

    #[test]
    fn test_rejects_short_audio() {
        let analyzer = BeatAnalyzer::default();
        let err = analyzer.analyze_samples(&vec![0.0; 1024], SR).unwrap_err();
        assert!(matches!(err, AnalysisError::TooShort { .. }));
    }

    #[test]
    fn test_click_track_tempo_and_beats() {
        let analyzer = BeatAnalyzer::default();
        // 120 BPM: a click every 0.5 s
        let samples = click_track(12.0, 0.5, 0.25);
        let plan = analyzer.analyze_samples(&samples, SR).unwrap();

        assert!(
            (plan.tempo_bpm - 120.0).abs() < 10.0,
            "tempo {} not near 120",
            plan.tempo_bpm
        );

        // Invariants: strictly increasing, in window
        plan.validate(12.0).unwrap();
        assert!(plan.beats.len() >= 15, "only {} beats", plan.beats.len());

        // Median spacing near the click period
        let mut gaps: Vec<f64> = plan.beats.windows(2).map(|w| w[1] - w[0]).collect();
        gaps.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = gaps[gaps.len() / 2];
        assert!(
            (median - 0.5).abs() < 0.1,
            "median beat gap {median} not near 0.5"
        );
    }

    #[test]
    fn test_candidates_sorted_and_spaced() {
        let analyzer = BeatAnalyzer::default();
        let samples = click_track(12.0, 0.5, 0.25);
        let plan = analyzer.analyze_samples(&samples, SR).unwrap();

        assert!(!plan.cut_candidates.is_empty());
        for pair in plan.cut_candidates.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // Pairwise spacing respects the suppression radius
        for (i, a) in plan.cut_candidates.iter().enumerate() {
            for b in plan.cut_candidates.iter().skip(i + 1) {
                assert!(
                    (a.time_sec - b.time_sec).abs() >= 0.8,
                    "candidates {a:?} and {b:?} too close"
                );
            }
        }
    }

    #[test]
    fn test_determinism() {
        let analyzer = BeatAnalyzer::default();
        let samples = click_track(8.0, 0.4, 0.1);
        let a = analyzer.analyze_samples(&samples, SR).unwrap();
        let b = analyzer.analyze_samples(&samples, SR).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("click.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SR,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in click_track(6.0, 0.5, 0.25) {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let plan = BeatAnalyzer::default().analyze_file(&path).unwrap();
        plan.validate(6.0).unwrap();
        assert!(!plan.beats.is_empty());
    }

    #[test]
    fn test_mono_mix() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = mono_mix(&stereo, 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }
}
