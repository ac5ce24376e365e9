//! Volume normalization through feedforward limiting in the log domain.
//!
//! The gain computer follows Giannoulis, Massberg & Reiss (2012), "Digital
//! Dynamic Range Compressor Design — A Tutorial and Analysis": soft-knee
//! limiting with a decoupled peak detector smoothed by attack/release
//! coefficients. A pregain derived from the track's replay gain is applied
//! before the limiter so quiet tracks come up and loud ones are caught by
//! the knee.

use std::time::Duration;

const ZERO_DB: f32 = 0.0;

/// Level where limiting begins (dB).
const THRESHOLD_DB: f32 = -1.0;

/// Range over which limiting gradually increases (dB).
const KNEE_WIDTH_DB: f32 = 4.0;

const ATTACK: Duration = Duration::from_millis(5);
const RELEASE: Duration = Duration::from_millis(100);

pub fn db_to_ratio(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

pub fn ratio_to_db(ratio: f32) -> f32 {
    20.0 * ratio.log10()
}

/// Converts a response time to a one-pole smoothing coefficient. Longer
/// times give higher coefficients and slower response.
fn duration_to_coefficient(duration: Duration, sample_rate: u32) -> f32 {
    f32::exp(-1.0 / (duration.as_secs_f32() * sample_rate as f32))
}

/// Stateful limiter applied in-place to interleaved f32 buffers.
///
/// Per-channel integrator and peak state carries across buffers, so one
/// instance must stay bound to one stream; reset it on seek to avoid
/// smearing stale gain reduction over the new position.
pub struct Limiter {
    pregain: f32,
    attack_cf: f32,
    release_cf: f32,
    channels: usize,
    integrators: Vec<f32>,
    peaks: Vec<f32>,
    position: usize,
}

impl Limiter {
    /// `replay_gain` is the track's loudness offset in dB as reported by
    /// the stream descriptor; 0.0 means no adjustment.
    pub fn new(replay_gain: f32, sample_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            pregain: db_to_ratio(replay_gain),
            attack_cf: duration_to_coefficient(ATTACK, sample_rate.max(1)),
            release_cf: duration_to_coefficient(RELEASE, sample_rate.max(1)),
            channels,
            integrators: vec![ZERO_DB; channels],
            peaks: vec![ZERO_DB; channels],
            position: 0,
        }
    }

    /// Clears detector state. Call after a seek.
    pub fn reset(&mut self) {
        self.integrators.fill(ZERO_DB);
        self.peaks.fill(ZERO_DB);
        self.position = 0;
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    fn process_sample(&mut self, sample: f32) -> f32 {
        let channel = self.position % self.channels;
        self.position = self.position.wrapping_add(1);

        let mut sample = sample * self.pregain;

        // Exact zeroes are silence and ratio_to_db(0.0) is -inf, which
        // would wedge the peak detector. Non-normal samples are skipped
        // for the same reason.
        let mut limiter_db = ZERO_DB;
        if sample.is_normal() {
            // Half-wave rectification, dB conversion, and the soft-knee
            // gain computer with subtractor folded in.
            let bias_db = ratio_to_db(sample.abs()) - THRESHOLD_DB;
            let knee_boundary_db = bias_db * 2.0;

            if knee_boundary_db < -KNEE_WIDTH_DB {
                limiter_db = ZERO_DB;
            } else if knee_boundary_db.abs() <= KNEE_WIDTH_DB {
                limiter_db = (knee_boundary_db + KNEE_WIDTH_DB).powi(2) / (8.0 * KNEE_WIDTH_DB);
            } else {
                limiter_db = bias_db;
            }
        }

        // Only run the detector while the limiter is engaged or still
        // recovering from attack/release.
        if limiter_db > ZERO_DB
            || self.integrators[channel] > ZERO_DB
            || self.peaks[channel] > ZERO_DB
        {
            // Smooth, decoupled peak detector.
            self.integrators[channel] = f32::max(
                limiter_db,
                self.release_cf * self.integrators[channel] - self.release_cf * limiter_db
                    + limiter_db,
            );
            self.peaks[channel] = self.attack_cf * self.peaks[channel]
                - self.attack_cf * self.integrators[channel]
                + self.integrators[channel];

            // Channels share the gain stage so the stereo image holds.
            let max_peak = self.peaks.iter().copied().fold(ZERO_DB, f32::max);
            sample *= db_to_ratio(-max_peak);
        }

        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_conversions_round_trip() {
        assert!((db_to_ratio(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_ratio(-6.0) - 0.5012).abs() < 1e-3);
        assert!((ratio_to_db(db_to_ratio(-3.5)) + 3.5).abs() < 1e-4);
    }

    #[test]
    fn coefficient_grows_with_duration() {
        let fast = duration_to_coefficient(Duration::from_millis(5), 44_100);
        let slow = duration_to_coefficient(Duration::from_millis(100), 44_100);
        assert!(fast < slow);
        assert!(fast > 0.0 && slow < 1.0);
    }

    #[test]
    fn quiet_audio_passes_with_only_pregain() {
        let mut limiter = Limiter::new(0.0, 44_100, 2);
        let mut buf = vec![0.1f32, -0.1, 0.05, -0.05];
        let original = buf.clone();
        limiter.process(&mut buf);
        for (out, input) in buf.iter().zip(original.iter()) {
            assert!((out - input).abs() < 1e-6);
        }
    }

    #[test]
    fn positive_pregain_amplifies_quiet_audio() {
        let mut limiter = Limiter::new(6.0, 44_100, 2);
        let mut buf = vec![0.01f32; 4];
        limiter.process(&mut buf);
        for out in buf {
            assert!((out - 0.01 * db_to_ratio(6.0)).abs() < 1e-5);
        }
    }

    #[test]
    fn hot_signal_is_reduced_toward_the_threshold() {
        let mut limiter = Limiter::new(12.0, 44_100, 1);
        // A sustained full-scale tone boosted 12 dB must come back down.
        let mut buf = vec![1.0f32; 44_100];
        limiter.process(&mut buf);
        let tail_peak = buf[44_000..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(tail_peak < db_to_ratio(THRESHOLD_DB) * 1.1);
        assert!(tail_peak > 0.0);
    }

    #[test]
    fn silence_and_non_normal_samples_do_not_wedge_the_detector() {
        let mut limiter = Limiter::new(0.0, 44_100, 1);
        let mut buf = vec![0.0f32, f32::NAN, 0.2, 0.2];
        limiter.process(&mut buf);
        assert_eq!(buf[0], 0.0);
        assert!((buf[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn reset_clears_gain_reduction() {
        let mut limiter = Limiter::new(12.0, 44_100, 1);
        let mut hot = vec![1.0f32; 4_410];
        limiter.process(&mut hot);

        limiter.reset();
        let mut quiet = vec![0.05f32; 4];
        limiter.process(&mut quiet);
        for out in quiet {
            assert!((out - 0.05 * db_to_ratio(12.0)).abs() < 1e-4);
        }
    }
}
