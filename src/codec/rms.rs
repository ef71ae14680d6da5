//! Normalized RMS energy over a PCM16 frame, used by the VAD heuristic.

/// Normalized RMS energy in `[0,1]`. A full-scale square wave approaches 1;
/// a constant-zero frame is exactly 0.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    let mean_sq = sum_sq / samples.len() as f64;
    ((mean_sq.sqrt()) / i16::MAX as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_zero() {
        assert_eq!(rms(&[0; 320]), 0.0);
    }

    #[test]
    fn full_scale_square_wave_approaches_one() {
        let samples: Vec<i16> = (0..320)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        assert!(rms(&samples) > 0.99);
    }

    #[test]
    fn always_in_unit_range() {
        let samples = vec![i16::MIN, i16::MAX, 0, 12345, -12345];
        let r = rms(&samples);
        assert!((0.0..=1.0).contains(&r));
    }

    #[test]
    fn empty_frame_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }
}
