//! Playback speed rules for long narrations.

use rand::Rng;

/// Narrations up to this length play at normal speed.
pub const NORMAL_SPEED_MAX_SECS: f64 = 90.0;
/// From this length on, videos are compressed to a random target length.
pub const TARGET_RANGE_FROM_SECS: f64 = 180.0;
/// Target length range for long narrations.
pub const TARGET_MIN_SECS: f64 = 150.0;
pub const TARGET_MAX_SECS: f64 = 166.0;

/// Speed factor for a narration of `duration` seconds.
///
/// - `<= 90s`: 1.0
/// - `90s..180s`: linear from 1.0 (at 90s) to 2.0 (at 179s)
/// - `>= 180s`: whatever brings the video to a random length in 150..=166s
pub fn speed_factor<R: Rng>(duration: f64, rng: &mut R) -> f64 {
    if duration <= NORMAL_SPEED_MAX_SECS {
        1.0
    } else if duration < TARGET_RANGE_FROM_SECS {
        1.0 + (duration - NORMAL_SPEED_MAX_SECS) / (179.0 - NORMAL_SPEED_MAX_SECS)
    } else {
        let target = rng.random_range(TARGET_MIN_SECS..=TARGET_MAX_SECS);
        duration / target
    }
}

/// `atempo` filter chain for `factor`.
///
/// A single `atempo` stage accepts 0.5..=2.0, so larger factors are split
/// into several stages whose product is `factor`.
pub fn atempo_chain(factor: f64) -> String {
    let mut stages = Vec::new();
    let mut remaining = factor;
    while remaining > 2.0 {
        stages.push("atempo=2.0".to_string());
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        stages.push("atempo=0.5".to_string());
        remaining /= 0.5;
    }
    stages.push(format!("atempo={:.6}", remaining));
    stages.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_speed_factor_bands() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(speed_factor(45.0, &mut rng), 1.0);
        assert_eq!(speed_factor(90.0, &mut rng), 1.0);
        assert!((speed_factor(134.5, &mut rng) - 1.5).abs() < 1e-9);
        assert!((speed_factor(179.0, &mut rng) - 2.0).abs() < 1e-9);

        for _ in 0..50 {
            let f = speed_factor(300.0, &mut rng);
            let resulting = 300.0 / f;
            assert!(resulting > TARGET_MIN_SECS - 1e-9 && resulting < TARGET_MAX_SECS + 1e-9);
        }
    }

    #[test]
    fn test_atempo_chain_splits_large_factors() {
        assert_eq!(atempo_chain(1.5), "atempo=1.500000");
        let chain = atempo_chain(3.0);
        assert_eq!(chain, "atempo=2.0,atempo=1.500000");
    }
}
