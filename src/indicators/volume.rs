// =============================================================================
// Volume Ratio / Trend Classification
// =============================================================================
//
//   ratio = current_volume / mean(volume over lookback window, excluding current)
//
// ratio >= 2.0 => surge, ratio <= 0.5 => dry, otherwise normal.
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeTrend {
    Surge,
    Normal,
    Dry,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeProfile {
    pub ratio: f64,
    pub trend: VolumeTrend,
}

const SURGE_THRESHOLD: f64 = 2.0;
const DRY_THRESHOLD: f64 = 0.5;

/// Compare the most recent volume bar against the mean of the preceding
/// `lookback` bars.
///
/// Returns `None` when there are fewer than `lookback + 1` volume samples,
/// or the baseline mean is zero (degenerate input).
pub fn calculate_volume_profile(volumes: &[f64], lookback: usize) -> Option<VolumeProfile> {
    if lookback == 0 || volumes.len() < lookback + 1 {
        return None;
    }

    let current = *volumes.last()?;
    let window = &volumes[volumes.len() - lookback - 1..volumes.len() - 1];
    let baseline = window.iter().sum::<f64>() / lookback as f64;

    if baseline == 0.0 {
        return None;
    }

    let ratio = current / baseline;
    if !ratio.is_finite() {
        return None;
    }

    let trend = if ratio >= SURGE_THRESHOLD {
        VolumeTrend::Surge
    } else if ratio <= DRY_THRESHOLD {
        VolumeTrend::Dry
    } else {
        VolumeTrend::Normal
    };

    Some(VolumeProfile { ratio, trend })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_returns_none() {
        assert!(calculate_volume_profile(&[1.0, 2.0], 5).is_none());
    }

    #[test]
    fn surge_detected_above_threshold() {
        let mut volumes = vec![100.0; 20];
        volumes.push(250.0);
        let profile = calculate_volume_profile(&volumes, 20).unwrap();
        assert_eq!(profile.trend, VolumeTrend::Surge);
        assert!((profile.ratio - 2.5).abs() < 1e-9);
    }

    #[test]
    fn dry_detected_below_threshold() {
        let mut volumes = vec![100.0; 20];
        volumes.push(10.0);
        let profile = calculate_volume_profile(&volumes, 20).unwrap();
        assert_eq!(profile.trend, VolumeTrend::Dry);
    }

    #[test]
    fn normal_within_band() {
        let mut volumes = vec![100.0; 20];
        volumes.push(110.0);
        let profile = calculate_volume_profile(&volumes, 20).unwrap();
        assert_eq!(profile.trend, VolumeTrend::Normal);
    }

    #[test]
    fn zero_baseline_returns_none() {
        let mut volumes = vec![0.0; 20];
        volumes.push(50.0);
        assert!(calculate_volume_profile(&volumes, 20).is_none());
    }
}
