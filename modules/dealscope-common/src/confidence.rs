//! Confidence bucket rules shared by the aggregator and its tests.

/// Conservative default when any confidence computation fails internally.
/// The output always carries a numeric overall confidence, never null.
pub const CONSERVATIVE_CONFIDENCE: f64 = 0.5;

/// Redundancy band edges for the deduplication confidence component.
pub const REDUNDANCY_LOW: f64 = 0.05;
pub const REDUNDANCY_HIGH: f64 = 0.40;

/// Per-resolution weights for the conflict-resolution component.
pub const NUMERIC_RESOLUTION_WEIGHT: f64 = 0.9;
pub const QUALITATIVE_RESOLUTION_WEIGHT: f64 = 0.7;
pub const NO_CONFLICT_CONFIDENCE: f64 = 0.8;

/// Deduplication confidence from the observed redundancy ratio.
///
/// Very low redundancy usually means the analyzers barely overlapped (weak
/// corroboration); very high redundancy means most of the input was noise.
/// The healthy band sits in between.
pub fn redundancy_bucket(ratio: f64) -> f64 {
    if ratio < REDUNDANCY_LOW {
        0.6
    } else if ratio <= REDUNDANCY_HIGH {
        0.85
    } else {
        0.7
    }
}

/// Analyzer-coverage confidence from the fraction of expected analyzers
/// that actually reported.
pub fn coverage_bucket(fraction: f64) -> f64 {
    if fraction >= 0.9 {
        0.9
    } else if fraction >= 0.7 {
        0.75
    } else if fraction >= 0.5 {
        0.6
    } else {
        0.4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundancy_buckets() {
        assert_eq!(redundancy_bucket(0.0), 0.6);
        assert_eq!(redundancy_bucket(0.049), 0.6);
        assert_eq!(redundancy_bucket(0.05), 0.85);
        assert_eq!(redundancy_bucket(0.40), 0.85);
        assert_eq!(redundancy_bucket(0.41), 0.7);
    }

    #[test]
    fn coverage_buckets() {
        assert_eq!(coverage_bucket(1.0), 0.9);
        assert_eq!(coverage_bucket(0.9), 0.9);
        // 11 of 13 analyzers (~84.6%) lands in the 70% band.
        assert_eq!(coverage_bucket(11.0 / 13.0), 0.75);
        assert_eq!(coverage_bucket(0.7), 0.75);
        assert_eq!(coverage_bucket(0.5), 0.6);
        assert_eq!(coverage_bucket(0.49), 0.4);
    }
}
