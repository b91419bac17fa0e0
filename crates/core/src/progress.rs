//! Phased progress reporting for multi-item runs.
//!
//! Each iteration of a run owns an equal share of the 0-100 range, split
//! into three bands: upload 0-30%, processing 30-80%, download 80-100%.
//! Reports within a run are therefore monotonically non-decreasing.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Upload,
    Processing,
    Download,
}

impl Phase {
    /// Start of this phase's band, as a fraction of one iteration.
    pub fn band_start(self) -> f64 {
        match self {
            Phase::Upload => 0.0,
            Phase::Processing => 0.3,
            Phase::Download => 0.8,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Upload => "upload",
            Phase::Processing => "processing",
            Phase::Download => "download",
        }
    }
}

/// One progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunProgress {
    pub phase: Phase,
    /// 1-based iteration number.
    pub current: usize,
    pub total: usize,
    /// Overall completion estimate, 0-100.
    pub percentage: f64,
}

impl RunProgress {
    /// Report entering `phase` of iteration `index` (0-based) of `total`.
    pub fn entering(phase: Phase, index: usize, total: usize) -> Self {
        Self::at(phase, index, total, phase.band_start())
    }

    /// Report that iteration `index` has fully completed.
    pub fn finished(index: usize, total: usize) -> Self {
        Self::at(Phase::Download, index, total, 1.0)
    }

    fn at(phase: Phase, index: usize, total: usize, fraction: f64) -> Self {
        let total = total.max(1);
        let percentage = ((index as f64 + fraction) / total as f64 * 100.0).min(100.0);
        Self {
            phase,
            current: index + 1,
            total,
            percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_iteration_bands() {
        assert_eq!(RunProgress::entering(Phase::Upload, 0, 1).percentage, 0.0);
        assert_eq!(RunProgress::entering(Phase::Processing, 0, 1).percentage, 30.0);
        assert_eq!(RunProgress::entering(Phase::Download, 0, 1).percentage, 80.0);
        assert_eq!(RunProgress::finished(0, 1).percentage, 100.0);
    }

    #[test]
    fn bands_scale_with_iteration_position() {
        let p = RunProgress::entering(Phase::Processing, 1, 4);
        assert_eq!(p.current, 2);
        assert_eq!(p.total, 4);
        assert!((p.percentage - 32.5).abs() < 1e-9);
    }

    #[test]
    fn reports_are_monotonic_across_a_run() {
        let total = 3;
        let mut last = -1.0;
        for index in 0..total {
            for report in [
                RunProgress::entering(Phase::Upload, index, total),
                RunProgress::entering(Phase::Processing, index, total),
                RunProgress::entering(Phase::Download, index, total),
                RunProgress::finished(index, total),
            ] {
                assert!(report.percentage >= last);
                last = report.percentage;
            }
        }
        assert_eq!(last, 100.0);
    }
}
