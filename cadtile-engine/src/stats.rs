//! 抗离群值的稳健范围统计。
//!
//! 把每个实体范围的 min/max 坐标分别收集为 X、Y 两个有序序列，
//! 以 `core_fraction` 分位给出核心跨度（仅作尺度参考），以 `safe_fraction`
//! 分位给出实际使用的安全范围。安全跨度超过核心跨度的 `clamp_trigger` 倍时，
//! 以核心中心为基准把安全范围夹到 ±`clamp_span` 倍核心跨度之内。
//! 核心退化为单值时，任何正的安全跨度都会被夹回该值。

use cadtile_config::NormalizationConfig;
use cadtile_core::geometry::{Bounds2D, Point2};

/// 单轴的分位统计结果。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisStats {
    pub core_min: f64,
    pub core_max: f64,
    pub safe_min: f64,
    pub safe_max: f64,
    pub clamped: bool,
}

impl AxisStats {
    fn compute(sorted: &[f64], config: &NormalizationConfig) -> Option<Self> {
        let (core_min, core_max) = percentile_bounds(sorted, config.core_fraction)?;
        let (mut safe_min, mut safe_max) = percentile_bounds(sorted, config.safe_fraction)?;
        let core_span = core_max - core_min;
        let mut clamped = false;
        // 核心跨度为 0 时 reach 也为 0，安全范围收缩到核心值
        if safe_max - safe_min > config.clamp_trigger * core_span {
            let center = (core_min + core_max) * 0.5;
            let reach = config.clamp_span * core_span;
            safe_min = safe_min.max(center - reach);
            safe_max = safe_max.min(center + reach);
            clamped = true;
        }
        Some(Self {
            core_min,
            core_max,
            safe_min,
            safe_max,
            clamped,
        })
    }

    #[inline]
    pub fn core_span(&self) -> f64 {
        self.core_max - self.core_min
    }
}

/// 稳健范围。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustExtent {
    pub x: AxisStats,
    pub y: AxisStats,
    /// 参与统计的有限实体范围个数。
    pub samples: usize,
}

impl RobustExtent {
    /// 没有任何有限范围时返回 `None`。
    pub fn compute(extents: &[Bounds2D], config: &NormalizationConfig) -> Option<Self> {
        let mut xs = Vec::with_capacity(extents.len() * 2);
        let mut ys = Vec::with_capacity(extents.len() * 2);
        let mut samples = 0;
        for extent in extents.iter().filter(|extent| extent.is_finite()) {
            xs.push(extent.min().x());
            xs.push(extent.max().x());
            ys.push(extent.min().y());
            ys.push(extent.max().y());
            samples += 1;
        }
        xs.sort_by(f64::total_cmp);
        ys.sort_by(f64::total_cmp);
        Some(Self {
            x: AxisStats::compute(&xs, config)?,
            y: AxisStats::compute(&ys, config)?,
            samples,
        })
    }

    /// 用于居中与空间过滤的安全范围。
    pub fn safe_bounds(&self) -> Bounds2D {
        Bounds2D::from_extents(self.x.safe_min, self.x.safe_max, self.y.safe_min, self.y.safe_max)
    }

    pub fn core_center(&self) -> Point2 {
        Point2::new(
            (self.x.core_min + self.x.core_max) * 0.5,
            (self.y.core_min + self.y.core_max) * 0.5,
        )
    }

    pub fn is_clamped(&self) -> bool {
        self.x.clamped || self.y.clamped
    }
}

/// 在有序序列两端各裁去 `floor(n * fraction)` 个样本后的首末值。
pub fn percentile_bounds(sorted: &[f64], fraction: f64) -> Option<(f64, f64)> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let mut k = (n as f64 * fraction.clamp(0.0, 0.5)).floor() as usize;
    if k * 2 >= n {
        k = (n - 1) / 2;
    }
    Some((sorted[k], sorted[n - 1 - k]))
}

/// 中位数，输入须已排序。
pub fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    Some(if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) * 0.5
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f64, y: f64) -> Bounds2D {
        Bounds2D::from_extents(x, x, y, y)
    }

    #[test]
    fn percentile_trims_one_sample_per_hundred() {
        let sample: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile_bounds(&sample, 0.01), Some((2.0, 99.0)));
        assert_eq!(percentile_bounds(&sample, 0.10), Some((11.0, 90.0)));
        assert_eq!(percentile_bounds(&[7.0], 0.10), Some((7.0, 7.0)));
        assert_eq!(percentile_bounds(&[], 0.10), None);
    }

    #[test]
    fn single_outlier_does_not_move_safe_bounds() {
        let config = NormalizationConfig::default();
        let cluster: Vec<Bounds2D> = (0..200).map(|i| point(f64::from(i), f64::from(i % 50))).collect();
        let baseline = RobustExtent::compute(&cluster, &config).expect("stats");

        let mut polluted = cluster.clone();
        polluted.push(point(1e9, 1e9));
        let robust = RobustExtent::compute(&polluted, &config).expect("stats");

        let span = baseline.x.core_span();
        let limit = config.clamp_span * span;
        let center = (baseline.x.core_min + baseline.x.core_max) * 0.5;
        assert!(robust.x.safe_max <= center + limit);
        assert!((robust.x.safe_max - baseline.x.safe_max).abs() <= 1.0);
        assert!(robust.safe_bounds().max().y() < 50.0);
    }

    #[test]
    fn heavy_tail_is_clamped_around_core_center() {
        let config = NormalizationConfig::default();
        let mut extents: Vec<Bounds2D> = (0..90).map(|i| point(f64::from(i), 0.0)).collect();
        extents.extend((0..10).map(|_| point(1e12, 0.0)));
        let robust = RobustExtent::compute(&extents, &config).expect("stats");
        assert!(robust.x.clamped);
        assert!(!robust.y.clamped);
        let reach = config.clamp_span * robust.x.core_span();
        let center = robust.core_center().x();
        assert!((robust.x.safe_max - (center + reach)).abs() < 1e-6);
        assert_eq!(robust.x.safe_min, 1.0);
    }

    #[test]
    fn degenerate_core_collapses_stray_outlier() {
        let config = NormalizationConfig::default();
        let mut extents: Vec<Bounds2D> = (0..20).map(|i| point(500.0, f64::from(i))).collect();
        extents.push(point(9e8, 10.0));
        let robust = RobustExtent::compute(&extents, &config).expect("stats");
        assert_eq!(robust.x.core_span(), 0.0);
        assert!(robust.x.clamped);
        assert!(robust.is_clamped());
        assert_eq!((robust.x.safe_min, robust.x.safe_max), (500.0, 500.0));
        assert!(!robust.y.clamped);

        let aligned: Vec<Bounds2D> = (0..5).map(|_| point(3.0, 4.0)).collect();
        let flat = RobustExtent::compute(&aligned, &config).expect("stats");
        assert!(!flat.is_clamped());
    }

    #[test]
    fn empty_or_non_finite_extents_yield_nothing() {
        let config = NormalizationConfig::default();
        assert!(RobustExtent::compute(&[], &config).is_none());
        let infinite = Bounds2D::from_extents(f64::NEG_INFINITY, 1.0, 0.0, 1.0);
        assert!(RobustExtent::compute(&[infinite, Bounds2D::empty()], &config).is_none());
    }

    #[test]
    fn median_of_even_and_odd() {
        assert_eq!(median(&[1.0, 3.0, 9.0]), Some(3.0));
        assert_eq!(median(&[1.0, 3.0, 5.0, 9.0]), Some(4.0));
        assert_eq!(median(&[]), None);
    }
}
