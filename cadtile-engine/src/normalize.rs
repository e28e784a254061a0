//! 坐标归一化：判断是否已是经纬度，否则平移到原点、按需缩放并重投影。
//!
//! 决策（[`plan_normalization`]）是纯函数，执行（[`Normalizer`]）负责
//! 调用 ETL 工具、校验结果并替换工作容器。

use std::path::{Path, PathBuf};

use cadtile_config::{NormalizationConfig, PipelineConfig};
use cadtile_core::geometry::{Bounds2D, Point2};
use tracing::{debug, info, warn};

use crate::command::{CommandRunner, ToolPaths};
use crate::errors::EngineError;
use crate::ogr;
use crate::replace::{Replacer, RewriteOutcome, discard};
use crate::stats::{RobustExtent, median};
use crate::store::GeoPackage;

/// 决策所需的容器统计。
#[derive(Debug, Clone, Default)]
pub struct NormalizationInputs {
    pub robust: Option<RobustExtent>,
    /// `gpkg_contents` 中登记的范围。
    pub declared: Option<Bounds2D>,
    /// 正的字高，已排序。
    pub text_heights: Vec<f64>,
}

impl NormalizationInputs {
    pub fn collect(store: &GeoPackage, config: &NormalizationConfig) -> Result<Self, EngineError> {
        let extents = store.entity_extents()?;
        Ok(Self {
            robust: RobustExtent::compute(&extents, config),
            declared: store.declared_extent()?,
            text_heights: store.text_heights()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformPlan {
    /// 平移到原点的基准点，原始单位。
    pub center: Point2,
    /// 1 或 0.001，写入合成坐标系的 `+to_meter`。
    pub geometry_scale: f64,
    pub text_scale: Option<f64>,
    /// 首次尝试使用的空间过滤范围（仅稳健统计可用时）。
    pub filter: Option<Bounds2D>,
    pub extent: Bounds2D,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizationPlan {
    AlreadyGeographic,
    Skip { reason: String },
    Transform(TransformPlan),
}

pub fn plan_normalization(inputs: &NormalizationInputs, config: &NormalizationConfig) -> NormalizationPlan {
    let extent = match (&inputs.robust, inputs.declared) {
        (Some(robust), _) => robust.safe_bounds(),
        (None, Some(declared)) => declared,
        (None, None) => {
            return NormalizationPlan::Skip {
                reason: "没有可用的范围统计".to_string(),
            };
        }
    };
    if extent.is_empty() || !extent.is_finite() {
        return NormalizationPlan::Skip {
            reason: "范围无效".to_string(),
        };
    }
    if extent.within_symmetric(config.wgs84_max_x, config.wgs84_max_y) {
        return NormalizationPlan::AlreadyGeographic;
    }

    let geometry_scale =
        if extent.width() > config.millimeter_span || extent.height() > config.millimeter_span {
            config.geometry_scale
        } else {
            1.0
        };
    let text_scale = decide_text_scale(&inputs.text_heights, extent.width() * geometry_scale, config);

    NormalizationPlan::Transform(TransformPlan {
        center: extent.center(),
        geometry_scale,
        text_scale,
        filter: inputs.robust.as_ref().map(RobustExtent::safe_bounds),
        extent,
    })
}

/// 字高缩放三级判据。`heights` 为原始字高（已排序），`scaled_width`
/// 为几何缩放后的稳健宽度。
pub fn decide_text_scale(heights: &[f64], scaled_width: f64, config: &NormalizationConfig) -> Option<f64> {
    let median = median(heights)?;
    let max = heights.last().copied()?;
    let factor = config.text_scale;

    // 缩放后所有文字都不可见，不如不缩放
    if max * factor < config.text_visibility_floor {
        return None;
    }

    let unit_mismatch = median > config.text_median_limit && median * factor >= config.text_min_scaled;
    let oversized = scaled_width > 0.0 && median > scaled_width * config.text_width_ratio;
    let covering = scaled_width > 0.0 && max > scaled_width * config.text_max_width_ratio;

    if unit_mismatch || oversized || covering {
        debug!(median, max, scaled_width, unit_mismatch, oversized, covering, "启用字高缩放");
        Some(factor)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    AlreadyGeographic,
    Skipped(String),
    Normalized {
        rows: u64,
        geometry_scale: f64,
        text_scale: Option<f64>,
        filtered: bool,
    },
    /// 平移失败后直接按源坐标系重投影。
    Fallback { rows: u64 },
    /// 所有候选结果均为空或失败，保留原容器。
    Rejected(String),
}

enum Attempt {
    Produced,
    Empty,
    Failed(String),
}

pub struct Normalizer<'a> {
    runner: &'a dyn CommandRunner,
    paths: &'a ToolPaths,
    pipeline: &'a PipelineConfig,
    config: &'a NormalizationConfig,
    replacer: Replacer,
}

impl<'a> Normalizer<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        paths: &'a ToolPaths,
        pipeline: &'a PipelineConfig,
        config: &'a NormalizationConfig,
    ) -> Self {
        Self {
            runner,
            paths,
            pipeline,
            config,
            replacer: Replacer::from_config(pipeline),
        }
    }

    pub fn run(&self, container: &Path) -> Result<NormalizeOutcome, EngineError> {
        let (inputs, columns) = {
            let store = GeoPackage::open(container, self.pipeline)?;
            (NormalizationInputs::collect(&store, self.config)?, store.attribute_columns()?)
        };

        let plan = match plan_normalization(&inputs, self.config) {
            NormalizationPlan::AlreadyGeographic => {
                info!(path = %container.display(), "坐标已是经纬度，跳过归一化");
                return Ok(NormalizeOutcome::AlreadyGeographic);
            }
            NormalizationPlan::Skip { reason } => {
                warn!(path = %container.display(), %reason, "跳过归一化");
                return Ok(NormalizeOutcome::Skipped(reason));
            }
            NormalizationPlan::Transform(plan) => plan,
        };
        info!(
            center_x = plan.center.x(),
            center_y = plan.center.y(),
            geometry_scale = plan.geometry_scale,
            text_scale = ?plan.text_scale,
            clamped = inputs.robust.as_ref().is_some_and(RobustExtent::is_clamped),
            "开始坐标归一化"
        );

        let shifted = sibling(container, "shifted");
        let finished = sibling(container, "final");

        let mut filtered = plan.filter.is_some();
        let mut attempt = self.transform(container, &shifted, &finished, &plan, &columns, plan.filter.as_ref());
        if filtered && !matches!(attempt, Attempt::Produced) {
            warn!("带范围过滤的平移没有产出要素，改为不过滤重试");
            filtered = false;
            attempt = self.transform(container, &shifted, &finished, &plan, &columns, None);
        }
        discard(&shifted);

        match attempt {
            Attempt::Produced => {
                let rows = match self.replacer.commit_validated(&finished, container, &self.pipeline.layer_name)? {
                    RewriteOutcome::Committed { rows } => rows,
                    _ => return Ok(NormalizeOutcome::Rejected("归一化结果为空".to_string())),
                };
                if let Some(factor) = plan.text_scale {
                    let store = GeoPackage::open(container, self.pipeline)?;
                    let scaled = store.apply_text_scale(factor)?;
                    debug!(rows = scaled, factor, "字高已缩放");
                }
                Ok(NormalizeOutcome::Normalized {
                    rows,
                    geometry_scale: plan.geometry_scale,
                    text_scale: plan.text_scale,
                    filtered,
                })
            }
            Attempt::Empty => {
                discard(&finished);
                Ok(NormalizeOutcome::Rejected("归一化结果为空".to_string()))
            }
            Attempt::Failed(message) => {
                warn!(%message, "平移重投影失败，尝试直接重投影");
                let command = ogr::fallback_reproject(self.paths, container, &finished, self.pipeline);
                match self.replacer.rewrite_with(
                    self.runner,
                    &command,
                    &finished,
                    container,
                    &self.pipeline.layer_name,
                )? {
                    RewriteOutcome::Committed { rows } => Ok(NormalizeOutcome::Fallback { rows }),
                    RewriteOutcome::EmptyResult => Ok(NormalizeOutcome::Rejected("直接重投影结果为空".to_string())),
                    RewriteOutcome::ToolFailed(fallback) => Ok(NormalizeOutcome::Rejected(format!(
                        "平移失败: {message}; 直接重投影失败: {fallback}"
                    ))),
                }
            }
        }
    }

    /// 平移 + 赋予合成坐标系 → 重投影，结果留在 `finished` 等待校验。
    fn transform(
        &self,
        container: &Path,
        shifted: &Path,
        finished: &Path,
        plan: &TransformPlan,
        columns: &[String],
        filter: Option<&Bounds2D>,
    ) -> Attempt {
        discard(shifted);
        discard(finished);

        let sql = ogr::translate_sql(columns, plan.center, filter, self.pipeline);
        let translate = ogr::translate(
            self.paths,
            container,
            shifted,
            sql,
            ogr::scaled_mercator(plan.geometry_scale),
            self.pipeline,
        );
        let response = self.runner.run(&translate);
        if !response.success {
            return Attempt::Failed(response.message_or_default().to_string());
        }
        if crate::store::count_features(shifted, &self.pipeline.layer_name) == 0 {
            return Attempt::Empty;
        }

        let reproject = ogr::reproject(self.paths, shifted, finished, self.pipeline);
        let response = self.runner.run(&reproject);
        if !response.success {
            return Attempt::Failed(response.message_or_default().to_string());
        }
        if crate::store::count_features(finished, &self.pipeline.layer_name) == 0 {
            return Attempt::Empty;
        }
        Attempt::Produced
    }
}

/// `<stem>_<suffix>.gpkg`，与容器同目录。
fn sibling(container: &Path, suffix: &str) -> PathBuf {
    let stem = container
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    container.with_file_name(format!("{stem}_{suffix}.gpkg"))
}
