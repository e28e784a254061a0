//! 单个转换任务的顺序编排：DWG → DXF → 属性解析 → GeoPackage → 合并 → 清洗 → 归一化 → 重打包。
//!
//! 容器生成之前的阶段失败即终止任务；之后的阶段失败只记入报告，
//! 任务仍以最后一个有效容器结束。

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use cadtile_config::AppConfig;
use cadtile_core::entity::{AttributeMap, LayerColors};
use cadtile_io::{parse_entity_attributes, parse_layer_colors, repair_dxf_encoding};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::command::{CommandRunner, ToolCommand, ToolPaths};
use crate::errors::EngineError;
use crate::normalize::{NormalizeOutcome, Normalizer};
use crate::ogr;
use crate::replace::{Replacer, RewriteOutcome, discard};
use crate::store::{GeoPackage, LayerSummary, count_features};

/// 进度回调：百分比与简短说明。
pub trait ProgressReporter {
    fn report(&self, percent: u8, message: &str);
}

impl<F> ProgressReporter for F
where
    F: Fn(u8, &str),
{
    fn report(&self, percent: u8, message: &str) {
        self(percent, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Convert,
    Encoding,
    Parse,
    Gpkg,
    Merge,
    Sanitize,
    Normalize,
    Repack,
}

impl Stage {
    /// 阶段开始时上报的进度。
    pub fn milestone(self) -> u8 {
        match self {
            Stage::Init => 10,
            Stage::Convert => 20,
            Stage::Encoding => 40,
            Stage::Parse => 50,
            Stage::Gpkg => 60,
            Stage::Merge => 70,
            Stage::Sanitize => 80,
            Stage::Normalize => 85,
            Stage::Repack => 90,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Stage::Init => "准备工作目录",
            Stage::Convert => "转换图纸为 DXF",
            Stage::Encoding => "修复 DXF 编码",
            Stage::Parse => "解析图元属性",
            Stage::Gpkg => "生成 GeoPackage",
            Stage::Merge => "合并渲染属性",
            Stage::Sanitize => "剔除异常坐标",
            Stage::Normalize => "坐标归一化",
            Stage::Repack => "重建空间索引",
        }
    }
}

const SUMMARY_MILESTONE: u8 = 95;
const DONE_MILESTONE: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Warning,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub success: bool,
    pub container: Option<PathBuf>,
    pub stages: Vec<StageReport>,
    pub layers: Vec<LayerSummary>,
}

impl JobReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }

    /// 第一个失败阶段的说明。
    pub fn failure(&self) -> Option<&str> {
        self.stages
            .iter()
            .find(|report| report.status == StageStatus::Failed)
            .and_then(|report| report.message.as_deref())
    }
}

/// 一次任务中各阶段结果的累积。
struct JobLog<'p> {
    progress: &'p dyn ProgressReporter,
    stages: Vec<StageReport>,
}

impl<'p> JobLog<'p> {
    fn begin(&self, stage: Stage) {
        self.progress.report(stage.milestone(), stage.label());
    }

    fn record(&mut self, stage: Stage, status: StageStatus, message: Option<String>) {
        match status {
            StageStatus::Failed => error!(?stage, message = message.as_deref().unwrap_or(""), "阶段失败"),
            StageStatus::Warning => warn!(?stage, message = message.as_deref().unwrap_or(""), "阶段告警"),
            StageStatus::Ok | StageStatus::Skipped => {
                info!(?stage, ?status, message = message.as_deref().unwrap_or(""), "阶段完成")
            }
        }
        self.stages.push(StageReport {
            stage,
            status,
            message,
        });
    }

    fn fatal(mut self, stage: Stage, message: String) -> JobReport {
        self.record(stage, StageStatus::Failed, Some(message));
        JobReport {
            success: false,
            container: None,
            stages: self.stages,
            layers: Vec::new(),
        }
    }
}

/// 转换流水线。配置与工具路径在构造时固定。
pub struct Pipeline {
    config: AppConfig,
    paths: ToolPaths,
    runner: Box<dyn CommandRunner>,
}

impl Pipeline {
    pub fn new(config: &AppConfig, paths: ToolPaths, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            config: config.clone(),
            paths,
            runner,
        }
    }

    pub fn run(&self, input: &Path, job_dir: &Path, progress: &dyn ProgressReporter) -> JobReport {
        let mut log = JobLog {
            progress,
            stages: Vec::new(),
        };
        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "drawing".to_string());
        let dxf = job_dir.join(format!("{stem}.dxf"));
        let container = job_dir.join(format!("{stem}.gpkg"));
        info!(input = %input.display(), job_dir = %job_dir.display(), "开始转换任务");

        log.begin(Stage::Init);
        if !input.is_file() {
            return log.fatal(Stage::Init, format!("输入文件不存在: {}", input.display()));
        }
        if let Err(err) = fs::create_dir_all(job_dir) {
            return log.fatal(Stage::Init, EngineError::io(job_dir, err).to_string());
        }
        log.record(Stage::Init, StageStatus::Ok, None);

        log.begin(Stage::Convert);
        match self.convert(input, &dxf, &stem, job_dir) {
            Ok(StageStatus::Skipped) => {
                log.record(Stage::Convert, StageStatus::Skipped, Some("输入已是 DXF".to_string()))
            }
            Ok(status) => log.record(Stage::Convert, status, None),
            Err(err) => return log.fatal(Stage::Convert, err.to_string()),
        }

        log.begin(Stage::Encoding);
        match repair_dxf_encoding(&dxf) {
            Ok(encoding) => log.record(Stage::Encoding, StageStatus::Ok, Some(encoding.name().to_string())),
            Err(err) => log.record(Stage::Encoding, StageStatus::Warning, Some(err.to_string())),
        }

        log.begin(Stage::Parse);
        let (attributes, layers) = self.parse(&dxf, &mut log);

        log.begin(Stage::Gpkg);
        discard(&container);
        let import = ogr::dxf_to_gpkg(&self.paths, &dxf, &container, &self.config.pipeline);
        if let Err(err) = self.run_tool(&import) {
            return log.fatal(Stage::Gpkg, err.to_string());
        }
        let imported = count_features(&container, &self.config.pipeline.layer_name);
        if imported == 0 {
            let err = EngineError::EmptyResult { path: container.clone() };
            return log.fatal(Stage::Gpkg, err.to_string());
        }
        log.record(Stage::Gpkg, StageStatus::Ok, Some(format!("{imported} 个要素")));

        log.begin(Stage::Merge);
        let merged = GeoPackage::open(&container, &self.config.pipeline)
            .and_then(|store| store.merge(&attributes, &layers, &self.config.styling));
        match merged {
            Ok(summary) => log.record(
                Stage::Merge,
                StageStatus::Ok,
                Some(format!(
                    "属性 {} 行，平移 {} 行，图层回填 {} 行",
                    summary.attributes, summary.shifted, summary.layer_backfills
                )),
            ),
            Err(err) => log.record(Stage::Merge, StageStatus::Failed, Some(err.to_string())),
        }

        let replacer = Replacer::from_config(&self.config.pipeline);
        log.begin(Stage::Sanitize);
        let sanitized = job_dir.join(format!("{stem}_sanitized.gpkg"));
        let command = ogr::sanitize(&self.paths, &container, &sanitized, &self.config.pipeline);
        let outcome = replacer.rewrite_with(
            self.runner.as_ref(),
            &command,
            &sanitized,
            &container,
            &self.config.pipeline.layer_name,
        );
        record_rewrite(&mut log, Stage::Sanitize, outcome);

        log.begin(Stage::Normalize);
        let normalizer = Normalizer::new(
            self.runner.as_ref(),
            &self.paths,
            &self.config.pipeline,
            &self.config.normalization,
        );
        match normalizer.run(&container) {
            Ok(NormalizeOutcome::AlreadyGeographic) => {
                log.record(Stage::Normalize, StageStatus::Skipped, Some("坐标已是经纬度".to_string()))
            }
            Ok(NormalizeOutcome::Skipped(reason)) => {
                log.record(Stage::Normalize, StageStatus::Skipped, Some(reason))
            }
            Ok(NormalizeOutcome::Normalized {
                rows,
                geometry_scale,
                text_scale,
                filtered,
            }) => log.record(
                Stage::Normalize,
                StageStatus::Ok,
                Some(format!(
                    "{rows} 个要素，几何比例 {geometry_scale}，字高比例 {}，范围过滤 {filtered}",
                    text_scale.unwrap_or(1.0)
                )),
            ),
            Ok(NormalizeOutcome::Fallback { rows }) => log.record(
                Stage::Normalize,
                StageStatus::Warning,
                Some(format!("平移失败，已直接重投影 {rows} 个要素")),
            ),
            Ok(NormalizeOutcome::Rejected(reason)) => {
                log.record(Stage::Normalize, StageStatus::Warning, Some(reason))
            }
            Err(err) => log.record(Stage::Normalize, StageStatus::Failed, Some(err.to_string())),
        }

        log.begin(Stage::Repack);
        let repacked = job_dir.join(format!("{stem}_repacked.gpkg"));
        let command = ogr::repack(&self.paths, &container, &repacked, &self.config.pipeline);
        let outcome = replacer.rewrite_with(
            self.runner.as_ref(),
            &command,
            &repacked,
            &container,
            &self.config.pipeline.layer_name,
        );
        record_rewrite(&mut log, Stage::Repack, outcome);

        progress.report(SUMMARY_MILESTONE, "汇总图层");
        let layers = match GeoPackage::open(&container, &self.config.pipeline).and_then(|store| store.layer_summary()) {
            Ok(layers) => layers,
            Err(err) => {
                warn!(error = %err, "图层汇总失败");
                Vec::new()
            }
        };

        progress.report(DONE_MILESTONE, "完成");
        info!(container = %container.display(), layers = layers.len(), "转换任务完成");
        JobReport {
            success: true,
            container: Some(container),
            stages: log.stages,
            layers,
        }
    }

    /// 输入为 DXF 时直接复制，否则经临时副本调用转换器。
    fn convert(&self, input: &Path, dxf: &Path, stem: &str, job_dir: &Path) -> Result<StageStatus, EngineError> {
        let extension = input.extension().and_then(OsStr::to_str).unwrap_or_default();
        if extension.eq_ignore_ascii_case("dxf") {
            if input != dxf {
                fs::copy(input, dxf).map_err(|err| EngineError::io(dxf, err))?;
            }
            return Ok(StageStatus::Skipped);
        }

        let staged = job_dir.join(format!("{stem}_source.{extension}"));
        fs::copy(input, &staged).map_err(|err| EngineError::io(&staged, err))?;
        discard(dxf);
        let command = ogr::convert_drawing(&self.paths, &staged, dxf);
        let result = self.run_tool(&command);
        discard(&staged);
        result?;
        if !dxf.is_file() {
            return Err(EngineError::Tool {
                tool: tool_name(&command),
                message: format!("未生成 {}", dxf.display()),
            });
        }
        Ok(StageStatus::Ok)
    }

    fn run_tool(&self, command: &ToolCommand) -> Result<(), EngineError> {
        let response = self.runner.run(command);
        if response.success {
            return Ok(());
        }
        Err(EngineError::Tool {
            tool: tool_name(command),
            message: response.message_or_default().to_string(),
        })
    }

    /// 解析失败不终止任务，按空结果继续。
    fn parse(&self, dxf: &Path, log: &mut JobLog<'_>) -> (AttributeMap, LayerColors) {
        let mut problems = Vec::new();
        let attributes = parse_entity_attributes(dxf).unwrap_or_else(|err| {
            problems.push(err.to_string());
            AttributeMap::new()
        });
        let layers = parse_layer_colors(dxf).unwrap_or_else(|err| {
            problems.push(err.to_string());
            LayerColors::new()
        });
        let summary = format!("{} 个图元，{} 个图层", attributes.len(), layers.len());
        if problems.is_empty() {
            log.record(Stage::Parse, StageStatus::Ok, Some(summary));
        } else {
            log.record(
                Stage::Parse,
                StageStatus::Warning,
                Some(format!("{summary}; {}", problems.join("; "))),
            );
        }
        (attributes, layers)
    }
}

fn tool_name(command: &ToolCommand) -> String {
    command
        .program
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.program.display().to_string())
}

fn record_rewrite(log: &mut JobLog<'_>, stage: Stage, outcome: Result<RewriteOutcome, EngineError>) {
    match outcome {
        Ok(RewriteOutcome::Committed { rows }) => {
            log.record(stage, StageStatus::Ok, Some(format!("{rows} 个要素")))
        }
        Ok(RewriteOutcome::EmptyResult) => log.record(
            stage,
            StageStatus::Warning,
            Some("结果为空，保留原容器".to_string()),
        ),
        Ok(RewriteOutcome::ToolFailed(message)) => log.record(stage, StageStatus::Failed, Some(message)),
        Err(err) => log.record(stage, StageStatus::Failed, Some(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestones_increase_with_stage_order() {
        let stages = [
            Stage::Init,
            Stage::Convert,
            Stage::Encoding,
            Stage::Parse,
            Stage::Gpkg,
            Stage::Merge,
            Stage::Sanitize,
            Stage::Normalize,
            Stage::Repack,
        ];
        let milestones: Vec<u8> = stages.iter().map(|stage| stage.milestone()).collect();
        assert!(milestones.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(milestones.last().copied().unwrap_or_default() < SUMMARY_MILESTONE);
    }

    #[test]
    fn report_serializes_snake_case() {
        let report = JobReport {
            success: false,
            container: None,
            stages: vec![StageReport {
                stage: Stage::Gpkg,
                status: StageStatus::Failed,
                message: Some("ogr2ogr 不存在".to_string()),
            }],
            layers: Vec::new(),
        };
        let json = serde_json::to_value(&report).expect("序列化");
        assert_eq!(json["stages"][0]["stage"], "gpkg");
        assert_eq!(json["stages"][0]["status"], "failed");
        assert_eq!(report.failure(), Some("ogr2ogr 不存在"));
        assert!(report.stage(Stage::Merge).is_none());
    }
}
