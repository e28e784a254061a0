use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。启动时构造一次，之后以引用方式向下传递。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tools: ToolConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub normalization: NormalizationConfig,
    #[serde(default)]
    pub styling: StylingConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `CADTILE_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("CADTILE_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 外部工具位置。`bundle_root` 指向随程序分发的 GDAL 目录，其余字段可逐项覆盖。
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "ToolConfig::default_converter")]
    pub converter: PathBuf,
    #[serde(default = "ToolConfig::default_converter_flags")]
    pub converter_flags: Vec<String>,
    #[serde(default = "ToolConfig::default_ogr2ogr")]
    pub ogr2ogr: PathBuf,
    #[serde(default)]
    pub bundle_root: Option<PathBuf>,
    #[serde(default)]
    pub gdal_data: Option<PathBuf>,
    #[serde(default)]
    pub proj_lib: Option<PathBuf>,
    #[serde(default = "ToolConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ToolConfig {
    fn default_converter() -> PathBuf {
        PathBuf::from("dwg2dxf")
    }

    fn default_converter_flags() -> Vec<String> {
        vec!["-y".to_string()]
    }

    fn default_ogr2ogr() -> PathBuf {
        PathBuf::from("ogr2ogr")
    }

    fn default_timeout_secs() -> u64 {
        3600
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            converter: Self::default_converter(),
            converter_flags: Self::default_converter_flags(),
            ogr2ogr: Self::default_ogr2ogr(),
            bundle_root: None,
            gdal_data: None,
            proj_lib: None,
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "PipelineConfig::default_source_srs")]
    pub source_srs: String,
    #[serde(default = "PipelineConfig::default_target_srs")]
    pub target_srs: String,
    #[serde(default = "PipelineConfig::default_replace_retries")]
    pub replace_retries: u32,
    #[serde(default = "PipelineConfig::default_replace_backoff_ms")]
    pub replace_backoff_ms: u64,
    #[serde(default = "PipelineConfig::default_sanitize_limit")]
    pub sanitize_limit: f64,
    #[serde(default = "PipelineConfig::default_geometry_column")]
    pub geometry_column: String,
    #[serde(default = "PipelineConfig::default_layer_name")]
    pub layer_name: String,
}

impl PipelineConfig {
    fn default_work_dir() -> PathBuf {
        PathBuf::from("./data")
    }

    fn default_source_srs() -> String {
        "EPSG:3857".to_string()
    }

    fn default_target_srs() -> String {
        "EPSG:4326".to_string()
    }

    fn default_replace_retries() -> u32 {
        5
    }

    fn default_replace_backoff_ms() -> u64 {
        1000
    }

    fn default_sanitize_limit() -> f64 {
        1e20
    }

    fn default_geometry_column() -> String {
        "geom".to_string()
    }

    fn default_layer_name() -> String {
        "entities".to_string()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: Self::default_work_dir(),
            source_srs: Self::default_source_srs(),
            target_srs: Self::default_target_srs(),
            replace_retries: Self::default_replace_retries(),
            replace_backoff_ms: Self::default_replace_backoff_ms(),
            sanitize_limit: Self::default_sanitize_limit(),
            geometry_column: Self::default_geometry_column(),
            layer_name: Self::default_layer_name(),
        }
    }
}

/// 坐标归一化的经验阈值。数值针对实际图纸调校，仅作启发式使用。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// 视为合法经纬度的 X 绝对值上限。
    pub wgs84_max_x: f64,
    pub wgs84_max_y: f64,
    /// 宽或高超过该值时按"毫米误作米"处理。
    pub millimeter_span: f64,
    pub geometry_scale: f64,
    pub text_scale: f64,
    pub text_median_limit: f64,
    pub text_min_scaled: f64,
    pub text_width_ratio: f64,
    pub text_max_width_ratio: f64,
    /// 文字缩放后最大字高不得低于该值（米）。
    pub text_visibility_floor: f64,
    pub core_fraction: f64,
    pub safe_fraction: f64,
    pub clamp_trigger: f64,
    pub clamp_span: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            wgs84_max_x: 190.0,
            wgs84_max_y: 95.0,
            millimeter_span: 2e7,
            geometry_scale: 0.001,
            text_scale: 0.001,
            text_median_limit: 50.0,
            text_min_scaled: 0.5,
            text_width_ratio: 0.1,
            text_max_width_ratio: 0.8,
            text_visibility_floor: 0.01,
            core_fraction: 0.10,
            safe_fraction: 0.01,
            clamp_trigger: 20.0,
            clamp_span: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StylingConfig {
    /// 深色底图：把解析得到的纯黑替换为白色。
    #[serde(default = "StylingConfig::default_black_to_white")]
    pub black_to_white: bool,
}

impl StylingConfig {
    fn default_black_to_white() -> bool {
        true
    }
}

impl Default for StylingConfig {
    fn default() -> Self {
        Self {
            black_to_white: Self::default_black_to_white(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let cfg = AppConfig::discover().expect("discover should succeed");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.tools.timeout_secs, 3600);
        assert_eq!(cfg.tools.converter_flags, vec!["-y".to_string()]);
        assert!(cfg.tools.bundle_root.is_none());
        assert_eq!(cfg.pipeline.replace_retries, 5);
        assert_eq!(cfg.pipeline.layer_name, "entities");
        assert_eq!(cfg.normalization.millimeter_span, 2e7);
        assert!(cfg.styling.black_to_white);
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [tools]
            converter = "/opt/libredwg/dwg2dxf"
            bundle_root = "../tools/gdal/bin"
            timeout_secs = 600

            [pipeline]
            work_dir = "/var/lib/cadtile"
            replace_retries = 2

            [normalization]
            text_median_limit = 80.0

            [styling]
            black_to_white = false
            "#
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.tools.converter, PathBuf::from("/opt/libredwg/dwg2dxf"));
        assert_eq!(cfg.tools.ogr2ogr, PathBuf::from("ogr2ogr"));
        assert_eq!(
            cfg.tools
                .bundle_root
                .as_deref()
                .map(|p| p.to_string_lossy().to_string()),
            Some("../tools/gdal/bin".to_string())
        );
        assert_eq!(cfg.tools.timeout_secs, 600);
        assert_eq!(cfg.pipeline.work_dir, PathBuf::from("/var/lib/cadtile"));
        assert_eq!(cfg.pipeline.replace_retries, 2);
        assert_eq!(cfg.pipeline.target_srs, "EPSG:4326");
        assert_eq!(cfg.normalization.text_median_limit, 80.0);
        assert_eq!(cfg.normalization.text_scale, 0.001);
        assert!(!cfg.styling.black_to_white);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[pipeline]\nreplace_retries = \"many\"").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
