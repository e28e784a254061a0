pub mod command;
pub mod normalize;
pub mod ogr;
pub mod pipeline;
pub mod replace;
pub mod stats;
pub mod store;
pub mod style;

pub use command::{CommandResponse, CommandRunner, ProcessRunner, ToolCommand, ToolPaths};
pub use pipeline::{JobReport, Pipeline, ProgressReporter, Stage, StageReport, StageStatus};
pub use store::{GeoPackage, LayerSummary};

pub mod errors {
    use std::path::PathBuf;

    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("SQLite 操作失败: {0}")]
        Sqlite(#[from] rusqlite::Error),
        #[error("文件操作 {path:?} 失败: {source}")]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("{tool} 执行失败: {message}")]
        Tool { tool: String, message: String },
        #[error("替换 {target:?} 失败，已尝试 {attempts} 次: {source}")]
        ReplaceFailed {
            target: PathBuf,
            attempts: u32,
            #[source]
            source: std::io::Error,
        },
        #[error("{path:?} 中没有任何要素")]
        EmptyResult { path: PathBuf },
        #[error("容器 {path:?} 缺少数据表 {table}")]
        MissingTable { path: PathBuf, table: String },
    }

    impl EngineError {
        pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
            Self::Io {
                path: path.into(),
                source,
            }
        }
    }
}
