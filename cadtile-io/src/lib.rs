//! 交换格式（DXF）与空间容器（GeoPackage）几何块的文件级读写。

pub mod attributes;
pub mod encoding;
pub mod gpkg;
pub mod layers;
mod reader;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use attributes::{AttributeParser, parse_entity_attributes, parse_entity_attributes_from_reader};
pub use encoding::{DetectedEncoding, detect_encoding, repair_dxf_encoding};
pub use layers::{parse_layer_colors, parse_layer_colors_from_reader};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document {path:?}: {message}")]
    InvalidDocument { path: PathBuf, message: String },
}

impl IoError {
    pub(crate) fn read(path: &Path, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn write(path: &Path, source: std::io::Error) -> Self {
        Self::WriteError {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn open_buffered(path: &Path) -> Result<BufReader<File>, IoError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| IoError::read(path, source))
}
