use std::env;
use std::path::{Path, PathBuf};

use cadtile_config::ToolConfig;
use cadtile_engine::ToolPaths;
use thiserror::Error;
use tracing::info;

const BUNDLE_ENV: &str = "CADTILE_GDAL_BUNDLE";
const DEFAULT_OGR2OGR: &str = "ogr2ogr";

/// 解析外部工具路径。配置了 `bundle_root`（或环境变量指向随包 GDAL）时，
/// 从该目录补全 ogr2ogr、GDAL_DATA 与 PROJ 数据目录；显式配置的值优先。
pub fn resolve_tool_paths(config: &ToolConfig) -> Result<ToolPaths, RuntimeAssetError> {
    let mut paths = ToolPaths::from_config(config);
    let root = match config.bundle_root.as_ref() {
        Some(root) => {
            let root = normalize_path(root)?;
            if !root.is_dir() {
                return Err(RuntimeAssetError::BundleNotFound { root });
            }
            root
        }
        None => match locate_bundle() {
            Some(root) => root,
            None => return Ok(paths),
        },
    };

    if config.ogr2ogr == Path::new(DEFAULT_OGR2OGR) {
        let executable = find_first(&root, &[&["gdal", "apps"], &["bin"]], &executable_name(DEFAULT_OGR2OGR))
            .ok_or_else(|| RuntimeAssetError::MissingExecutable { root: root.clone() })?;
        if let Some(dir) = executable.parent() {
            paths.search_dirs.push(dir.to_path_buf());
        }
        paths.ogr2ogr = executable;
    }
    let bin = root.join("bin");
    if bin.is_dir() && !paths.search_dirs.contains(&bin) {
        paths.search_dirs.push(bin);
    }
    if paths.gdal_data.is_none() {
        paths.gdal_data = find_dir(&root, &[&["gdal-data"], &["share", "gdal"]]);
    }
    if paths.proj_lib.is_none() {
        paths.proj_lib = find_dir(&root, &[&["proj9", "share"], &["proj", "share"], &["share", "proj"]]);
    }

    info!(
        root = %root.display(),
        ogr2ogr = %paths.ogr2ogr.display(),
        gdal_data = ?paths.gdal_data,
        proj_lib = ?paths.proj_lib,
        "已定位随包 GDAL"
    );
    Ok(paths)
}

fn normalize_path(path: &Path) -> Result<PathBuf, RuntimeAssetError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = env::current_dir().map_err(|error| RuntimeAssetError::Io { error })?;
        Ok(cwd.join(path))
    }
}

fn locate_bundle() -> Option<PathBuf> {
    if let Some(env_path) = env::var_os(BUNDLE_ENV) {
        let candidate = PathBuf::from(env_path);
        if candidate.is_dir() {
            return Some(candidate);
        }
    }

    let cwd = env::current_dir().ok()?;
    let candidates = [cwd.join("gdal_bundle"), cwd.join("..").join("gdal_bundle")];
    candidates.into_iter().find(|path| path.is_dir())
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

fn join_all(root: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(root.to_path_buf(), |path, part| path.join(part))
}

fn find_first(root: &Path, dirs: &[&[&str]], file: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|parts| join_all(root, parts).join(file))
        .find(|path| path.is_file())
}

fn find_dir(root: &Path, dirs: &[&[&str]]) -> Option<PathBuf> {
    dirs.iter()
        .map(|parts| join_all(root, parts))
        .find(|path| path.is_dir())
}

#[derive(Debug, Error)]
pub enum RuntimeAssetError {
    #[error("GDAL 目录 {} 不存在", .root.display())]
    BundleNotFound { root: PathBuf },
    #[error("在 {} 中找不到 ogr2ogr", .root.display())]
    MissingExecutable { root: PathBuf },
    #[error("I/O 错误: {error}")]
    Io {
        #[source]
        error: std::io::Error,
    },
}
