//! 外部转换器与 ogr2ogr 的调用构造。只拼装参数，不执行。

use std::path::Path;

use cadtile_config::PipelineConfig;
use cadtile_core::geometry::{Bounds2D, Point2};

use crate::command::{ToolCommand, ToolPaths};

/// `<converter> <flags> -o <output> <input>`
pub fn convert_drawing(paths: &ToolPaths, input: &Path, output: &Path) -> ToolCommand {
    ToolCommand::new(&paths.converter)
        .args(paths.converter_flags.iter().cloned())
        .arg("-o")
        .path_arg(output)
        .path_arg(input)
}

/// DXF → GeoPackage。输入已由编码修复转为 UTF-8，块内几何展开为独立要素。
pub fn dxf_to_gpkg(
    paths: &ToolPaths,
    input: &Path,
    output: &Path,
    pipeline: &PipelineConfig,
) -> ToolCommand {
    ToolCommand::new(&paths.ogr2ogr)
        .args(["--config", "DXF_ENCODING", "UTF-8"])
        .args(["--config", "DXF_MERGE_BLOCK_GEOMETRIES", "FALSE"])
        .args(["--config", "DXF_INLINE_BLOCKS", "TRUE"])
        .args(["--config", "DXF_ATTRIBUTES", "TRUE"])
        .args(["-f", "GPKG"])
        .arg("-s_srs")
        .arg(pipeline.source_srs.as_str())
        .arg("-t_srs")
        .arg(pipeline.source_srs.as_str())
        .path_arg(output)
        .path_arg(input)
        .arg("-skipfailures")
        .arg("-lco")
        .arg(format!("GEOMETRY_NAME={}", pipeline.geometry_column))
}

fn rewrite(paths: &ToolPaths, input: &Path, output: &Path) -> ToolCommand {
    ToolCommand::new(&paths.ogr2ogr)
        .args(["-f", "GPKG"])
        .path_arg(output)
        .path_arg(input)
}

fn layer_options(command: ToolCommand, pipeline: &PipelineConfig) -> ToolCommand {
    command
        .arg("-nln")
        .arg(pipeline.layer_name.as_str())
        .arg("-lco")
        .arg(format!("GEOMETRY_NAME={}", pipeline.geometry_column))
        .args(["-nlt", "GEOMETRY", "-dim", "XY"])
}

/// 剔除坐标超出 ±`sanitize_limit` 的要素。
pub fn sanitize(paths: &ToolPaths, input: &Path, output: &Path, pipeline: &PipelineConfig) -> ToolCommand {
    let limit = pipeline.sanitize_limit;
    let geom = quote_ident(&pipeline.geometry_column);
    let sql = format!(
        "SELECT * FROM {table} WHERE ST_MinX({geom}) > {low} AND ST_MaxX({geom}) < {limit} \
         AND ST_MinY({geom}) > {low} AND ST_MaxY({geom}) < {limit}",
        table = quote_ident(&pipeline.layer_name),
        low = -limit,
    );
    let command = rewrite(paths, input, output)
        .args(["-dialect", "SQLite"])
        .arg("-sql")
        .arg(sql);
    layer_options(command, pipeline)
}

/// 重新打包以重建空间索引。
pub fn repack(paths: &ToolPaths, input: &Path, output: &Path, pipeline: &PipelineConfig) -> ToolCommand {
    layer_options(rewrite(paths, input, output), pipeline)
}

/// 平移到原点，并赋予编码了几何缩放比例的合成坐标系。
pub fn translate(
    paths: &ToolPaths,
    input: &Path,
    output: &Path,
    sql: String,
    assigned_srs: String,
    pipeline: &PipelineConfig,
) -> ToolCommand {
    let command = rewrite(paths, input, output)
        .args(["-dialect", "SQLite"])
        .arg("-sql")
        .arg(sql)
        .arg("-a_srs")
        .arg(assigned_srs);
    layer_options(command, pipeline)
}

pub fn reproject(paths: &ToolPaths, input: &Path, output: &Path, pipeline: &PipelineConfig) -> ToolCommand {
    rewrite(paths, input, output)
        .arg("-t_srs")
        .arg(pipeline.target_srs.as_str())
}

/// 不平移，假定坐标已处于源坐标系中直接投影。
pub fn fallback_reproject(
    paths: &ToolPaths,
    input: &Path,
    output: &Path,
    pipeline: &PipelineConfig,
) -> ToolCommand {
    rewrite(paths, input, output)
        .arg("-s_srs")
        .arg(pipeline.source_srs.as_str())
        .arg("-t_srs")
        .arg(pipeline.target_srs.as_str())
}

/// 单位为 `scale` 米的球面墨卡托。`scale = 0.001` 表示原始坐标为毫米。
pub fn scaled_mercator(scale: f64) -> String {
    format!(
        "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +to_meter={scale} +no_defs"
    )
}

/// 平移语句：几何列替换为 `ST_Translate` 结果，其余列原样保留。
/// `filter` 给出时只保留与该范围相交的要素。
pub fn translate_sql(
    columns: &[String],
    center: Point2,
    filter: Option<&Bounds2D>,
    pipeline: &PipelineConfig,
) -> String {
    let geom = quote_ident(&pipeline.geometry_column);
    let mut sql = format!(
        "SELECT ST_Translate({geom}, {dx}, {dy}, 0) AS {geom}",
        dx = -center.x(),
        dy = -center.y(),
    );
    for column in columns {
        sql.push_str(", ");
        sql.push_str(&quote_ident(column));
    }
    sql.push_str(" FROM ");
    sql.push_str(&quote_ident(&pipeline.layer_name));
    if let Some(bounds) = filter {
        sql.push_str(&format!(
            " WHERE ST_MaxX({geom}) >= {min_x} AND ST_MinX({geom}) <= {max_x} \
             AND ST_MaxY({geom}) >= {min_y} AND ST_MinY({geom}) <= {max_y}",
            min_x = bounds.min().x(),
            max_x = bounds.max().x(),
            min_y = bounds.min().y(),
            max_y = bounds.max().y(),
        ));
    }
    sql
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
