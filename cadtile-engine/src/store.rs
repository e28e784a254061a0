//! GeoPackage 容器的直接 SQLite 访问：渲染属性合并、几何平移、统计查询。
//!
//! ETL 工具写出的空间索引触发器依赖 `ST_*` 扩展函数。打开连接时统一注册一组
//! 兼容函数（见 [`CompatFunction`]），由几何块编解码器计算真实值，无法解码时
//! 退化为 0 / 空串。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cadtile_config::{PipelineConfig, StylingConfig};
use cadtile_core::color::Rgb;
use cadtile_core::entity::{AttributeMap, LayerColors};
use cadtile_core::geometry::{Bounds2D, Vector2};
use cadtile_io::gpkg::{self, blob_extent, decode_geometry};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::ogr::quote_ident;
use crate::style::OgrStyle;

pub const HANDLE_COLUMN: &str = "EntityHandle";
pub const LAYER_COLUMN: &str = "Layer";
pub const TEXT_COLUMN: &str = "Text";
pub const SUBCLASSES_COLUMN: &str = "SubClasses";
const STYLE_COLUMNS: [&str; 2] = ["OGR_STYLE", "style"];

/// 已平移实体的记录表，保证同一句柄只平移一次。
pub const SHIFT_LOG_TABLE: &str = "cadtile_shift_log";

/// 图层没有任何线色时使用的默认颜色。
pub const DEFAULT_LAYER_COLOR: &str = "#9CA3AF";

/// 追加到要素表的渲染属性列。
pub const RENDER_COLUMNS: [(&str, &str); 11] = [
    ("line_color", "TEXT"),
    ("fill_color", "TEXT"),
    ("rotation", "REAL"),
    ("line_width", "REAL"),
    ("text_font", "TEXT"),
    ("text_size", "REAL"),
    ("text_color", "TEXT"),
    ("text_angle", "REAL"),
    ("text_content", "TEXT"),
    ("anchor_x", "REAL"),
    ("anchor_y", "REAL"),
];

const BLACK_HEX: &str = "#000000";
const WHITE_HEX: &str = "#FFFFFF";

/// 兼容层函数：固定单参数，输入为几何块。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatFunction {
    IsEmpty,
    MinX,
    MaxX,
    MinY,
    MaxY,
    GeometryType,
}

impl CompatFunction {
    pub const ALL: [CompatFunction; 6] = [
        CompatFunction::IsEmpty,
        CompatFunction::MinX,
        CompatFunction::MaxX,
        CompatFunction::MinY,
        CompatFunction::MaxY,
        CompatFunction::GeometryType,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CompatFunction::IsEmpty => "ST_IsEmpty",
            CompatFunction::MinX => "ST_MinX",
            CompatFunction::MaxX => "ST_MaxX",
            CompatFunction::MinY => "ST_MinY",
            CompatFunction::MaxY => "ST_MaxY",
            CompatFunction::GeometryType => "ST_GeometryType",
        }
    }

    fn register(self, conn: &Connection) -> rusqlite::Result<()> {
        let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
        let name = self.name();
        match self {
            CompatFunction::IsEmpty => conn.create_scalar_function(name, 1, flags, |ctx| {
                let empty = blob_argument(ctx)
                    .and_then(gpkg::BlobHeader::parse)
                    .is_some_and(|header| header.empty);
                Ok(i32::from(empty))
            }),
            CompatFunction::MinX => {
                conn.create_scalar_function(name, 1, flags, |ctx| Ok(extent_of(ctx, |b| b.min().x())))
            }
            CompatFunction::MaxX => {
                conn.create_scalar_function(name, 1, flags, |ctx| Ok(extent_of(ctx, |b| b.max().x())))
            }
            CompatFunction::MinY => {
                conn.create_scalar_function(name, 1, flags, |ctx| Ok(extent_of(ctx, |b| b.min().y())))
            }
            CompatFunction::MaxY => {
                conn.create_scalar_function(name, 1, flags, |ctx| Ok(extent_of(ctx, |b| b.max().y())))
            }
            CompatFunction::GeometryType => conn.create_scalar_function(name, 1, flags, |ctx| {
                let name = blob_argument(ctx)
                    .and_then(decode_geometry)
                    .map(|decoded| decoded.geometry_type.name().to_string())
                    .unwrap_or_default();
                Ok(name)
            }),
        }
    }
}

fn blob_argument<'a>(ctx: &'a Context<'_>) -> Option<&'a [u8]> {
    match ctx.get_raw(0) {
        ValueRef::Blob(blob) => Some(blob),
        _ => None,
    }
}

fn extent_of(ctx: &Context<'_>, pick: impl Fn(&Bounds2D) -> f64) -> f64 {
    blob_argument(ctx)
        .and_then(blob_extent)
        .map(|bounds| pick(&bounds))
        .unwrap_or(0.0)
}

/// 在连接上注册全部兼容函数。
pub fn register_compat_shim(conn: &Connection) -> rusqlite::Result<()> {
    for function in CompatFunction::ALL {
        function.register(conn)?;
    }
    Ok(())
}

/// 以只读方式统计候选文件的要素数；文件损坏或缺表时计为 0。
pub fn count_features(path: &Path, table: &str) -> u64 {
    let result = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).and_then(|conn| {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), [], |row| {
            row.get::<_, i64>(0)
        })
    });
    match result {
        Ok(count) => u64::try_from(count).unwrap_or(0),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "无法统计要素数，按 0 处理");
            0
        }
    }
}

/// 图层概要：图层名与出现最多的线色。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub color: String,
}

/// 一次属性合并各步骤影响的行数。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub attributes: usize,
    pub shifted: usize,
    pub layer_backfills: usize,
    pub styles: usize,
    pub hatch_text_cleared: usize,
    pub black_remapped: usize,
    pub text_color_inherited: usize,
}

pub struct GeoPackage {
    conn: Connection,
    path: PathBuf,
    table: String,
    geometry_column: String,
}

impl GeoPackage {
    pub fn open(path: &Path, pipeline: &PipelineConfig) -> Result<Self, EngineError> {
        Self::open_table(path, &pipeline.layer_name, &pipeline.geometry_column)
    }

    pub fn open_table(path: &Path, table: &str, geometry_column: &str) -> Result<Self, EngineError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        register_compat_shim(&conn)?;

        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(EngineError::MissingTable {
                path: path.to_path_buf(),
                table: table.to_string(),
            });
        }

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            table: table.to_string(),
            geometry_column: geometry_column.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn table_ident(&self) -> String {
        quote_ident(&self.table)
    }

    pub fn columns(&self) -> Result<Vec<String>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", self.table_ident()))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn has_column(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self.columns()?.iter().any(|column| column == name))
    }

    /// 除几何列与主键外的全部列，供平移语句逐列保留。
    pub fn attribute_columns(&self) -> Result<Vec<String>, EngineError> {
        let geometry = self.geometry_column.to_ascii_lowercase();
        Ok(self
            .columns()?
            .into_iter()
            .filter(|column| {
                let lower = column.to_ascii_lowercase();
                lower != geometry && lower != "geometry" && lower != "fid"
            })
            .collect())
    }

    /// 补齐缺失的渲染属性列，返回新增的列名。
    pub fn ensure_style_columns(&self) -> Result<Vec<&'static str>, EngineError> {
        let existing = self.columns()?;
        let mut added = Vec::new();
        for (name, kind) in RENDER_COLUMNS {
            if existing.iter().any(|column| column == name) {
                continue;
            }
            self.conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {name} {kind}", self.table_ident()),
                [],
            )?;
            added.push(name);
        }
        if !added.is_empty() {
            debug!(columns = ?added, "已追加渲染属性列");
        }
        Ok(added)
    }

    pub fn ensure_indexes(&self) -> Result<(), EngineError> {
        let columns = self.columns()?;
        for (suffix, column) in [("handle", HANDLE_COLUMN), ("layer", LAYER_COLUMN)] {
            if !columns.iter().any(|c| c == column) {
                continue;
            }
            self.conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                    quote_ident(&format!("idx_{}_{suffix}", self.table)),
                    self.table_ident(),
                    quote_ident(column)
                ),
                [],
            )?;
        }
        Ok(())
    }

    pub fn count(&self) -> Result<u64, EngineError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table_ident()),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// `gpkg_contents` 中登记的范围（非稳健）。
    pub fn declared_extent(&self) -> Result<Option<Bounds2D>, EngineError> {
        let row = self
            .conn
            .query_row(
                "SELECT min_x, max_x, min_y, max_y FROM gpkg_contents WHERE table_name = ?1",
                params![self.table],
                |row| {
                    Ok((
                        row.get::<_, Option<f64>>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(match row {
            Some((Some(min_x), Some(max_x), Some(min_y), Some(max_y))) => {
                let bounds = Bounds2D::from_extents(min_x, max_x, min_y, max_y);
                bounds.is_finite().then_some(bounds)
            }
            _ => None,
        })
    }

    /// 每个实体几何的 XY 范围；无法解码的几何被跳过。
    pub fn entity_extents(&self) -> Result<Vec<Bounds2D>, EngineError> {
        let geom = quote_ident(&self.geometry_column);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {geom} FROM {} WHERE {geom} IS NOT NULL",
            self.table_ident()
        ))?;
        let mut rows = stmt.query([])?;
        let mut extents = Vec::new();
        while let Some(row) = rows.next()? {
            if let ValueRef::Blob(blob) = row.get_ref(0)? {
                if let Some(bounds) = blob_extent(blob) {
                    extents.push(bounds);
                }
            }
        }
        Ok(extents)
    }

    /// 全部正的字高，已排序。
    pub fn text_heights(&self) -> Result<Vec<f64>, EngineError> {
        if !self.has_column("text_size")? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT text_size FROM {} WHERE text_size > 0",
            self.table_ident()
        ))?;
        let mut heights = stmt
            .query_map([], |row| row.get::<_, f64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        heights.retain(|h| h.is_finite());
        heights.sort_by(f64::total_cmp);
        Ok(heights)
    }

    pub fn apply_text_scale(&self, factor: f64) -> Result<usize, EngineError> {
        if !self.has_column("text_size")? {
            return Ok(0);
        }
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET text_size = text_size * ?1 WHERE text_size IS NOT NULL",
                self.table_ident()
            ),
            params![factor],
        )?;
        Ok(changed)
    }

    /// 依次执行全部属性合并步骤。越靠前的来源越具体，后续步骤只填补空值。
    pub fn merge(
        &self,
        attributes: &AttributeMap,
        layers: &LayerColors,
        styling: &StylingConfig,
    ) -> Result<MergeSummary, EngineError> {
        self.ensure_style_columns()?;
        self.ensure_indexes()?;

        let shifts: Vec<(String, Vector2)> = attributes
            .iter()
            .filter_map(|(handle, record)| record.offset.map(|offset| (handle.clone(), offset)))
            .collect();

        let mut summary = MergeSummary {
            attributes: self.apply_attributes(attributes)?,
            shifted: self.apply_geometry_shifts(&shifts)?,
            layer_backfills: self.backfill_layer_colors(layers)?,
            styles: self.apply_style_strings()?,
            hatch_text_cleared: self.clear_hatch_text()?,
            ..MergeSummary::default()
        };
        if styling.black_to_white {
            summary.black_remapped = self.remap_black_to_white()?;
        }
        summary.text_color_inherited = self.inherit_text_color()?;
        info!(path = %self.path.display(), ?summary, "属性合并完成");
        Ok(summary)
    }

    /// 按句柄写入解析得到的属性，只填补空值。
    pub fn apply_attributes(&self, attributes: &AttributeMap) -> Result<usize, EngineError> {
        if attributes.is_empty() {
            return Ok(0);
        }
        if !self.has_column(HANDLE_COLUMN)? {
            warn!(path = %self.path.display(), "要素表缺少句柄列，跳过属性写入");
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS cadtile_parsed (
                handle TEXT PRIMARY KEY,
                line_color TEXT,
                fill_color TEXT,
                rotation REAL,
                line_width REAL,
                text_size REAL,
                text_color TEXT,
                text_angle REAL,
                anchor_x REAL,
                anchor_y REAL
            );
            DELETE FROM cadtile_parsed;",
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO cadtile_parsed VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for (handle, record) in attributes {
                let is_text = record.kind.is_text();
                let text_color = record.color.filter(|_| is_text).map(Rgb::to_hex);
                let text_angle = record.rotation.filter(|_| is_text);
                insert.execute(params![
                    handle,
                    record.color.map(Rgb::to_hex),
                    record.fill_color.map(Rgb::to_hex),
                    record.rotation,
                    record.line_weight.and_then(|weight| weight.millimeters()),
                    record.text_height,
                    text_color,
                    text_angle,
                    record.anchor.map(|anchor| anchor.x),
                    record.anchor.map(|anchor| anchor.y),
                ])?;
            }
        }

        let table = self.table_ident();
        let assignments = [
            "line_color",
            "fill_color",
            "rotation",
            "line_width",
            "text_size",
            "text_color",
            "text_angle",
            "anchor_x",
            "anchor_y",
        ]
        .iter()
        .map(|column| format!("{column} = COALESCE({table}.{column}, p.{column})"))
        .collect::<Vec<_>>()
        .join(", ");
        let changed = tx.execute(
            &format!(
                "UPDATE {table} SET {assignments} FROM cadtile_parsed AS p WHERE {table}.{} = p.handle",
                quote_ident(HANDLE_COLUMN)
            ),
            [],
        )?;
        tx.execute_batch("DROP TABLE cadtile_parsed;")?;
        tx.commit()?;
        debug!(records = attributes.len(), rows = changed, "解析属性已写入");
        Ok(changed)
    }

    /// 按句柄平移几何块。已记录在平移日志中的句柄不再重复平移。
    pub fn apply_geometry_shifts(&self, shifts: &[(String, Vector2)]) -> Result<usize, EngineError> {
        if shifts.is_empty() || !self.has_column(HANDLE_COLUMN)? {
            return Ok(0);
        }

        let table = self.table_ident();
        let handle = quote_ident(HANDLE_COLUMN);
        let geom = quote_ident(&self.geometry_column);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {SHIFT_LOG_TABLE} (handle TEXT PRIMARY KEY, dx REAL, dy REAL);
             CREATE TEMP TABLE IF NOT EXISTS cadtile_shifts (handle TEXT PRIMARY KEY, dx REAL, dy REAL);
             DELETE FROM cadtile_shifts;"
        ))?;
        {
            let mut insert =
                tx.prepare("INSERT OR REPLACE INTO cadtile_shifts (handle, dx, dy) VALUES (?1, ?2, ?3)")?;
            for (key, offset) in shifts {
                insert.execute(params![key, offset.x(), offset.y()])?;
            }
        }

        let pending: Vec<(i64, Vec<u8>, Vector2)> = {
            let mut select = tx.prepare(&format!(
                "SELECT e.rowid, e.{geom}, s.dx, s.dy
                 FROM {table} AS e
                 JOIN cadtile_shifts AS s ON e.{handle} = s.handle
                 WHERE e.{geom} IS NOT NULL
                   AND s.handle NOT IN (SELECT handle FROM {SHIFT_LOG_TABLE})"
            ))?;
            select
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        Vector2::new(row.get(2)?, row.get(3)?),
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?
        };

        let updates = gpkg::translate_batch(pending);
        {
            let mut update =
                tx.prepare(&format!("UPDATE {table} SET {geom} = ?1 WHERE rowid = ?2"))?;
            for (rowid, blob) in &updates {
                update.execute(params![blob, rowid])?;
            }
        }
        tx.execute_batch(&format!(
            "INSERT OR IGNORE INTO {SHIFT_LOG_TABLE} (handle, dx, dy) SELECT handle, dx, dy FROM cadtile_shifts;
             DROP TABLE cadtile_shifts;"
        ))?;
        tx.commit()?;
        if !updates.is_empty() {
            info!(rows = updates.len(), "已按对齐点平移文字几何");
        }
        Ok(updates.len())
    }

    /// "随层" 颜色：线色为空的实体取所在图层颜色。
    pub fn backfill_layer_colors(&self, layers: &LayerColors) -> Result<usize, EngineError> {
        if layers.is_empty() || !self.has_column(LAYER_COLUMN)? {
            return Ok(0);
        }
        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0;
        {
            let mut update = tx.prepare(&format!(
                "UPDATE {} SET line_color = ?1 WHERE {} = ?2 AND line_color IS NULL",
                self.table_ident(),
                quote_ident(LAYER_COLUMN)
            ))?;
            for (layer, color) in layers {
                changed += update.execute(params![color.to_hex(), layer])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn style_column(&self) -> Result<Option<&'static str>, EngineError> {
        let columns = self.columns()?;
        Ok(STYLE_COLUMNS
            .into_iter()
            .find(|name| columns.iter().any(|column| column == name)))
    }

    /// ETL 工具写出的样式串（PEN / BRUSH / LABEL），只填补空值。
    pub fn apply_style_strings(&self) -> Result<usize, EngineError> {
        let Some(column) = self.style_column()? else {
            return Ok(0);
        };
        let table = self.table_ident();
        let styles: Vec<(i64, OgrStyle)> = {
            let mut select = self.conn.prepare(&format!(
                "SELECT rowid, {} FROM {table} WHERE {} IS NOT NULL",
                quote_ident(column),
                quote_ident(column)
            ))?;
            select
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .filter_map(|row| match row {
                    Ok((rowid, raw)) => {
                        let style = OgrStyle::parse(&raw);
                        (!style.is_empty()).then_some(Ok((rowid, style)))
                    }
                    Err(err) => Some(Err(err)),
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        if styles.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0;
        {
            let mut update = tx.prepare(&format!(
                "UPDATE {table} SET
                    line_color = COALESCE(line_color, ?1),
                    fill_color = COALESCE(fill_color, ?2),
                    rotation = COALESCE(rotation, ?3),
                    text_font = COALESCE(text_font, ?4),
                    text_size = COALESCE(text_size, ?5),
                    text_color = COALESCE(text_color, ?6),
                    text_angle = COALESCE(text_angle, ?7),
                    text_content = COALESCE(text_content, ?8)
                 WHERE rowid = ?9"
            ))?;
            for (rowid, style) in &styles {
                let label = style.label.clone().unwrap_or_default();
                changed += update.execute(params![
                    style.line_color().map(Rgb::to_hex),
                    style.brush_color.map(Rgb::to_hex),
                    label.angle,
                    label.font,
                    label.size,
                    label.color.map(Rgb::to_hex),
                    label.angle,
                    label.text,
                    rowid,
                ])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// 清除 ETL 工具写入 `Text` 列的填充图案名。
    pub fn clear_hatch_text(&self) -> Result<usize, EngineError> {
        let columns = self.columns()?;
        let text = quote_ident(TEXT_COLUMN);
        if !columns.iter().any(|c| c == TEXT_COLUMN) {
            return Ok(0);
        }
        let table = self.table_ident();
        let mut changed = self.conn.execute(
            &format!("UPDATE {table} SET {text} = NULL WHERE UPPER({text}) IN ('SOLID', 'HONEY')"),
            [],
        )?;
        if columns.iter().any(|c| c == SUBCLASSES_COLUMN) {
            changed += self.conn.execute(
                &format!(
                    "UPDATE {table} SET {text} = NULL WHERE {text} IS NOT NULL AND {} LIKE '%AcDbHatch%'",
                    quote_ident(SUBCLASSES_COLUMN)
                ),
                [],
            )?;
        }
        Ok(changed)
    }

    /// 深色底图：纯黑替换为白色。
    pub fn remap_black_to_white(&self) -> Result<usize, EngineError> {
        let table = self.table_ident();
        let mut changed = 0;
        for column in ["line_color", "text_color", "fill_color"] {
            changed += self.conn.execute(
                &format!("UPDATE {table} SET {column} = ?1 WHERE {column} = ?2"),
                params![WHITE_HEX, BLACK_HEX],
            )?;
        }
        Ok(changed)
    }

    pub fn inherit_text_color(&self) -> Result<usize, EngineError> {
        Ok(self.conn.execute(
            &format!(
                "UPDATE {} SET line_color = text_color WHERE line_color IS NULL AND text_color IS NOT NULL",
                self.table_ident()
            ),
            [],
        )?)
    }

    /// 各图层出现最多的线色，没有线色的图层使用默认灰色。
    pub fn layer_summary(&self) -> Result<Vec<LayerSummary>, EngineError> {
        let columns = self.columns()?;
        if !columns.iter().any(|c| c == LAYER_COLUMN) {
            return Ok(Vec::new());
        }
        let layer = quote_ident(LAYER_COLUMN);
        let sql = if columns.iter().any(|c| c == "line_color") {
            format!(
                "SELECT {layer}, line_color, COUNT(*) AS hits
                 FROM {}
                 WHERE {layer} IS NOT NULL
                 GROUP BY {layer}, line_color
                 ORDER BY {layer}, line_color IS NULL, hits DESC, line_color",
                self.table_ident()
            )
        } else {
            format!(
                "SELECT DISTINCT {layer}, NULL FROM {} WHERE {layer} IS NOT NULL",
                self.table_ident()
            )
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let mut layers: BTreeMap<String, Option<String>> = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        for row in rows {
            let (name, color) = row?;
            layers.entry(name).or_insert(color);
        }
        Ok(layers
            .into_iter()
            .map(|(name, color)| LayerSummary {
                name,
                color: color.unwrap_or_else(|| DEFAULT_LAYER_COLOR.to_string()),
            })
            .collect())
    }
}
