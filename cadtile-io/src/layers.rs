//! 图层表颜色提取：只在 `TABLE`/`LAYER` … `ENDTAB` 范围内识别 `LAYER` 记录。

use std::io::BufRead;
use std::path::Path;

use cadtile_core::color::{Rgb, aci_to_rgb};
use cadtile_core::entity::LayerColors;
use tracing::{debug, trace};

use crate::reader::{TagRead, TagReader};
use crate::{IoError, open_buffered};

pub fn parse_layer_colors(path: &Path) -> Result<LayerColors, IoError> {
    let reader = open_buffered(path)?;
    let colors = parse_layer_colors_from_reader(reader).map_err(|err| match err {
        IoError::ReadError { source, .. } => IoError::read(path, source),
        other => other,
    })?;
    debug!(path = %path.display(), layers = colors.len(), "图层颜色解析完成");
    Ok(colors)
}

pub fn parse_layer_colors_from_reader<R: BufRead>(source: R) -> Result<LayerColors, IoError> {
    let mut reader = TagReader::new(source);
    let mut scanner = LayerScanner::default();
    loop {
        match reader
            .next_pair()
            .map_err(|source| IoError::read(Path::new("<stream>"), source))?
        {
            TagRead::Pair(code, value) => {
                if !scanner.feed(code, &value) {
                    break;
                }
            }
            TagRead::BadCode { .. } => {}
            TagRead::Truncated { .. } | TagRead::End => break,
        }
    }
    Ok(scanner.finish())
}

#[derive(Debug, Default)]
enum Section {
    #[default]
    Outside,
    /// 刚遇到 `0/TABLE`，等待组码 2 给出表名。
    TableHeader,
    LayerTable,
}

#[derive(Debug, Default)]
struct LayerRecord {
    name: Option<String>,
    color: Option<Rgb>,
    true_color: Option<Rgb>,
}

#[derive(Debug, Default)]
struct LayerScanner {
    section: Section,
    current: Option<LayerRecord>,
    colors: LayerColors,
}

impl LayerScanner {
    /// 返回 `false` 表示图层表已读完，可提前结束。
    fn feed(&mut self, code: i32, value: &str) -> bool {
        if code == 0 {
            self.flush();
            match (&self.section, value) {
                (_, "EOF") => return false,
                (Section::LayerTable, "ENDTAB") => {
                    self.section = Section::Outside;
                    // 交换格式中只有一张图层表
                    return self.colors.is_empty();
                }
                (Section::LayerTable, "LAYER") => self.current = Some(LayerRecord::default()),
                (_, "TABLE") => self.section = Section::TableHeader,
                (Section::TableHeader, _) => self.section = Section::Outside,
                _ => {}
            }
            return true;
        }

        if matches!(self.section, Section::TableHeader) {
            if code == 2 {
                self.section = if value == "LAYER" {
                    Section::LayerTable
                } else {
                    Section::Outside
                };
            }
            return true;
        }

        let Some(record) = self.current.as_mut() else {
            return true;
        };
        match code {
            2 => record.name = Some(value.to_string()),
            62 => match value.parse::<i32>() {
                Ok(index) => record.color = aci_to_rgb(index),
                Err(_) => trace!(value, "图层颜色号无法解析"),
            },
            420 => match value.parse::<i64>() {
                Ok(raw) => record.true_color = Some(Rgb::from_u32((raw & 0xFF_FFFF) as u32)),
                Err(_) => trace!(value, "图层真彩色无法解析"),
            },
            _ => {}
        }
        true
    }

    fn flush(&mut self) {
        let Some(record) = self.current.take() else {
            return;
        };
        if let (Some(name), Some(color)) = (record.name, record.true_color.or(record.color)) {
            self.colors.insert(name, color);
        }
    }

    fn finish(mut self) -> LayerColors {
        self.flush();
        self.colors
    }
}
