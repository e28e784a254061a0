//! 单遍流式解析交换格式，按句柄提取渲染属性。
//!
//! 解析器是一个状态机：`AwaitingEntity`、`Accumulating` 与终态 `Finished`。每遇到组码 0
//! 就把上一个图元的缓冲区整理为属性记录（句柄与类型齐全时）并重置缓冲区，
//! 类型名为 `EOF` 时停止。数值解析失败只丢弃对应组码，截断的流返回已累积的结果。

use std::io::BufRead;
use std::path::Path;

use cadtile_core::color::{Rgb, aci_to_rgb};
use cadtile_core::entity::{
    Anchor, AttributeMap, EntityAttributes, EntityKind, LineWeight, clockwise_degrees,
};
use cadtile_core::geometry::Vector2;
use tracing::{debug, trace};

use crate::reader::{TagRead, TagReader};
use crate::{IoError, open_buffered};

/// 解析 DXF 文件中全部图元的渲染属性。
pub fn parse_entity_attributes(path: &Path) -> Result<AttributeMap, IoError> {
    let reader = open_buffered(path)?;
    let result = parse_entity_attributes_from_reader(reader).map_err(|err| match err {
        IoError::ReadError { source, .. } => IoError::read(path, source),
        other => other,
    })?;
    debug!(path = %path.display(), entities = result.len(), "图元属性解析完成");
    Ok(result)
}

pub fn parse_entity_attributes_from_reader<R: BufRead>(
    source: R,
) -> Result<AttributeMap, IoError> {
    let mut reader = TagReader::new(source);
    let mut parser = AttributeParser::new();
    loop {
        match reader
            .next_pair()
            .map_err(|source| IoError::read(Path::new("<stream>"), source))?
        {
            TagRead::Pair(code, value) => {
                parser.feed(code, &value);
                if parser.is_finished() {
                    break;
                }
            }
            TagRead::BadCode { line } => {
                trace!(line, "组码无法解析，跳过该组");
            }
            TagRead::Truncated { line } => {
                debug!(line, "交换格式在组码后截断，丢弃未完成的图元");
                return Ok(parser.abandon());
            }
            TagRead::End => break,
        }
    }
    Ok(parser.finish())
}

/// 解析器状态。
#[derive(Debug)]
enum ParserState {
    AwaitingEntity,
    Accumulating(EntityBuffer),
    Finished,
}

type Flushed = Option<(String, EntityAttributes)>;

/// 状态转移函数：消费一个组码对，返回新状态与可能被刷新的图元记录。
fn transition(state: ParserState, code: i32, value: &str) -> (ParserState, Flushed) {
    match (state, code) {
        (ParserState::Finished, _) => (ParserState::Finished, None),
        (ParserState::AwaitingEntity, 0) => (start_record(value), None),
        (ParserState::AwaitingEntity, _) => (ParserState::AwaitingEntity, None),
        (ParserState::Accumulating(buffer), 0) => (start_record(value), buffer.finish()),
        (ParserState::Accumulating(mut buffer), _) => {
            buffer.absorb(code, value);
            (ParserState::Accumulating(buffer), None)
        }
    }
}

fn start_record(name: &str) -> ParserState {
    if name == "EOF" {
        ParserState::Finished
    } else {
        ParserState::Accumulating(EntityBuffer::start(name))
    }
}

/// 可增量喂入组码对的属性解析器。
#[derive(Debug)]
pub struct AttributeParser {
    state: ParserState,
    result: AttributeMap,
}

impl Default for AttributeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingEntity,
            result: AttributeMap::new(),
        }
    }

    pub fn feed(&mut self, code: i32, value: &str) {
        let state = std::mem::replace(&mut self.state, ParserState::Finished);
        let (next, flushed) = transition(state, code, value);
        self.state = next;
        if let Some((handle, attributes)) = flushed {
            if self.result.insert(handle.clone(), attributes).is_some() {
                debug!(handle, "句柄重复出现，保留后一条记录");
            }
        }
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, ParserState::Finished)
    }

    /// 流正常结束：刷新最后一个图元后返回结果。
    pub fn finish(mut self) -> AttributeMap {
        if let ParserState::Accumulating(buffer) =
            std::mem::replace(&mut self.state, ParserState::Finished)
        {
            if let Some((handle, attributes)) = buffer.finish() {
                self.result.insert(handle, attributes);
            }
        }
        self.result
    }

    /// 流被截断：丢弃进行中的图元，只返回已刷新的结果。
    pub fn abandon(self) -> AttributeMap {
        self.result
    }
}

/// 进行中的图元缓冲区，保存原始组码值，刷新时按类型解释。
#[derive(Debug, Default)]
struct EntityBuffer {
    kind: Option<EntityKind>,
    handle: Option<String>,
    layer: Option<String>,
    color_index: Option<i32>,
    true_color: Option<u32>,
    line_weight: Option<i16>,
    rotation: Option<f64>,
    height: Option<f64>,
    insert_x: Option<f64>,
    insert_y: Option<f64>,
    second_x: Option<f64>,
    second_y: Option<f64>,
    code_71: Option<i32>,
    code_72: Option<i32>,
    code_73: Option<i32>,
    code_74: Option<i32>,
}

impl EntityBuffer {
    fn start(name: &str) -> Self {
        Self {
            kind: EntityKind::from_dxf_name(name),
            ..Self::default()
        }
    }

    fn absorb(&mut self, code: i32, value: &str) {
        if self.kind.is_none() {
            return;
        }
        match code {
            5 => {
                if !value.is_empty() {
                    self.handle = Some(value.to_string());
                }
            }
            8 => self.layer = Some(value.to_string()),
            62 => assign(&mut self.color_index, parse_int(code, value)),
            420 => {
                self.true_color = parse_int::<i64>(code, value).map(|raw| (raw & 0xFF_FFFF) as u32)
            }
            370 => assign(&mut self.line_weight, parse_int(code, value)),
            50 => assign(&mut self.rotation, parse_real(code, value)),
            40 => assign_first(&mut self.height, parse_real(code, value)),
            10 => assign_first(&mut self.insert_x, parse_real(code, value)),
            20 => assign_first(&mut self.insert_y, parse_real(code, value)),
            11 => assign_first(&mut self.second_x, parse_real(code, value)),
            21 => assign_first(&mut self.second_y, parse_real(code, value)),
            71 => assign(&mut self.code_71, parse_int(code, value)),
            72 => assign(&mut self.code_72, parse_int(code, value)),
            73 => assign(&mut self.code_73, parse_int(code, value)),
            74 => assign(&mut self.code_74, parse_int(code, value)),
            _ => {}
        }
    }

    fn finish(self) -> Flushed {
        let kind = self.kind.clone()?;
        let handle = self.handle.clone()?;

        let mut attributes = EntityAttributes::new(kind.clone());
        attributes.layer = self.layer.clone();
        attributes.color = self.resolved_color();
        if kind.is_filled() {
            attributes.fill_color = attributes.color;
        }
        attributes.line_weight = self.line_weight.map(LineWeight::from_code);

        match kind {
            EntityKind::MText => {
                attributes.text_height = self.text_height();
                attributes.anchor = Some(Anchor::from_attachment_point(self.code_71.unwrap_or(1)));
                let direction = match (self.second_x, self.second_y) {
                    (Some(x), Some(y)) => Vector2::new(x, y).angle_degrees(),
                    _ => None,
                };
                attributes.rotation = direction.or(self.rotation).map(clockwise_degrees);
            }
            EntityKind::Text | EntityKind::Attrib => {
                attributes.text_height = self.text_height();
                attributes.rotation = self.rotation.map(clockwise_degrees);
                let horizontal = self.code_72.unwrap_or(0);
                // ATTRIB 的 73 是字段长度
                let vertical = match kind {
                    EntityKind::Attrib => self.code_74,
                    _ => self.code_73,
                }
                .unwrap_or(0);
                attributes.anchor = Some(Anchor::from_text_alignment(horizontal, vertical));
                if horizontal != 0 || vertical != 0 {
                    attributes.offset = self.alignment_offset();
                }
            }
            _ => {}
        }
        Some((handle, attributes))
    }

    /// 组码 420 真彩色优先；颜色号 0（随块）与 256（随层）视为未设置。
    fn resolved_color(&self) -> Option<Rgb> {
        if let Some(raw) = self.true_color {
            return Some(Rgb::from_u32(raw));
        }
        let index = self.color_index?;
        match index.unsigned_abs() {
            0 | 256 => None,
            _ => aci_to_rgb(index),
        }
    }

    fn text_height(&self) -> Option<f64> {
        self.height.filter(|h| h.is_finite() && *h > 0.0)
    }

    /// 几何位于插入点（10/20），对齐渲染期望对齐点（11/21），记录二者差值。
    fn alignment_offset(&self) -> Option<Vector2> {
        let (Some(x10), Some(y10), Some(x11), Some(y11)) =
            (self.insert_x, self.insert_y, self.second_x, self.second_y)
        else {
            return None;
        };
        let offset = Vector2::new(x11 - x10, y11 - y10);
        if offset.is_zero() || !offset.as_vec2().is_finite() {
            None
        } else {
            Some(offset)
        }
    }
}

fn assign<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn assign_first<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn parse_real(code: i32, raw: &str) -> Option<f64> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            trace!(code, raw, "数值无法解析，丢弃该组码");
            None
        }
    }
}

fn parse_int<T: std::str::FromStr>(code: i32, raw: &str) -> Option<T> {
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            trace!(code, raw, "整数无法解析，丢弃该组码");
            None
        }
    }
}
