//! GeoPackage 几何块（`GP` 头 + 可选信封 + WKB）的最小编解码。
//!
//! 只识别 Point 与 LineString 的坐标布局（含 ISO 与 EWKB 的 Z/M 变体），
//! 其余几何类型原样透传。任何解析异常都退化为恒等变换，从不报错。

use std::borrow::Cow;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use cadtile_core::geometry::{Bounds2D, Point2, Vector2};

pub const MAGIC: [u8; 2] = *b"GP";
const FIXED_HEADER_LEN: usize = 8;
const WKB_PREFIX_LEN: usize = 5;
const COORDINATE_LEN: usize = 8;

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// WKB 字节序标记：0 大端，1 小端。
    fn from_wkb(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Endian::Big),
            1 => Some(Endian::Little),
            _ => None,
        }
    }

    fn read_f64(self, bytes: &[u8], at: usize) -> Option<f64> {
        let raw = bytes.get(at..at + COORDINATE_LEN)?;
        Some(match self {
            Endian::Big => BigEndian::read_f64(raw),
            Endian::Little => LittleEndian::read_f64(raw),
        })
    }

    fn write_f64(self, bytes: &mut [u8], at: usize, value: f64) -> Option<()> {
        let raw = bytes.get_mut(at..at + COORDINATE_LEN)?;
        match self {
            Endian::Big => BigEndian::write_f64(raw, value),
            Endian::Little => LittleEndian::write_f64(raw, value),
        }
        Some(())
    }

    fn read_u32(self, bytes: &[u8], at: usize) -> Option<u32> {
        let raw = bytes.get(at..at + 4)?;
        Some(match self {
            Endian::Big => BigEndian::read_u32(raw),
            Endian::Little => LittleEndian::read_u32(raw),
        })
    }

    fn read_i32(self, bytes: &[u8], at: usize) -> Option<i32> {
        self.read_u32(bytes, at).map(|raw| raw as i32)
    }
}

/// 信封类型，对应标志字节第 1..3 位。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    None,
    Xy,
    Xyz,
    Xym,
    Xyzm,
}

impl EnvelopeKind {
    pub fn from_indicator(indicator: u8) -> Option<Self> {
        match indicator {
            0 => Some(EnvelopeKind::None),
            1 => Some(EnvelopeKind::Xy),
            2 => Some(EnvelopeKind::Xyz),
            3 => Some(EnvelopeKind::Xym),
            4 => Some(EnvelopeKind::Xyzm),
            _ => None,
        }
    }

    /// 信封字节数：指示值 0..4 依次为 0、32、48、64、80。
    /// 前 32 字节总是 XY 范围，其后的分量只随块原样保留。
    pub fn byte_len(self) -> usize {
        match self {
            EnvelopeKind::None => 0,
            EnvelopeKind::Xy => 32,
            EnvelopeKind::Xyz => 48,
            EnvelopeKind::Xym => 64,
            EnvelopeKind::Xyzm => 80,
        }
    }

    pub fn is_none(self) -> bool {
        matches!(self, EnvelopeKind::None)
    }
}

/// 几何块头部。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub version: u8,
    /// 头部自身（srs_id 与信封）的字节序，由标志位 0 决定。
    pub endian: Endian,
    pub envelope: EnvelopeKind,
    pub empty: bool,
    pub extended: bool,
    pub srs_id: i32,
}

impl BlobHeader {
    pub fn parse(blob: &[u8]) -> Option<Self> {
        if blob.len() < FIXED_HEADER_LEN || blob[..2] != MAGIC {
            return None;
        }
        let flags = blob[3];
        let endian = if flags & 0x01 == 1 {
            Endian::Little
        } else {
            Endian::Big
        };
        let envelope = EnvelopeKind::from_indicator((flags >> 1) & 0x07)?;
        let header = Self {
            version: blob[2],
            endian,
            envelope,
            empty: flags & 0x10 != 0,
            extended: flags & 0x20 != 0,
            srs_id: endian.read_i32(blob, 4)?,
        };
        if blob.len() < header.byte_len() {
            return None;
        }
        Some(header)
    }

    /// 头部总长度，即 WKB 起始偏移。
    #[inline]
    pub fn byte_len(&self) -> usize {
        FIXED_HEADER_LEN + self.envelope.byte_len()
    }

    /// 信封中的 XY 范围（顺序 min_x, max_x, min_y, max_y）。
    pub fn envelope_bounds(&self, blob: &[u8]) -> Option<Bounds2D> {
        if self.envelope.is_none() {
            return None;
        }
        let read = |slot: usize| self.endian.read_f64(blob, FIXED_HEADER_LEN + slot * COORDINATE_LEN);
        let bounds = Bounds2D::from_extents(read(0)?, read(1)?, read(2)?, read(3)?);
        bounds.is_finite().then_some(bounds)
    }
}

/// WKB 基础几何类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    Other(u32),
}

impl GeometryType {
    fn from_base(code: u32) -> Self {
        match code {
            1 => GeometryType::Point,
            2 => GeometryType::LineString,
            3 => GeometryType::Polygon,
            4 => GeometryType::MultiPoint,
            5 => GeometryType::MultiLineString,
            6 => GeometryType::MultiPolygon,
            7 => GeometryType::GeometryCollection,
            other => GeometryType::Other(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GeometryType::Point => "POINT",
            GeometryType::LineString => "LINESTRING",
            GeometryType::Polygon => "POLYGON",
            GeometryType::MultiPoint => "MULTIPOINT",
            GeometryType::MultiLineString => "MULTILINESTRING",
            GeometryType::MultiPolygon => "MULTIPOLYGON",
            GeometryType::GeometryCollection => "GEOMETRYCOLLECTION",
            GeometryType::Other(_) => "GEOMETRY",
        }
    }
}

/// WKB 前缀解析结果：坐标数据起点与每个顶点的维度。
#[derive(Debug, Clone, Copy)]
struct WkbLayout {
    endian: Endian,
    geometry_type: GeometryType,
    dimension: usize,
    body: usize,
}

impl WkbLayout {
    fn parse(blob: &[u8], start: usize) -> Option<Self> {
        let endian = Endian::from_wkb(*blob.get(start)?)?;
        let raw = endian.read_u32(blob, start + 1)?;
        let mut body = start + WKB_PREFIX_LEN;

        let (base, has_z, has_m) = if raw & (EWKB_Z | EWKB_M | EWKB_SRID) != 0 {
            if raw & EWKB_SRID != 0 {
                body += 4;
            }
            (raw & 0x0FFF_FFFF, raw & EWKB_Z != 0, raw & EWKB_M != 0)
        } else {
            let dims = raw / 1000;
            (raw % 1000, dims == 1 || dims == 3, dims == 2 || dims == 3)
        };

        Some(Self {
            endian,
            geometry_type: GeometryType::from_base(base),
            dimension: 2 + usize::from(has_z) + usize::from(has_m),
            body,
        })
    }

    fn stride(&self) -> usize {
        self.dimension * COORDINATE_LEN
    }

    /// Point 与 LineString 的顶点起始偏移；其他类型返回 `None`。
    fn vertex_offsets(&self, blob: &[u8]) -> Option<Vec<usize>> {
        let (first, count) = match self.geometry_type {
            GeometryType::Point => (self.body, 1usize),
            GeometryType::LineString => {
                let count = self.endian.read_u32(blob, self.body)? as usize;
                (self.body + 4, count)
            }
            _ => return None,
        };
        let end = count.checked_mul(self.stride())?.checked_add(first)?;
        if end > blob.len() {
            return None;
        }
        Some((0..count).map(|i| first + i * self.stride()).collect())
    }
}

/// 解码后的几何概要。
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedGeometry {
    pub header: BlobHeader,
    pub geometry_type: GeometryType,
    pub envelope: Option<Bounds2D>,
    /// 仅 Point 与 LineString 填充。
    pub vertices: Vec<Point2>,
}

pub fn decode_geometry(blob: &[u8]) -> Option<DecodedGeometry> {
    let header = BlobHeader::parse(blob)?;
    let layout = WkbLayout::parse(blob, header.byte_len())?;
    let vertices = layout
        .vertex_offsets(blob)
        .map(|offsets| {
            offsets
                .into_iter()
                .filter_map(|at| {
                    let x = layout.endian.read_f64(blob, at)?;
                    let y = layout.endian.read_f64(blob, at + COORDINATE_LEN)?;
                    Some(Point2::new(x, y))
                })
                .collect()
        })
        .unwrap_or_default();
    Some(DecodedGeometry {
        envelope: header.envelope_bounds(blob),
        header,
        geometry_type: layout.geometry_type,
        vertices,
    })
}

/// 几何块的 XY 范围：优先取信封，否则由 Point/LineString 顶点计算。
pub fn blob_extent(blob: &[u8]) -> Option<Bounds2D> {
    let decoded = decode_geometry(blob)?;
    if decoded.header.empty {
        return None;
    }
    if let Some(envelope) = decoded.envelope {
        return Some(envelope);
    }
    let mut bounds = Bounds2D::empty();
    for vertex in decoded.vertices.iter().filter(|v| v.is_finite()) {
        bounds.include_point(*vertex);
    }
    bounds.is_finite().then_some(bounds)
}

/// 按 (dx, dy) 平移 Point/LineString 的全部 XY 坐标，并同步平移信封。
/// 除坐标外的字节保持不变；无法识别的几何块原样返回。
pub fn translate_blob(blob: &[u8], offset: Vector2) -> Cow<'_, [u8]> {
    if offset.is_zero() || !offset.as_vec2().is_finite() {
        return Cow::Borrowed(blob);
    }
    match try_translate(blob, offset) {
        Some(shifted) => Cow::Owned(shifted),
        None => Cow::Borrowed(blob),
    }
}

fn try_translate(blob: &[u8], offset: Vector2) -> Option<Vec<u8>> {
    let header = BlobHeader::parse(blob)?;
    if header.empty {
        return None;
    }
    let layout = WkbLayout::parse(blob, header.byte_len())?;
    let vertices = layout.vertex_offsets(blob)?;

    let mut shifted = blob.to_vec();
    for at in vertices {
        shift_value(&mut shifted, layout.endian, at, offset.x())?;
        shift_value(&mut shifted, layout.endian, at + COORDINATE_LEN, offset.y())?;
    }
    if !header.envelope.is_none() {
        for (slot, delta) in [offset.x(), offset.x(), offset.y(), offset.y()]
            .into_iter()
            .enumerate()
        {
            shift_value(
                &mut shifted,
                header.endian,
                FIXED_HEADER_LEN + slot * COORDINATE_LEN,
                delta,
            )?;
        }
    }
    Some(shifted)
}

/// NaN（空点）保持原始位模式。
fn shift_value(bytes: &mut [u8], endian: Endian, at: usize, delta: f64) -> Option<()> {
    let value = endian.read_f64(bytes, at)?;
    if value.is_nan() {
        return Some(());
    }
    endian.write_f64(bytes, at, value + delta)
}

/// 批量平移，只返回内容确实发生变化的行。
pub fn translate_batch<K, B, I>(rows: I) -> Vec<(K, Vec<u8>)>
where
    I: IntoIterator<Item = (K, B, Vector2)>,
    B: AsRef<[u8]>,
{
    rows.into_iter()
        .filter_map(|(key, blob, offset)| {
            let original = blob.as_ref();
            match translate_blob(original, offset) {
                Cow::Owned(shifted) if shifted != original => Some((key, shifted)),
                _ => None,
            }
        })
        .collect()
}

fn put_f64(buffer: &mut Vec<u8>, value: f64) {
    let mut raw = [0u8; COORDINATE_LEN];
    LittleEndian::write_f64(&mut raw, value);
    buffer.extend_from_slice(&raw);
}

fn put_u32(buffer: &mut Vec<u8>, value: u32) {
    let mut raw = [0u8; 4];
    LittleEndian::write_u32(&mut raw, value);
    buffer.extend_from_slice(&raw);
}

fn put_header(buffer: &mut Vec<u8>, srs_id: i32, envelope: Option<Bounds2D>) {
    buffer.extend_from_slice(&MAGIC);
    buffer.push(0);
    let indicator = if envelope.is_some() { 1u8 } else { 0 };
    buffer.push(0x01 | (indicator << 1));
    put_u32(buffer, srs_id as u32);
    if let Some(bounds) = envelope {
        put_f64(buffer, bounds.min().x());
        put_f64(buffer, bounds.max().x());
        put_f64(buffer, bounds.min().y());
        put_f64(buffer, bounds.max().y());
    }
}

/// 编码小端、无信封的 Point 几何块（与 GDAL 写点时的布局一致）。
pub fn encode_point(srs_id: i32, point: Point2) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(FIXED_HEADER_LEN + WKB_PREFIX_LEN + 16);
    put_header(&mut buffer, srs_id, None);
    buffer.push(1);
    put_u32(&mut buffer, 1);
    put_f64(&mut buffer, point.x());
    put_f64(&mut buffer, point.y());
    buffer
}

/// 编码小端、带 XY 信封的 LineString 几何块。
pub fn encode_line_string(srs_id: i32, vertices: &[Point2]) -> Vec<u8> {
    let mut bounds = Bounds2D::empty();
    for vertex in vertices {
        bounds.include_point(*vertex);
    }
    let mut buffer = Vec::with_capacity(FIXED_HEADER_LEN + 32 + WKB_PREFIX_LEN + 4 + vertices.len() * 16);
    put_header(&mut buffer, srs_id, bounds.is_finite().then_some(bounds));
    buffer.push(1);
    put_u32(&mut buffer, 2);
    put_u32(&mut buffer, vertices.len() as u32);
    for vertex in vertices {
        put_f64(&mut buffer, vertex.x());
        put_f64(&mut buffer, vertex.y());
    }
    buffer
}
