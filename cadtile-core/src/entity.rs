//! 按图元句柄汇总的渲染属性模型。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::geometry::Vector2;

/// 句柄 → 属性记录。每次转换任务解析一次，合并入容器后即丢弃。
pub type AttributeMap = HashMap<String, EntityAttributes>;

/// 图层名 → 图层默认颜色，用于回填 "随层" 颜色。
pub type LayerColors = HashMap<String, Rgb>;

/// 交换格式中与渲染相关的图元类型。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// 单行文字（TEXT）。
    Text,
    /// 块属性（ATTRIB）：对齐方式同 TEXT，但垂直对齐在组码 74。
    Attrib,
    /// 多行文字（MTEXT）。
    MText,
    Line,
    /// POLYLINE 与 LWPOLYLINE。
    Polyline,
    Hatch,
    Solid,
    Trace,
    /// 其余可绘制图元，保留原始类型名。
    Other(String),
}

const OTHER_DRAWABLE: &[&str] = &[
    "3DFACE",
    "3DSOLID",
    "ARC",
    "ARC_DIMENSION",
    "ATTDEF",
    "BODY",
    "CIRCLE",
    "DIMENSION",
    "ELLIPSE",
    "HELIX",
    "IMAGE",
    "INSERT",
    "LEADER",
    "MLEADER",
    "MLINE",
    "MULTILEADER",
    "POINT",
    "RAY",
    "REGION",
    "SHAPE",
    "SPLINE",
    "TOLERANCE",
    "WIPEOUT",
    "XLINE",
];

impl EntityKind {
    /// 将组码 0 的类型名映射为图元类型；表记录、块与段标记返回 `None`。
    pub fn from_dxf_name(name: &str) -> Option<Self> {
        let kind = match name {
            "TEXT" => EntityKind::Text,
            "ATTRIB" => EntityKind::Attrib,
            "MTEXT" => EntityKind::MText,
            "LINE" => EntityKind::Line,
            "POLYLINE" | "LWPOLYLINE" => EntityKind::Polyline,
            "HATCH" => EntityKind::Hatch,
            "SOLID" => EntityKind::Solid,
            "TRACE" => EntityKind::Trace,
            other if OTHER_DRAWABLE.contains(&other) => EntityKind::Other(other.to_string()),
            _ => return None,
        };
        Some(kind)
    }

    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self, EntityKind::Text | EntityKind::Attrib | EntityKind::MText)
    }

    /// 以实体颜色作为填充色的类型。
    #[inline]
    pub fn is_filled(&self) -> bool {
        matches!(self, EntityKind::Hatch | EntityKind::Solid | EntityKind::Trace)
    }
}

/// 文字锚点比例，(0,0) 为左下，(1,1) 为右上。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
}

impl Anchor {
    pub const BOTTOM_LEFT: Anchor = Anchor { x: 0.0, y: 0.0 };

    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// MTEXT 附着点（组码 71）：1..9 依次为上左、上中、上右、中左 … 下右。
    pub fn from_attachment_point(code: i32) -> Self {
        let y = match code {
            1..=3 => 1.0,
            4..=6 => 0.5,
            _ => 0.0,
        };
        let x = match code {
            1 | 4 | 7 => 0.0,
            2 | 5 | 8 => 0.5,
            _ => 1.0,
        };
        Self { x, y }
    }

    /// TEXT 水平（组码 72）与垂直（组码 73）对齐。
    ///
    /// 水平：0 左，1 中，2 右，3 对齐，4 居中，5 适应；对齐与适应按居中处理。
    /// 垂直：0 基线，1 底，2 中，3 顶。水平取 4 时垂直方向也居中。
    pub fn from_text_alignment(horizontal: i32, vertical: i32) -> Self {
        if horizontal == 4 {
            return Self { x: 0.5, y: 0.5 };
        }
        let x = match horizontal {
            0 => 0.0,
            2 => 1.0,
            _ => 0.5,
        };
        let y = match vertical {
            3 => 1.0,
            2 => 0.5,
            _ => 0.0,
        };
        Self { x, y }
    }
}

/// 线宽（组码 370），数值以 1/100 毫米计。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineWeight {
    #[default]
    ByLayer,
    ByBlock,
    Default,
    Value(i16),
}

impl LineWeight {
    pub fn from_code(value: i16) -> Self {
        match value {
            -1 => LineWeight::ByLayer,
            -2 => LineWeight::ByBlock,
            -3 => LineWeight::Default,
            v => LineWeight::Value(v),
        }
    }

    pub fn millimeters(&self) -> Option<f64> {
        match self {
            LineWeight::Value(v) if *v >= 0 => Some(f64::from(*v) / 100.0),
            _ => None,
        }
    }
}

/// 单个图元从交换格式中提取的渲染属性。全部为派生值，缺省为 `None`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAttributes {
    pub kind: EntityKind,
    pub layer: Option<String>,
    pub anchor: Option<Anchor>,
    /// 几何修正量，交换格式原生单位。
    pub offset: Option<Vector2>,
    pub text_height: Option<f64>,
    /// 顺时针角度，取值 [0, 360)。
    pub rotation: Option<f64>,
    pub color: Option<Rgb>,
    pub line_weight: Option<LineWeight>,
    pub fill_color: Option<Rgb>,
}

impl EntityAttributes {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            layer: None,
            anchor: None,
            offset: None,
            text_height: None,
            rotation: None,
            color: None,
            line_weight: None,
            fill_color: None,
        }
    }
}

/// 将逆时针角度规范为顺时针 [0, 360)。
pub fn clockwise_degrees(counter_clockwise: f64) -> f64 {
    // 加 0.0 消除 -0.0
    let cw = (-counter_clockwise).rem_euclid(360.0) + 0.0;
    // rem_euclid 可能因舍入返回 360.0
    if cw >= 360.0 { 0.0 } else { cw }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_point_grid() {
        assert_eq!(Anchor::from_attachment_point(1), Anchor::new(0.0, 1.0));
        assert_eq!(Anchor::from_attachment_point(5), Anchor::new(0.5, 0.5));
        assert_eq!(Anchor::from_attachment_point(9), Anchor::new(1.0, 0.0));
    }

    #[test]
    fn text_alignment_table() {
        assert_eq!(Anchor::from_text_alignment(0, 0), Anchor::BOTTOM_LEFT);
        assert_eq!(Anchor::from_text_alignment(2, 3), Anchor::new(1.0, 1.0));
        assert_eq!(Anchor::from_text_alignment(1, 2), Anchor::new(0.5, 0.5));
        assert_eq!(Anchor::from_text_alignment(4, 0), Anchor::new(0.5, 0.5));
        assert_eq!(Anchor::from_text_alignment(5, 1), Anchor::new(0.5, 0.0));
    }

    #[test]
    fn kinds_from_names() {
        assert_eq!(EntityKind::from_dxf_name("LWPOLYLINE"), Some(EntityKind::Polyline));
        assert_eq!(
            EntityKind::from_dxf_name("CIRCLE"),
            Some(EntityKind::Other("CIRCLE".to_string()))
        );
        assert_eq!(EntityKind::from_dxf_name("ATTRIB"), Some(EntityKind::Attrib));
        assert!(EntityKind::Attrib.is_text());
        assert_eq!(EntityKind::from_dxf_name("LAYER"), None);
        assert_eq!(EntityKind::from_dxf_name("SECTION"), None);
    }

    #[test]
    fn clockwise_normalization() {
        assert_eq!(clockwise_degrees(0.0), 0.0);
        assert!((clockwise_degrees(90.0) - 270.0).abs() < 1e-9);
        assert!((clockwise_degrees(-30.0) - 30.0).abs() < 1e-9);
        assert!((clockwise_degrees(450.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn line_weight_codes() {
        assert_eq!(LineWeight::from_code(-1), LineWeight::ByLayer);
        assert_eq!(LineWeight::from_code(25).millimeters(), Some(0.25));
        assert_eq!(LineWeight::ByBlock.millimeters(), None);
    }
}
