//! AutoCAD 颜色索引（ACI）到 RGB 的固定查找表。
//!
//! 表在编译期构造，之后只读共享，无需同步。

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// 24 位 RGB 颜色，序列化为 `#RRGGBB`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::from_u32(0x000000);
    pub const WHITE: Rgb = Rgb::from_u32(0xFFFFFF);

    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// 从 0xRRGGBB 形式的整数构造（组码 420 的真彩色也使用该布局）。
    #[inline]
    pub const fn from_u32(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xFF) as u8,
            g: ((value >> 8) & 0xFF) as u8,
            b: (value & 0xFF) as u8,
        }
    }

    /// 解析 `#RRGGBB` 或带透明度的 `#RRGGBBAA`（透明度被丢弃）。
    pub fn from_hex(raw: &str) -> Option<Self> {
        let digits = raw.trim().strip_prefix('#')?;
        if digits.len() != 6 && digits.len() != 8 {
            return None;
        }
        let rgb = digits.get(..6)?;
        u32::from_str_radix(rgb, 16).ok().map(Self::from_u32)
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// 深色底图下把纯黑映射为白色，其余颜色原样返回。
    #[inline]
    pub fn black_to_white(self) -> Self {
        if self == Self::BLACK { Self::WHITE } else { self }
    }
}

impl Display for Rgb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// 前 112 个索引有定义的颜色，其余索引未定义。
const DEFINED: [u32; 112] = [
    0x000000, 0xFF0000, 0xFFFF00, 0x00FF00, 0x00FFFF, 0x0000FF, 0xFF00FF, 0xFFFFFF, //
    0x414141, 0x808080, 0xFF0000, 0xFFAAAA, 0xBD0000, 0xBD7E7E, 0x810000, 0x815656, //
    0x680000, 0x684545, 0xFF3F00, 0xFFB5AA, 0xBD2E00, 0xBD867E, 0x811F00, 0x815B56, //
    0x681900, 0x684945, 0xFF7F00, 0xFFD4AA, 0xBD5E00, 0xBD9D7E, 0x814000, 0x816B56, //
    0x683400, 0x685645, 0xFFBF00, 0xFFF4AA, 0xBD8D00, 0xBDB57E, 0x816000, 0x817C56, //
    0x684F00, 0x686345, 0x00FF00, 0xAAFFAA, 0x00BD00, 0x7EBD7E, 0x008100, 0x568156, //
    0x006800, 0x456845, 0x00FF7F, 0xAAFFD4, 0x00BD5E, 0x7EBD9D, 0x008140, 0x56816B, //
    0x006834, 0x456856, 0x00FFFF, 0xAAFFFF, 0x00BDBD, 0x7EBDBD, 0x008181, 0x568181, //
    0x006868, 0x456868, 0x007FFF, 0xAAD4FF, 0x005EBD, 0x7E9DBD, 0x004081, 0x566B81, //
    0x003468, 0x455668, 0x0000FF, 0xAAAAFF, 0x0000BD, 0x7E7EBD, 0x000081, 0x565681, //
    0x000068, 0x454568, 0x7F00FF, 0xD4AAFF, 0x5E00BD, 0x9D7EBD, 0x400081, 0x6B5681, //
    0x340068, 0x564568, 0xFF00FF, 0xFFAAFF, 0xBD00BD, 0xBDBDBD, 0x810081, 0x815681, //
    0x680068, 0x684568, 0xFF007F, 0xFFAAD4, 0xBD005E, 0xBD7E9D, 0x810040, 0x81566B, //
    0x680034, 0x684556, 0x333333, 0x505050, 0x696969, 0x828282, 0xBEBEBE, 0xFFFFFF, //
];

/// 未定义索引的默认颜色：黑色。
pub const UNDEFINED: Rgb = Rgb::BLACK;

pub const ACI_TABLE_LEN: usize = 256;

static ACI_TABLE: [Rgb; ACI_TABLE_LEN] = build_table();

const fn build_table() -> [Rgb; ACI_TABLE_LEN] {
    let mut table = [UNDEFINED; ACI_TABLE_LEN];
    let mut index = 0;
    while index < DEFINED.len() {
        table[index] = Rgb::from_u32(DEFINED[index]);
        index += 1;
    }
    table
}

/// 按索引查表。负索引（图层关闭但保留颜色）取绝对值；越界返回 `None`。
pub fn aci_to_rgb(index: i32) -> Option<Rgb> {
    let index = index.unsigned_abs() as usize;
    ACI_TABLE.get(index).copied()
}
