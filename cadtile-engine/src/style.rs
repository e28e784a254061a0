//! OGR 要素样式串（`PEN(...)`、`BRUSH(...)`、`LABEL(...)`）的解析。

use cadtile_core::color::Rgb;
use cadtile_core::entity::clockwise_degrees;
use once_cell::sync::Lazy;
use regex::Regex;

/// `key:value` 参数，值可以是带引号的字符串。
static PARAMETER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z]+):("(?:[^"\\]|\\.)*"|[^,]*)"#).expect("样式参数正则")
});

/// 标签样式。角度已换算为顺时针。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelStyle {
    pub font: Option<String>,
    pub size: Option<f64>,
    pub color: Option<Rgb>,
    pub angle: Option<f64>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OgrStyle {
    pub pen_color: Option<Rgb>,
    pub brush_color: Option<Rgb>,
    pub label: Option<LabelStyle>,
}

impl OgrStyle {
    pub fn parse(style: &str) -> Self {
        let pen_color = tool_parameters(style, "PEN")
            .and_then(|params| parameter(params, "c"))
            .and_then(|value| Rgb::from_hex(&value));
        let brush_color = tool_parameters(style, "BRUSH")
            .and_then(|params| parameter(params, "fc"))
            .and_then(|value| Rgb::from_hex(&value));
        let label = tool_parameters(style, "LABEL").map(parse_label);
        Self {
            pen_color,
            brush_color,
            label,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pen_color.is_none() && self.brush_color.is_none() && self.label.is_none()
    }

    /// 线色：画笔颜色优先，其次标签颜色。
    pub fn line_color(&self) -> Option<Rgb> {
        self.pen_color
            .or_else(|| self.label.as_ref().and_then(|label| label.color))
    }
}

fn parse_label(params: &str) -> LabelStyle {
    let mut label = LabelStyle::default();
    for captures in PARAMETER.captures_iter(params) {
        let key = &captures[1];
        let value = unquote(captures[2].trim());
        match key {
            "f" => label.font = Some(value.to_string()),
            "s" => {
                label.size = value
                    .trim_end_matches(['g', 'p', 'm'])
                    .parse::<f64>()
                    .ok()
                    .filter(|size| size.is_finite())
            }
            "c" => label.color = Rgb::from_hex(value),
            "a" => {
                label.angle = value
                    .parse::<f64>()
                    .ok()
                    .filter(|angle| angle.is_finite())
                    .map(clockwise_degrees)
            }
            "t" => label.text = Some(value.to_string()),
            _ => {}
        }
    }
    label
}

/// 取 `TOOL(` 与其匹配的右括号之间的参数串，引号内的括号不计。
fn tool_parameters<'a>(style: &'a str, tool: &str) -> Option<&'a str> {
    let opening = format!("{tool}(");
    let mut search = 0;
    let start = loop {
        let found = search + style.get(search..)?.find(&opening)?;
        // 避免把 `XPEN(` 之类的后缀当作工具名
        let boundary = style[..found]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_ascii_alphanumeric());
        if boundary {
            break found + opening.len();
        }
        search = found + opening.len();
    };

    let mut quoted = false;
    let mut escaped = false;
    for (offset, c) in style[start..].char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ')' if !quoted => return Some(&style[start..start + offset]),
            _ => {}
        }
    }
    None
}

fn parameter(params: &str, key: &str) -> Option<String> {
    PARAMETER
        .captures_iter(params)
        .find(|captures| &captures[1] == key)
        .map(|captures| unquote(captures[2].trim()).to_string())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}
