use std::path::PathBuf;

use cadtile_core::color::{Rgb, aci_to_rgb};
use cadtile_core::entity::{Anchor, EntityKind, LineWeight};
use cadtile_io::{parse_entity_attributes, parse_layer_colors};

fn fixture(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    path
}

#[test]
fn annotations_fixture_yields_one_record_per_entity() {
    let attributes = parse_entity_attributes(&fixture("annotations.dxf")).expect("读取 DXF 失败");
    let mut handles: Vec<_> = attributes.keys().cloned().collect();
    handles.sort();
    assert_eq!(handles, vec!["1A", "1B", "1C", "1D", "1E", "1F", "20", "21", "22"]);
}

#[test]
fn mtext_attachment_point_five_is_middle_center() {
    let attributes = parse_entity_attributes(&fixture("annotations.dxf")).expect("读取 DXF 失败");
    let mtext = attributes.get("1B").expect("未找到 MTEXT");
    assert_eq!(mtext.kind, EntityKind::MText);
    assert_eq!(mtext.anchor, Some(Anchor::new(0.5, 0.5)));
    assert_eq!(mtext.text_height, Some(2.5));
    assert_eq!(mtext.rotation, None);
    assert_eq!(mtext.layer.as_deref(), Some("ANNO"));
}

#[test]
fn right_top_text_records_alignment_offset() {
    let attributes = parse_entity_attributes(&fixture("annotations.dxf")).expect("读取 DXF 失败");
    let text = attributes.get("1C").expect("未找到 TEXT");
    assert_eq!(text.anchor, Some(Anchor::new(1.0, 1.0)));
    let offset = text.offset.expect("右上对齐应记录偏移");
    assert!((offset.x() - 6.0).abs() < 1e-9);
    assert!((offset.y() - 3.0).abs() < 1e-9);
    assert!((text.rotation.expect("旋转角") - 270.0).abs() < 1e-9);
}

#[test]
fn default_alignment_ignores_secondary_point() {
    let attributes = parse_entity_attributes(&fixture("annotations.dxf")).expect("读取 DXF 失败");
    let text = attributes.get("1D").expect("未找到 TEXT");
    assert_eq!(text.anchor, Some(Anchor::BOTTOM_LEFT));
    assert!(text.offset.is_none());
}

#[test]
fn block_attribute_reads_vertical_alignment_from_74() {
    let attributes = parse_entity_attributes(&fixture("annotations.dxf")).expect("读取 DXF 失败");
    let attrib = attributes.get("22").expect("未找到 ATTRIB");
    assert_eq!(attrib.kind, EntityKind::Attrib);
    // 73 为字段长度 12，不能当作垂直对齐
    assert_eq!(attrib.anchor, Some(Anchor::new(1.0, 0.0)));
    let offset = attrib.offset.expect("右对齐应记录偏移");
    assert!((offset.x() - 8.0).abs() < 1e-9);
    assert!(offset.y().abs() < 1e-9);
    assert_eq!(attrib.text_height, Some(2.0));

    let insert = attributes.get("21").expect("未找到 INSERT");
    assert_eq!(insert.kind, EntityKind::Other("INSERT".to_string()));
    assert!(!attributes.contains_key("23"));
}

#[test]
fn mtext_direction_vector_wins_over_rotation_tag() {
    let attributes = parse_entity_attributes(&fixture("annotations.dxf")).expect("读取 DXF 失败");
    let mtext = attributes.get("1E").expect("未找到 MTEXT");
    assert!((mtext.rotation.expect("旋转角") - 270.0).abs() < 1e-9);
    assert_eq!(mtext.anchor, Some(Anchor::new(0.0, 1.0)));
}

#[test]
fn hatch_fill_and_by_layer_line() {
    let attributes = parse_entity_attributes(&fixture("annotations.dxf")).expect("读取 DXF 失败");
    let hatch = attributes.get("1F").expect("未找到 HATCH");
    assert_eq!(hatch.color, aci_to_rgb(3));
    assert_eq!(hatch.fill_color, aci_to_rgb(3));

    let line = attributes.get("1A").expect("未找到 LINE");
    assert_eq!(line.kind, EntityKind::Line);
    assert_eq!(line.color, None);
    assert_eq!(line.fill_color, None);
}

#[test]
fn malformed_values_only_drop_their_tag() {
    let attributes = parse_entity_attributes(&fixture("annotations.dxf")).expect("读取 DXF 失败");
    let polyline = attributes.get("20").expect("未找到 LWPOLYLINE");
    assert_eq!(polyline.kind, EntityKind::Polyline);
    assert_eq!(polyline.color, None);
    assert_eq!(polyline.line_weight, Some(LineWeight::Value(35)));
}

#[test]
fn layer_table_colors() {
    let layers = parse_layer_colors(&fixture("annotations.dxf")).expect("读取图层表失败");
    assert_eq!(layers.len(), 2);
    assert_eq!(layers.get("WALL"), Some(&Rgb::new(0xFF, 0, 0)));
    assert_eq!(layers.get("ANNO"), Some(&Rgb::WHITE));
}

#[test]
fn missing_file_reports_read_error() {
    let err = parse_entity_attributes(&fixture("missing.dxf")).unwrap_err();
    assert!(matches!(err, cadtile_io::IoError::ReadError { .. }));
}
