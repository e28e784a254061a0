use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cadtile_config::AppConfig;
use cadtile_core::geometry::Point2;
use cadtile_engine::{
    CommandResponse, CommandRunner, JobReport, Pipeline, Stage, StageStatus, ToolCommand, ToolPaths,
};
use cadtile_io::gpkg::encode_line_string;
use rusqlite::{Connection, params};

const WALL_DRAWING: &str = "  0\nSECTION\n  2\nTABLES\n  0\nTABLE\n  2\nLAYER\n  0\nLAYER\n  2\nWALL\n 62\n1\n  0\nENDTAB\n  0\nENDSEC\n  0\nSECTION\n  2\nENTITIES\n  0\nLINE\n  5\n1A\n  8\nWALL\n 10\n0.0\n 20\n0.0\n 11\n10.0\n 21\n10.0\n  0\nENDSEC\n  0\nEOF\n";

/// 代替 dwg2dxf 与 ogr2ogr：转换器写出固定 DXF，导入生成单要素容器，其余改写原样复制。
struct FakeTools {
    commands: Arc<Mutex<Vec<ToolCommand>>>,
    converter_fails: bool,
    empty_import: bool,
    line: [(f64, f64); 2],
}

impl FakeTools {
    fn new(line: [(f64, f64); 2]) -> (Self, Arc<Mutex<Vec<ToolCommand>>>) {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let tools = Self {
            commands: Arc::clone(&commands),
            converter_fails: false,
            empty_import: false,
            line,
        };
        (tools, commands)
    }

    fn import(&self, output: &Path) {
        let conn = Connection::open(output).expect("创建容器");
        conn.execute_batch(
            "CREATE TABLE gpkg_contents (
                table_name TEXT PRIMARY KEY, data_type TEXT, identifier TEXT,
                min_x DOUBLE, min_y DOUBLE, max_x DOUBLE, max_y DOUBLE, srs_id INTEGER
            );
            CREATE TABLE entities (
                fid INTEGER PRIMARY KEY AUTOINCREMENT,
                geom BLOB,
                Layer TEXT,
                SubClasses TEXT,
                EntityHandle TEXT,
                Text TEXT
            );",
        )
        .expect("建表");
        if self.empty_import {
            return;
        }
        let [from, to] = self.line;
        let blob = encode_line_string(3857, &[Point2::new(from.0, from.1), Point2::new(to.0, to.1)]);
        conn.execute(
            "INSERT INTO entities (geom, Layer, SubClasses, EntityHandle) VALUES (?1, 'WALL', 'AcDbEntity:AcDbLine', '1A')",
            params![blob],
        )
        .expect("插入要素");
    }
}

impl CommandRunner for FakeTools {
    fn run(&self, command: &ToolCommand) -> CommandResponse {
        self.commands.lock().expect("锁").push(command.clone());
        if command.program == Path::new("dwg2dxf") {
            if self.converter_fails {
                return CommandResponse::err("dwg2dxf: unsupported version");
            }
            let output = command.value_of("-o").expect("输出参数");
            fs::write(output, WALL_DRAWING).expect("写出 DXF");
            return CommandResponse::ok("");
        }

        let at = command.args.iter().position(|arg| arg == "GPKG").expect("格式参数");
        let output = PathBuf::from(&command.args[at + 1]);
        let input = PathBuf::from(&command.args[at + 2]);
        if command.has_flag("DXF_ENCODING") {
            self.import(&output);
        } else {
            fs::copy(&input, &output).expect("复制容器");
        }
        CommandResponse::ok("")
    }
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.replace_backoff_ms = 1;
    config
}

fn run(tools: FakeTools, input: &Path, job_dir: &Path) -> (JobReport, Vec<u8>) {
    let config = config();
    let pipeline = Pipeline::new(&config, ToolPaths::from_config(&config.tools), Box::new(tools));
    let progress = Mutex::new(Vec::new());
    let report = pipeline.run(input, job_dir, &|percent: u8, _message: &str| {
        progress.lock().expect("锁").push(percent);
    });
    let progress = progress.into_inner().expect("锁");
    (report, progress)
}

fn line_color(container: &Path, handle: &str) -> Option<String> {
    let conn = Connection::open(container).expect("打开容器");
    conn.query_row(
        "SELECT line_color FROM entities WHERE EntityHandle = ?1",
        params![handle],
        |row| row.get(0),
    )
    .expect("查询线色")
}

#[test]
fn by_layer_line_takes_layer_color() {
    let dir = tempfile::tempdir().expect("临时目录");
    let input = dir.path().join("wall.dxf");
    fs::write(&input, WALL_DRAWING).expect("写入图纸");
    let job_dir = dir.path().join("job");

    let (tools, commands) = FakeTools::new([(0.0, 0.0), (10.0, 10.0)]);
    let (report, progress) = run(tools, &input, &job_dir);

    assert!(report.success, "{report:?}");
    let container = report.container.clone().expect("容器");
    assert_eq!(line_color(&container, "1A").as_deref(), Some("#FF0000"));

    assert_eq!(report.stage(Stage::Convert).map(|s| s.status), Some(StageStatus::Skipped));
    assert_eq!(report.stage(Stage::Normalize).map(|s| s.status), Some(StageStatus::Skipped));
    assert_eq!(report.stage(Stage::Repack).map(|s| s.status), Some(StageStatus::Ok));
    assert_eq!(report.layers.len(), 1);
    assert_eq!(report.layers[0].name, "WALL");
    assert_eq!(report.layers[0].color, "#FF0000");

    assert_eq!(progress.first(), Some(&10));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));

    // 已是经纬度：只有导入、清洗与重打包
    let programs = commands.lock().expect("锁").len();
    assert_eq!(programs, 3);
}

#[test]
fn projected_drawing_is_normalized_and_keeps_attributes() {
    let dir = tempfile::tempdir().expect("临时目录");
    let input = dir.path().join("plan.dwg");
    fs::write(&input, b"AC1032 binary").expect("写入图纸");
    let job_dir = dir.path().join("job");

    let (tools, commands) = FakeTools::new([(400_000.0, 3_000_000.0), (500_000.0, 3_100_000.0)]);
    let (report, _) = run(tools, &input, &job_dir);

    assert!(report.success, "{report:?}");
    assert_eq!(report.stage(Stage::Convert).map(|s| s.status), Some(StageStatus::Ok));
    assert_eq!(report.stage(Stage::Normalize).map(|s| s.status), Some(StageStatus::Ok));
    assert!(!job_dir.join("plan_source.dwg").exists());
    assert!(job_dir.join("plan.dxf").exists());

    let container = report.container.clone().expect("容器");
    assert_eq!(line_color(&container, "1A").as_deref(), Some("#FF0000"));

    let commands = commands.lock().expect("锁");
    assert!(commands.iter().any(|command| command.has_flag("-a_srs")));
    assert!(commands.iter().any(|command| command.value_of("-t_srs") == Some("EPSG:4326")));
}

#[test]
fn converter_failure_aborts_job() {
    let dir = tempfile::tempdir().expect("临时目录");
    let input = dir.path().join("broken.dwg");
    fs::write(&input, b"not a drawing").expect("写入图纸");

    let (mut tools, _) = FakeTools::new([(0.0, 0.0), (1.0, 1.0)]);
    tools.converter_fails = true;
    let (report, _) = run(tools, &input, &dir.path().join("job"));

    assert!(!report.success);
    assert!(report.container.is_none());
    assert_eq!(
        report.failure(),
        Some("dwg2dxf 执行失败: dwg2dxf: unsupported version")
    );
    assert!(report.stage(Stage::Gpkg).is_none());
}

#[test]
fn empty_import_aborts_job() {
    let dir = tempfile::tempdir().expect("临时目录");
    let input = dir.path().join("blank.dxf");
    fs::write(&input, WALL_DRAWING).expect("写入图纸");

    let (mut tools, commands) = FakeTools::new([(0.0, 0.0), (1.0, 1.0)]);
    tools.empty_import = true;
    let (report, _) = run(tools, &input, &dir.path().join("job"));

    assert!(!report.success);
    assert_eq!(report.stage(Stage::Gpkg).map(|s| s.status), Some(StageStatus::Failed));
    assert!(report.failure().is_some_and(|reason| reason.contains("没有任何要素")));
    assert!(report.stage(Stage::Merge).is_none());
    assert_eq!(commands.lock().expect("锁").len(), 1);
}

#[test]
fn missing_input_fails_at_init() {
    let dir = tempfile::tempdir().expect("临时目录");
    let (tools, commands) = FakeTools::new([(0.0, 0.0), (1.0, 1.0)]);
    let (report, _) = run(tools, &dir.path().join("absent.dwg"), &dir.path().join("job"));
    assert!(!report.success);
    assert_eq!(report.stage(Stage::Init).map(|s| s.status), Some(StageStatus::Failed));
    assert!(commands.lock().expect("锁").is_empty());
}
