use std::path::PathBuf;
use std::time::Duration;

use cadtile_config::{AppConfig, ConfigError};
use cadtile_engine::{Pipeline, ProcessRunner, ToolPaths};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod runtime_assets;

const USAGE: &str = "用法：cadtile [--config PATH] [--work-dir DIR] <图纸文件>";

fn main() {
    let mut args = std::env::args().skip(1);
    let mut config_override: Option<PathBuf> = None;
    let mut work_dir: Option<PathBuf> = None;
    let mut input: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(path) = args.next() else {
                    eprintln!("`--config` 需要提供配置文件路径");
                    std::process::exit(1);
                };
                config_override = Some(PathBuf::from(path));
            }
            "--work-dir" => {
                let Some(path) = args.next() else {
                    eprintln!("`--work-dir` 需要提供目录路径");
                    std::process::exit(1);
                };
                work_dir = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                return;
            }
            other if other.starts_with('-') => {
                eprintln!("未知参数：{other}");
                eprintln!("{USAGE}");
                std::process::exit(1);
            }
            other => {
                if input.replace(PathBuf::from(other)).is_some() {
                    eprintln!("只能指定一个输入文件");
                    std::process::exit(1);
                }
            }
        }
    }

    let Some(input) = input else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };

    let config = load_configuration(config_override);
    init_logging(&config);
    info!(input = %input.display(), "启动 CAD 切图转换");

    let paths = match runtime_assets::resolve_tool_paths(&config.tools) {
        Ok(paths) => paths,
        Err(err) => {
            warn!(error = %err, "无法使用随包 GDAL，改用配置中的工具路径");
            ToolPaths::from_config(&config.tools)
        }
    };
    let runner = ProcessRunner::new(&paths, Duration::from_secs(config.tools.timeout_secs));

    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "drawing".to_string());
    let job_dir = work_dir
        .unwrap_or_else(|| config.pipeline.work_dir.clone())
        .join(stem);

    let pipeline = Pipeline::new(&config, paths, Box::new(runner));
    let report = pipeline.run(&input, &job_dir, &|percent: u8, message: &str| {
        info!(percent, message, "进度");
    });

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(err) => error!(error = %err, "无法序列化任务报告"),
    }

    if !report.success {
        error!(
            reason = report.failure().unwrap_or("未知原因"),
            "转换任务失败"
        );
        std::process::exit(1);
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
