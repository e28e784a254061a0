use std::env;
use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use cadtile_config::ToolConfig;
use tracing::{debug, warn};

/// 一次外部工具调用：程序路径与参数列表。
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn path_arg(self, value: &Path) -> Self {
        self.arg(value.to_string_lossy().into_owned())
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// 紧随 `flag` 之后的参数值。
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|index| self.args.get(index + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg == flag)
    }
}

impl Display for ToolCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/// 外部命令执行接口。流水线只关心成功与否以及诊断文本。
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &ToolCommand) -> CommandResponse;
}

/// 启动时解析一次的外部工具位置，之后只读传递，不修改进程环境。
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPaths {
    pub converter: PathBuf,
    pub converter_flags: Vec<String>,
    pub ogr2ogr: PathBuf,
    pub gdal_data: Option<PathBuf>,
    pub proj_lib: Option<PathBuf>,
    /// 追加到子进程 `PATH` 前部的目录（随包分发的 DLL/so 所在位置）。
    pub search_dirs: Vec<PathBuf>,
}

impl ToolPaths {
    /// 仅使用配置中显式给出的路径。
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            converter: config.converter.clone(),
            converter_flags: config.converter_flags.clone(),
            ogr2ogr: config.ogr2ogr.clone(),
            gdal_data: config.gdal_data.clone(),
            proj_lib: config.proj_lib.clone(),
            search_dirs: Vec::new(),
        }
    }

    /// 子进程需要额外设置的环境变量。
    pub fn environment(&self) -> Vec<(String, OsString)> {
        let mut vars = Vec::new();
        if let Some(dir) = &self.gdal_data {
            vars.push(("GDAL_DATA".to_string(), dir.clone().into_os_string()));
        }
        if let Some(dir) = &self.proj_lib {
            vars.push(("PROJ_LIB".to_string(), dir.clone().into_os_string()));
            vars.push(("PROJ_DATA".to_string(), dir.clone().into_os_string()));
        }
        if !self.search_dirs.is_empty() {
            let inherited = env::var_os("PATH").unwrap_or_default();
            let dirs = self
                .search_dirs
                .iter()
                .cloned()
                .chain(env::split_paths(&inherited));
            match env::join_paths(dirs) {
                Ok(path) => vars.push(("PATH".to_string(), path)),
                Err(err) => warn!(error = %err, "无法拼接 PATH，使用继承值"),
            }
        }
        vars
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 以阻塞子进程方式运行外部工具，超时后终止进程并视为失败。
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    environment: Vec<(String, OsString)>,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(paths: &ToolPaths, timeout: Duration) -> Self {
        Self {
            environment: paths.environment(),
            timeout,
        }
    }

    fn spawn(&self, command: &ToolCommand) -> std::io::Result<Child> {
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.environment {
            process.env(key, value);
        }
        process.spawn()
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &ToolCommand) -> CommandResponse {
        debug!(command = %command, "执行外部命令");
        let mut child = match self.spawn(command) {
            Ok(child) => child,
            Err(err) => {
                return CommandResponse::err(format!(
                    "无法启动 {}: {err}",
                    command.program.display()
                ));
            }
        };

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let started = Instant::now();

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if started.elapsed() >= self.timeout => {
                    if let Err(err) = child.kill() {
                        warn!(error = %err, "终止超时进程失败");
                    }
                    // 回收僵尸进程
                    let _ = child.wait();
                    break None;
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    return CommandResponse::err(format!("等待子进程失败: {err}"));
                }
            }
        };

        let output = collect(stdout, stderr);
        match status {
            Some(status) if status.success() => CommandResponse::ok(output),
            Some(status) => CommandResponse::err(format!("退出状态 {status}: {output}")),
            None => CommandResponse::err(format!(
                "执行超过 {} 秒被终止: {output}",
                self.timeout.as_secs()
            )),
        }
    }
}

fn drain<R: Read + Send + 'static>(mut source: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(err) = source.read_to_end(&mut buffer) {
            debug!(error = %err, "读取子进程输出中断");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn collect(
    stdout: Option<thread::JoinHandle<String>>,
    stderr: Option<thread::JoinHandle<String>>,
) -> String {
    let mut parts = Vec::new();
    for handle in [stderr, stdout].into_iter().flatten() {
        if let Ok(text) = handle.join() {
            let text = text.trim();
            if !text.is_empty() {
                parts.push(text.to_string());
            }
        }
    }
    parts.join("\n")
}
