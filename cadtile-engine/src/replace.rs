//! 工作容器的校验与替换。所有破坏性改写都先写入临时文件，
//! 确认非空后才覆盖工作容器。

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use cadtile_config::PipelineConfig;
use tracing::{debug, warn};

use crate::command::{CommandRunner, ToolCommand};
use crate::errors::EngineError;
use crate::store::count_features;

/// 一次改写的结果。只有 `Committed` 表示工作容器已被替换。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    Committed { rows: u64 },
    EmptyResult,
    ToolFailed(String),
}

impl RewriteOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, RewriteOutcome::Committed { .. })
    }
}

/// 带有限重试的文件替换，应对外部进程短暂占用文件。
#[derive(Debug, Clone, Copy)]
pub struct Replacer {
    retries: u32,
    backoff: Duration,
}

impl Replacer {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self {
            retries: retries.max(1),
            backoff,
        }
    }

    pub fn from_config(pipeline: &PipelineConfig) -> Self {
        Self::new(
            pipeline.replace_retries,
            Duration::from_millis(pipeline.replace_backoff_ms),
        )
    }

    pub fn replace(&self, source: &Path, target: &Path) -> Result<(), EngineError> {
        let mut attempt = 1;
        loop {
            match fs::rename(source, target) {
                Ok(()) => {
                    debug!(source = %source.display(), target = %target.display(), attempt, "容器已替换");
                    return Ok(());
                }
                Err(err) if attempt < self.retries => {
                    warn!(target = %target.display(), attempt, error = %err, "替换失败，稍后重试");
                    thread::sleep(self.backoff);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(EngineError::ReplaceFailed {
                        target: target.to_path_buf(),
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    /// 候选文件非空才替换目标；空结果被丢弃，目标保持不变。
    pub fn commit_validated(
        &self,
        candidate: &Path,
        target: &Path,
        table: &str,
    ) -> Result<RewriteOutcome, EngineError> {
        let rows = count_features(candidate, table);
        if rows == 0 {
            warn!(candidate = %candidate.display(), "改写结果为空，保留原容器");
            discard(candidate);
            return Ok(RewriteOutcome::EmptyResult);
        }
        self.replace(candidate, target)?;
        Ok(RewriteOutcome::Committed { rows })
    }

    /// 执行一条 `target → candidate` 的外部改写并校验提交。
    pub fn rewrite_with(
        &self,
        runner: &dyn CommandRunner,
        command: &ToolCommand,
        candidate: &Path,
        target: &Path,
        table: &str,
    ) -> Result<RewriteOutcome, EngineError> {
        discard(candidate);
        let response = runner.run(command);
        if !response.success {
            discard(candidate);
            return Ok(RewriteOutcome::ToolFailed(response.message_or_default().to_string()));
        }
        self.commit_validated(candidate, target, table)
    }
}

/// 删除临时文件，不存在时忽略。
pub(crate) fn discard(path: &Path) {
    if path.exists() {
        if let Err(err) = fs::remove_file(path) {
            debug!(path = %path.display(), error = %err, "临时文件删除失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandResponse;
    use crate::store::fixtures::{create_container, insert_point};

    struct FailingRunner;

    impl CommandRunner for FailingRunner {
        fn run(&self, _command: &ToolCommand) -> CommandResponse {
            CommandResponse::err("ERROR 1: boom")
        }
    }

    fn replacer() -> Replacer {
        Replacer::new(2, Duration::from_millis(1))
    }

    #[test]
    fn empty_candidate_keeps_target() {
        let dir = tempfile::tempdir().expect("临时目录");
        let target = dir.path().join("job.gpkg");
        let candidate = dir.path().join("job_candidate.gpkg");
        insert_point(&create_container(&target, false), "A", "0", 1.0, 2.0);
        drop(create_container(&candidate, false));

        let outcome = replacer()
            .commit_validated(&candidate, &target, "entities")
            .expect("校验");
        assert_eq!(outcome, RewriteOutcome::EmptyResult);
        assert!(!candidate.exists());
        assert_eq!(count_features(&target, "entities"), 1);
    }

    #[test]
    fn non_empty_candidate_replaces_target() {
        let dir = tempfile::tempdir().expect("临时目录");
        let target = dir.path().join("job.gpkg");
        let candidate = dir.path().join("job_candidate.gpkg");
        drop(create_container(&target, false));
        let conn = create_container(&candidate, false);
        insert_point(&conn, "A", "0", 1.0, 2.0);
        insert_point(&conn, "B", "0", 3.0, 4.0);
        drop(conn);

        let outcome = replacer()
            .commit_validated(&candidate, &target, "entities")
            .expect("校验");
        assert_eq!(outcome, RewriteOutcome::Committed { rows: 2 });
        assert!(outcome.is_committed());
        assert_eq!(count_features(&target, "entities"), 2);
    }

    #[test]
    fn replace_reports_attempts_when_source_is_missing() {
        let dir = tempfile::tempdir().expect("临时目录");
        let err = replacer()
            .replace(&dir.path().join("missing.gpkg"), &dir.path().join("job.gpkg"))
            .expect_err("源文件不存在");
        match err {
            EngineError::ReplaceFailed { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tool_failure_is_reported_with_message() {
        let dir = tempfile::tempdir().expect("临时目录");
        let target = dir.path().join("job.gpkg");
        drop(create_container(&target, false));
        let outcome = replacer()
            .rewrite_with(
                &FailingRunner,
                &ToolCommand::new("ogr2ogr"),
                &dir.path().join("out.gpkg"),
                &target,
                "entities",
            )
            .expect("改写");
        assert_eq!(outcome, RewriteOutcome::ToolFailed("ERROR 1: boom".to_string()));
    }
}
