//! Wrapper around the external converter CLI.
//!
//! `suggest` turns one commit of a notes repo into card suggestions (JSON on
//! stdout). `build-apkg` reads card records as a JSON array on stdin and writes
//! an Anki package to `--output`.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("failed to start converter: {0}")]
    Spawn(#[source] io::Error),

    #[error("converter I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("converter exited with status {code:?}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("converter output was not valid JSON: {0}")]
    InvalidOutput(#[from] serde_json::Error),

    #[error("converter was killed")]
    Killed,
}

impl ConverterError {
    /// Short text stored on a failed run.
    pub fn run_message(&self) -> String {
        match self {
            ConverterError::Failed { code, stderr } => {
                let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty());
                match last_line {
                    Some(line) => format!("converter exited with status {code:?}: {}", line.trim()),
                    None => format!("converter exited with status {code:?}"),
                }
            }
            other => other.to_string(),
        }
    }
}

/// Document printed by `suggest --json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestOutput {
    #[serde(default)]
    pub suggestions: Vec<SuggestedCard>,
    pub package_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedCard {
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_card_type")]
    pub card_type: String,
    pub course: Option<String>,
    pub environment: Option<String>,
    pub source_file: Option<String>,
    pub line_start: Option<i32>,
    pub line_end: Option<i32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_card_type() -> String {
    "basic".to_string()
}

/// One card handed to `build-apkg`. Metadata keys are flattened next to the
/// core fields.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,
    pub card_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub struct SuggestArgs<'a> {
    pub repo_path: &'a Path,
    pub commit: &'a str,
    pub course: Option<&'a str>,
    pub force: bool,
    pub output_dir: &'a Path,
}

impl SuggestArgs<'_> {
    fn to_argv(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![
            "suggest".into(),
            "--repo".into(),
            self.repo_path.into(),
            "--commit".into(),
            self.commit.into(),
            "--json".into(),
            "--output-dir".into(),
            self.output_dir.into(),
        ];
        if let Some(course) = self.course {
            argv.push("--course".into());
            argv.push(course.into());
        }
        if self.force {
            argv.push("--force".into());
        }
        argv
    }
}

/// Builds an Anki package from card records.
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    async fn build_package(
        &self,
        records: &[PackageRecord],
        output: &Path,
    ) -> Result<(), ConverterError>;
}

#[derive(Debug, Clone)]
pub struct Converter {
    bin: PathBuf,
}

impl Converter {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    /// Runs `suggest` for one commit. Resolves early with `Killed` when `kill`
    /// fires; the child is terminated before returning.
    pub async fn suggest(
        &self,
        args: &SuggestArgs<'_>,
        kill: oneshot::Receiver<()>,
    ) -> Result<SuggestOutput, ConverterError> {
        let mut command = Command::new(&self.bin);
        command.args(args.to_argv());
        debug!(commit = args.commit, "Spawning converter");

        let stdout = run_killable(command, kill).await?;
        Ok(serde_json::from_slice(&stdout)?)
    }
}

#[async_trait]
impl PackageBuilder for Converter {
    async fn build_package(
        &self,
        records: &[PackageRecord],
        output: &Path,
    ) -> Result<(), ConverterError> {
        let payload = serde_json::to_vec(records)?;

        let mut child = Command::new(&self.bin)
            .arg("build-apkg")
            .arg("--output")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ConverterError::Spawn)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "converter stdin unavailable"))?;
        let writer: JoinHandle<io::Result<()>> = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        let written = writer.await.map_err(io::Error::other)?;

        // A failing converter may close stdin early; its stderr is the useful part.
        if !output.status.success() {
            return Err(ConverterError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        written?;
        debug!(records = records.len(), "Converter built package");
        Ok(())
    }
}

/// Runs `command` to completion, returning stdout, unless `kill` fires first.
pub async fn run_killable(
    mut command: Command,
    kill: oneshot::Receiver<()>,
) -> Result<Vec<u8>, ConverterError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(ConverterError::Spawn)?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    tokio::select! {
        status = child.wait() => {
            let status = status?;
            let stdout = stdout.await.map_err(io::Error::other)??;
            let stderr = stderr.await.map_err(io::Error::other)??;
            if !status.success() {
                return Err(ConverterError::Failed {
                    code: status.code(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                });
            }
            Ok(stdout)
        }
        Ok(()) = kill => {
            child.kill().await?;
            Err(ConverterError::Killed)
        }
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::runs::registry::ProcessRegistry;
    use uuid::Uuid;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_suggest_argv() {
        let args = SuggestArgs {
            repo_path: Path::new("/srv/repos/ada/notes"),
            commit: "abcdef1",
            course: Some("math214"),
            force: true,
            output_dir: Path::new("/tmp/out"),
        };
        let argv: Vec<String> = args
            .to_argv()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            argv,
            [
                "suggest",
                "--repo",
                "/srv/repos/ada/notes",
                "--commit",
                "abcdef1",
                "--json",
                "--output-dir",
                "/tmp/out",
                "--course",
                "math214",
                "--force"
            ]
        );
    }

    #[test]
    fn test_suggest_output_defaults() {
        let out: SuggestOutput = serde_json::from_str(
            r#"{"suggestions":[{"front":"Define a group.","back":"A set with an associative operation...","lineStart":3}]}"#,
        )
        .unwrap();
        assert_eq!(out.suggestions.len(), 1);
        assert_eq!(out.suggestions[0].card_type, "basic");
        assert_eq!(out.suggestions[0].line_start, Some(3));
        assert!(out.package_path.is_none());
    }

    #[tokio::test]
    async fn test_run_killable_returns_stdout() {
        let (_tx, rx) = oneshot::channel();
        let out = run_killable(sh("printf '{\"suggestions\":[]}'"), rx).await.unwrap();
        assert_eq!(out, br#"{"suggestions":[]}"#);
    }

    #[tokio::test]
    async fn test_run_killable_reports_stderr_on_failure() {
        let (_tx, rx) = oneshot::channel();
        let err = run_killable(sh("echo 'no notes found' >&2; exit 3"), rx)
            .await
            .unwrap_err();
        match &err {
            ConverterError::Failed { code, stderr } => {
                assert_eq!(*code, Some(3));
                assert!(stderr.contains("no notes found"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(err.run_message().ends_with("no notes found"));
    }

    #[tokio::test]
    async fn test_registry_kill_stops_process() {
        let registry = ProcessRegistry::new();
        let run_id = Uuid::new_v4();
        let kill = registry.register(run_id);

        let task = tokio::spawn(run_killable(sh("sleep 30"), kill));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.kill(run_id));

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("converter did not stop")
            .unwrap();
        assert!(matches!(result, Err(ConverterError::Killed)));
    }

    #[test]
    fn test_package_record_flattens_metadata() {
        let mut extra = Map::new();
        extra.insert("deck".into(), Value::from("Analysis"));
        let record = PackageRecord {
            front: "f".into(),
            back: "b".into(),
            tags: vec!["auto".into()],
            card_type: "basic".into(),
            extra,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["deck"], "Analysis");
        assert_eq!(json["cardType"], "basic");
    }
}
