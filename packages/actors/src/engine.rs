//! External render and encode programs.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use render_core::FrameRange;
use tokio::process::Command;

use crate::config::FarmConfig;
use crate::error::EngineError;

/// Future type for engine invocations.
pub type EngineFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

/// The programs that turn a source file into frames and frames into a composite.
pub trait RenderEngine: Send + Sync + 'static {
    /// Render `range` of `source` into `out_dir` as `<stem><NNNN>.png`.
    fn render<'a>(
        &'a self,
        source: &'a Path,
        out_dir: &'a Path,
        stem: &'a str,
        range: FrameRange,
    ) -> EngineFuture<'a>;

    /// Encode the `<stem><NNNN>.png` frames in `frames_dir` into `output`.
    fn encode<'a>(&'a self, frames_dir: &'a Path, stem: &'a str, output: &'a Path)
    -> EngineFuture<'a>;
}

/// Runs Blender for rendering and FFmpeg for encoding.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    blender: String,
    ffmpeg: String,
    framerate: u32,
    resolution: String,
}

impl CommandEngine {
    pub fn new(blender: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        let defaults = FarmConfig::default();
        Self {
            blender: blender.into(),
            ffmpeg: ffmpeg.into(),
            framerate: defaults.framerate,
            resolution: defaults.resolution,
        }
    }

    pub fn from_config(cfg: &FarmConfig) -> Self {
        Self {
            blender: cfg.blender_path.clone(),
            ffmpeg: cfg.ffmpeg_path.clone(),
            framerate: cfg.framerate,
            resolution: cfg.resolution.clone(),
        }
    }
}

impl RenderEngine for CommandEngine {
    fn render<'a>(
        &'a self,
        source: &'a Path,
        out_dir: &'a Path,
        stem: &'a str,
        range: FrameRange,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            // Blender appends the zero-padded frame number to the output stem.
            let mut command = Command::new(&self.blender);
            command
                .arg("-b")
                .arg(source)
                .args(["-E", "CYCLES", "-o"])
                .arg(out_dir.join(stem))
                .arg("-s")
                .arg(range.start.to_string())
                .arg("-e")
                .arg(range.end.to_string())
                .arg("-a");
            run(command, &self.blender).await
        })
    }

    fn encode<'a>(
        &'a self,
        frames_dir: &'a Path,
        stem: &'a str,
        output: &'a Path,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            let mut command = Command::new(&self.ffmpeg);
            command
                .arg("-r")
                .arg(self.framerate.to_string())
                .arg("-s")
                .arg(&self.resolution)
                .arg("-i")
                .arg(frames_dir.join(format!("{stem}%04d.png")))
                .arg(output);
            run(command, &self.ffmpeg).await
        })
    }
}

async fn run(mut command: Command, program: &str) -> Result<(), EngineError> {
    tracing::debug!(program, "Running {:?}", command.as_std());

    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| EngineError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    tracing::warn!(program, exit_code = ?output.status.code(), "External program failed");
    Err(EngineError::Failed {
        program: program.to_string(),
        code: output.status.code(),
        stderr,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let engine = CommandEngine::new("/nonexistent/blender", "/nonexistent/ffmpeg");
        let dir = tempfile::tempdir().unwrap();
        let err = engine
            .render(
                &dir.path().join("scene.blend"),
                dir.path(),
                "scene",
                FrameRange { start: 1, end: 3 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported_with_stderr() {
        let engine = CommandEngine::new("sh", "false");
        let dir = tempfile::tempdir().unwrap();
        let err = engine
            .encode(dir.path(), "scene", &dir.path().join("scene.mp4"))
            .await
            .unwrap_err();
        match err {
            EngineError::Failed { program, code, .. } => {
                assert_eq!(program, "false");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
