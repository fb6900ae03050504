//! Node configuration.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use render_core::DEFAULT_BATCH_SIZE;

use crate::error::ConfigError;

/// Settings shared by the splitter, the workers and the external programs.
#[derive(Debug, Clone)]
pub struct FarmConfig {
    /// Frames per render batch.
    pub batch_size: NonZeroU32,
    /// Worker actors per node.
    pub workers: usize,
    /// How long a received item stays hidden before it is redelivered.
    pub visibility_timeout: Duration,
    /// Pause after an empty or failed poll.
    pub poll_backoff: Duration,
    /// Parent directory for scratch workspaces; the system temp dir if unset.
    pub workspace_root: Option<PathBuf>,
    pub blender_path: String,
    pub ffmpeg_path: String,
    pub framerate: u32,
    pub resolution: String,
    /// Address of the submission endpoint; no HTTP server if unset.
    pub http_addr: Option<String>,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 1,
            visibility_timeout: Duration::from_secs(900),
            poll_backoff: Duration::from_secs(10),
            workspace_root: None,
            blender_path: "blender".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            framerate: 24,
            resolution: "1920x1080".to_string(),
            http_addr: None,
        }
    }
}

impl FarmConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// - `RENDER_BATCH_SIZE`, `RENDER_WORKERS`
    /// - `RENDER_VISIBILITY_TIMEOUT_SECS`, `RENDER_POLL_BACKOFF_SECS`
    /// - `RENDER_WORKSPACE_ROOT`
    /// - `BLENDER_PATH`, `FFMPEG_PATH`, `RENDER_FRAMERATE`, `RENDER_RESOLUTION`
    /// - `RENDER_HTTP_ADDR`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from the variables `lookup` resolves by name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = Self::default();

        Ok(Self {
            batch_size: vars.parsed("RENDER_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            workers: vars.parsed("RENDER_WORKERS")?.unwrap_or(defaults.workers),
            visibility_timeout: vars
                .parsed("RENDER_VISIBILITY_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            poll_backoff: vars
                .parsed("RENDER_POLL_BACKOFF_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_backoff),
            workspace_root: vars.get("RENDER_WORKSPACE_ROOT").map(PathBuf::from),
            blender_path: vars.get("BLENDER_PATH").unwrap_or(defaults.blender_path),
            ffmpeg_path: vars.get("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            framerate: vars.parsed("RENDER_FRAMERATE")?.unwrap_or(defaults.framerate),
            resolution: vars.get("RENDER_RESOLUTION").unwrap_or(defaults.resolution),
            http_addr: vars.get("RENDER_HTTP_ADDR"),
        })
    }

    pub fn with_batch_size(mut self, batch_size: NonZeroU32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_poll_backoff(mut self, backoff: Duration) -> Self {
        self.poll_backoff = backoff;
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }
}

/// Trimmed, non-empty variables resolved through a lookup function.
struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, ConfigError> {
        self.get(name)
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| ConfigError::Invalid { name, value })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<FarmConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FarmConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = FarmConfig::default();
        assert_eq!(cfg.batch_size.get(), 3);
        assert_eq!(cfg.framerate, 24);
        assert_eq!(cfg.resolution, "1920x1080");
        assert!(cfg.http_addr.is_none());
    }

    #[test]
    fn invalid_numbers_are_reported_by_name() {
        let err = from_pairs(&[("RENDER_FRAMERATE", "fast")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { name: "RENDER_FRAMERATE", ref value } if value == "fast"
        ));
        assert!(err.to_string().contains("RENDER_FRAMERATE"));
    }

    #[test]
    fn variables_override_defaults() {
        let cfg = from_pairs(&[
            ("RENDER_BATCH_SIZE", " 5 "),
            ("RENDER_WORKERS", "4"),
            ("RENDER_POLL_BACKOFF_SECS", "2"),
            ("RENDER_RESOLUTION", ""),
            ("RENDER_HTTP_ADDR", "0.0.0.0:8080"),
        ])
        .unwrap();

        assert_eq!(cfg.batch_size.get(), 5);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.poll_backoff, Duration::from_secs(2));
        assert_eq!(cfg.resolution, "1920x1080");
        assert_eq!(cfg.http_addr.as_deref(), Some("0.0.0.0:8080"));
        assert_eq!(cfg.visibility_timeout, Duration::from_secs(900));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = from_pairs(&[("RENDER_BATCH_SIZE", "0")]).unwrap_err();
        assert!(err.to_string().contains("RENDER_BATCH_SIZE"));
    }
}
