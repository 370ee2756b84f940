use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{info, warn};

use crate::capture::{CommandExecutor, SystemCommandExecutor};
use crate::config::FilterSection;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("io error on {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("filter command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

pub type FilterResult<T> = std::result::Result<T, FilterError>;

/// Re-encodes a finished recording through the station's cleanup chain
/// (loudness normalization, denoise, band-pass) and overwrites the input
/// in place via a temp file. A failed run leaves the input untouched.
pub struct AudioFilter {
    ffmpeg: PathBuf,
    section: FilterSection,
    executor: Arc<dyn CommandExecutor>,
}

impl AudioFilter {
    pub fn new<P: Into<PathBuf>>(ffmpeg: P, section: FilterSection) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            section,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn enabled(&self) -> bool {
        self.section.enabled
    }

    /// The `-filter:a` graph, assembled from the configured stages.
    pub fn filter_graph(&self) -> String {
        let mut stages = vec![format!(
            "loudnorm=I={}:TP={}:LRA={}",
            self.section.loudnorm_i, self.section.loudnorm_tp, self.section.loudnorm_lra
        )];
        if self.section.denoise {
            stages.push("afftdn".to_string());
        }
        if let Some(hz) = self.section.highpass_hz {
            stages.push(format!("highpass=f={hz}"));
        }
        if let Some(hz) = self.section.lowpass_hz {
            stages.push(format!("lowpass=f={hz}"));
        }
        stages.join(", ")
    }

    pub async fn apply(&self, input: &Path) -> FilterResult<()> {
        let temp = PathBuf::from(format!(
            "{}.processed.{}",
            input.display(),
            container_for_codec(&self.section.codec)
        ));

        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-i")
            .arg(input)
            .arg("-filter:a")
            .arg(self.filter_graph())
            .arg("-threads")
            .arg("0")
            .arg("-c:a")
            .arg(&self.section.codec)
            .arg("-q:a")
            .arg(self.section.quality.to_string())
            .arg(&temp);
        info!(input = %input.display(), "applying audio filter chain");
        let result = self.executor.run(&mut command).await;
        match result {
            Ok(run) if run.status.success() => {}
            Ok(run) => {
                remove_quietly(&temp).await;
                return Err(FilterError::CommandFailure {
                    command: format!("{} filter", self.ffmpeg.display()),
                    status: run.status.code(),
                    stderr: String::from_utf8_lossy(&run.stderr).to_string(),
                });
            }
            Err(source) => {
                remove_quietly(&temp).await;
                return Err(FilterError::Io {
                    source,
                    path: self.ffmpeg.clone(),
                });
            }
        }

        fs::rename(&temp, input)
            .await
            .map_err(|source| FilterError::Io {
                source,
                path: input.to_path_buf(),
            })?;
        info!(input = %input.display(), "audio filter finished");
        Ok(())
    }
}

fn container_for_codec(codec: &str) -> &'static str {
    match codec {
        "libmp3lame" => "mp3",
        "aac" => "m4a",
        "libopus" => "opus",
        "libvorbis" => "ogg",
        _ => "mka",
    }
}

async fn remove_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove temp artifact"),
    }
}
