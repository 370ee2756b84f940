use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{info, warn};

use crate::capture::{CommandExecutor, SystemCommandExecutor};
use crate::chunk::{ChunkError, ChunkNamer};

const MANIFEST_NAME: &str = "concat_list.txt";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no chunks to merge for {base}")]
    NoChunks { base: String },
    #[error("chunk discovery failed: {0}")]
    Chunks(#[from] ChunkError),
    #[error("io error on {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("concat command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

pub type MergeResult<T> = std::result::Result<T, MergeError>;

/// Losslessly concatenates a day's chunks into the base output file.
/// Source chunks and the concat manifest are removed only after the temp
/// output has been renamed into place.
pub struct ChunkMerger {
    ffmpeg: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl ChunkMerger {
    pub fn new<P: Into<PathBuf>>(ffmpeg: P) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub async fn merge(&self, namer: &ChunkNamer) -> MergeResult<PathBuf> {
        let chunks = namer.list_chunks()?;
        if chunks.is_empty() {
            return Err(MergeError::NoChunks {
                base: namer.base().to_string(),
            });
        }

        let output = namer.merged_path();
        let dir = output.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let manifest = dir.join(MANIFEST_NAME);
        let temp = dir.join(format!("__merged_temp__.{}", namer.ext()));

        write_manifest(&manifest, &chunks).await?;

        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-hide_banner")
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(&manifest)
            .arg("-c")
            .arg("copy")
            .arg(&temp);
        info!(chunks = chunks.len(), output = %output.display(), "concatenating chunks");
        let result = self.executor.run(&mut command).await;
        match result {
            Ok(run) if run.status.success() => {}
            Ok(run) => {
                remove_quietly(&temp).await;
                remove_quietly(&manifest).await;
                return Err(MergeError::CommandFailure {
                    command: format!("{} concat", self.ffmpeg.display()),
                    status: run.status.code(),
                    stderr: String::from_utf8_lossy(&run.stderr).to_string(),
                });
            }
            Err(source) => {
                remove_quietly(&temp).await;
                remove_quietly(&manifest).await;
                return Err(MergeError::Io {
                    source,
                    path: self.ffmpeg.clone(),
                });
            }
        }

        fs::rename(&temp, &output)
            .await
            .map_err(|source| MergeError::Io {
                source,
                path: output.clone(),
            })?;

        for chunk in &chunks {
            // The unsuffixed first chunk shares its name with the merged
            // output; it was just replaced by the rename above.
            if chunk == &output {
                continue;
            }
            if let Err(err) = fs::remove_file(chunk).await {
                warn!(path = %chunk.display(), error = %err, "failed to remove merged chunk");
            }
        }
        remove_quietly(&manifest).await;

        info!(output = %output.display(), "merge finished");
        Ok(output)
    }
}

async fn write_manifest(manifest: &Path, chunks: &[PathBuf]) -> MergeResult<()> {
    let mut contents = String::new();
    for chunk in chunks {
        let path = chunk.to_string_lossy().replace('\'', "'\"'\"'");
        contents.push_str(&format!("file '{path}'\n"));
    }
    fs::write(manifest, contents)
        .await
        .map_err(|source| MergeError::Io {
            source,
            path: manifest.to_path_buf(),
        })
}

async fn remove_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove temp artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::process::ExitStatusExt;
    #[cfg(windows)]
    use std::os::windows::process::ExitStatusExt;

    /// Stands in for ffmpeg concat: on success it writes the output file
    /// (the command's last argument), on failure it only reports a
    /// non-zero status.
    struct FakeConcat {
        succeed: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeConcat {
        fn new(succeed: bool) -> Self {
            Self {
                succeed,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CommandExecutor for FakeConcat {
        async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
            let args: Vec<String> = command
                .as_std()
                .get_args()
                .map(|arg| arg.to_string_lossy().to_string())
                .collect();
            if self.succeed {
                std::fs::write(args.last().unwrap(), b"MERGED")?;
            }
            self.calls.lock().unwrap().push(args);
            #[cfg(unix)]
            let status = std::process::ExitStatus::from_raw(if self.succeed { 0 } else { 1 << 8 });
            #[cfg(windows)]
            let status = std::process::ExitStatus::from_raw(if self.succeed { 0 } else { 1 });
            Ok(std::process::Output {
                status,
                stdout: Vec::new(),
                stderr: b"concat stderr".to_vec(),
            })
        }
    }

    fn seed_chunks(dir: &Path) -> ChunkNamer {
        for name in ["show_05-08-26.mp3", "show_05-08-26_1.mp3", "show_05-08-26_2.mp3"] {
            File::create(dir.join(name)).unwrap();
        }
        ChunkNamer::new(dir, "show_05-08-26", "mp3").unwrap()
    }

    #[tokio::test]
    async fn merge_replaces_chunks_with_one_output() {
        let dir = TempDir::new().unwrap();
        let namer = seed_chunks(dir.path());
        let executor = Arc::new(FakeConcat::new(true));
        let merger = ChunkMerger::new("ffmpeg").with_executor(executor.clone());

        let output = merger.merge(&namer).await.unwrap();
        assert_eq!(output, dir.path().join("show_05-08-26.mp3"));
        assert!(output.exists());
        assert!(!dir.path().join("show_05-08-26_1.mp3").exists());
        assert!(!dir.path().join("show_05-08-26_2.mp3").exists());
        assert!(!dir.path().join(MANIFEST_NAME).exists());
        assert!(!dir.path().join("__merged_temp__.mp3").exists());
        assert_eq!(std::fs::read(&output).unwrap(), b"MERGED");

        // Exactly the merged output matches the chunk pattern afterwards.
        assert_eq!(namer.list_chunks().unwrap(), vec![output]);

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].windows(2).any(|w| w == ["-f", "concat"]));
        assert!(calls[0].windows(2).any(|w| w == ["-c", "copy"]));
    }

    #[tokio::test]
    async fn failed_merge_leaves_chunks_intact() {
        let dir = TempDir::new().unwrap();
        let namer = seed_chunks(dir.path());
        let merger = ChunkMerger::new("ffmpeg").with_executor(Arc::new(FakeConcat::new(false)));

        let err = merger.merge(&namer).await.unwrap_err();
        assert!(matches!(err, MergeError::CommandFailure { .. }));
        assert!(dir.path().join("show_05-08-26.mp3").exists());
        assert!(dir.path().join("show_05-08-26_1.mp3").exists());
        assert!(dir.path().join("show_05-08-26_2.mp3").exists());
        assert!(!dir.path().join("__merged_temp__.mp3").exists());
    }

    #[tokio::test]
    async fn merge_without_chunks_reports_no_chunks() {
        let dir = TempDir::new().unwrap();
        let namer = ChunkNamer::new(dir.path(), "show_05-08-26", "mp3").unwrap();
        let merger = ChunkMerger::new("ffmpeg").with_executor(Arc::new(FakeConcat::new(true)));
        assert!(matches!(
            merger.merge(&namer).await,
            Err(MergeError::NoChunks { .. })
        ));
    }

    #[tokio::test]
    async fn manifest_escapes_single_quotes() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("list.txt");
        let chunk = dir.path().join("it's_a_show.mp3");
        write_manifest(&manifest, &[chunk.clone()]).await.unwrap();
        let contents = std::fs::read_to_string(&manifest).unwrap();
        assert!(contents.contains("it'\"'\"'s_a_show.mp3"));
        assert!(contents.starts_with("file '"));
    }
}
