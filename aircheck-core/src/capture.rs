use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::chunk::extension_for_codec;
use crate::clock::StationClock;
use crate::config::{CaptureSection, PathsSection};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

/// How one capture session ended, and where its chunk landed.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub chunk_path: PathBuf,
    /// True when the session was stopped for the daily cutoff rather than
    /// because the capture process died on its own.
    pub cutoff_reached: bool,
}

/// Runs the external capture tool for one chunk: launches ffmpeg in
/// stream-copy mode, mirrors its diagnostics to the log from a background
/// task, and polls once per interval until either the cutoff trips or the
/// process exits by itself.
pub struct CaptureController {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    station_name: String,
    section: CaptureSection,
    clock: StationClock,
    executor: Arc<dyn CommandExecutor>,
}

impl CaptureController {
    pub fn new(
        paths: &PathsSection,
        station_name: String,
        section: CaptureSection,
        clock: StationClock,
    ) -> Self {
        Self {
            ffmpeg: PathBuf::from(&paths.ffmpeg),
            ffprobe: PathBuf::from(&paths.ffprobe),
            station_name,
            section,
            clock,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Probes the stream's first audio codec and maps it to a container
    /// extension. Probe failure is not fatal; capture falls back to the
    /// generic extension.
    pub async fn detect_extension(&self, url: &str) -> &'static str {
        let mut command = Command::new(&self.ffprobe);
        command
            .arg("-v")
            .arg("error")
            .arg("-select_streams")
            .arg("a:0")
            .arg("-show_entries")
            .arg("stream=codec_name")
            .arg("-of")
            .arg("default=nokey=1:noprint_wrappers=1")
            .arg(url);
        match self.executor.run(&mut command).await {
            Ok(output) if output.status.success() => {
                let codec = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let ext = extension_for_codec(&codec);
                debug!(codec = %codec, ext, "probed stream codec");
                ext
            }
            Ok(output) => {
                warn!(
                    status = output.status.code(),
                    "codec probe failed, using generic extension"
                );
                "bin"
            }
            Err(err) => {
                warn!(error = %err, "codec probe failed, using generic extension");
                "bin"
            }
        }
    }

    /// Records one chunk until the cutoff or an unexpected exit.
    pub async fn record(
        &self,
        url: &str,
        chunk_path: &Path,
        date: &str,
    ) -> CaptureResult<CaptureOutcome> {
        let args = self.capture_args(url, chunk_path, date);
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|source| CaptureError::Spawn {
            program: self.ffmpeg.clone(),
            source,
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_tool_output(stderr));
        }
        info!(path = %chunk_path.display(), "capture started");

        let poll = Duration::from_secs(self.section.poll_interval_seconds.max(1));
        let grace = Duration::from_secs(self.section.stop_grace_seconds);
        let mut cutoff_reached = false;
        loop {
            if self.clock.is_past_cutoff(self.clock.now()) {
                cutoff_reached = true;
                info!("cutoff reached, stopping capture");
                let status = stop_child(&mut child, grace).await?;
                debug!(%status, "capture stopped");
                break;
            }
            match child.try_wait()? {
                Some(status) => {
                    warn!(%status, "capture process exited unexpectedly");
                    break;
                }
                None => sleep(poll).await,
            }
        }

        Ok(CaptureOutcome {
            chunk_path: chunk_path.to_path_buf(),
            cutoff_reached,
        })
    }

    fn capture_args(&self, url: &str, chunk_path: &Path, date: &str) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-reconnect".to_string(),
            "1".to_string(),
            "-reconnect_at_eof".to_string(),
            "1".to_string(),
            "-reconnect_streamed".to_string(),
            "1".to_string(),
            "-reconnect_delay_max".to_string(),
            "0".to_string(),
            "-reconnect_on_network_error".to_string(),
            "1".to_string(),
            "-reconnect_on_http_error".to_string(),
            "4xx,5xx".to_string(),
            "-timeout".to_string(),
            self.section.network_timeout_us.to_string(),
            "-i".to_string(),
            url.to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-metadata".to_string(),
            format!("title={} {}", self.station_name, date),
            "-metadata".to_string(),
            format!("artist={}", self.section.artist),
            "-metadata".to_string(),
            format!("date={date}"),
            chunk_path.to_string_lossy().to_string(),
        ]
    }
}

/// Forwards the capture tool's stderr to the log, one line at a time,
/// until the stream closes. Owns nothing shared with the poll loop.
async fn drain_tool_output(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "aircheck::ffmpeg", "{line}");
    }
}

/// Interrupt first so the tool can finalize its output file, then kill
/// once the grace period runs out.
async fn stop_child(child: &mut Child, grace: Duration) -> std::io::Result<std::process::ExitStatus> {
    if send_interrupt(child) {
        match timeout(grace, child.wait()).await {
            Ok(status) => return status,
            Err(_) => warn!("capture ignored interrupt, force-terminating"),
        }
    }
    child.kill().await?;
    child.wait().await
}

#[cfg(unix)]
fn send_interrupt(child: &Child) -> bool {
    match child.id() {
        Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) == 0 },
        None => false,
    }
}

#[cfg(not(unix))]
fn send_interrupt(_child: &Child) -> bool {
    false
}
