use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::capture::{CaptureController, CaptureError};
use crate::chunk::{day_base, ChunkError, ChunkNamer};
use crate::clock::StationClock;
use crate::config::{AircheckConfig, Credentials};
use crate::error::ConfigError;
use crate::filter::AudioFilter;
use crate::merge::ChunkMerger;
use crate::probe::{ProbeError, StreamProber};
use crate::upload::{ArchiveUploader, S3ArchiveStore, UploadError, UploadReceipt};

/// File that receives the `KEY=value` output lines for the calling
/// workflow, named by this environment variable.
pub const OUTPUT_FILE_VAR: &str = "GITHUB_ENV";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("io error on {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Runtime knobs from the command line.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Extra tag appended to the day's base filename.
    pub suffix: String,
    /// Staggers the upload by `position * 10` seconds so parallel
    /// instances do not hit the archive at once.
    pub position: u32,
}

/// What one completed session did, for the operator and the calling
/// workflow.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub started_at: DateTime<FixedOffset>,
    pub uploaded_file: PathBuf,
    pub merged: bool,
    pub cutoff_reached: bool,
    pub archive_url: Option<String>,
    pub item_id: Option<String>,
}

/// Owns one full recording day: probe, capture, merge, filter, upload,
/// repeated until the cutoff. A failed session is logged and retried from
/// the top; chunks it left behind are rediscovered by the next session's
/// filename scan.
pub struct Recorder {
    config: AircheckConfig,
    options: SessionOptions,
    clock: StationClock,
    prober: StreamProber,
    capture: CaptureController,
    merger: ChunkMerger,
    filter: AudioFilter,
    uploader: ArchiveUploader,
}

impl Recorder {
    pub fn new(
        config: AircheckConfig,
        credentials: Credentials,
        options: SessionOptions,
    ) -> SessionResult<Self> {
        let clock = config.station_clock()?;
        let prober = StreamProber::new()?;
        let store = S3ArchiveStore::new(config.upload.endpoint.clone(), credentials)?;
        let capture = CaptureController::new(
            &config.paths,
            config.station.name.clone(),
            config.capture.clone(),
            clock,
        );
        let merger = ChunkMerger::new(&config.paths.ffmpeg);
        let filter = AudioFilter::new(&config.paths.ffmpeg, config.filter.clone());
        let uploader = ArchiveUploader::new(Arc::new(store), config.upload.clone());
        Ok(Self {
            config,
            options,
            clock,
            prober,
            capture,
            merger,
            filter,
            uploader,
        })
    }

    /// The outer restart loop. Returns the reports of the sessions that
    /// completed; session failures are logged and absorbed here, the loop
    /// itself only ends at the cutoff.
    pub async fn run(&self) -> Vec<SessionReport> {
        info!(station = %self.config.station.name, "recorder started");
        let mut reports = Vec::new();
        loop {
            if self.clock.is_past_cutoff(self.clock.now()) {
                info!("past cutoff, recorder done for the day");
                break;
            }
            match self.run_session().await {
                Ok(report) => reports.push(report),
                Err(err) => error!(error = %err, "recording session failed"),
            }
            if self.clock.is_past_cutoff(self.clock.now()) {
                info!("past cutoff after session, recorder done for the day");
                break;
            }
            info!("restarting recording session");
        }
        reports
    }

    async fn run_session(&self) -> SessionResult<SessionReport> {
        let url = &self.config.station.stream_url;
        self.prober.wait_until_available(url).await;

        let dir = Path::new(&self.config.paths.recordings_dir);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| SessionError::Io {
                source,
                path: dir.to_path_buf(),
            })?;

        let started_at = self.clock.now();
        let date = self.clock.date_stamp(started_at);
        let ext = self.capture.detect_extension(url).await;
        let base = day_base(&self.config.capture.file_prefix, &date, &self.options.suffix);
        let namer = ChunkNamer::new(dir, &base, ext)?;
        let chunk_path = namer.next_chunk_name()?;

        let outcome = self.capture.record(url, &chunk_path, &date).await?;

        let mut merged = false;
        let mut upload_candidate = outcome.chunk_path.clone();
        if outcome.cutoff_reached {
            match self.merger.merge(&namer).await {
                Ok(path) => {
                    merged = true;
                    upload_candidate = path;
                }
                // A day with a broken chunk still gets archived: fall
                // back to the chunk the capture just produced.
                Err(err) => warn!(error = %err, "merge failed, uploading last chunk instead"),
            }
        }

        if self.filter.enabled() {
            if let Err(err) = self.filter.apply(&upload_candidate).await {
                warn!(error = %err, "audio filter failed, uploading unprocessed file");
            }
        }

        if self.options.position > 0 {
            let delay = Duration::from_secs(u64::from(self.options.position) * 10);
            info!(seconds = delay.as_secs(), "staggering upload");
            sleep(delay).await;
        }

        let timestamp = self.clock.item_timestamp(self.clock.now());
        let item = self.uploader.item_for(&upload_candidate, &timestamp);
        let receipt = self.uploader.upload(&upload_candidate, item).await;
        export_outputs(receipt.as_ref());

        Ok(SessionReport {
            started_at,
            uploaded_file: upload_candidate,
            merged,
            cutoff_reached: outcome.cutoff_reached,
            archive_url: receipt.as_ref().map(|r| r.download_url.clone()),
            item_id: receipt.map(|r| r.identifier),
        })
    }
}

/// Hands the upload result to the calling workflow. Every failure mode
/// here is logged and swallowed; the recording itself already succeeded.
fn export_outputs(receipt: Option<&UploadReceipt>) {
    match std::env::var(OUTPUT_FILE_VAR) {
        Ok(path) => {
            if let Err(err) = append_outputs(Path::new(&path), receipt) {
                warn!(error = %err, "failed to write workflow outputs");
            }
        }
        Err(_) => warn!("{OUTPUT_FILE_VAR} not set, skipping workflow outputs"),
    }
}

/// Appends `ARCHIVE_URL=` and `ITEM_ID=` lines, with the literal sentinel
/// `None` when every upload attempt failed.
pub fn append_outputs(path: &Path, receipt: Option<&UploadReceipt>) -> std::io::Result<()> {
    let url = receipt.map(|r| r.download_url.as_str()).unwrap_or("None");
    let id = receipt.map(|r| r.identifier.as_str()).unwrap_or("None");
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "ARCHIVE_URL={url}")?;
    writeln!(file, "ITEM_ID={id}")?;
    Ok(())
}
