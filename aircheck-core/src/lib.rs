pub mod capture;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod merge;
pub mod probe;
pub mod session;
pub mod upload;

pub use capture::{
    CaptureController, CaptureError, CaptureOutcome, CommandExecutor, SystemCommandExecutor,
};
pub use chunk::{day_base, extension_for_codec, ChunkError, ChunkNamer};
pub use clock::StationClock;
pub use config::{load_config, AircheckConfig, Credentials, ACCESS_KEY_VAR, SECRET_KEY_VAR};
pub use error::{ConfigError, Result};
pub use filter::{AudioFilter, FilterError};
pub use merge::{ChunkMerger, MergeError};
pub use probe::{ProbeError, StreamProber};
pub use session::{Recorder, SessionError, SessionOptions, SessionReport, OUTPUT_FILE_VAR};
pub use upload::{
    ArchiveItem, ArchiveStore, ArchiveUploader, S3ArchiveStore, UploadError, UploadReceipt,
};
