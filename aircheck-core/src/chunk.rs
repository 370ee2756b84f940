use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("io error in {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid chunk pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type ChunkResult<T> = std::result::Result<T, ChunkError>;

/// Maps a detected audio codec to the container extension chunks are
/// written with. Anything unrecognized gets a generic binary extension so
/// capture still proceeds.
pub fn extension_for_codec(codec: &str) -> &'static str {
    match codec {
        "aac" => "aac",
        "mp3" => "mp3",
        "opus" => "opus",
        "vorbis" => "ogg",
        _ => "bin",
    }
}

/// Day-scoped base stem shared by all chunks and the merged output:
/// `{prefix}_{date}` plus an optional `-{suffix}`.
pub fn day_base(prefix: &str, date: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("{prefix}_{date}")
    } else {
        format!("{prefix}_{date}-{suffix}")
    }
}

/// Names and discovers the chunk files for one (directory, base, extension)
/// triple. The state lives on the filesystem: how many chunks exist so far
/// is exactly the set of files matching the anchored pattern
/// `^{base}(?:_(\d+))?\.{ext}$`.
#[derive(Debug, Clone)]
pub struct ChunkNamer {
    dir: PathBuf,
    base: String,
    ext: String,
    pattern: Regex,
}

impl ChunkNamer {
    pub fn new<P: Into<PathBuf>>(dir: P, base: &str, ext: &str) -> ChunkResult<Self> {
        let pattern = Regex::new(&format!(
            "^{}(?:_([0-9]+))?\\.{}$",
            regex::escape(base),
            regex::escape(ext)
        ))?;
        Ok(Self {
            dir: dir.into(),
            base: base.to_string(),
            ext: ext.to_string(),
            pattern,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    /// Path of the merged day output, `{dir}/{base}.{ext}`.
    pub fn merged_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.base, self.ext))
    }

    /// Picks the next unused chunk name. The first chunk of a base is
    /// unsuffixed; once any chunk exists the next name is
    /// `{base}_{max_index + 1}.{ext}`, where an unsuffixed file counts as
    /// index 0 and a lone unsuffixed file yields index 1.
    pub fn next_chunk_name(&self) -> ChunkResult<PathBuf> {
        let mut max_index: i64 = -1;
        let mut found_any = false;
        for name in self.matching_names()? {
            found_any = true;
            match self.index_of(&name) {
                Some(index) => max_index = max_index.max(index),
                // Unsuffixed file: index 0, but never lowers a higher index.
                None => max_index = max_index.max(0),
            }
        }
        if !found_any {
            return Ok(self.merged_path());
        }
        let next = if max_index < 1 { 1 } else { max_index + 1 };
        Ok(self.dir.join(format!("{}_{}.{}", self.base, next, self.ext)))
    }

    /// All chunk files for this base, ascending by modification time.
    /// A file whose mtime cannot be read sorts first.
    pub fn list_chunks(&self) -> ChunkResult<Vec<PathBuf>> {
        let mut entries: Vec<(SystemTime, PathBuf)> = Vec::new();
        for name in self.matching_names()? {
            let path = self.dir.join(&name);
            let mtime = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((mtime, path));
        }
        entries.sort_by_key(|(mtime, _)| *mtime);
        Ok(entries.into_iter().map(|(_, path)| path).collect())
    }

    fn matching_names(&self) -> ChunkResult<Vec<String>> {
        let read_dir = fs::read_dir(&self.dir).map_err(|source| ChunkError::Io {
            source,
            path: self.dir.clone(),
        })?;
        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| ChunkError::Io {
                source,
                path: self.dir.clone(),
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            if self.pattern.is_match(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn index_of(&self, name: &str) -> Option<i64> {
        self.pattern
            .captures(name)
            .and_then(|caps| caps.get(1))
            .and_then(|index| index.as_str().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap();
        path
    }

    fn set_mtime(path: &Path, secs_after_epoch: u64) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs_after_epoch))
            .unwrap();
    }

    #[test]
    fn first_chunk_is_unsuffixed() {
        let dir = TempDir::new().unwrap();
        let namer = ChunkNamer::new(dir.path(), "show_05-08-26", "mp3").unwrap();
        assert_eq!(
            namer.next_chunk_name().unwrap(),
            dir.path().join("show_05-08-26.mp3")
        );
    }

    #[test]
    fn lone_unsuffixed_file_yields_index_one() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "show_05-08-26.mp3");
        let namer = ChunkNamer::new(dir.path(), "show_05-08-26", "mp3").unwrap();
        assert_eq!(
            namer.next_chunk_name().unwrap(),
            dir.path().join("show_05-08-26_1.mp3")
        );
    }

    #[test]
    fn next_index_follows_highest_existing() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "show_05-08-26.mp3");
        touch(dir.path(), "show_05-08-26_1.mp3");
        touch(dir.path(), "show_05-08-26_5.mp3");
        let namer = ChunkNamer::new(dir.path(), "show_05-08-26", "mp3").unwrap();
        assert_eq!(
            namer.next_chunk_name().unwrap(),
            dir.path().join("show_05-08-26_6.mp3")
        );
    }

    #[test]
    fn suffixed_only_files_still_advance() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "show_05-08-26_2.mp3");
        let namer = ChunkNamer::new(dir.path(), "show_05-08-26", "mp3").unwrap();
        assert_eq!(
            namer.next_chunk_name().unwrap(),
            dir.path().join("show_05-08-26_3.mp3")
        );
    }

    #[test]
    fn repeated_naming_never_reuses_an_index() {
        let dir = TempDir::new().unwrap();
        let namer = ChunkNamer::new(dir.path(), "show_05-08-26", "mp3").unwrap();
        let mut seen = Vec::new();
        for _ in 0..6 {
            let next = namer.next_chunk_name().unwrap();
            assert!(!seen.contains(&next), "{next:?} reused");
            File::create(&next).unwrap();
            seen.push(next);
        }
        assert_eq!(seen[0], dir.path().join("show_05-08-26.mp3"));
        assert_eq!(seen[5], dir.path().join("show_05-08-26_5.mp3"));
    }

    #[test]
    fn pattern_is_anchored_to_the_full_name() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "show_05-08-26-late_1.mp3");
        touch(dir.path(), "myshow_05-08-26.mp3");
        touch(dir.path(), "show_05-08-26.mp3.bak");
        let namer = ChunkNamer::new(dir.path(), "show_05-08-26", "mp3").unwrap();
        assert!(namer.list_chunks().unwrap().is_empty());
        assert_eq!(
            namer.next_chunk_name().unwrap(),
            dir.path().join("show_05-08-26.mp3")
        );
    }

    #[test]
    fn chunks_sort_by_mtime_not_by_name() {
        let dir = TempDir::new().unwrap();
        let third = touch(dir.path(), "show_05-08-26.mp3");
        let first = touch(dir.path(), "show_05-08-26_2.mp3");
        let second = touch(dir.path(), "show_05-08-26_1.mp3");
        set_mtime(&first, 1_000);
        set_mtime(&second, 2_000);
        set_mtime(&third, 3_000);
        let namer = ChunkNamer::new(dir.path(), "show_05-08-26", "mp3").unwrap();
        assert_eq!(namer.list_chunks().unwrap(), vec![first, second, third]);
    }

    #[test]
    fn codec_extension_mapping() {
        assert_eq!(extension_for_codec("aac"), "aac");
        assert_eq!(extension_for_codec("mp3"), "mp3");
        assert_eq!(extension_for_codec("opus"), "opus");
        assert_eq!(extension_for_codec("vorbis"), "ogg");
        assert_eq!(extension_for_codec("flac"), "bin");
        assert_eq!(extension_for_codec(""), "bin");
    }

    #[test]
    fn day_base_with_and_without_suffix() {
        assert_eq!(day_base("show", "05-08-26", ""), "show_05-08-26");
        assert_eq!(day_base("show", "05-08-26", "late"), "show_05-08-26-late");
    }
}
