//! File metadata: capture, transport and restore
// (c) 2025 Ross Younger

use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::fs::File as TokioFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::frame::{FrameWidth, WireRecord};

/// File metadata, as carried on the wire ahead of file content.
///
/// This is both the wire record and the value handed to receiving code.
/// A directory travels as a `FileInfo` with `is_dir` set and `size` 0;
/// no content bytes follow it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileInfo {
    /// Base name of the file or directory, without any directory component
    pub name: String,
    /// Content size in bytes; always 0 for directories
    pub size: i64,
    /// POSIX permission bits
    pub mode: u32,
    /// Modification time
    #[serde(with = "crate::util::time::wire")]
    pub mtime: SystemTime,
    /// Whether this entry is a directory
    pub is_dir: bool,
}

impl WireRecord for FileInfo {
    const WIDTH: FrameWidth = FrameWidth::U16;
}

/// Extracts POSIX-style permission bits from filesystem metadata.
#[cfg(unix)]
pub(crate) fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode() & 0o777
}

/// Windows has no mode bits; readonly maps to the conventional values.
#[cfg(windows)]
pub(crate) fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}

impl FileInfo {
    /// Builds a snapshot from filesystem metadata.
    #[allow(clippy::cast_possible_wrap)] // no real file overflows i64
    pub fn from_metadata(name: &str, meta: &std::fs::Metadata) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() as i64 },
            mode: mode_bits(meta),
            mtime: meta.modified()?,
            is_dir: meta.is_dir(),
        })
    }

    /// Snapshots the metadata of `path`.
    ///
    /// For a regular file, also returns the opened file so the caller can
    /// stream its content and later re-stat the same inode.
    pub(crate) async fn capture(path: &Path) -> Result<(Self, Option<TokioFile>)> {
        let name = path
            .file_name()
            .and_then(std::ffi::OsStr::to_str)
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("path {} has no usable file name", path.display()),
                ))
            })?;
        let meta = tokio::fs::metadata(path).await?;
        if meta.is_dir() {
            return Ok((Self::from_metadata(name, &meta)?, None));
        }
        let file = TokioFile::open(path).await?;
        let meta = file.metadata().await?;
        Ok((Self::from_metadata(name, &meta)?, Some(file)))
    }

    /// Checks that the filesystem entry still matches this snapshot.
    pub(crate) fn verify_unchanged(&self, meta: &std::fs::Metadata) -> Result<()> {
        let now = Self::from_metadata(&self.name, meta)?;
        if now.size != self.size || now.mode != self.mode || now.mtime != self.mtime {
            debug!(
                "file changed under us: size {} -> {}, mode {:o} -> {:o}",
                self.size, now.size, self.mode, now.mode
            );
            return Err(Error::FileModifiedDuringTransfer);
        }
        Ok(())
    }

    /// Writes a received entry to disk at `path`, restoring its metadata.
    ///
    /// Directories are created (with missing parents) and get this record's
    /// mode and mtime. Regular files are created or truncated, receive
    /// exactly [`size`](Self::size) bytes from `content`, then get the mode
    /// and mtime applied. Missing intermediate directories are created with
    /// a conservative mode and the open retried.
    ///
    /// The access time is set to "now" in both cases.
    pub async fn write_with_info<R>(&self, path: impl AsRef<Path>, content: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let path = path.as_ref();
        if self.is_dir {
            return self.restore_dir(path).await;
        }
        if self.size < 0 {
            return Err(Error::InvalidFileSize(self.size));
        }

        let mut file = match self.open_for_restore(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    create_dirs_private(dir).await?;
                }
                self.open_for_restore(path).await?
            }
            Err(e) => return Err(e.into()),
        };

        #[allow(clippy::cast_sign_loss)] // checked non-negative above
        let size = self.size as u64;
        let copied = tokio::io::copy(&mut content.take(size), &mut file)
            .await
            .map_err(Error::from_stream_io)?;
        if copied != size {
            #[allow(clippy::cast_possible_wrap)]
            return Err(Error::SizeMismatch {
                expected: self.size,
                actual: copied as i64,
            });
        }
        file.flush().await?;

        self.apply_mode(path).await?;
        set_file_times(file.into_std().await, self.mtime).await
    }

    /// Creates the target with truncate semantics and (on Unix) the wire mode.
    async fn open_for_restore(&self, path: &Path) -> std::io::Result<TokioFile> {
        let mut options = tokio::fs::OpenOptions::new();
        let _ = options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        let _ = options.mode(self.mode);
        options.open(path).await
    }

    async fn restore_dir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        self.apply_mode(path).await?;
        // Windows cannot open a directory as a plain file, so no times there.
        #[cfg(unix)]
        {
            let dir = std::fs::File::open(path)?;
            set_file_times(dir, self.mtime).await?;
        }
        Ok(())
    }

    #[cfg(unix)]
    async fn apply_mode(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt as _;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(self.mode)).await?;
        Ok(())
    }

    #[cfg(windows)]
    async fn apply_mode(&self, path: &Path) -> Result<()> {
        // Map any writable bit onto the single knob Windows gives us.
        let meta = tokio::fs::metadata(path).await?;
        let mut perms = meta.permissions();
        perms.set_readonly(self.mode & 0o222 == 0);
        tokio::fs::set_permissions(path, perms).await?;
        Ok(())
    }
}

/// Sets access time to now and modification time to `mtime`.
///
/// tokio has no async analogue of `std::fs::set_times`
/// (tokio-rs/tokio#6368), so hop onto the blocking pool for it.
async fn set_file_times(file: std::fs::File, mtime: SystemTime) -> Result<()> {
    let times = std::fs::FileTimes::new()
        .set_accessed(SystemTime::now())
        .set_modified(mtime);
    tokio::task::spawn_blocking(move || file.set_times(times))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;
    Ok(())
}

/// Creates intermediate directories that a restore found missing.
async fn create_dirs_private(dir: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    let _ = builder.recursive(true);
    #[cfg(unix)]
    let _ = builder.mode(0o700);
    builder.create(dir).await?;
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::FileInfo;
    use crate::error::Error;
    use crate::protocol::frame::WireRecord as _;

    use littertray::LitterTray;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn sample(size: i64, is_dir: bool) -> FileInfo {
        FileInfo {
            name: "thing".to_string(),
            size,
            mode: 0o640,
            mtime: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            is_dir,
        }
    }

    #[test]
    fn wire_round_trip() {
        let info = sample(12345, false);
        let wire = info.to_vec().unwrap();
        assert_eq!(info, FileInfo::from_slice(&wire).unwrap());
    }

    #[tokio::test]
    async fn restore_regular_file() {
        LitterTray::try_with_async(async |_| {
            let info = sample(5, false);
            let mut content = Cursor::new(b"12345".to_vec());
            info.write_with_info("restored.bin", &mut content).await?;

            let meta = std::fs::metadata("restored.bin")?;
            assert_eq!(meta.len(), 5);
            assert_eq!(std::fs::read("restored.bin")?, b"12345");
            assert_eq!(super::mode_bits(&meta), 0o640);
            assert_eq!(meta.modified()?, info.mtime);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn restore_creates_missing_directories() {
        LitterTray::try_with_async(async |_| {
            let info = sample(3, false);
            let mut content = Cursor::new(b"abc".to_vec());
            info.write_with_info("a/b/c.bin", &mut content).await?;
            assert_eq!(std::fs::read("a/b/c.bin")?, b"abc");
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn restore_overwrites_existing_file() {
        LitterTray::try_with_async(async |tray| {
            let _ = tray.create_text("out.txt", "previous longer content")?;
            let info = sample(3, false);
            let mut content = Cursor::new(b"new".to_vec());
            info.write_with_info("out.txt", &mut content).await?;
            assert_eq!(std::fs::read("out.txt")?, b"new");
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn restore_directory() {
        LitterTray::try_with_async(async |_| {
            let info = sample(0, true);
            let mut empty = Cursor::new(Vec::new());
            info.write_with_info("made_dir", &mut empty).await?;

            let meta = std::fs::metadata("made_dir")?;
            assert!(meta.is_dir());
            assert_eq!(super::mode_bits(&meta), 0o640);
            assert_eq!(meta.modified()?, info.mtime);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn short_content_is_size_mismatch() {
        LitterTray::try_with_async(async |_| {
            let info = sample(10, false);
            let mut content = Cursor::new(b"abc".to_vec());
            let err = info
                .write_with_info("short.bin", &mut content)
                .await
                .expect_err("an error was expected");
            assert!(matches!(
                err,
                Error::SizeMismatch {
                    expected: 10,
                    actual: 3
                }
            ));
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn negative_size_is_refused() {
        let info = sample(-1, false);
        let mut content = Cursor::new(Vec::new());
        let err = info
            .write_with_info("bad.bin", &mut content)
            .await
            .expect_err("an error was expected");
        assert!(matches!(err, Error::InvalidFileSize(-1)));
    }

    #[tokio::test]
    async fn capture_and_verify_unchanged() {
        LitterTray::try_with_async(async |tray| {
            let _ = tray.create_text("watched.txt", "content")?;
            let (info, file) = FileInfo::capture(std::path::Path::new("watched.txt")).await?;
            assert_eq!(info.name, "watched.txt");
            assert_eq!(info.size, 7);
            assert!(!info.is_dir);

            let file = file.expect("regular file must be opened");
            info.verify_unchanged(&file.metadata().await?)?;

            // Grow the file; the snapshot no longer matches.
            std::fs::write("watched.txt", "content and then some")?;
            let err = info
                .verify_unchanged(&file.metadata().await?)
                .expect_err("an error was expected");
            assert!(matches!(err, Error::FileModifiedDuringTransfer));
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn capture_directory_has_no_content() {
        LitterTray::try_with_async(async |tray| {
            let _ = tray.make_dir("some_dir")?;
            let (info, file) = FileInfo::capture(std::path::Path::new("some_dir")).await?;
            assert!(info.is_dir);
            assert_eq!(info.size, 0);
            assert!(file.is_none());
            Ok(())
        })
        .await
        .unwrap();
    }

    #[test]
    fn mtime_survives_wire_round_trip_with_nanos() {
        let mut info = sample(1, false);
        info.mtime = UNIX_EPOCH + Duration::new(1_700_000_000, 987_654_321);
        let wire = info.to_vec().unwrap();
        assert_eq!(FileInfo::from_slice(&wire).unwrap().mtime, info.mtime);
    }
}
