//! Content hashing and atomic, crash-safe file operations.
//!
//! Every mutation the pipeline performs against a workspace file goes through
//! `write_atomic`: write to a sibling temp file, fsync it, then rename it onto
//! the target. `move_safe` and `copy_safe` build on top of this to give the
//! backup store and the archiver a cross-device-safe relocation primitive.

use anyhow::{Context, Result};
use camino::Utf8Path;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Outcome of an atomic write, surfaced so callers can log fallbacks.
#[derive(Debug, Clone, Default)]
pub struct AtomicWriteResult {
    pub used_cross_filesystem_fallback: bool,
    pub warnings: Vec<String>,
}

/// Lowercase hex SHA-256 digest of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Lowercase hex SHA-256 digest of a UTF-8 string's bytes.
pub fn hash_str(content: &str) -> String {
    hash_bytes(content.as_bytes())
}

/// SHA-256 of a file's current on-disk contents.
pub fn hash_file(path: &Utf8Path) -> Result<String> {
    let bytes = fs::read(path.as_std_path())
        .with_context(|| format!("failed to read file for hashing: {path}"))?;
    Ok(hash_bytes(&bytes))
}

/// Atomically write `content` to `path` via temp-file + fsync + rename.
///
/// Falls back to a copy-fsync-replace sequence when rename fails across
/// filesystem boundaries (EXDEV), and always reads the written file back
/// and checks it byte-for-byte against `content` before returning, so a
/// caller never proceeds believing a write landed when it didn't.
pub fn write_atomic(path: &Utf8Path, content: &str) -> Result<AtomicWriteResult> {
    let mut result = AtomicWriteResult::default();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory: {parent}"))?;
    }

    let temp_dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut temp_file = NamedTempFile::new_in(temp_dir)
        .with_context(|| format!("failed to create temporary file in: {temp_dir}"))?;

    temp_file
        .write_all(content.as_bytes())
        .context("failed to write content to temporary file")?;
    temp_file
        .as_file()
        .sync_all()
        .context("failed to fsync temporary file")?;

    let temp_path = temp_file.path().to_path_buf();
    match atomic_rename(temp_file, path.as_std_path()) {
        Ok(()) => {}
        Err(e) if is_cross_filesystem_error(&e) => {
            result.used_cross_filesystem_fallback = true;
            result
                .warnings
                .push("used cross-filesystem fallback (copy-fsync-replace)".to_string());
            cross_filesystem_copy_from_path(&temp_path, path)?;
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to atomically write file: {path}"));
        }
    }

    let written = fs::read(path.as_std_path())
        .with_context(|| format!("failed to read back written file for verification: {path}"))?;
    if written != content.as_bytes() {
        anyhow::bail!("write verification failed: {path} does not match the content written to it");
    }

    Ok(result)
}

/// Move `src` to `dst`, falling back to copy+verify+unlink across devices.
pub fn move_safe(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory: {parent}"))?;
    }

    match fs::rename(src.as_std_path(), dst.as_std_path()) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_io_error(&e) => {
            copy_safe(src, dst)?;
            fs::remove_file(src.as_std_path())
                .with_context(|| format!("failed to remove source after cross-device move: {src}"))
        }
        Err(e) => Err(e).with_context(|| format!("failed to move {src} to {dst}")),
    }
}

/// Copy `src` to `dst` atomically, then verify the destination hash matches.
pub fn copy_safe(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    let bytes = fs::read(src.as_std_path())
        .with_context(|| format!("failed to read source for copy: {src}"))?;
    let src_hash = hash_bytes(&bytes);
    let content = String::from_utf8_lossy(&bytes).into_owned();
    write_atomic(dst, &content)?;
    let dst_hash = hash_file(dst)?;
    if src_hash != dst_hash {
        anyhow::bail!("copy verification failed: {src} -> {dst} hash mismatch");
    }
    Ok(())
}

fn atomic_rename(temp_file: NamedTempFile, target: &Path) -> Result<()> {
    temp_file
        .persist(target)
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!(e.error))
}

fn is_cross_filesystem_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(is_cross_device_io_error)
}

fn is_cross_device_io_error(io_error: &std::io::Error) -> bool {
    io_error.raw_os_error() == Some(18) // EXDEV on Linux/macOS
}

fn cross_filesystem_copy_from_path(temp_path: &Path, target: &Utf8Path) -> Result<()> {
    let content =
        fs::read(temp_path).context("failed to read temporary file for cross-filesystem copy")?;

    let target_dir = target.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut target_temp = NamedTempFile::new_in(target_dir)
        .with_context(|| format!("failed to create temp file in target directory: {target_dir}"))?;

    target_temp
        .write_all(&content)
        .context("failed to write content during cross-filesystem copy")?;
    target_temp
        .as_file()
        .sync_all()
        .context("failed to fsync during cross-filesystem copy")?;
    target_temp
        .persist(target.as_std_path())
        .map_err(|e| anyhow::anyhow!(e.error))
        .context("failed to persist during cross-filesystem copy")?;

    let _ = fs::remove_file(temp_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hash_str_is_stable_sha256() {
        // echo -n "hello" | sha256sum
        assert_eq!(
            hash_str("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn write_atomic_roundtrips_content_unmodified() {
        let dir = TempDir::new().unwrap();
        let path_buf = dir.path().join("note.md");
        let path = Utf8Path::from_path(&path_buf).unwrap();

        let result = write_atomic(path, "line1\r\nline2\r\n").unwrap();
        assert!(!result.used_cross_filesystem_fallback);

        let content = fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(content, "line1\r\nline2\r\n");
    }

    #[test]
    fn write_atomic_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path_buf = dir.path().join("a").join("b").join("c.md");
        let path = Utf8Path::from_path(&path_buf).unwrap();

        write_atomic(path, "hi").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn move_safe_relocates_file() {
        let dir = TempDir::new().unwrap();
        let src_buf = dir.path().join("src.md");
        let dst_buf = dir.path().join("sub").join("dst.md");
        let src = Utf8Path::from_path(&src_buf).unwrap();
        let dst = Utf8Path::from_path(&dst_buf).unwrap();

        write_atomic(src, "payload").unwrap();
        move_safe(src, dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dst.as_std_path()).unwrap(), "payload");
    }

    #[test]
    fn copy_safe_fails_loudly_on_mismatch_is_unreachable_in_practice() {
        let dir = TempDir::new().unwrap();
        let src_buf = dir.path().join("src.md");
        let dst_buf = dir.path().join("dst.md");
        let src = Utf8Path::from_path(&src_buf).unwrap();
        let dst = Utf8Path::from_path(&dst_buf).unwrap();

        write_atomic(src, "payload").unwrap();
        copy_safe(src, dst).unwrap();
        assert_eq!(hash_file(src).unwrap(), hash_file(dst).unwrap());
    }
}
