//! 7z support through the external `7z`/`7za` binary.
//!
//! The binary is an opaque collaborator: `7z l` gives a human-readable
//! listing we parse, and when that parse yields nothing usable the fallback
//! is a full `7z x` extraction into a scratch directory that the caller
//! rescans. The binary being absent is not an error condition — callers skip
//! the archive with a warning and move on.

use crate::ArchiveEntry;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::instrument;

/// Binary names tried on `PATH`, in order.
const BINARY_NAMES: [&str; 2] = ["7z", "7za"];

/// Handle to a located 7z binary.
#[derive(Clone, Debug)]
pub struct SevenZip {
    exe: PathBuf,
}

impl SevenZip {
    /// Find `7z` (then `7za`) on `PATH`. `None` when neither exists.
    pub fn locate() -> Option<SevenZip> {
        let path = std::env::var_os("PATH")?;
        for name in BINARY_NAMES {
            for dir in std::env::split_paths(&path) {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(SevenZip { exe: candidate });
                }
            }
        }
        None
    }

    /// Use a specific binary path. Intended for tests.
    pub fn with_binary(exe: impl Into<PathBuf>) -> SevenZip {
        SevenZip { exe: exe.into() }
    }

    /// List entries via `7z l <archive>`.
    ///
    /// An empty result is not necessarily an empty archive — some listings
    /// defeat the parser — so callers treat zero entries as "fall back to
    /// [`extract_all`](Self::extract_all) and rescan".
    #[instrument(skip(self), fields(archive = %archive.display()))]
    pub async fn list(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let output = Command::new(&self.exe)
            .arg("l")
            .arg(archive)
            .output()
            .await
            .or_raise(|| ErrorKind::SevenZipFailed)?;
        if !output.status.success() {
            exn::bail!(ErrorKind::SevenZipFailed);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_listing(&stdout))
    }

    /// Extract the whole archive into a fresh scratch directory with
    /// `7z x -y -o<dir> <archive>`. The caller owns the [`TempDir`]; its
    /// contents live until it is dropped.
    #[instrument(skip(self), fields(archive = %archive.display()))]
    pub async fn extract_all(&self, archive: &Path) -> Result<TempDir> {
        let scratch = TempDir::new().or_raise(|| ErrorKind::Io)?;
        let mut dest_flag = std::ffi::OsString::from("-o");
        dest_flag.push(scratch.path());
        let status = Command::new(&self.exe)
            .arg("x")
            .arg("-y")
            .arg(dest_flag)
            .arg(archive)
            .status()
            .await
            .or_raise(|| ErrorKind::SevenZipFailed)?;
        if !status.success() {
            exn::bail!(ErrorKind::SevenZipFailed);
        }
        Ok(scratch)
    }

    /// Extract a single entry to memory via `7z e -so <archive> <entry>`.
    #[instrument(skip(self), fields(archive = %archive.display()))]
    pub async fn extract_entry(&self, archive: &Path, entry: &Path) -> Result<Vec<u8>> {
        let output = Command::new(&self.exe)
            .arg("e")
            .arg("-so")
            .arg("-y")
            .arg(archive)
            .arg(entry)
            .output()
            .await
            .or_raise(|| ErrorKind::SevenZipFailed)?;
        if !output.status.success() {
            exn::bail!(ErrorKind::SevenZipFailed);
        }
        if output.stdout.is_empty() {
            exn::bail!(ErrorKind::EntryNotFound(entry.to_string_lossy().into_owned()));
        }
        Ok(output.stdout)
    }

    /// Extract and return the flat list of extracted file paths (relative to
    /// the scratch root) together with the scratch directory keeping them
    /// alive.
    pub async fn extract_and_enumerate(
        &self,
        archive: &Path,
    ) -> Result<(TempDir, Vec<PathBuf>)> {
        let scratch = self.extract_all(archive).await?;
        let root = scratch.path().to_path_buf();
        let files = tokio::task::spawn_blocking(move || enumerate_files(&root))
            .await
            .or_raise(|| ErrorKind::Io)??;
        Ok((scratch, files))
    }
}

fn enumerate_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).or_raise(|| ErrorKind::Io)? {
            let entry = entry.or_raise(|| ErrorKind::Io)?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .ok()
                    .map(Path::to_path_buf)
                    .ok_or_raise(|| ErrorKind::Io)?;
                out.push(relative);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Parse the human listing `7z l` prints: entries sit between two dashed
/// separator lines, with the name column starting where the header says
/// `Name`.
fn parse_listing(stdout: &str) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();
    let mut name_col = None;
    let mut in_table = false;

    for line in stdout.lines() {
        if let Some(col) = line.find("Name")
            && line.contains("Date")
            && line.contains("Attr")
        {
            name_col = Some(col);
            continue;
        }
        let Some(name_col) = name_col else { continue };

        if line.trim_start().starts_with("---") {
            if in_table {
                break;
            }
            in_table = true;
            continue;
        }
        if !in_table || line.len() <= name_col {
            continue;
        }

        let name = line[name_col..].trim();
        if name.is_empty() {
            continue;
        }
        let meta: Vec<&str> = line[..name_col].split_whitespace().collect();
        // date, time, attr, size[, compressed]
        if meta.len() < 4 {
            continue;
        }
        let attr = meta[2];
        if attr.starts_with('D') {
            continue;
        }
        let Ok(size) = meta[3].parse::<u64>() else { continue };
        entries.push(ArchiveEntry { name: PathBuf::from(name), size });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
7-Zip 23.01 (x64) : Copyright (c) 1999-2023 Igor Pavlov : 2023-06-20

Scanning the drive for archives:
1 file, 512 bytes (1 KiB)

Listing archive: games.7z

--
Path = games.7z
Type = 7z

   Date      Time    Attr         Size   Compressed  Name
------------------- ----- ------------ ------------  ------------------------
2024-01-01 12:00:00 ....A        40976        12001  Game A (USA).nes
2024-01-01 12:00:00 ....A       524288       300123  subdir/Game B (Europe).md
2024-01-01 12:00:00 D....            0            0  subdir
------------------- ----- ------------ ------------  ------------------------
2024-01-01 12:00:00              565264       312124  2 files, 1 folders
";

    #[test]
    fn parses_files_and_skips_directories() {
        let entries = parse_listing(LISTING);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, PathBuf::from("Game A (USA).nes"));
        assert_eq!(entries[0].size, 40976);
        assert_eq!(entries[1].name, PathBuf::from("subdir/Game B (Europe).md"));
    }

    #[test]
    fn names_may_contain_spaces_and_parens() {
        let entries = parse_listing(LISTING);
        assert!(entries.iter().all(|e| e.name.to_string_lossy().contains(' ')));
    }

    #[test]
    fn garbage_listing_parses_to_nothing() {
        assert!(parse_listing("no table here at all").is_empty());
        assert!(parse_listing("").is_empty());
    }

    #[test]
    fn enumerate_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("top.bin"), b"1").unwrap();
        std::fs::write(dir.path().join("a/b/deep.bin"), b"2").unwrap();
        let files = enumerate_files(dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("a/b/deep.bin"), PathBuf::from("top.bin")]);
    }
}
