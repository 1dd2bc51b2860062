//! Plan execution.
//!
//! The executor walks the action list in order, streaming one event per
//! action. Failures are per-action: a failed write marks that action and
//! moves on, and the run's exit code reflects whether any action failed.
//! Only the cancellation flag stops the walk early.

use crate::CancelFlag;
use crate::config::{Config, LinkMode};
use crate::file::RomFile;
use crate::matching::MatchOutcome;
use crate::patch;
use crate::plan::{Action, ActionSource, CatalogKind, Plan};
use crate::report::{RunReport, dir2dat_games, missing_games};
use async_stream::stream;
use futures::Stream;
use romsort_archive::sevenzip::SevenZip;
use romsort_archive::torrentzip::{MemberSource, ZipMember, write_torrentzip};
use romsort_archive::zip::ZipFile;
use romsort_archive::ArchiveKind;
use romsort_catalog::CatalogIndex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Progress events emitted by [`execute`].
pub enum ExecuteEvent {
    /// Execution began; the total action count is attached.
    Started(usize),
    ActionOk { index: usize },
    ActionFailed { index: usize, message: String },
    /// All actions attempted (or cancellation observed); the failure count
    /// is final.
    Complete { failed: usize },
}

/// Everything the executor needs beyond the plan itself.
pub struct ExecuteContext<'a> {
    pub config: &'a Config,
    pub index: &'a CatalogIndex,
    pub scanned: &'a [RomFile],
    pub outcomes: &'a [MatchOutcome],
    pub report: RunReport,
    pub sevenzip: Option<&'a SevenZip>,
    pub cancel: &'a CancelFlag,
}

/// Execute a plan, yielding one event per action.
pub fn execute<'a>(
    plan: &'a Plan,
    ctx: ExecuteContext<'a>,
) -> impl Stream<Item = ExecuteEvent> + 'a {
    stream!({
        yield ExecuteEvent::Started(plan.actions.len());
        let mut failed = 0usize;
        let mut report = ctx.report.clone();
        report.summary.actions_total = plan.actions.len();

        for (index, action) in plan.actions.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                break;
            }
            report.summary.actions_failed = failed;
            match run_action(action, &ctx, &report).await {
                Ok(()) => yield ExecuteEvent::ActionOk { index },
                Err(message) => {
                    failed += 1;
                    tracing::warn!(index, %message, "plan action failed");
                    yield ExecuteEvent::ActionFailed { index, message };
                },
            }
        }

        yield ExecuteEvent::Complete { failed };
    })
}

#[instrument(skip_all, fields(kind = action_kind(action)))]
async fn run_action(
    action: &Action,
    ctx: &ExecuteContext<'_>,
    report: &RunReport,
) -> std::result::Result<(), String> {
    match action {
        Action::Copy { source, destination, .. } => {
            write_payload(ctx, source, destination, None, true).await
        },
        Action::Move { source, destination, .. } => {
            if source.entry.is_some() {
                // An archive entry cannot be moved out without disturbing
                // sibling entries; degrade to a copy and leave the archive.
                return write_payload(ctx, source, destination, None, true).await;
            }
            if skip_existing(ctx, destination) {
                return Ok(());
            }
            let from = source.path.clone();
            let to = destination.clone();
            blocking(move || {
                ensure_parent(&to)?;
                // Rename first; fall back to copy+remove across devices.
                if std::fs::rename(&from, &to).is_err() {
                    std::fs::copy(&from, &to).map_err(stringify)?;
                    std::fs::remove_file(&from).map_err(stringify)?;
                }
                Ok(())
            })
            .await
        },
        Action::Link { source, destination, mode, .. } => {
            if source.entry.is_some() {
                return write_payload(ctx, source, destination, None, true).await;
            }
            if skip_existing(ctx, destination) {
                return Ok(());
            }
            let from = source.path.clone();
            let to = destination.clone();
            let mode = *mode;
            blocking(move || {
                ensure_parent(&to)?;
                if to.exists() {
                    std::fs::remove_file(&to).map_err(stringify)?;
                }
                match mode {
                    LinkMode::Hard => std::fs::hard_link(&from, &to).map_err(stringify),
                    LinkMode::Symbolic => {
                        #[cfg(unix)]
                        {
                            std::os::unix::fs::symlink(&from, &to).map_err(stringify)
                        }
                        #[cfg(not(unix))]
                        {
                            std::fs::copy(&from, &to).map(|_| ()).map_err(stringify)
                        }
                    },
                    // No portable reflink syscall in std; a plain copy is
                    // the documented fallback.
                    LinkMode::Reflink => std::fs::copy(&from, &to).map(|_| ()).map_err(stringify),
                }
            })
            .await
        },
        Action::Extract { source, destination, header_skip, .. } => {
            write_payload(ctx, source, destination, *header_skip, false).await
        },
        Action::ZipInto { destination, members, .. } => {
            if skip_existing(ctx, destination) {
                return Ok(());
            }
            let mut zip_members = Vec::with_capacity(members.len());
            for member in members {
                let source = match &member.source.entry {
                    None => MemberSource::Path(member.source.path.clone()),
                    Some(_) => MemberSource::Bytes(entry_bytes(ctx, &member.source).await?),
                };
                zip_members.push(ZipMember { name: member.name.clone(), source });
            }
            let destination = destination.clone();
            blocking(move || {
                ensure_parent(&destination)?;
                write_torrentzip(&destination, zip_members).map_err(stringify)
            })
            .await
        },
        Action::Patch { source, patch, patch_kind, destination, .. } => {
            if skip_existing(ctx, destination) {
                return Ok(());
            }
            let base = source_payload(ctx, source, None).await?;
            let patch_path = patch.clone();
            let destination = destination.clone();
            let kind = *patch_kind;
            blocking(move || {
                let patch_bytes = std::fs::read(&patch_path).map_err(stringify)?;
                let patched = patch::apply(kind, &base, &patch_bytes)
                    .map_err(|_| format!("applying {kind:?} patch failed"))?;
                ensure_parent(&destination)?;
                std::fs::write(&destination, patched).map_err(stringify)
            })
            .await
        },
        Action::TestOnly { destination } => {
            let destination = destination.clone();
            blocking(move || {
                if !destination.is_file() {
                    return Err(format!("missing output: {}", destination.display()));
                }
                // Archives get a structural check, not just an existence one.
                if destination.extension().and_then(|e| e.to_str()) == Some("zip") {
                    ZipFile::open(&destination).map_err(stringify)?;
                }
                Ok(())
            })
            .await
        },
        Action::EmitReport { destination } => {
            let destination = destination.clone();
            let json = serde_json::to_string_pretty(report).map_err(stringify)?;
            blocking(move || {
                ensure_parent(&destination)?;
                std::fs::write(&destination, json).map_err(stringify)
            })
            .await
        },
        Action::EmitCatalog { destination, catalog_kind, format } => {
            let games = match catalog_kind {
                CatalogKind::Dir2dat => dir2dat_games(ctx.scanned),
                CatalogKind::Fixdat => missing_games(ctx.index, ctx.outcomes)
                    .into_iter()
                    .map(|idx| ctx.index.game(idx).clone())
                    .collect(),
            };
            let name = match catalog_kind {
                CatalogKind::Dir2dat => "dir2dat",
                CatalogKind::Fixdat => "fixdat",
            };
            let destination = destination.clone();
            let format = *format;
            blocking(move || {
                ensure_parent(&destination)?;
                let file = std::fs::File::create(&destination).map_err(stringify)?;
                romsort_catalog::emit::write_catalog(file, name, None, &games, format)
                    .map_err(stringify)
            })
            .await
        },
        Action::EmitPlaylist { destination, entries } => {
            let destination = destination.clone();
            let entries = entries.clone();
            blocking(move || {
                ensure_parent(&destination)?;
                let mut file = std::fs::File::create(&destination).map_err(stringify)?;
                let base = destination.parent().unwrap_or(Path::new(""));
                for entry in &entries {
                    // Reference outputs relative to the playlist when they
                    // share its tree; absolute otherwise.
                    let line = entry.strip_prefix(base).unwrap_or(entry);
                    writeln!(file, "{}", line.display()).map_err(stringify)?;
                }
                Ok(())
            })
            .await
        },
        Action::CleanDelete { path } => {
            let path = path.clone();
            blocking(move || std::fs::remove_file(&path).map_err(stringify)).await
        },
    }
}

fn action_kind(action: &Action) -> &'static str {
    match action {
        Action::Copy { .. } => "copy",
        Action::Move { .. } => "move",
        Action::Link { .. } => "link",
        Action::Extract { .. } => "extract",
        Action::ZipInto { .. } => "zip",
        Action::Patch { .. } => "patch",
        Action::TestOnly { .. } => "test",
        Action::EmitReport { .. } => "report",
        Action::EmitCatalog { .. } => "catalog",
        Action::EmitPlaylist { .. } => "playlist",
        Action::CleanDelete { .. } => "clean",
    }
}

/// Existing destinations are respected unless `overwrite` is set; a skip
/// counts as success.
fn skip_existing(ctx: &ExecuteContext<'_>, destination: &Path) -> bool {
    !ctx.config.overwrite && destination.exists()
}

/// Write a source payload to a destination, optionally dropping a header.
/// `preserve_bytes` keeps the original file byte-for-byte (copy semantics);
/// otherwise the bare payload is emitted (extract semantics).
async fn write_payload(
    ctx: &ExecuteContext<'_>,
    source: &ActionSource,
    destination: &Path,
    header_skip: Option<u64>,
    preserve_bytes: bool,
) -> std::result::Result<(), String> {
    if skip_existing(ctx, destination) {
        return Ok(());
    }
    if source.entry.is_none() && preserve_bytes {
        // Plain file copy preserves everything including any header.
        let from = source.path.clone();
        let to = destination.to_path_buf();
        return blocking(move || {
            ensure_parent(&to)?;
            std::fs::copy(&from, &to).map(|_| ()).map_err(stringify)
        })
        .await;
    }

    let skip = if preserve_bytes { None } else { header_skip };
    let bytes = source_payload(ctx, source, skip).await?;
    let to = destination.to_path_buf();
    blocking(move || {
        ensure_parent(&to)?;
        std::fs::write(&to, bytes).map_err(stringify)
    })
    .await
}

/// The payload bytes of a source, with an optional leading skip.
async fn source_payload(
    ctx: &ExecuteContext<'_>,
    source: &ActionSource,
    skip: Option<u64>,
) -> std::result::Result<Vec<u8>, String> {
    let mut bytes = match &source.entry {
        None => {
            let path = source.path.clone();
            blocking(move || std::fs::read(&path).map_err(stringify)).await?
        },
        Some(_) => entry_bytes(ctx, source).await?,
    };
    if let Some(skip) = skip {
        let skip = (skip as usize).min(bytes.len());
        bytes.drain(..skip);
    }
    Ok(bytes)
}

/// Read one archive entry's bytes, dispatching on the archive kind.
async fn entry_bytes(
    ctx: &ExecuteContext<'_>,
    source: &ActionSource,
) -> std::result::Result<Vec<u8>, String> {
    let entry = source.entry.clone().ok_or("source has no archive entry")?;
    match ArchiveKind::from_extension(&source.path) {
        Some(ArchiveKind::SevenZ) => {
            let sevenzip = ctx.sevenzip.ok_or("no 7z binary available")?;
            sevenzip.extract_entry(&source.path, &entry).await.map_err(stringify)
        },
        _ => {
            let path = source.path.clone();
            blocking(move || {
                let zip = ZipFile::open(&path).map_err(stringify)?;
                let name = entry.to_string_lossy();
                let meta = zip
                    .entry(&name)
                    .ok_or_else(|| format!("entry not found in archive: {name}"))?
                    .clone();
                let mut reader = zip.open_entry(&meta).map_err(stringify)?;
                let mut bytes = Vec::with_capacity(meta.uncompressed_size as usize);
                std::io::Read::read_to_end(&mut reader, &mut bytes).map_err(stringify)?;
                Ok(bytes)
            })
            .await
        },
    }
}

fn ensure_parent(path: &Path) -> std::result::Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(stringify)?;
    }
    Ok(())
}

async fn blocking<T, F>(op: F) -> std::result::Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, String> + Send + 'static,
{
    tokio::task::spawn_blocking(op).await.map_err(stringify)?
}

fn stringify(e: impl std::fmt::Display) -> String {
    e.to_string()
}
