//! The scan pipeline: bounded discovery feeding bounded hashing.
//!
//! Discovery walks the input roots on blocking threads and pushes findings
//! through a bounded channel sized `2 × hash_threads`; when hashing falls
//! behind, `blocking_send` stalls the walkers and memory stays bounded.
//! Hash jobs run concurrently up to `hash_threads`, each doing its file
//! I/O and digesting inside `spawn_blocking`.
//!
//! Cancellation is cooperative: once the flag flips, discovery stops at the
//! next file and no new hash jobs are admitted, but in-flight hashes run to
//! completion so the cache never records a partial row.

use crate::CancelFlag;
use crate::config::Config;
use crate::error::Result;
use crate::file::{RomFile, SkipReason, Skipped};
use crate::scan::file::{
    hash_archive_entries, hash_extracted_bytes, hash_regular_file, read_prefix,
};
use async_stream::stream;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use romsort_archive::ArchiveKind;
use romsort_archive::sevenzip::SevenZip;
use romsort_cache::{DigestRecord, Repository};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Progress events emitted by [`scan`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) — exactly once.
/// 2. [`FileDiscovered`](Self::FileDiscovered) / [`Hashed`](Self::Hashed) /
///    [`Skipped`](Self::Skipped) — interleaved as the pipeline works.
/// 3. [`DiscoveryComplete`](Self::DiscoveryComplete) — exactly once, when
///    the walkers finish (hashing may still be in flight).
/// 4. [`Complete`](Self::Complete) — exactly once, after the last hash.
pub enum ScanEvent {
    Started,
    FileDiscovered(PathBuf),
    /// All roots walked; the total discovered count is now known.
    DiscoveryComplete(u64),
    Hashed(Box<RomFile>),
    Skipped(Skipped),
    Complete,
}

enum DiscoveryItem {
    File(PathBuf),
    Skipped(Skipped),
}

/// Stream scan events for every input root in `config`.
pub fn scan<'a>(
    config: &'a Config,
    cache: Option<&'a Repository>,
    sevenzip: Option<&'a SevenZip>,
    cancel: &'a CancelFlag,
) -> impl Stream<Item = Result<ScanEvent>> + 'a {
    stream!({
        yield Ok(ScanEvent::Started);

        let roots = match expand_inputs(config) {
            Ok(roots) => roots,
            Err(e) => {
                yield Err(e);
                return;
            },
        };

        let (tx, mut rx) = mpsc::channel::<DiscoveryItem>(config.channel_capacity());
        let walker_cancel = cancel.clone();
        let walker_threads = config.scan_parallelism();
        let discovery =
            tokio::task::spawn_blocking(move || discover(roots, tx, walker_threads, walker_cancel));

        let hash_cap = config.hash_parallelism();
        let mut discovered = 0u64;
        let mut discovery_done = false;
        let mut pending = Vec::new();
        let mut processing = FuturesUnordered::new();

        loop {
            tokio::select! {
                biased;

                item = rx.recv(), if !discovery_done => match item {
                    Some(DiscoveryItem::File(path)) => {
                        discovered += 1;
                        // Cancellation stops admitting work; anything already
                        // hashing still finishes below.
                        if !cancel.is_cancelled() {
                            let job = hash_job(path.clone(), cache, sevenzip);
                            if processing.len() < hash_cap {
                                processing.push(job);
                            } else {
                                pending.push(job);
                            }
                        }
                        yield Ok(ScanEvent::FileDiscovered(path));
                    },
                    Some(DiscoveryItem::Skipped(skip)) => yield Ok(ScanEvent::Skipped(skip)),
                    None => {
                        discovery_done = true;
                        yield Ok(ScanEvent::DiscoveryComplete(discovered));
                    },
                },

                Some(result) = processing.next(), if !processing.is_empty() => {
                    match result {
                        Ok(records) => {
                            for record in records {
                                yield Ok(ScanEvent::Hashed(Box::new(record)));
                            }
                        },
                        Err(skip) => yield Ok(ScanEvent::Skipped(skip)),
                    }
                    if !cancel.is_cancelled()
                        && let Some(job) = pending.pop()
                    {
                        processing.push(job);
                    }
                },

                else => {
                    if !pending.is_empty() && !cancel.is_cancelled() {
                        let batch = hash_cap.min(pending.len());
                        processing.extend(pending.drain(..batch));
                    } else {
                        break;
                    }
                },
            }
        }

        let _ = discovery.await;
        yield Ok(ScanEvent::Complete);
    })
}

/// Expand raw input arguments: globs expand, directories and files pass
/// through. Results are sorted and deduplicated so the discovery order is
/// reproducible.
fn expand_inputs(config: &Config) -> Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    for input in &config.inputs {
        let text = input.to_string_lossy();
        if text.contains('*') || text.contains('?') || text.contains('[') {
            if let Ok(paths) = glob::glob(&text) {
                roots.extend(paths.flatten());
            }
        } else {
            roots.push(input.clone());
        }
    }
    roots.sort();
    roots.dedup();
    Ok(roots)
}

/// Walk the roots, fanning out across up to `threads` walker threads.
/// `blocking_send` into the bounded channel is the backpressure point.
fn discover(
    roots: Vec<PathBuf>,
    tx: mpsc::Sender<DiscoveryItem>,
    threads: usize,
    cancel: CancelFlag,
) {
    let next = std::sync::atomic::AtomicUsize::new(0);
    let workers = threads.clamp(1, roots.len().max(1));
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let roots = &roots;
            let cancel = &cancel;
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let Some(root) = roots.get(index) else { break };
                    if cancel.is_cancelled() {
                        break;
                    }
                    walk_root(root, &tx, cancel);
                }
            });
        }
    });
}

fn walk_root(root: &PathBuf, tx: &mpsc::Sender<DiscoveryItem>, cancel: &CancelFlag) {
    if root.is_file() {
        let _ = tx.blocking_send(DiscoveryItem::File(root.clone()));
        return;
    }
    if !root.exists() {
        let _ = tx.blocking_send(DiscoveryItem::Skipped(Skipped {
            path: root.clone(),
            reason: SkipReason::Unreadable,
            detail: Some("input path does not exist".to_string()),
        }));
        return;
    }

    // follow_links(true) makes walkdir track the ancestor chain by
    // (device, inode), so symlink cycles surface as errors instead of
    // infinite descent; the depth cap bounds pathological nesting.
    for entry in walkdir::WalkDir::new(root)
        .follow_links(true)
        .max_depth(64)
        .sort_by_file_name()
    {
        if cancel.is_cancelled() {
            return;
        }
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                if tx.blocking_send(DiscoveryItem::File(entry.into_path())).is_err() {
                    return;
                }
            },
            Ok(_) => {},
            Err(e) => {
                let path = e.path().map(PathBuf::from).unwrap_or_else(|| root.clone());
                let _ = tx.blocking_send(DiscoveryItem::Skipped(Skipped {
                    path,
                    reason: SkipReason::Unreadable,
                    detail: Some(e.to_string()),
                }));
            },
        }
    }
}

/// Hash one discovered file (which may explode into many records when it
/// is an archive), then merge with the checksum cache.
async fn hash_job(
    path: PathBuf,
    cache: Option<&Repository>,
    sevenzip: Option<&SevenZip>,
) -> std::result::Result<Vec<RomFile>, Skipped> {
    let skip = |reason: SkipReason, detail: String| Skipped {
        path: path.clone(),
        reason,
        detail: Some(detail),
    };

    let probe_path = path.clone();
    let prefix = tokio::task::spawn_blocking(move || read_prefix(&probe_path))
        .await
        .map_err(|e| skip(SkipReason::Unreadable, e.to_string()))?
        .map_err(|e| skip(SkipReason::Unreadable, e.current_value().to_string()))?;

    let mut records = match ArchiveKind::sniff(&path, &prefix) {
        None => {
            let hash_path = path.clone();
            let hashed =
                tokio::task::spawn_blocking(move || hash_regular_file(&hash_path, &prefix))
                    .await
                    .map_err(|e| skip(SkipReason::DigestFailed, e.to_string()))?;
            match hashed {
                Ok(record) => vec![record],
                // An unhashable record can still match by name and size, so
                // it degrades to a digestless record instead of vanishing.
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e.current_value(), "digest failed");
                    vec![digestless_record(&path).map_err(|detail| {
                        skip(SkipReason::DigestFailed, detail)
                    })?]
                },
            }
        },
        Some(ArchiveKind::Zip) => {
            let hash_path = path.clone();
            tokio::task::spawn_blocking(move || hash_archive_entries(&hash_path))
                .await
                .map_err(|e| skip(SkipReason::UnreadableArchive, e.to_string()))?
                .map_err(|e| skip(SkipReason::UnreadableArchive, e.current_value().to_string()))?
        },
        Some(ArchiveKind::SevenZ) => match sevenzip {
            None => {
                tracing::warn!(path = %path.display(), "skipping 7z archive, no binary on PATH");
                return Err(skip(
                    SkipReason::SevenZipUnavailable,
                    "install 7z or 7za to scan this archive".to_string(),
                ));
            },
            Some(sevenzip) => seven_zip_records(sevenzip, &path)
                .await
                .map_err(|detail| skip(SkipReason::UnreadableArchive, detail))?,
        },
    };

    if let Some(cache) = cache {
        for record in &mut records {
            merge_with_cache(cache, record).await;
        }
    }
    Ok(records)
}

/// List-then-extract flow for 7z: parse the listing; when it yields
/// nothing, fall back to a full scratch extraction and rescan.
async fn seven_zip_records(
    sevenzip: &SevenZip,
    path: &PathBuf,
) -> std::result::Result<Vec<RomFile>, String> {
    let entries = sevenzip.list(path).await.map_err(|e| e.current_value().to_string())?;

    if entries.is_empty() {
        let (scratch, files) = sevenzip
            .extract_and_enumerate(path)
            .await
            .map_err(|e| e.current_value().to_string())?;
        let mut records = Vec::with_capacity(files.len());
        for relative in files {
            let bytes =
                tokio::fs::read(scratch.path().join(&relative)).await.map_err(|e| e.to_string())?;
            records.push(hash_bytes_blocking(path.clone(), relative, bytes).await?);
        }
        return Ok(records);
    }

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let bytes =
            sevenzip.extract_entry(path, &entry.name).await.map_err(|e| e.to_string())?;
        records.push(hash_bytes_blocking(path.clone(), entry.name, bytes).await?);
    }
    Ok(records)
}

/// A record with size and timestamp but no digests: the name+size tier is
/// all it can ever match on.
fn digestless_record(path: &PathBuf) -> std::result::Result<RomFile, String> {
    let metadata = std::fs::metadata(path).map_err(|e| e.to_string())?;
    Ok(RomFile {
        source: path.clone(),
        entry: None,
        size: metadata.len(),
        digests: Default::default(),
        header: None,
        modified: metadata.modified().ok().map(time::OffsetDateTime::from),
    })
}

async fn hash_bytes_blocking(
    archive: PathBuf,
    entry: PathBuf,
    bytes: Vec<u8>,
) -> std::result::Result<RomFile, String> {
    tokio::task::spawn_blocking(move || hash_extracted_bytes(&archive, &entry, &bytes))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

/// Fold the cache into a fresh record: known digests fill gaps, and the
/// fresh result is upserted for the next run. Cache trouble never fails a
/// scan.
async fn merge_with_cache(cache: &Repository, record: &mut RomFile) {
    let Some(sha256) = record.digests.sha256.clone() else { return };
    match cache.get_checksums(&sha256).await {
        Ok(Some(row)) => record.digests.fill_from(&row.digests),
        Ok(None) => {},
        Err(e) => tracing::warn!(error = %e, "checksum cache read failed"),
    }
    let source = match &record.entry {
        Some(entry) => record.source.join(entry),
        None => record.source.clone(),
    };
    if let Some(row) = DigestRecord::new(source, record.size, record.digests.clone())
        && let Err(e) = cache.put_checksums(&row).await
    {
        tracing::warn!(error = %e, "checksum cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use romsort_archive::torrentzip::{MemberSource, ZipMember, write_torrentzip};
    use romsort_cache::Database;

    async fn collect_records(config: &Config, cache: Option<&Repository>) -> Vec<RomFile> {
        let cancel = CancelFlag::default();
        let mut records = Vec::new();
        let stream = scan(config, cache, None, &cancel);
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            if let ScanEvent::Hashed(record) = event.unwrap() {
                records.push(*record);
            }
        }
        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        records
    }

    fn config_for(inputs: Vec<PathBuf>) -> Config {
        Config {
            inputs,
            commands: vec![crate::config::Command::Copy],
            hash_threads: Some(2),
            scan_threads: Some(2),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn scans_loose_files_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("loose.bin"), b"abc").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/nested.bin"), b"defgh").unwrap();
        write_torrentzip(
            &dir.path().join("pack.zip"),
            vec![ZipMember { name: "inner.bin".into(), source: MemberSource::Bytes(b"xyz".to_vec()) }],
        )
        .unwrap();

        let config = config_for(vec![dir.path().to_path_buf()]);
        let records = collect_records(&config, None).await;
        assert_eq!(records.len(), 3);
        assert!(records.iter().any(|r| r.entry.as_deref() == Some(std::path::Path::new("inner.bin"))));
        assert!(records.iter().all(|r| r.digests.sha256.is_some()));
    }

    #[tokio::test]
    async fn event_protocol_brackets_the_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"abc").unwrap();

        let config = config_for(vec![dir.path().to_path_buf()]);
        let cancel = CancelFlag::default();
        let stream = scan(&config, None, None, &cancel);
        futures::pin_mut!(stream);

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
        assert!(matches!(events.first(), Some(ScanEvent::Started)));
        assert!(matches!(events.last(), Some(ScanEvent::Complete)));
        let discovery_total = events.iter().find_map(|e| match e {
            ScanEvent::DiscoveryComplete(n) => Some(*n),
            _ => None,
        });
        assert_eq!(discovery_total, Some(1));
    }

    #[tokio::test]
    async fn missing_input_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"abc").unwrap();
        let config = config_for(vec![
            dir.path().join("a.bin"),
            dir.path().join("does-not-exist"),
        ]);

        let cancel = CancelFlag::default();
        let stream = scan(&config, None, None, &cancel);
        futures::pin_mut!(stream);
        let mut hashed = 0;
        let mut skipped = 0;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                ScanEvent::Hashed(_) => hashed += 1,
                ScanEvent::Skipped(s) => {
                    assert_eq!(s.reason, SkipReason::Unreadable);
                    skipped += 1;
                },
                _ => {},
            }
        }
        assert_eq!(hashed, 1);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn glob_inputs_expand() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.bin"), b"a").unwrap();
        std::fs::write(dir.path().join("two.bin"), b"b").unwrap();
        std::fs::write(dir.path().join("skip.txt"), b"c").unwrap();

        let pattern = dir.path().join("*.bin");
        let config = config_for(vec![pattern]);
        let records = collect_records(&config, None).await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn cache_rows_survive_a_rescan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"abc").unwrap();
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);

        let config = config_for(vec![dir.path().to_path_buf()]);
        let first = collect_records(&config, Some(&repo)).await;
        let sha256 = first[0].digests.sha256.clone().unwrap();

        let row = repo.get_checksums(&sha256).await.unwrap().unwrap();
        assert_eq!(row.digests, first[0].digests);
        assert_eq!(row.size, 3);

        // Second scan sees identical digests.
        let second = collect_records(&config, Some(&repo)).await;
        assert_eq!(second[0].digests, first[0].digests);
    }

    #[tokio::test]
    async fn cancellation_stops_admitting_work() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..16 {
            std::fs::write(dir.path().join(format!("f{i:02}.bin")), vec![i as u8; 64]).unwrap();
        }
        let config = config_for(vec![dir.path().to_path_buf()]);
        let cancel = CancelFlag::default();
        cancel.cancel();

        let stream = scan(&config, None, None, &cancel);
        futures::pin_mut!(stream);
        let mut hashed = 0;
        while let Some(event) = stream.next().await {
            if matches!(event.unwrap(), ScanEvent::Hashed(_)) {
                hashed += 1;
            }
        }
        // Cancelled before any job was admitted.
        assert_eq!(hashed, 0);
    }
}
