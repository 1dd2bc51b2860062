//! One full run: load catalogs, scan, match, enrich, select, plan,
//! execute.
//!
//! This is the library's front door. The CLI (or any other driver) builds a
//! [`Config`], calls [`run`], and maps [`RunOutcome::exit_code`] to the
//! process exit status.

use crate::CancelFlag;
use crate::config::Config;
use crate::error::{ErrorKind, Result};
use crate::execute::{ExecuteContext, ExecuteEvent, execute};
use crate::file::{RomFile, Skipped};
use crate::matching::{MatchOutcome, match_file};
use crate::plan::{BuildInput, Diagnostic, Plan, build_plan};
use crate::platform;
use crate::report::{RunReport, build_report};
use crate::scan::{ScanEvent, scan};
use crate::select::select;
use crate::template::PathTemplate;
use exn::ResultExt;
use futures::StreamExt;
use romsort_archive::sevenzip::SevenZip;
use romsort_cache::{Database, Repository};
use romsort_catalog::{Catalog, CatalogIndex, parse_catalog};
use romsort_enrich::{Enricher, HttpHashLookup, HttpTitleLookup, TitleLookupMode};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Default service endpoints; overridable via environment for testing
/// against local fakes.
const HASH_LOOKUP_BASE: &str = "https://hasheous.org";
const TITLE_LOOKUP_BASE: &str = "https://api.igdb.com";
const HASH_LOOKUP_BASE_VAR: &str = "ROMSORT_HASH_LOOKUP_BASE";
const TITLE_LOOKUP_BASE_VAR: &str = "ROMSORT_TITLE_LOOKUP_BASE";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

const DIAG_NAME: &str = "diagnostics.json";

/// What a run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub plan: Plan,
    pub report: RunReport,
    /// Whether the plan was executed (`print_plan` suppresses execution).
    pub executed: bool,
    pub failed_actions: usize,
}

impl RunOutcome {
    /// 0 success or nothing to do; 1 any action failed. Configuration and
    /// catalog errors abort [`run`] itself and map through
    /// [`ErrorKind::exit_code`].
    pub fn exit_code(&self) -> i32 {
        if self.failed_actions > 0 { 1 } else { 0 }
    }
}

/// Run with a fresh cancellation flag.
pub async fn run(config: &Config) -> Result<RunOutcome> {
    run_with_cancel(config, &CancelFlag::default()).await
}

/// Run under an externally controlled cancellation flag.
#[instrument(skip_all)]
pub async fn run_with_cancel(config: &Config, cancel: &CancelFlag) -> Result<RunOutcome> {
    config.validate()?;

    let catalogs = load_catalogs(config).await?;
    let catalog_descriptions: HashMap<String, String> = catalogs
        .iter()
        .filter_map(|c| c.description.clone().map(|d| (c.name.clone(), d)))
        .collect();
    let index = CatalogIndex::build(catalogs);

    let database = match &config.cache_db {
        Some(path) => Database::connect_or_degrade(path).await,
        None => None,
    };
    let cache = database.as_ref().map(Repository::from);
    let sevenzip = SevenZip::locate();

    // Scan.
    let mut records: Vec<RomFile> = Vec::new();
    let mut scan_skipped: Vec<Skipped> = Vec::new();
    {
        let stream = scan(config, cache.as_ref(), sevenzip.as_ref(), cancel);
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event? {
                ScanEvent::Hashed(record) => records.push(*record),
                ScanEvent::Skipped(skip) => scan_skipped.push(skip),
                _ => {},
            }
        }
    }
    // Canonical record order: the emitted set is a permutation of the
    // inputs, so sorting here pins every downstream ordering.
    records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    scan_skipped.sort_by(|a, b| a.path.cmp(&b.path));

    // Match.
    let outcomes: Vec<MatchOutcome> =
        records.into_iter().map(|record| match_file(&index, record)).collect();

    // Enrich the unmatched (advisory only).
    let (enrich_diagnostics, genres) =
        enrich_unmatched(config, &outcomes, cache.clone()).await;

    // Select.
    let selection = select(&index, &outcomes, &config.filters, &config.preference);

    // Plan.
    let (template, unknown_tokens) = PathTemplate::parse(&config.output)?;
    let mut diagnostics: Vec<Diagnostic> = unknown_tokens
        .into_iter()
        .map(|token| {
            tracing::warn!(token, "unknown token in output template");
            Diagnostic::UnknownToken { token }
        })
        .collect();
    diagnostics
        .extend(enrich_diagnostics.into_iter().map(|message| Diagnostic::Enrichment { message }));

    let plan = build_plan(BuildInput {
        config,
        index: &index,
        selection: &selection,
        template: &template,
        catalog_descriptions: &catalog_descriptions,
        genres: &genres,
        diagnostics,
    })?;

    let scanned: Vec<RomFile> = outcomes.iter().map(|o| o.file.clone()).collect();
    let mut report = build_report(&index, &outcomes, &scan_skipped, &selection);
    report.summary.actions_total = plan.actions.len();

    if config.diag {
        write_diagnostics(&template.literal_root(), &plan).await?;
    }

    if config.print_plan {
        println!("{}", plan.to_json()?);
        return Ok(RunOutcome { plan, report, executed: false, failed_actions: 0 });
    }

    // Execute.
    let mut failed_actions = 0usize;
    {
        let ctx = ExecuteContext {
            config,
            index: &index,
            scanned: &scanned,
            outcomes: &outcomes,
            report: report.clone(),
            sevenzip: sevenzip.as_ref(),
            cancel,
        };
        let stream = execute(&plan, ctx);
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            if let ExecuteEvent::Complete { failed } = event {
                failed_actions = failed;
            }
        }
    }
    report.summary.actions_failed = failed_actions;

    Ok(RunOutcome { plan, report, executed: true, failed_actions })
}

/// Expand catalog arguments and parse each file; a bad catalog is skipped
/// with a warning, no catalogs at all aborts the run (exit 3).
async fn load_catalogs(config: &Config) -> Result<Vec<Catalog>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for argument in &config.catalogs {
        let text = argument.to_string_lossy();
        if text.contains('*') || text.contains('?') || text.contains('[') {
            if let Ok(matches) = glob::glob(&text) {
                paths.extend(matches.flatten().filter(|p| p.is_file()));
            }
        } else if argument.is_dir() {
            for entry in walkdir::WalkDir::new(argument)
                .sort_by_file_name()
                .into_iter()
                .flatten()
                .filter(|e| e.file_type().is_file())
            {
                paths.push(entry.into_path());
            }
        } else {
            paths.push(argument.clone());
        }
    }
    paths.sort();
    paths.dedup();

    let mut catalogs = Vec::new();
    for path in paths {
        let parse_path = path.clone();
        let parsed =
            tokio::task::spawn_blocking(move || parse_catalog(&parse_path)).await;
        match parsed {
            Ok(Ok(catalog)) => catalogs.push(catalog),
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unusable catalog");
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "catalog parser panicked");
            },
        }
    }

    if catalogs.is_empty() {
        exn::bail!(ErrorKind::NoCatalogs);
    }
    Ok(catalogs)
}

/// Look up unmatched records against the optional external services.
/// Returns pass-through diagnostics and a sha256→genres map for `{genre}`.
async fn enrich_unmatched(
    config: &Config,
    outcomes: &[MatchOutcome],
    cache: Option<Repository>,
) -> (Vec<String>, HashMap<String, Vec<String>>) {
    let wanted = config.enable_hash_lookup || config.title_mode != TitleLookupMode::Off;
    if !wanted {
        return (Vec::new(), HashMap::new());
    }

    let mut enricher = Enricher::new(cache, config.cache_only);
    if config.enable_hash_lookup {
        let base = std::env::var(HASH_LOOKUP_BASE_VAR)
            .unwrap_or_else(|_| HASH_LOOKUP_BASE.to_string());
        match HttpHashLookup::new(base, LOOKUP_TIMEOUT) {
            Ok(client) => enricher = enricher.with_hash_lookup(Arc::new(client)),
            Err(e) => tracing::warn!(error = %e, "hash lookup client unavailable"),
        }
    }
    if config.title_mode != TitleLookupMode::Off
        && let (Some(client_id), Some(token)) = (&config.title_client_id, &config.title_token)
    {
        let base = std::env::var(TITLE_LOOKUP_BASE_VAR)
            .unwrap_or_else(|_| TITLE_LOOKUP_BASE.to_string());
        match HttpTitleLookup::new(base, client_id, token, LOOKUP_TIMEOUT) {
            Ok(client) => {
                enricher = enricher.with_title_lookup(Arc::new(client), config.title_mode);
            },
            Err(e) => tracing::warn!(error = %e, "title lookup client unavailable"),
        }
    }

    let mut diagnostics = Vec::new();
    let mut genres: HashMap<String, Vec<String>> = HashMap::new();
    for outcome in outcomes.iter().filter(|o| !o.is_matched()) {
        let Some(sha256) = outcome.file.digests.sha256.clone() else { continue };
        let title = outcome.file.display_name();
        let platform = platform::from_extension(
            outcome.file.entry.as_deref().unwrap_or(&outcome.file.source),
        );
        let enrichment =
            enricher.enrich(&sha256, &outcome.file.digests, &title, platform).await;
        diagnostics.extend(enrichment.diagnostics);
        let found = extract_genres(enrichment.title_payload.as_ref())
            .or_else(|| extract_genres(enrichment.hash_payload.as_ref()));
        if let Some(found) = found {
            genres.insert(sha256, found);
        }
    }
    (diagnostics, genres)
}

/// Genre names out of a lookup payload, tolerant of either service's shape.
fn extract_genres(payload: Option<&serde_json::Value>) -> Option<Vec<String>> {
    let payload = payload?;
    let first = match payload {
        serde_json::Value::Array(entries) => entries.first()?,
        other => other,
    };
    let genres = first.get("genres")?.as_array()?;
    let names: Vec<String> = genres
        .iter()
        .filter_map(|genre| match genre {
            serde_json::Value::String(name) => Some(name.clone()),
            object => object.get("name").and_then(|n| n.as_str()).map(str::to_string),
        })
        .collect();
    if names.is_empty() { None } else { Some(names) }
}

async fn write_diagnostics(root: &std::path::Path, plan: &Plan) -> Result<()> {
    let destination = root.join(DIAG_NAME);
    let json = serde_json::to_string_pretty(&plan.diagnostics).or_raise(|| ErrorKind::Report)?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io)?;
    }
    tokio::fs::write(&destination, json).await.or_raise(|| ErrorKind::Report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Command;

    fn write_catalog_file(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("example.dat");
        std::fs::write(
            &path,
            r#"<?xml version="1.0"?>
<datafile>
  <header><name>Example Console</name></header>
  <game name="Game A (USA)">
    <rom name="Game A (USA).bin" size="3" crc="352441c2"
         sha1="a9993e364706816aba3e25717850c26c9cd0d89d"/>
  </game>
  <game name="Game Z (USA)">
    <rom name="Game Z (USA).bin" size="9" crc="00000000"/>
  </game>
</datafile>"#,
        )
        .unwrap();
        path
    }

    fn run_config(dir: &std::path::Path, out: &std::path::Path) -> Config {
        Config {
            inputs: vec![dir.join("in")],
            catalogs: vec![write_catalog_file(dir)],
            output: out.to_string_lossy().into_owned(),
            commands: vec![Command::Copy, Command::Report],
            hash_threads: Some(2),
            scan_threads: Some(1),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn end_to_end_copy_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("in")).unwrap();
        // Content "abc" matches Game A by SHA-1 regardless of file name.
        std::fs::write(dir.path().join("in/renamed.rom"), b"abc").unwrap();
        std::fs::write(dir.path().join("in/unrelated.bin"), b"not in catalog").unwrap();

        let out = dir.path().join("out");
        let config = run_config(dir.path(), &out);
        let outcome = run(&config).await.unwrap();

        assert!(outcome.executed);
        assert_eq!(outcome.failed_actions, 0);
        assert_eq!(outcome.exit_code(), 0);
        // Matched content lands under the catalog-given name.
        assert_eq!(std::fs::read(out.join("Game A (USA).bin")).unwrap(), b"abc");
        // Unmatched content is not written.
        assert!(!out.join("unrelated.bin").exists());
        // Report artifact exists and is valid JSON.
        let report: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join("report.json")).unwrap()).unwrap();
        assert_eq!(report["summary"]["files_matched"], 1);
        assert_eq!(report["summary"]["files_scanned"], 2);
    }

    #[tokio::test]
    async fn print_plan_suppresses_execution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("in")).unwrap();
        std::fs::write(dir.path().join("in/renamed.rom"), b"abc").unwrap();

        let out = dir.path().join("out");
        let mut config = run_config(dir.path(), &out);
        config.print_plan = true;
        let outcome = run(&config).await.unwrap();

        assert!(!outcome.executed);
        assert!(!outcome.plan.is_empty());
        assert!(!out.join("Game A (USA).bin").exists());
    }

    #[tokio::test]
    async fn plans_for_identical_runs_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("in")).unwrap();
        std::fs::write(dir.path().join("in/renamed.rom"), b"abc").unwrap();
        std::fs::write(dir.path().join("in/other.rom"), b"xyz").unwrap();

        let out = dir.path().join("out");
        let mut config = run_config(dir.path(), &out);
        config.print_plan = true;

        let first = run(&config).await.unwrap().plan.to_json().unwrap();
        let second = run(&config).await.unwrap().plan.to_json().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_catalogs_abort_with_exit_3() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("in")).unwrap();
        std::fs::write(dir.path().join("in/a.bin"), b"abc").unwrap();

        let config = Config {
            inputs: vec![dir.path().join("in")],
            catalogs: vec![dir.path().join("no-such.dat")],
            output: "out".into(),
            commands: vec![Command::Copy],
            ..Config::default()
        };
        let err = run(&config).await.unwrap_err();
        assert_eq!(err.current_value().exit_code(), 3);
    }

    #[tokio::test]
    async fn invalid_config_aborts_with_exit_2() {
        let config = Config::default();
        let err = run(&config).await.unwrap_err();
        assert_eq!(err.current_value().exit_code(), 2);
    }

    #[tokio::test]
    async fn unusable_catalog_is_skipped_when_others_remain() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("in")).unwrap();
        std::fs::write(dir.path().join("in/renamed.rom"), b"abc").unwrap();
        let good = write_catalog_file(dir.path());
        let bad = dir.path().join("broken.dat");
        std::fs::write(&bad, "definitely not xml").unwrap();

        let out = dir.path().join("out");
        let config = Config {
            inputs: vec![dir.path().join("in")],
            catalogs: vec![bad, good],
            output: out.to_string_lossy().into_owned(),
            commands: vec![Command::Copy],
            ..Config::default()
        };
        let outcome = run(&config).await.unwrap();
        assert_eq!(outcome.failed_actions, 0);
        assert!(out.join("Game A (USA).bin").exists());
    }

    #[tokio::test]
    async fn cache_only_run_emits_cache_miss_and_still_copies_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("in")).unwrap();
        std::fs::write(dir.path().join("in/renamed.rom"), b"abc").unwrap();
        std::fs::write(dir.path().join("in/mystery.rom"), b"nothing known").unwrap();

        let out = dir.path().join("out");
        let mut config = run_config(dir.path(), &out);
        config.cache_db = Some(dir.path().join("cache.sqlite"));
        config.cache_only = true;
        config.enable_hash_lookup = true;

        let outcome = run(&config).await.unwrap();
        assert_eq!(outcome.failed_actions, 0);
        // The digest-matched record was still planned and copied.
        assert!(out.join("Game A (USA).bin").exists());
        // The unmatched record's lookup was answered by a cache miss, not
        // the network.
        assert!(outcome.plan.diagnostics.iter().any(|d| {
            matches!(d, Diagnostic::Enrichment { message } if message.contains("CACHE-MISS (cache-only)"))
        }));
    }

    #[test]
    fn genre_extraction_handles_both_shapes() {
        let igdb_style = serde_json::json!([
            { "name": "Game", "genres": [ { "name": "Platformer" }, { "name": "Action" } ] }
        ]);
        assert_eq!(
            extract_genres(Some(&igdb_style)),
            Some(vec!["Platformer".to_string(), "Action".to_string()]),
        );
        let flat = serde_json::json!({ "genres": ["Puzzle"] });
        assert_eq!(extract_genres(Some(&flat)), Some(vec!["Puzzle".to_string()]));
        assert_eq!(extract_genres(Some(&serde_json::json!({ "noGenres": true }))), None);
        assert_eq!(extract_genres(None), None);
    }
}
