//! The run report: per-catalog-entry match status and per-input
//! disposition.
//!
//! Reports are JSON. Content is sorted on the way in so the artifact is
//! byte-stable for identical runs, the same property the plan has.

use crate::file::{RomFile, Skipped};
use crate::matching::{MatchOutcome, MatchTier};
use crate::select::Selection;
use romsort_catalog::CatalogIndex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// At least one scanned file matched this entry.
    Matched,
    /// Nothing in the inputs matched this entry.
    Missing,
}

/// One catalog entry's outcome.
#[derive(Clone, Debug, Serialize)]
pub struct EntryReport {
    pub catalog: String,
    pub game: String,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_by: Option<MatchTier>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputStatus {
    Matched,
    Unmatched,
    Skipped,
}

/// One scanned (or skipped) input's outcome.
#[derive(Clone, Debug, Serialize)]
pub struct InputReport {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<PathBuf>,
    pub status: InputStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregate counters for the closing summary line.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub files_scanned: usize,
    pub files_matched: usize,
    pub files_skipped: usize,
    pub entries_total: usize,
    pub entries_matched: usize,
    pub candidates_chosen: usize,
    pub actions_total: usize,
    pub actions_failed: usize,
    /// Skip counts keyed by reason, sorted for stable output.
    pub skip_breakdown: BTreeMap<String, usize>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunReport {
    pub entries: Vec<EntryReport>,
    pub inputs: Vec<InputReport>,
    pub summary: RunSummary,
}

/// Assemble the report from the run's intermediate products. Action counts
/// are filled in by the executor afterwards.
pub fn build_report(
    index: &CatalogIndex,
    outcomes: &[MatchOutcome],
    scan_skipped: &[Skipped],
    selection: &Selection,
) -> RunReport {
    let mut matched_games: HashSet<usize> = HashSet::new();
    let mut tier_for_game: BTreeMap<usize, MatchTier> = BTreeMap::new();
    for outcome in outcomes {
        for rom_ref in &outcome.matches {
            matched_games.insert(rom_ref.game);
            if let Some(tier) = outcome.tier {
                // Keep the strongest tier seen for the entry.
                tier_for_game
                    .entry(rom_ref.game)
                    .and_modify(|existing| {
                        if tier < *existing {
                            *existing = tier;
                        }
                    })
                    .or_insert(tier);
            }
        }
    }

    let mut entries: Vec<EntryReport> = index
        .games()
        .iter()
        .enumerate()
        .map(|(game_idx, game)| EntryReport {
            catalog: game.catalog.clone(),
            game: game.name.clone(),
            status: if matched_games.contains(&game_idx) {
                EntryStatus::Matched
            } else {
                EntryStatus::Missing
            },
            matched_by: tier_for_game.get(&game_idx).copied(),
        })
        .collect();
    entries.sort_by(|a, b| (&a.catalog, &a.game).cmp(&(&b.catalog, &b.game)));

    let mut inputs: Vec<InputReport> = outcomes
        .iter()
        .map(|outcome| InputReport {
            path: outcome.file.source.clone(),
            entry: outcome.file.entry.clone(),
            status: if outcome.is_matched() {
                InputStatus::Matched
            } else {
                InputStatus::Unmatched
            },
            detail: None,
        })
        .collect();
    inputs.extend(scan_skipped.iter().map(|skip| InputReport {
        path: skip.path.clone(),
        entry: None,
        status: InputStatus::Skipped,
        detail: skip.detail.clone().or_else(|| Some(skip.reason.to_string())),
    }));
    inputs.sort_by(|a, b| (&a.path, &a.entry).cmp(&(&b.path, &b.entry)));

    let mut skip_breakdown: BTreeMap<String, usize> = BTreeMap::new();
    for skip in scan_skipped.iter().chain(&selection.skipped) {
        *skip_breakdown.entry(skip.reason.to_string()).or_default() += 1;
    }

    let summary = RunSummary {
        files_scanned: outcomes.len(),
        files_matched: outcomes.iter().filter(|o| o.is_matched()).count(),
        files_skipped: scan_skipped.len() + selection.skipped.len(),
        entries_total: index.games().len(),
        entries_matched: matched_games.len(),
        candidates_chosen: selection.chosen.len(),
        actions_total: 0,
        actions_failed: 0,
        skip_breakdown,
    };

    RunReport { entries, inputs, summary }
}

/// The games in the index nothing matched — fixdat material.
pub fn missing_games(index: &CatalogIndex, outcomes: &[MatchOutcome]) -> Vec<usize> {
    let matched: HashSet<usize> =
        outcomes.iter().flat_map(|o| o.matches.iter().map(|r| r.game)).collect();
    (0..index.games().len()).filter(|idx| !matched.contains(idx)).collect()
}

/// Synthesize dir2dat entries from scanned records: one game per record,
/// named by its bare file name, carrying every digest we computed.
pub fn dir2dat_games(records: &[RomFile]) -> Vec<romsort_catalog::GameEntry> {
    let mut sorted: Vec<&RomFile> = records.iter().collect();
    sorted.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    sorted
        .into_iter()
        .map(|record| {
            let name = record.display_name();
            let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(&name);
            romsort_catalog::GameEntry {
                catalog: String::new(),
                name: stem.to_string(),
                description: None,
                category: None,
                tags: romsort_catalog::NameTags::parse(stem),
                roms: vec![romsort_catalog::RomEntry {
                    name: name.clone(),
                    size: Some(record.size),
                    crc32: record.digests.crc32.clone(),
                    md5: record.digests.md5.clone(),
                    sha1: record.digests.sha1.clone(),
                    sha256: record.digests.sha256.clone(),
                }],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Filters, Preference};
    use crate::matching::match_file;
    use crate::select::select;
    use romsort_catalog::tags::NameTags;
    use romsort_catalog::{Catalog, GameEntry, RomEntry};
    use romsort_digest::DigestSet;

    fn index() -> CatalogIndex {
        let games = vec![
            GameEntry {
                catalog: "Example".into(),
                name: "Game A (USA)".into(),
                description: None,
                category: None,
                tags: NameTags::parse("Game A (USA)"),
                roms: vec![RomEntry {
                    name: "Game A (USA).nes".into(),
                    size: Some(3),
                    crc32: Some("000000aa".into()),
                    ..RomEntry::default()
                }],
            },
            GameEntry {
                catalog: "Example".into(),
                name: "Game Z (USA)".into(),
                description: None,
                category: None,
                tags: NameTags::parse("Game Z (USA)"),
                roms: vec![RomEntry {
                    name: "Game Z (USA).nes".into(),
                    size: Some(7),
                    crc32: Some("000000ff".into()),
                    ..RomEntry::default()
                }],
            },
        ];
        CatalogIndex::build(vec![Catalog { name: "Example".into(), description: None, games }])
    }

    fn file(path: &str, crc: &str, size: u64) -> RomFile {
        RomFile {
            source: PathBuf::from(path),
            entry: None,
            size,
            digests: DigestSet { crc32: Some(crc.into()), ..DigestSet::default() },
            header: None,
            modified: None,
        }
    }

    #[test]
    fn report_partitions_matched_and_missing_entries() {
        let index = index();
        let outcomes = vec![
            match_file(&index, file("/in/a.nes", "000000aa", 3)),
            match_file(&index, file("/in/junk.bin", "12345678", 99)),
        ];
        let selection = select(&index, &outcomes, &Filters::permissive(), &Preference::default());
        let report = build_report(&index, &outcomes, &[], &selection);

        assert_eq!(report.entries.len(), 2);
        let game_a = report.entries.iter().find(|e| e.game == "Game A (USA)").unwrap();
        assert_eq!(game_a.status, EntryStatus::Matched);
        assert_eq!(game_a.matched_by, Some(MatchTier::CrcSize));
        let game_z = report.entries.iter().find(|e| e.game == "Game Z (USA)").unwrap();
        assert_eq!(game_z.status, EntryStatus::Missing);

        assert_eq!(report.summary.files_scanned, 2);
        assert_eq!(report.summary.files_matched, 1);
        assert_eq!(report.summary.entries_matched, 1);
        assert_eq!(report.summary.candidates_chosen, 1);
        let unmatched = report.inputs.iter().find(|i| i.path.ends_with("junk.bin")).unwrap();
        assert_eq!(unmatched.status, InputStatus::Unmatched);
    }

    #[test]
    fn missing_games_feed_the_fixdat() {
        let index = index();
        let outcomes = vec![match_file(&index, file("/in/a.nes", "000000aa", 3))];
        let missing = missing_games(&index, &outcomes);
        assert_eq!(missing.len(), 1);
        assert_eq!(index.game(missing[0]).name, "Game Z (USA)");
    }

    #[test]
    fn dir2dat_games_carry_digests_and_sort() {
        let records = vec![
            file("/in/z-last.bin", "000000ff", 7),
            file("/in/a-first.bin", "000000aa", 3),
        ];
        let games = dir2dat_games(&records);
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].name, "a-first");
        assert_eq!(games[0].roms[0].crc32.as_deref(), Some("000000aa"));
        assert_eq!(games[0].roms[0].size, Some(3));
    }

    #[test]
    fn report_json_is_deterministic() {
        let index = index();
        let outcomes = vec![match_file(&index, file("/in/a.nes", "000000aa", 3))];
        let selection = select(&index, &outcomes, &Filters::permissive(), &Preference::default());
        let report = build_report(&index, &outcomes, &[], &selection);
        let first = serde_json::to_string(&report).unwrap();
        let second = serde_json::to_string(&report).unwrap();
        assert_eq!(first, second);
    }
}
