//! Candidate selection: filters, then 1G1R preference ordering.
//!
//! Selection runs once, after all matching, because 1G1R needs global
//! knowledge: every variant of a title must be on the table before one can
//! be preferred. The function is pure and order-independent — all inputs
//! are brought into a canonical order before any decision is made, so any
//! permutation of the same candidates selects the same winners.

use crate::config::{Filters, Preference, RevisionPreference};
use crate::file::{RomFile, Skipped};
use crate::matching::MatchOutcome;
use regex::Regex;
use romsort_catalog::{CatalogIndex, GameEntry, QualityTier, RomRef};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::file::SkipReason;

/// One selected pairing of a catalog ROM with the scanned file that will
/// produce it.
#[derive(Clone, Debug)]
pub struct Selected {
    pub rom_ref: RomRef,
    pub file: RomFile,
}

/// The selector's output: winners in canonical plan order, losers with
/// reasons.
#[derive(Debug, Default)]
pub struct Selection {
    pub chosen: Vec<Selected>,
    pub skipped: Vec<Skipped>,
}

/// Apply filters and (when `single` is on) 1G1R preference ordering.
pub fn select(
    index: &CatalogIndex,
    outcomes: &[MatchOutcome],
    filters: &Filters,
    preference: &Preference,
) -> Selection {
    // Regroup: per game, per ROM slot, every file that matched it. BTreeMap
    // gives a canonical game order regardless of input order.
    let mut per_game: BTreeMap<usize, BTreeMap<usize, Vec<&RomFile>>> = BTreeMap::new();
    for outcome in outcomes {
        for rom_ref in &outcome.matches {
            per_game
                .entry(rom_ref.game)
                .or_default()
                .entry(rom_ref.rom)
                .or_default()
                .push(&outcome.file);
        }
    }

    // One file per ROM slot: candidates sorted by (source, entry), first
    // wins. This is the only place multiple files for the same slot are
    // reduced, and the sort makes it order-independent.
    let mut candidates: BTreeMap<usize, Vec<Selected>> = BTreeMap::new();
    for (game, slots) in per_game {
        let mut selected = Vec::with_capacity(slots.len());
        for (rom, mut files) in slots {
            files.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
            files.dedup_by(|a, b| a.sort_key() == b.sort_key());
            if let Some(file) = files.first() {
                selected.push(Selected { rom_ref: RomRef { game, rom }, file: (*file).clone() });
            }
        }
        candidates.insert(game, selected);
    }

    let mut selection = Selection::default();

    // Game-level filters.
    let include = filters.include_regex.as_deref().and_then(|p| Regex::new(p).ok());
    let exclude = filters.exclude_regex.as_deref().and_then(|p| Regex::new(p).ok());
    let mut surviving: Vec<usize> = Vec::new();
    for (&game_idx, selected) in &candidates {
        let game = index.game(game_idx);
        if let Some(reason) = filter_game(game, filters, include.as_ref(), exclude.as_ref()) {
            skip_all(&mut selection.skipped, selected, reason, None);
            continue;
        }
        surviving.push(game_idx);
    }

    if !preference.single {
        for game_idx in surviving {
            selection.chosen.extend(candidates[&game_idx].iter().cloned());
        }
        sort_for_plan(index, &mut selection.chosen);
        return selection;
    }

    // 1G1R: partition surviving games by title, order variants by the
    // preference vector, keep the best.
    let mut by_title: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for game_idx in surviving {
        let game = index.game(game_idx);
        let title = romsort_catalog::tags::normalize_for_index(&game.name);
        by_title.entry(title).or_default().push(game_idx);
    }

    for (_title, mut variants) in by_title {
        variants.sort_by(|&a, &b| compare_variants(index.game(a), index.game(b), preference));
        let mut variants = variants.into_iter();
        let Some(winner) = variants.next() else { continue };
        selection.chosen.extend(candidates[&winner].iter().cloned());
        for loser in variants {
            let winner_name = index.game(winner).name.clone();
            skip_all(
                &mut selection.skipped,
                &candidates[&loser],
                SkipReason::PreferredVariantKept,
                Some(format!("kept '{winner_name}' over '{}'", index.game(loser).name)),
            );
        }
    }

    sort_for_plan(index, &mut selection.chosen);
    selection
}

/// Deterministic plan order: (catalog name, game name, rom name, source).
fn sort_for_plan(index: &CatalogIndex, chosen: &mut [Selected]) {
    chosen.sort_by(|a, b| {
        let game_a = index.game(a.rom_ref.game);
        let game_b = index.game(b.rom_ref.game);
        (&game_a.catalog, &game_a.name, &index.rom(a.rom_ref).name)
            .cmp(&(&game_b.catalog, &game_b.name, &index.rom(b.rom_ref).name))
            .then_with(|| a.file.sort_key().cmp(&b.file.sort_key()))
    });
}

fn filter_game(
    game: &GameEntry,
    filters: &Filters,
    include: Option<&Regex>,
    exclude: Option<&Regex>,
) -> Option<SkipReason> {
    if let Some(include) = include
        && !include.is_match(&game.name)
    {
        return Some(SkipReason::FailedIncludeFilter);
    }
    if let Some(exclude) = exclude
        && exclude.is_match(&game.name)
    {
        return Some(SkipReason::MatchedExcludeFilter);
    }
    if filters.bios_only && !game.is_bios() {
        return Some(SkipReason::FailedIncludeFilter);
    }
    if filters.device_only && !game.is_device() {
        return Some(SkipReason::FailedIncludeFilter);
    }
    if !filters.allow_unlicensed && game.is_unlicensed() {
        return Some(SkipReason::MatchedExcludeFilter);
    }
    if !filters.allow_bad_dumps && game.tags.quality == QualityTier::Bad {
        return Some(SkipReason::MatchedExcludeFilter);
    }
    None
}

fn skip_all(
    skipped: &mut Vec<Skipped>,
    selected: &[Selected],
    reason: SkipReason,
    detail: Option<String>,
) {
    for candidate in selected {
        skipped.push(Skipped {
            path: candidate.file.source.clone(),
            reason,
            detail: detail.clone(),
        });
    }
}

/// The 1G1R preference comparator: region order, language order, quality,
/// revision, then name as the final tie-break.
fn compare_variants(a: &GameEntry, b: &GameEntry, preference: &Preference) -> Ordering {
    let region_rank = |game: &GameEntry| {
        game.tags
            .region
            .as_deref()
            .and_then(|region| preference.regions.iter().position(|p| p == region))
            .unwrap_or(preference.regions.len())
    };
    let language_rank = |game: &GameEntry| {
        preference
            .languages
            .iter()
            .position(|p| game.tags.languages.iter().any(|lang| lang == p))
            .unwrap_or(preference.languages.len())
    };

    region_rank(a)
        .cmp(&region_rank(b))
        .then_with(|| language_rank(a).cmp(&language_rank(b)))
        .then_with(|| quality_rank(a, preference).cmp(&quality_rank(b, preference)))
        .then_with(|| match preference.revision {
            RevisionPreference::Newest => a.tags.revision.cmp(&b.tags.revision),
            RevisionPreference::Oldest => {
                a.tags.revision.oldest_first_key().cmp(&b.tags.revision.oldest_first_key())
            },
        })
        .then_with(|| {
            romsort_catalog::tags::normalize_title(&a.name)
                .cmp(&romsort_catalog::tags::normalize_title(&b.name))
        })
        .then_with(|| a.name.cmp(&b.name))
}

/// The quality step of the cascade, always applied: plain retail dumps
/// first, verified dumps next, everything else after, bad dumps last.
///
/// The two flags refine that default independently. `prefer_verified`
/// swaps the first two rungs so `[!]` dumps lead. `prefer_retail` adds an
/// official-release axis: unlicensed and pirate releases rank below every
/// licensed one before dump quality is consulted at all.
fn quality_rank(game: &GameEntry, preference: &Preference) -> (u8, u8) {
    let unofficial = u8::from(preference.prefer_retail && game.tags.unlicensed);
    let quality = match (game.tags.quality, preference.prefer_verified) {
        (QualityTier::Clean, false) | (QualityTier::Verified, true) => 0,
        (QualityTier::Clean, true) | (QualityTier::Verified, false) => 1,
        (QualityTier::Fixed, _) => 2,
        (QualityTier::Pending, _) => 3,
        (QualityTier::Modified, _) => 4,
        (QualityTier::Bad, _) => 5,
    };
    (unofficial, quality)
}
