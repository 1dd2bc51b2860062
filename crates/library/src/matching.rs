//! Joining scanned records against the catalog index.

use crate::file::RomFile;
use romsort_catalog::{CatalogIndex, RomRef};
use serde::Serialize;

/// Which lookup tier produced a match, strongest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Sha256,
    Sha1,
    Md5,
    CrcSize,
    NameSize,
}

/// The result of matching one record: every catalog ROM reachable from the
/// first tier that hit (shared ROMs make this a set, not a single entry).
#[derive(Clone, Debug)]
pub struct MatchOutcome {
    pub file: RomFile,
    pub tier: Option<MatchTier>,
    pub matches: Vec<RomRef>,
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Match one record against the index.
///
/// Tier order is fixed: SHA-256, SHA-1, MD5, CRC32+size, then normalized
/// name+size. The first tier with any hit wins and all of its hits are
/// retained; weaker tiers are not consulted after a hit, so a name
/// collision can never contradict a digest match.
pub fn match_file(index: &CatalogIndex, file: RomFile) -> MatchOutcome {
    let tiers: [(MatchTier, &[RomRef]); 4] = [
        (
            MatchTier::Sha256,
            file.digests.sha256.as_deref().map(|d| index.lookup_sha256(d)).unwrap_or_default(),
        ),
        (
            MatchTier::Sha1,
            file.digests.sha1.as_deref().map(|d| index.lookup_sha1(d)).unwrap_or_default(),
        ),
        (
            MatchTier::Md5,
            file.digests.md5.as_deref().map(|d| index.lookup_md5(d)).unwrap_or_default(),
        ),
        (
            MatchTier::CrcSize,
            file.digests
                .crc32
                .as_deref()
                .map(|d| index.lookup_crc_size(d, file.size))
                .unwrap_or_default(),
        ),
    ];

    for (tier, refs) in tiers {
        if !refs.is_empty() {
            let matches = refs.to_vec();
            return MatchOutcome { file, tier: Some(tier), matches };
        }
    }

    let name = file.display_name();
    let matches: Vec<RomRef> = index
        .lookup_name_size(&name, file.size)
        .iter()
        .copied()
        // A name+size hit whose published digests contradict the computed
        // ones is a coincidence, not a match.
        .filter(|&rom_ref| digests_agree(index, rom_ref, &file))
        .collect();
    if !matches.is_empty() {
        return MatchOutcome { file, tier: Some(MatchTier::NameSize), matches };
    }

    MatchOutcome { file, tier: None, matches: Vec::new() }
}

/// Every digest published by the catalog entry that the record also
/// computed must agree.
fn digests_agree(index: &CatalogIndex, rom_ref: RomRef, file: &RomFile) -> bool {
    let rom = index.rom(rom_ref);
    let pairs = [
        (rom.crc32.as_deref(), file.digests.crc32.as_deref()),
        (rom.md5.as_deref(), file.digests.md5.as_deref()),
        (rom.sha1.as_deref(), file.digests.sha1.as_deref()),
        (rom.sha256.as_deref(), file.digests.sha256.as_deref()),
    ];
    pairs.into_iter().all(|(published, computed)| match (published, computed) {
        (Some(published), Some(computed)) => published.eq_ignore_ascii_case(computed),
        _ => true,
    })
}
