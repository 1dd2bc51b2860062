//! The in-memory lookup index over every loaded catalog.

use crate::parse::Catalog;
use crate::tags::normalize_for_index;
use crate::{GameEntry, RomEntry};
use std::collections::HashMap;

/// Stable reference to one ROM member: indices into the game arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RomRef {
    pub game: usize,
    pub rom: usize,
}

/// Read-only lookup tables over a flat arena of [`GameEntry`]s.
///
/// Built once, then shared freely: all maps hold indices, never references,
/// so the whole index is `Send + Sync` and cloning a [`RomRef`] is two
/// words.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    games: Vec<GameEntry>,
    by_crc_size: HashMap<(String, u64), Vec<RomRef>>,
    by_md5: HashMap<String, Vec<RomRef>>,
    by_sha1: HashMap<String, Vec<RomRef>>,
    by_sha256: HashMap<String, Vec<RomRef>>,
    by_name_size: HashMap<(String, u64), Vec<RomRef>>,
}

impl CatalogIndex {
    /// Flatten parsed catalogs into one arena and build every lookup table.
    pub fn build(catalogs: Vec<Catalog>) -> CatalogIndex {
        let mut index = CatalogIndex::default();
        for catalog in catalogs {
            for game in catalog.games {
                index.insert(game);
            }
        }
        index
    }

    fn insert(&mut self, game: GameEntry) {
        let game_idx = self.games.len();
        for (rom_idx, rom) in game.roms.iter().enumerate() {
            let rom_ref = RomRef { game: game_idx, rom: rom_idx };
            if let (Some(crc), Some(size)) = (rom.crc32.as_deref(), rom.size) {
                self.by_crc_size
                    .entry((crc.to_ascii_lowercase(), size))
                    .or_default()
                    .push(rom_ref);
            }
            if let Some(md5) = rom.md5.as_deref() {
                self.by_md5.entry(md5.to_ascii_lowercase()).or_default().push(rom_ref);
            }
            if let Some(sha1) = rom.sha1.as_deref() {
                self.by_sha1.entry(sha1.to_ascii_lowercase()).or_default().push(rom_ref);
            }
            if let Some(sha256) = rom.sha256.as_deref() {
                self.by_sha256.entry(sha256.to_ascii_lowercase()).or_default().push(rom_ref);
            }
            if let Some(size) = rom.size {
                self.by_name_size
                    .entry((normalize_for_index(&rom.name), size))
                    .or_default()
                    .push(rom_ref);
            }
        }
        self.games.push(game);
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    pub fn games(&self) -> &[GameEntry] {
        &self.games
    }

    pub fn game(&self, index: usize) -> &GameEntry {
        &self.games[index]
    }

    pub fn rom(&self, rom_ref: RomRef) -> &RomEntry {
        &self.games[rom_ref.game].roms[rom_ref.rom]
    }

    pub fn lookup_sha256(&self, sha256: &str) -> &[RomRef] {
        self.by_sha256.get(sha256).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn lookup_sha1(&self, sha1: &str) -> &[RomRef] {
        self.by_sha1.get(sha1).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn lookup_md5(&self, md5: &str) -> &[RomRef] {
        self.by_md5.get(md5).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn lookup_crc_size(&self, crc32: &str, size: u64) -> &[RomRef] {
        self.by_crc_size
            .get(&(crc32.to_ascii_lowercase(), size))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Lookup by `(normalized file name, size)`; the weakest tier.
    pub fn lookup_name_size(&self, name: &str, size: u64) -> &[RomRef] {
        self.by_name_size
            .get(&(normalize_for_index(name), size))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::NameTags;

    fn game(catalog: &str, name: &str, roms: Vec<RomEntry>) -> GameEntry {
        GameEntry {
            catalog: catalog.to_string(),
            name: name.to_string(),
            description: None,
            category: None,
            tags: NameTags::parse(name),
            roms,
        }
    }

    fn rom(name: &str, size: u64, crc32: Option<&str>, sha1: Option<&str>) -> RomEntry {
        RomEntry {
            name: name.to_string(),
            size: Some(size),
            crc32: crc32.map(str::to_string),
            md5: None,
            sha1: sha1.map(str::to_string),
            sha256: None,
        }
    }

    fn sample_index() -> CatalogIndex {
        let catalog = Catalog {
            name: "Example".to_string(),
            description: None,
            games: vec![
                game(
                    "Example",
                    "Game A (USA)",
                    vec![rom(
                        "Game A (USA).nes",
                        40976,
                        Some("1b2c3d4e"),
                        Some("a9993e364706816aba3e25717850c26c9cd0d89d"),
                    )],
                ),
                game(
                    "Example",
                    "Game B (Europe)",
                    vec![rom("Game B (Europe).md", 524288, Some("deadbeef"), None)],
                ),
                // Shared ROM: same digest published by a second game.
                game(
                    "Example",
                    "Game A - Bundle (USA)",
                    vec![rom(
                        "Game A (USA).nes",
                        40976,
                        Some("1b2c3d4e"),
                        Some("a9993e364706816aba3e25717850c26c9cd0d89d"),
                    )],
                ),
            ],
        };
        CatalogIndex::build(vec![catalog])
    }

    #[test]
    fn sha1_lookup_returns_every_sharer() {
        let index = sample_index();
        let refs = index.lookup_sha1("a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(refs.len(), 2);
        let names: Vec<_> = refs.iter().map(|r| index.game(r.game).name.as_str()).collect();
        assert!(names.contains(&"Game A (USA)"));
        assert!(names.contains(&"Game A - Bundle (USA)"));
    }

    #[test]
    fn crc_lookup_requires_matching_size() {
        let index = sample_index();
        assert_eq!(index.lookup_crc_size("deadbeef", 524288).len(), 1);
        assert!(index.lookup_crc_size("deadbeef", 1).is_empty());
        // Case-insensitive on the digest.
        assert_eq!(index.lookup_crc_size("DEADBEEF", 524288).len(), 1);
    }

    #[test]
    fn name_size_lookup_normalizes() {
        let index = sample_index();
        // Different tags and casing, same normalized title and size.
        assert_eq!(index.lookup_name_size("game a (Europe).nes", 40976).len(), 2);
        assert!(index.lookup_name_size("game a.nes", 1).is_empty());
    }

    #[test]
    fn unknown_digest_is_empty_not_error() {
        let index = sample_index();
        assert!(index.lookup_sha1("0000000000000000000000000000000000000000").is_empty());
        assert!(index.lookup_md5("d41d8cd98f00b204e9800998ecf8427e").is_empty());
    }
}
