//! Table-driven ROM header detection.
//!
//! Some cartridge dumps carry a leading copier or container header that is
//! not part of the game data. Catalogs checksum the bare payload, so a
//! headered dump only matches once the header is excluded from hashing.
//!
//! Which headers exist is pure data. The table ships as `headers.toml`
//! (embedded at build time) with a `version` field so new consoles are a
//! table edit, never a code change.

use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;

/// Largest prefix any rule needs to inspect. Callers hand [`HeaderTable::detect`]
/// at most this many leading bytes.
pub const PROBE_LEN: usize = 1024;

static BUILTIN: LazyLock<HeaderTable> = LazyLock::new(|| {
    HeaderTable::parse(include_str!("../headers.toml"))
        .expect("embedded headers.toml is well-formed")
});

#[derive(Debug, Deserialize)]
struct TableFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(rename = "header")]
    rules: Vec<RuleFile>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    id: String,
    magic: Option<String>,
    #[serde(default)]
    offset: usize,
    skip: u64,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(rename = "size-modulo")]
    size_modulo: Option<SizeModulo>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct SizeModulo {
    divisor: u64,
    remainder: u64,
}

/// One header descriptor: how to recognize it and how many bytes it covers.
#[derive(Debug, Clone)]
pub struct HeaderRule {
    pub id: String,
    magic: Option<Vec<u8>>,
    offset: usize,
    pub skip: u64,
    extensions: Vec<String>,
    size_modulo: Option<SizeModulo>,
}

/// A detected header on a concrete file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderHit {
    /// Rule id from the table (e.g. `"nes"`).
    pub rule: String,
    /// Leading bytes excluded from the hashable payload.
    pub skip: u64,
}

/// The set of known header descriptors, probed in table order.
#[derive(Debug)]
pub struct HeaderTable {
    rules: Vec<HeaderRule>,
}

impl HeaderTable {
    /// The table embedded with the crate.
    pub fn builtin() -> &'static HeaderTable {
        &BUILTIN
    }

    /// Parse a table from TOML text.
    pub fn parse(text: &str) -> crate::error::Result<HeaderTable> {
        use exn::{OptionExt, ResultExt};
        let file: TableFile = toml::from_str(text).or_raise(|| crate::error::ErrorKind::Table)?;
        let mut rules = Vec::with_capacity(file.rules.len());
        for rule in file.rules {
            let magic = match rule.magic {
                Some(hex) => Some(decode_hex(&hex).ok_or_raise(|| crate::error::ErrorKind::Table)?),
                None => None,
            };
            rules.push(HeaderRule {
                id: rule.id,
                magic,
                offset: rule.offset,
                skip: rule.skip,
                extensions: rule.extensions,
                size_modulo: rule.size_modulo,
            });
        }
        Ok(HeaderTable { rules })
    }

    /// Probe a file's leading bytes (up to [`PROBE_LEN`]) against every rule.
    ///
    /// Rules with magic bytes match on content alone. Rules without magic
    /// (size heuristics) additionally require the file extension to be one of
    /// the rule's hints, so a random 1536-byte text file is never "headered".
    /// A detected skip larger than the file itself is ignored.
    pub fn detect(&self, path: &Path, prefix: &[u8], file_size: u64) -> Option<HeaderHit> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        for rule in &self.rules {
            if rule.skip > file_size {
                continue;
            }
            if let Some(magic) = &rule.magic {
                let end = rule.offset + magic.len();
                if prefix.len() >= end && &prefix[rule.offset..end] == magic.as_slice() {
                    return Some(HeaderHit { rule: rule.id.clone(), skip: rule.skip });
                }
                continue;
            }
            if let Some(modulo) = rule.size_modulo
                && let Some(ext) = ext.as_deref()
                && rule.extensions.iter().any(|hint| hint == ext)
                && file_size % modulo.divisor == modulo.remainder
            {
                return Some(HeaderHit { rule: rule.id.clone(), skip: rule.skip });
            }
        }
        None
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;

    #[test]
    fn builtin_table_parses() {
        assert!(!HeaderTable::builtin().rules.is_empty());
    }

    #[rstest]
    #[case("game.nes", b"NES\x1a\x01\x01\x00\x00", 40976, Some(("nes", 16)))]
    #[case("game.lnx", b"LYNX\x00\x00\x00\x00", 131136, Some(("lynx", 64)))]
    #[case("game.bin", b"SEGA GENESIS", 524288, None)]
    fn detects_by_magic(
        #[case] name: &str,
        #[case] prefix: &[u8],
        #[case] size: u64,
        #[case] expected: Option<(&str, u64)>,
    ) {
        let hit = HeaderTable::builtin().detect(&PathBuf::from(name), prefix, size);
        match expected {
            Some((rule, skip)) => {
                let hit = hit.unwrap();
                assert_eq!(hit.rule, rule);
                assert_eq!(hit.skip, skip);
            },
            None => assert!(hit.is_none()),
        }
    }

    #[test]
    fn a7800_magic_sits_at_offset_one() {
        let mut prefix = vec![0x01u8];
        prefix.extend_from_slice(b"ATARI7800");
        let hit = HeaderTable::builtin()
            .detect(&PathBuf::from("game.a78"), &prefix, 48 * 1024 + 128)
            .unwrap();
        assert_eq!(hit.rule, "a7800");
        assert_eq!(hit.skip, 128);
    }

    #[test]
    fn snes_copier_needs_extension_and_size() {
        let table = HeaderTable::builtin();
        let prefix = [0u8; 64];
        // 512 bytes over a 1024-multiple, .smc extension: copier header.
        let hit = table.detect(&PathBuf::from("game.smc"), &prefix, 1024 * 512 + 512);
        assert_eq!(hit.unwrap().rule, "snes-copier");
        // Same size but an unrelated extension: no match.
        assert!(table.detect(&PathBuf::from("game.txt"), &prefix, 1024 * 512 + 512).is_none());
        // Right extension, aligned size: no match.
        assert!(table.detect(&PathBuf::from("game.smc"), &prefix, 1024 * 512).is_none());
    }

    #[test]
    fn skip_larger_than_file_is_ignored() {
        let hit = HeaderTable::builtin().detect(&PathBuf::from("tiny.nes"), b"NES\x1a", 8);
        assert!(hit.is_none());
    }

    #[test]
    fn rejects_odd_length_magic() {
        let toml = r#"
            version = 1
            [[header]]
            id = "bad"
            magic = "ABC"
            skip = 16
        "#;
        assert!(HeaderTable::parse(toml).is_err());
    }
}
