//! Catalog (DAT) documents: parsing, indexing, and the release-name grammar.
//!
//! A catalog is an authoritative XML document listing canonical releases
//! with names, sizes, and checksums. This crate turns those documents into
//! an in-memory [`CatalogIndex`] the matcher can query by digest or by
//! `(normalized name, size)`, and parses the conventional tags embedded in
//! release names — `(USA)`, `(En,Fr)`, `[!]`, `(Rev 2)` — into structured
//! [`NameTags`] the candidate selector ranks on.
//!
//! # Ownership
//! Entries live in one flat arena (`Vec<GameEntry>`); every lookup table
//! stores plain indices into it. The index is immutable after
//! [`CatalogIndex::build`], which makes it trivially shareable read-only
//! across worker tasks.

pub mod emit;
pub mod error;
mod index;
mod parse;
pub mod tags;

pub use crate::emit::CatalogFormat;
pub use crate::index::{CatalogIndex, RomRef};
pub use crate::parse::{Catalog, parse_catalog};
pub use crate::tags::{NameTags, QualityTier, Revision};

use serde::Serialize;

/// One game (or machine) from a catalog, with its ROM members.
#[derive(Clone, Debug, Serialize)]
pub struct GameEntry {
    /// Name of the catalog this entry came from.
    pub catalog: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Structured form of the tags embedded in `name`.
    #[serde(skip)]
    pub tags: NameTags,
    pub roms: Vec<RomEntry>,
}

/// One ROM member of a [`GameEntry`]: a name, a size, and whatever digests
/// the catalog published.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RomEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc32: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl GameEntry {
    /// True when this entry is a BIOS image, from either the explicit
    /// catalog attribute or the conventional `[BIOS]` name marker.
    pub fn is_bios(&self) -> bool {
        self.tags.bios
    }

    pub fn is_device(&self) -> bool {
        self.tags.device
    }

    pub fn is_unlicensed(&self) -> bool {
        self.tags.unlicensed
    }
}
