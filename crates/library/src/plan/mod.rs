//! The execution plan: a flat list of write actions plus diagnostics.
//!
//! The plan is the boundary artifact between deciding and doing. It
//! serializes to stable JSON — two runs over identical inputs, catalogs,
//! and configuration emit byte-identical plans — which is what makes
//! `--print-plan` diffable and the whole pipeline testable without touching
//! the output tree.

mod builder;

pub use self::builder::{BuildInput, build_plan};

use crate::config::LinkMode;
use crate::error::{ErrorKind, Result};
use crate::file::RomFile;
use crate::patch::PatchKind;
use exn::ResultExt;
use romsort_catalog::CatalogFormat;
use serde::Serialize;
use std::path::PathBuf;

/// Where an action reads from: a file, or one entry inside an archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionSource {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<PathBuf>,
}

impl From<&RomFile> for ActionSource {
    fn from(file: &RomFile) -> Self {
        Self { path: file.source.clone(), entry: file.entry.clone() }
    }
}

/// One member of a [`Action::ZipInto`] target.
#[derive(Clone, Debug, Serialize)]
pub struct ZipMemberSpec {
    pub source: ActionSource,
    /// Name inside the produced archive.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Dir2dat,
    Fixdat,
}

/// A leaf of the plan. Serialized with a `kind` tag so the plan JSON is an
/// array of self-describing action objects.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Copy {
        source: ActionSource,
        destination: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        catalog_entry: Option<String>,
    },
    Move {
        source: ActionSource,
        destination: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        catalog_entry: Option<String>,
    },
    Link {
        source: ActionSource,
        destination: PathBuf,
        mode: LinkMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        catalog_entry: Option<String>,
    },
    /// Re-emit the bare payload: pull an entry out of an archive, or strip
    /// a detected header off a loose file.
    Extract {
        source: ActionSource,
        destination: PathBuf,
        /// Leading bytes to drop when the source carries a header.
        #[serde(skip_serializing_if = "Option::is_none")]
        header_skip: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        catalog_entry: Option<String>,
    },
    ZipInto {
        destination: PathBuf,
        members: Vec<ZipMemberSpec>,
        #[serde(skip_serializing_if = "Option::is_none")]
        catalog_entry: Option<String>,
    },
    Patch {
        source: ActionSource,
        patch: PathBuf,
        patch_kind: PatchKind,
        destination: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        catalog_entry: Option<String>,
    },
    /// Verify a produced path; never blocks or claims a destination.
    TestOnly { destination: PathBuf },
    EmitReport { destination: PathBuf },
    EmitCatalog {
        destination: PathBuf,
        catalog_kind: CatalogKind,
        format: CatalogFormat,
    },
    EmitPlaylist { destination: PathBuf, entries: Vec<PathBuf> },
    /// Delete a path below the output root that no other action claims.
    CleanDelete { path: PathBuf },
}

impl Action {
    /// The destination this action writes, when it writes one. `TestOnly`
    /// and `CleanDelete` claim nothing.
    pub fn destination(&self) -> Option<&PathBuf> {
        match self {
            Action::Copy { destination, .. }
            | Action::Move { destination, .. }
            | Action::Link { destination, .. }
            | Action::Extract { destination, .. }
            | Action::ZipInto { destination, .. }
            | Action::Patch { destination, .. }
            | Action::EmitReport { destination }
            | Action::EmitCatalog { destination, .. }
            | Action::EmitPlaylist { destination, .. } => Some(destination),
            Action::TestOnly { .. } | Action::CleanDelete { .. } => None,
        }
    }
}

/// Non-fatal findings recorded while planning.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Two actions resolved to the same destination; the later one was
    /// demoted to a no-op.
    Conflict { destination: PathBuf, demoted: ActionSource },
    /// A template token nobody recognizes; it rendered verbatim.
    UnknownToken { token: String },
    /// Carried over from enrichment (e.g. `CACHE-MISS (cache-only)`).
    Enrichment { message: String },
}

/// The complete plan for one run.
#[derive(Debug, Default, Serialize)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Plan {
    /// Stable pretty JSON; the `--print-plan` artifact.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).or_raise(|| ErrorKind::Plan)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_json_carries_the_kind_tag() {
        let action = Action::Copy {
            source: ActionSource { path: PathBuf::from("/in/a.bin"), entry: None },
            destination: PathBuf::from("out/a.bin"),
            digest: Some("ba7816bf".into()),
            catalog_entry: Some("Game A (USA)".into()),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["kind"], "copy");
        assert_eq!(value["source"]["path"], "/in/a.bin");
        assert_eq!(value["destination"], "out/a.bin");
        assert_eq!(value["catalog_entry"], "Game A (USA)");
        // Absent options are omitted entirely, keeping plans diff-stable.
        assert!(value["source"].get("entry").is_none());
    }

    #[test]
    fn plan_json_is_deterministic() {
        let plan = Plan {
            actions: vec![Action::TestOnly { destination: PathBuf::from("out/a.bin") }],
            diagnostics: vec![Diagnostic::UnknownToken { token: "mystery".into() }],
        };
        assert_eq!(plan.to_json().unwrap(), plan.to_json().unwrap());
    }

    #[test]
    fn destinations_are_reported_for_writes_only() {
        let copy = Action::Copy {
            source: ActionSource { path: PathBuf::from("a"), entry: None },
            destination: PathBuf::from("out/a"),
            digest: None,
            catalog_entry: None,
        };
        assert!(copy.destination().is_some());
        assert!(Action::TestOnly { destination: PathBuf::from("x") }.destination().is_none());
        assert!(Action::CleanDelete { path: PathBuf::from("x") }.destination().is_none());
    }
}
