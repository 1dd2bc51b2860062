//! The collection management engine: scan → match → select → plan →
//! execute.
//!
//! Given input paths and catalog (DAT) files, this crate scans and hashes
//! the inputs (header-aware, cache-backed), matches records against the
//! catalog index, applies filters and 1G1R preference ordering, renders
//! output paths from the `{token}` template grammar, and emits a
//! deterministic execution plan of write actions — which it can then
//! execute, streaming progress events.
//!
//! The command-line front-end, progress rendering, and logging transport
//! live elsewhere; this crate exposes [`Config`] in, [`RunOutcome`] out,
//! and event streams in between.

pub mod config;
pub mod error;
mod execute;
mod file;
mod matching;
pub mod patch;
mod plan;
pub mod platform;
mod report;
mod run;
pub mod scan;
mod select;
pub mod template;

pub use crate::config::{Command, Config, Filters, LinkMode, Preference, RevisionPreference};
pub use crate::execute::{ExecuteContext, ExecuteEvent, execute};
pub use crate::file::{RomFile, SkipReason, Skipped};
pub use crate::matching::{MatchOutcome, MatchTier, match_file};
pub use crate::plan::{
    Action, ActionSource, BuildInput, CatalogKind, Diagnostic, Plan, ZipMemberSpec, build_plan,
};
pub use crate::report::{RunReport, build_report};
pub use crate::run::{RunOutcome, run, run_with_cancel};
pub use crate::scan::{ScanEvent, scan};
pub use crate::select::{Selected, Selection, select};
pub use crate::template::PathTemplate;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A single cancellation signal shared by the scanner and the executor.
///
/// Cancellation is cooperative and one-way: once flipped it stays set, new
/// work stops being admitted, and in-flight hashes finish so the cache
/// never sees a partial row.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
