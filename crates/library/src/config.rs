//! Run configuration.
//!
//! The front-end (CLI, test harness, whatever drives the library) builds a
//! [`Config`] and hands it to [`run`](crate::run::run). Validation happens
//! once, up front: a bad configuration is the only error that may abort a
//! run before scanning starts.

use crate::error::{ErrorKind, Result};
use regex::Regex;
use romsort_enrich::TitleLookupMode;
use serde::Serialize;
use std::path::PathBuf;

/// What the run should do with matched files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Copy,
    Move,
    Link,
    Extract,
    Zip,
    Playlist,
    Test,
    Dir2dat,
    Fixdat,
    Clean,
    Report,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    #[default]
    Hard,
    Symbolic,
    /// Copy-on-write clone where the filesystem supports it, silently a
    /// plain copy where it doesn't.
    Reflink,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionPreference {
    #[default]
    Newest,
    Oldest,
}

/// Which candidates are eligible at all.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Filters {
    /// Keep only games whose name matches.
    pub include_regex: Option<String>,
    /// Drop games whose name matches.
    pub exclude_regex: Option<String>,
    /// Keep only BIOS images.
    pub bios_only: bool,
    /// Keep only device entries.
    pub device_only: bool,
    pub allow_unlicensed: bool,
    pub allow_bad_dumps: bool,
}

impl Filters {
    pub fn permissive() -> Filters {
        Filters { allow_unlicensed: true, allow_bad_dumps: true, ..Filters::default() }
    }
}

/// Ordering preferences for 1G1R selection.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Preference {
    /// Region priority, best first (e.g. `["USA", "EUR", "JPN"]`).
    pub regions: Vec<String>,
    /// Language priority, best first (e.g. `["EN", "FR"]`).
    pub languages: Vec<String>,
    /// Rank unlicensed and pirate releases below every licensed one.
    /// The default quality order (retail, then verified, then the rest)
    /// applies regardless.
    pub prefer_retail: bool,
    /// Rank verified `[!]` dumps ahead of plain retail dumps.
    pub prefer_verified: bool,
    pub revision: RevisionPreference,
    /// One game, one ROM: keep a single release per title.
    pub single: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct Config {
    /// Input roots: files, directories, or glob patterns.
    pub inputs: Vec<PathBuf>,
    /// Catalog files or glob patterns.
    pub catalogs: Vec<PathBuf>,
    /// Output root template over the `{token}` grammar.
    pub output: String,
    pub commands: Vec<Command>,
    pub link_mode: LinkMode,
    pub filters: Filters,
    pub preference: Preference,

    /// Discovery concurrency; `None` means available parallelism.
    pub scan_threads: Option<usize>,
    /// Hash concurrency; `None` means available parallelism.
    pub hash_threads: Option<usize>,

    pub cache_db: Option<PathBuf>,
    /// Forbid all network access; enrichment lookups may only hit the cache.
    pub cache_only: bool,

    pub enable_hash_lookup: bool,
    pub title_client_id: Option<String>,
    pub title_token: Option<String>,
    #[serde(skip)]
    pub title_mode: TitleLookupMode,

    /// Patch files or glob patterns to pair with matched records.
    pub patches: Vec<PathBuf>,
    /// Globs under the output root that `clean` must never delete.
    pub clean_exclude: Vec<String>,
    /// Overwrite existing destination files instead of skipping them.
    pub overwrite: bool,
    /// Mirror the input directory structure below the output root.
    pub dir_mirror: bool,
    /// Insert an A-Z bucket directory segment.
    pub dir_letter: bool,

    /// 0..=3; progress rendering is the front-end's problem, this only
    /// tunes diagnostic verbosity.
    pub verbosity: u8,
    pub quiet: bool,
    /// Emit the plan JSON on stdout instead of (not in addition to)
    /// executing it.
    pub print_plan: bool,
    /// Write a diagnostics artifact next to the report.
    pub diag: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            inputs: Vec::new(),
            catalogs: Vec::new(),
            output: "output".to_string(),
            commands: Vec::new(),
            link_mode: LinkMode::default(),
            filters: Filters::permissive(),
            preference: Preference::default(),
            scan_threads: None,
            hash_threads: None,
            cache_db: None,
            cache_only: false,
            enable_hash_lookup: false,
            title_client_id: None,
            title_token: None,
            title_mode: TitleLookupMode::Off,
            patches: Vec::new(),
            clean_exclude: Vec::new(),
            overwrite: false,
            dir_mirror: false,
            dir_letter: false,
            verbosity: 0,
            quiet: false,
            print_plan: false,
            diag: false,
        }
    }
}

impl Config {
    /// Validate everything that can be validated before touching the
    /// filesystem. Called once by [`run`](crate::run::run).
    pub fn validate(&self) -> Result<()> {
        if self.commands.is_empty() {
            exn::bail!(ErrorKind::Config("at least one command is required".into()));
        }
        if self.inputs.is_empty() {
            exn::bail!(ErrorKind::Config("at least one input path is required".into()));
        }
        if self.output.trim().is_empty() {
            exn::bail!(ErrorKind::Config("output template must not be empty".into()));
        }
        if self.scan_threads == Some(0) || self.hash_threads == Some(0) {
            exn::bail!(ErrorKind::Config("thread counts must be at least 1".into()));
        }
        if self.verbosity > 3 {
            exn::bail!(ErrorKind::Config("verbosity ranges 0..=3".into()));
        }
        for (label, pattern) in [
            ("include", self.filters.include_regex.as_deref()),
            ("exclude", self.filters.exclude_regex.as_deref()),
        ] {
            if let Some(pattern) = pattern
                && Regex::new(pattern).is_err()
            {
                exn::bail!(ErrorKind::Config(format!("invalid {label} regex: {pattern}")));
            }
        }
        if self.filters.bios_only && self.filters.device_only {
            exn::bail!(ErrorKind::Config("bios-only and device-only are mutually exclusive".into()));
        }
        if self.title_mode != TitleLookupMode::Off
            && (self.title_client_id.is_none() || self.title_token.is_none())
        {
            exn::bail!(ErrorKind::Config(
                "title lookup requires both a client id and a token".into(),
            ));
        }
        Ok(())
    }

    /// Effective hash concurrency.
    pub fn hash_parallelism(&self) -> usize {
        self.hash_threads.unwrap_or_else(default_parallelism).max(1)
    }

    /// Effective discovery concurrency.
    pub fn scan_parallelism(&self) -> usize {
        self.scan_threads.unwrap_or_else(default_parallelism).max(1)
    }

    /// One underlying blocking pool serves both stages so neither starves
    /// the other. Front-ends size the runtime's blocking thread pool with
    /// this (e.g. `tokio::runtime::Builder::max_blocking_threads`).
    pub fn worker_pool_size(&self) -> usize {
        self.hash_parallelism().max(self.scan_parallelism())
    }

    /// Bounded capacity of the discovery→hash channel.
    pub fn channel_capacity(&self) -> usize {
        self.hash_parallelism() * 2
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map(usize::from).unwrap_or(1)
}
