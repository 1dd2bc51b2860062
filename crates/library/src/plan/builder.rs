//! Turning selected candidates plus command verbs into a concrete plan.
//!
//! Determinism is the load-bearing property here. Candidates arrive in
//! canonical order (the selector sorts by catalog, game, ROM, source), the
//! verbs run in a fixed order, and collision resolution is first-writer-wins
//! over that order — so the emitted plan is byte-stable for a given input
//! set, catalog set, and configuration.

use crate::config::{Command, Config};
use crate::error::{ErrorKind, Result};
use crate::patch::{PatchEntry, discover_patches};
use crate::plan::{Action, ActionSource, CatalogKind, Diagnostic, Plan, ZipMemberSpec};
use crate::select::{Selected, Selection};
use crate::template::{PathTemplate, RenderContext};
use exn::ResultExt;
use romsort_catalog::{CatalogFormat, CatalogIndex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::instrument;

const PLAYLIST_NAME: &str = "playlist.m3u";
const REPORT_NAME: &str = "report.json";
const DIR2DAT_NAME: &str = "dir2dat.dat";
const FIXDAT_NAME: &str = "fixdat.dat";

/// Everything the builder draws from.
pub struct BuildInput<'a> {
    pub config: &'a Config,
    pub index: &'a CatalogIndex,
    pub selection: &'a Selection,
    pub template: &'a PathTemplate,
    /// Catalog name → header description, for `{datDescription}`.
    pub catalog_descriptions: &'a HashMap<String, String>,
    /// Payload SHA-256 → advisory genres from enrichment.
    pub genres: &'a HashMap<String, Vec<String>>,
    /// Diagnostics accumulated before planning (unknown tokens,
    /// enrichment cache misses); carried into the plan verbatim.
    pub diagnostics: Vec<Diagnostic>,
}

/// One rendered pairing, ready to become actions.
struct Placement<'a> {
    candidate: &'a Selected,
    destination: PathBuf,
    game_name: String,
    zip_destination: PathBuf,
    member_name: String,
}

/// Build the full plan.
#[instrument(skip_all, fields(candidates = input.selection.chosen.len()))]
pub fn build_plan(mut input: BuildInput<'_>) -> Result<Plan> {
    let mut plan =
        Plan { actions: Vec::new(), diagnostics: std::mem::take(&mut input.diagnostics) };

    let placements = render_placements(&input)?;
    let patches = discover_patches(&input.config.patches);

    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut written: Vec<PathBuf> = Vec::new();

    for command in &input.config.commands {
        match command {
            Command::Copy | Command::Move | Command::Link | Command::Extract => {
                for placement in &placements {
                    emit_file_action(
                        *command,
                        input.config,
                        placement,
                        &mut plan,
                        &mut claimed,
                        &mut written,
                    );
                }
            },
            Command::Zip => {
                emit_zip_actions(&placements, &mut plan, &mut claimed, &mut written);
            },
            // Everything else appends after the write set, below.
            _ => {},
        }
    }

    emit_patch_actions(&placements, &patches, &mut plan, &mut claimed, &mut written);

    let root = input.template.literal_root();
    if input.config.commands.contains(&Command::Clean) {
        emit_clean_actions(input.config, &root, &claimed, &mut plan)?;
    }
    if input.config.commands.contains(&Command::Test) {
        for destination in &written {
            plan.actions.push(Action::TestOnly { destination: destination.clone() });
        }
    }
    if input.config.commands.contains(&Command::Playlist) {
        let destination = root.join(PLAYLIST_NAME);
        if claimed.insert(destination.clone()) {
            plan.actions.push(Action::EmitPlaylist { destination, entries: written.clone() });
        }
    }
    if input.config.commands.contains(&Command::Dir2dat) {
        let destination = root.join(DIR2DAT_NAME);
        if claimed.insert(destination.clone()) {
            plan.actions.push(Action::EmitCatalog {
                destination,
                catalog_kind: CatalogKind::Dir2dat,
                format: CatalogFormat::Xml,
            });
        }
    }
    if input.config.commands.contains(&Command::Fixdat) {
        let destination = root.join(FIXDAT_NAME);
        if claimed.insert(destination.clone()) {
            plan.actions.push(Action::EmitCatalog {
                destination,
                catalog_kind: CatalogKind::Fixdat,
                format: CatalogFormat::Xml,
            });
        }
    }
    if input.config.commands.contains(&Command::Report) {
        let destination = root.join(REPORT_NAME);
        if claimed.insert(destination.clone()) {
            plan.actions.push(Action::EmitReport { destination });
        }
    }

    Ok(plan)
}

/// Render every chosen candidate through the template. Multi-valued tokens
/// expand here; one placement per rendered destination.
fn render_placements<'a>(input: &BuildInput<'a>) -> Result<Vec<Placement<'a>>> {
    let mut placements = Vec::new();
    for candidate in &input.selection.chosen {
        let game = input.index.game(candidate.rom_ref.game);
        let rom = input.index.rom(candidate.rom_ref);
        let ctx = RenderContext {
            game,
            rom,
            file: &candidate.file,
            catalog_description: input
                .catalog_descriptions
                .get(&game.catalog)
                .map(String::as_str),
            genres: candidate
                .file
                .digests
                .sha256
                .as_deref()
                .and_then(|sha| input.genres.get(sha))
                .map(Vec::as_slice)
                .unwrap_or_default(),
        };
        for destination in render_for(input.config, input.template, &ctx)? {
            let zip_destination = destination
                .parent()
                .unwrap_or(Path::new(""))
                .join(format!("{}.zip", game.name));
            placements.push(Placement {
                candidate,
                destination,
                game_name: game.name.clone(),
                zip_destination,
                member_name: rom.name.clone(),
            });
        }
    }
    // Canonical placement order regardless of how rendering interleaved.
    placements.sort_by(|a, b| {
        (&a.destination, &a.game_name, a.candidate.file.sort_key())
            .cmp(&(&b.destination, &b.game_name, b.candidate.file.sort_key()))
    });
    Ok(placements)
}

fn render_for(
    config: &Config,
    template: &PathTemplate,
    ctx: &RenderContext<'_>,
) -> Result<Vec<PathBuf>> {
    let mut destinations = template.render(ctx).or_raise(|| ErrorKind::Plan)?;
    if config.dir_mirror
        && let Some(parent) = ctx.file.input_dirname()
    {
        for destination in &mut destinations {
            insert_segment(destination, &parent);
        }
    }
    if config.dir_letter {
        for destination in &mut destinations {
            let letter = destination
                .file_name()
                .map(|name| letter_bucket(&name.to_string_lossy()))
                .unwrap_or_else(|| "#".to_string());
            insert_segment(destination, &letter);
        }
    }
    Ok(destinations)
}

/// Insert a directory segment just above the file name.
fn insert_segment(destination: &mut PathBuf, segment: &str) {
    let file_name = destination.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    destination.pop();
    destination.push(segment);
    destination.push(file_name);
}

/// A-Z bucket for `dir_letter`; digits and punctuation land in `#`.
fn letter_bucket(name: &str) -> String {
    match name.chars().find(|c| c.is_alphanumeric()) {
        Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase().to_string(),
        _ => "#".to_string(),
    }
}

fn emit_file_action(
    command: Command,
    config: &Config,
    placement: &Placement<'_>,
    plan: &mut Plan,
    claimed: &mut HashSet<PathBuf>,
    written: &mut Vec<PathBuf>,
) {
    let destination = placement.destination.clone();
    if !claimed.insert(destination.clone()) {
        plan.diagnostics.push(Diagnostic::Conflict {
            destination,
            demoted: ActionSource::from(&placement.candidate.file),
        });
        return;
    }

    let source = ActionSource::from(&placement.candidate.file);
    let digest = placement.candidate.file.digests.sha256.clone();
    let catalog_entry = Some(placement.game_name.clone());
    let action = match command {
        Command::Copy => {
            Action::Copy { source, destination: destination.clone(), digest, catalog_entry }
        },
        Command::Move => {
            Action::Move { source, destination: destination.clone(), digest, catalog_entry }
        },
        Command::Link => Action::Link {
            source,
            destination: destination.clone(),
            mode: config.link_mode,
            digest,
            catalog_entry,
        },
        Command::Extract => Action::Extract {
            source,
            destination: destination.clone(),
            header_skip: placement.candidate.file.header.as_ref().map(|h| h.skip),
            digest,
            catalog_entry,
        },
        _ => unreachable!("emit_file_action only handles file verbs"),
    };
    plan.actions.push(action);
    written.push(destination);
}

/// Fold every member sharing a `.zip` destination into one `ZipInto`.
fn emit_zip_actions(
    placements: &[Placement<'_>],
    plan: &mut Plan,
    claimed: &mut HashSet<PathBuf>,
    written: &mut Vec<PathBuf>,
) {
    let mut groups: BTreeMap<PathBuf, Vec<&Placement<'_>>> = BTreeMap::new();
    for placement in placements {
        groups.entry(placement.zip_destination.clone()).or_default().push(placement);
    }

    for (destination, members) in groups {
        if !claimed.insert(destination.clone()) {
            if let Some(first) = members.first() {
                plan.diagnostics.push(Diagnostic::Conflict {
                    destination,
                    demoted: ActionSource::from(&first.candidate.file),
                });
            }
            continue;
        }
        let catalog_entry = members.first().map(|m| m.game_name.clone());
        let mut specs: Vec<ZipMemberSpec> = members
            .iter()
            .map(|member| ZipMemberSpec {
                source: ActionSource::from(&member.candidate.file),
                name: member.member_name.clone(),
                digest: member.candidate.file.digests.sha256.clone(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs.dedup_by(|a, b| a.name == b.name && a.source == b.source);
        plan.actions.push(Action::ZipInto {
            destination: destination.clone(),
            members: specs,
            catalog_entry,
        });
        written.push(destination);
    }
}

/// Pair patches with placements by stem and emit patched variants.
fn emit_patch_actions(
    placements: &[Placement<'_>],
    patches: &[PatchEntry],
    plan: &mut Plan,
    claimed: &mut HashSet<PathBuf>,
    written: &mut Vec<PathBuf>,
) {
    if patches.is_empty() {
        return;
    }
    for placement in placements {
        let member_path = Path::new(&placement.member_name);
        let member_stem = member_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = member_path.extension().map(|e| e.to_string_lossy().into_owned());
        for patch in patches {
            if patch.stem() != member_stem {
                continue;
            }
            let mut file_name = format!("{member_stem} (patched)");
            if let Some(extension) = &extension {
                file_name.push('.');
                file_name.push_str(extension);
            }
            let destination =
                placement.destination.parent().unwrap_or(Path::new("")).join(file_name);
            if !claimed.insert(destination.clone()) {
                plan.diagnostics.push(Diagnostic::Conflict {
                    destination,
                    demoted: ActionSource::from(&placement.candidate.file),
                });
                continue;
            }
            plan.actions.push(Action::Patch {
                source: ActionSource::from(&placement.candidate.file),
                patch: patch.path.clone(),
                patch_kind: patch.kind,
                destination: destination.clone(),
                digest: placement.candidate.file.digests.sha256.clone(),
                catalog_entry: Some(placement.game_name.clone()),
            });
            written.push(destination);
        }
    }
}

/// Everything under the output root this run does not claim becomes a
/// `CleanDelete`, minus protected globs.
fn emit_clean_actions(
    config: &Config,
    root: &Path,
    claimed: &HashSet<PathBuf>,
    plan: &mut Plan,
) -> Result<()> {
    if root.as_os_str().is_empty() || !root.exists() {
        return Ok(());
    }
    let protected: Vec<glob::Pattern> = config
        .clean_exclude
        .iter()
        .filter_map(|pattern| glob::Pattern::new(pattern).ok())
        .collect();

    let mut doomed = Vec::new();
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.or_raise(|| ErrorKind::Io)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if claimed.contains(&path) {
            continue;
        }
        let text = path.to_string_lossy();
        if protected.iter().any(|pattern| pattern.matches(&text)) {
            continue;
        }
        doomed.push(path);
    }
    doomed.sort();
    plan.actions.extend(doomed.into_iter().map(|path| Action::CleanDelete { path }));
    Ok(())
}
