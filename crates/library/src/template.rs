//! Output-path templating over the `{token}` grammar.
//!
//! Destination paths render from a user template like
//! `roms/{platform}/{region}` against a chosen candidate and its catalog
//! entry. Four token families are recognized:
//!
//! | family   | tokens                                                            |
//! |----------|-------------------------------------------------------------------|
//! | catalog  | `{datName}` `{datDescription}` `{region}` `{language}` `{genre}` `{category}` `{type}` |
//! | file     | `{inputDirname}` `{outputBasename}` `{outputName}` `{outputExt}`  |
//! | hardware | `{platform}` and the frontend tokens (`{es}`, `{batocera}`, …)    |
//! | literal  | everything else, including path separators                        |
//!
//! Multi-valued tokens (`{language}`) expand to a Cartesian product of
//! rendered paths. Unknown tokens render verbatim and are reported as
//! warnings, never errors. Templates compile eagerly so syntax problems
//! surface at configuration time, not per file.

use crate::error::{ErrorKind, Result};
use crate::file::RomFile;
use crate::platform;
use romsort_catalog::{GameEntry, RomEntry};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

const FALLBACK_REGION: &str = "unknown-region";
const FALLBACK_LANGUAGE: &str = "unknown-language";
const FALLBACK_GENRE: &str = "unknown-genre";
const FALLBACK_CATEGORY: &str = "unknown-category";
const FALLBACK_PLATFORM: &str = "unknown-platform";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Token(Token),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    DatName,
    DatDescription,
    Region,
    Language,
    Genre,
    Category,
    Type,
    InputDirname,
    OutputBasename,
    OutputName,
    OutputExt,
    Platform,
    /// Retained verbatim; reported as a warning at parse time.
    Unknown(String),
}

/// A compiled output-path template.
#[derive(Clone, Debug)]
pub struct PathTemplate {
    pieces: Vec<Piece>,
    /// Whether any token already produces the file name; when none does,
    /// the ROM name is appended as the final path component.
    names_file: bool,
}

/// Everything a render can draw tokens from.
pub struct RenderContext<'a> {
    pub game: &'a GameEntry,
    pub rom: &'a RomEntry,
    pub file: &'a RomFile,
    pub catalog_description: Option<&'a str>,
    /// Advisory genres from enrichment, when any were fetched.
    pub genres: &'a [String],
}

impl FromStr for PathTemplate {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<PathTemplate> {
        let (template, _) = PathTemplate::parse(s)?;
        Ok(template)
    }
}

impl PathTemplate {
    /// Compile a template, returning it along with any unknown tokens seen
    /// (the caller reports those as warnings).
    pub fn parse(input: &str) -> Result<(PathTemplate, Vec<String>)> {
        let mut pieces = Vec::new();
        let mut unknown = Vec::new();
        let mut literal = String::new();
        let mut chars = input.chars();

        while let Some(ch) = chars.next() {
            if ch != '{' {
                literal.push(ch);
                continue;
            }
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) if c.is_ascii_alphanumeric() => name.push(c),
                    // An unterminated or malformed token is a template
                    // syntax error, surfaced at configuration time.
                    _ => {
                        exn::bail!(ErrorKind::Config(format!(
                            "unterminated token in output template: {input}"
                        )))
                    },
                }
            }
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            let token = Token::lookup(&name);
            if let Token::Unknown(name) = &token {
                unknown.push(name.clone());
            }
            pieces.push(Piece::Token(token));
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        let names_file = pieces.iter().any(|piece| {
            matches!(piece, Piece::Token(Token::OutputBasename | Token::OutputName))
        });
        Ok((PathTemplate { pieces, names_file }, unknown))
    }

    /// The fixed directory prefix before the first token: the subtree every
    /// rendered path lives under, and therefore the root `clean` may sweep.
    /// Empty when the template opens with a token.
    pub fn literal_root(&self) -> PathBuf {
        let Some(Piece::Literal(first)) = self.pieces.first() else {
            return PathBuf::new();
        };
        if self.pieces.len() == 1 {
            // Pure-literal template: the whole thing is a directory.
            return PathBuf::from(first);
        }
        // Stop at the last separator; the tail belongs to a token's segment.
        match first.rfind('/') {
            Some(pos) => PathBuf::from(&first[..pos]),
            None => PathBuf::new(),
        }
    }

    /// Render every destination path for one candidate.
    ///
    /// Single-valued tokens produce exactly one path; each additional value
    /// of a multi-valued token multiplies the output (Cartesian product).
    /// Every rendered path is validated against directory traversal.
    pub fn render(&self, ctx: &RenderContext<'_>) -> Result<Vec<PathBuf>> {
        let mut rendered = vec![String::new()];

        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => {
                    for path in &mut rendered {
                        path.push_str(text);
                    }
                },
                Piece::Token(token) => {
                    let values = token.resolve(ctx);
                    rendered = rendered
                        .iter()
                        .flat_map(|prefix| {
                            values.iter().map(move |value| {
                                let mut next = prefix.clone();
                                next.push_str(value);
                                next
                            })
                        })
                        .collect();
                },
            }
        }

        let file_name = sanitize_segment(&output_file_name(ctx));
        rendered
            .into_iter()
            .map(|path| {
                let mut path = PathBuf::from(path);
                if !self.names_file {
                    path.push(&file_name);
                }
                validate(&path)?;
                Ok(path)
            })
            .collect()
    }
}

impl Token {
    fn lookup(name: &str) -> Token {
        match name {
            "datName" => Token::DatName,
            "datDescription" => Token::DatDescription,
            "region" => Token::Region,
            "language" => Token::Language,
            "genre" => Token::Genre,
            "category" => Token::Category,
            "type" => Token::Type,
            "inputDirname" => Token::InputDirname,
            "outputBasename" => Token::OutputBasename,
            "outputName" => Token::OutputName,
            "outputExt" => Token::OutputExt,
            "platform" => Token::Platform,
            name if platform::FRONTEND_TOKENS.contains(&name) => Token::Platform,
            other => Token::Unknown(other.to_string()),
        }
    }

    /// Token values, sanitized for use as path segments. Multi-valued
    /// tokens return one entry per value.
    fn resolve(&self, ctx: &RenderContext<'_>) -> Vec<String> {
        match self {
            Token::DatName => vec![sanitize_segment(&ctx.game.catalog)],
            Token::DatDescription => {
                let description = ctx.catalog_description.unwrap_or(&ctx.game.catalog);
                vec![sanitize_segment(description)]
            },
            Token::Region => {
                vec![sanitize_segment(
                    ctx.game.tags.region.as_deref().unwrap_or(FALLBACK_REGION),
                )]
            },
            Token::Language => {
                if ctx.game.tags.languages.is_empty() {
                    vec![FALLBACK_LANGUAGE.to_string()]
                } else {
                    ctx.game.tags.languages.iter().map(|lang| sanitize_segment(lang)).collect()
                }
            },
            Token::Genre => {
                let genre = ctx
                    .genres
                    .iter()
                    .map(|g| g.trim())
                    .find(|g| !g.is_empty())
                    .unwrap_or(FALLBACK_GENRE);
                vec![sanitize_segment(genre)]
            },
            Token::Category => {
                vec![sanitize_segment(ctx.game.category.as_deref().unwrap_or(FALLBACK_CATEGORY))]
            },
            Token::Type => vec![game_type(ctx.game).to_string()],
            Token::InputDirname => {
                vec![ctx.file.input_dirname().map(|d| sanitize_segment(&d)).unwrap_or_default()]
            },
            Token::OutputBasename => vec![sanitize_segment(&output_file_name(ctx))],
            Token::OutputName => {
                let name = output_file_name(ctx);
                let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(&name);
                vec![sanitize_segment(stem)]
            },
            Token::OutputExt => {
                let name = output_file_name(ctx);
                let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
                vec![sanitize_segment(ext)]
            },
            Token::Platform => {
                let slug = platform::resolve(&ctx.game.catalog, Path::new(&ctx.rom.name))
                    .unwrap_or(FALLBACK_PLATFORM);
                vec![slug.to_string()]
            },
            // Verbatim, braces included, so the user can see exactly what
            // did not resolve.
            Token::Unknown(name) => vec![format!("{{{name}}}")],
        }
    }
}

/// The file name written into the output tree: the catalog's ROM name.
fn output_file_name(ctx: &RenderContext<'_>) -> String {
    if ctx.rom.name.is_empty() { ctx.file.display_name() } else { ctx.rom.name.clone() }
}

fn game_type(game: &GameEntry) -> &'static str {
    use romsort_catalog::QualityTier;
    if game.tags.bios {
        "bios"
    } else if game.tags.device {
        "device"
    } else if game.tags.unlicensed {
        "unlicensed"
    } else {
        match game.tags.quality {
            QualityTier::Modified => "unofficial",
            QualityTier::Bad => "bad",
            _ => "retail",
        }
    }
}

/// Make a rendered value safe as (part of) one path segment.
fn sanitize_segment(input: &str) -> String {
    let mut cleaned = String::with_capacity(input.len());
    for ch in input.trim().chars() {
        match ch {
            '/' | '\\' | ':' => cleaned.push('_'),
            c if c.is_control() => {},
            c => cleaned.push(c),
        }
    }
    cleaned.trim().trim_matches('.').trim().to_string()
}

/// Refuse rendered paths that climb out of the output tree. Absolute roots
/// are fine; `..` anywhere is not.
fn validate(path: &Path) -> Result<()> {
    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            exn::bail!(ErrorKind::Template);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use romsort_catalog::tags::NameTags;
    use romsort_digest::DigestSet;

    fn game(name: &str, catalog: &str) -> GameEntry {
        GameEntry {
            catalog: catalog.to_string(),
            name: name.to_string(),
            description: None,
            category: Some("Games".to_string()),
            tags: NameTags::parse(name),
            roms: vec![rom(&format!("{name}.sfc"))],
        }
    }

    fn rom(name: &str) -> RomEntry {
        RomEntry { name: name.to_string(), size: Some(1024), ..RomEntry::default() }
    }

    fn file(path: &str) -> RomFile {
        RomFile {
            source: PathBuf::from(path),
            entry: None,
            size: 1024,
            digests: DigestSet::default(),
            header: None,
            modified: None,
        }
    }

    fn render_one(template: &str, game: &GameEntry, file: &RomFile) -> Vec<PathBuf> {
        let (template, _) = PathTemplate::parse(template).unwrap();
        let ctx = RenderContext {
            game,
            rom: &game.roms[0],
            file,
            catalog_description: None,
            genres: &[],
        };
        template.render(&ctx).unwrap()
    }

    #[test]
    fn literal_template_appends_rom_name() {
        let game = game("Game A (USA)", "Nintendo - Super Nintendo Entertainment System");
        let file = file("/in/snes/Game A (USA).sfc");
        let paths = render_one("out", &game, &file);
        assert_eq!(paths, vec![PathBuf::from("out/Game A (USA).sfc")]);
    }

    #[test]
    fn catalog_tokens_resolve() {
        let game = game("Game A (USA)", "Nintendo - Super Nintendo Entertainment System");
        let file = file("/in/snes/Game A (USA).sfc");
        let paths = render_one("{datName}/{region}", &game, &file);
        assert_eq!(
            paths,
            vec![PathBuf::from(
                "Nintendo - Super Nintendo Entertainment System/USA/Game A (USA).sfc"
            )]
        );
    }

    #[test]
    fn platform_and_frontend_tokens_share_the_routing_table() {
        let game = game("Game A (USA)", "Nintendo - Super Nintendo Entertainment System");
        let file = file("/in/Game A (USA).sfc");
        assert_eq!(render_one("{platform}", &game, &file)[0], PathBuf::from("snes/Game A (USA).sfc"));
        assert_eq!(render_one("{es}", &game, &file), render_one("{platform}", &game, &file));
    }

    #[test]
    fn multivalued_language_expands_cartesian() {
        let game = game("Game A (Europe) (En,Fr,De)", "Set");
        let file = file("/in/game.sfc");
        let paths = render_one("{language}", &game, &file);
        assert_eq!(paths.len(), 3);
        assert!(paths[0].starts_with("EN"));
        assert!(paths[1].starts_with("FR"));
        assert!(paths[2].starts_with("DE"));
    }

    #[test]
    fn unknown_tokens_render_verbatim_and_warn() {
        let (template, unknown) = PathTemplate::parse("{mystery}/x").unwrap();
        assert_eq!(unknown, vec!["mystery".to_string()]);
        let game = game("Game A (USA)", "Set");
        let file = file("/in/game.sfc");
        let ctx = RenderContext {
            game: &game,
            rom: &game.roms[0],
            file: &file,
            catalog_description: None,
            genres: &[],
        };
        let paths = template.render(&ctx).unwrap();
        assert!(paths[0].starts_with("{mystery}/x"));
    }

    #[test]
    fn output_name_tokens_suppress_appended_file_name() {
        let game = game("Game A (USA)", "Set");
        let file = file("/in/game.sfc");
        let paths = render_one("renamed/{outputName}.backup.{outputExt}", &game, &file);
        assert_eq!(paths, vec![PathBuf::from("renamed/Game A (USA).backup.sfc")]);
    }

    #[test]
    fn literal_root_stops_at_the_first_token() {
        let (template, _) = PathTemplate::parse("out/sorted/{platform}/{region}").unwrap();
        assert_eq!(template.literal_root(), PathBuf::from("out/sorted"));
        let (bare, _) = PathTemplate::parse("out").unwrap();
        assert_eq!(bare.literal_root(), PathBuf::from("out"));
        let (token_first, _) = PathTemplate::parse("{platform}/x").unwrap();
        assert_eq!(token_first.literal_root(), PathBuf::new());
    }

    #[test]
    fn traversal_is_rejected() {
        let game = game("Game A (USA)", "Set");
        let file = file("/in/game.sfc");
        let (template, _) = PathTemplate::parse("../escape").unwrap();
        let ctx = RenderContext {
            game: &game,
            rom: &game.roms[0],
            file: &file,
            catalog_description: None,
            genres: &[],
        };
        assert!(template.render(&ctx).is_err());
    }

    #[test]
    fn unterminated_token_is_a_config_error() {
        assert!(PathTemplate::parse("{unclosed").is_err());
        assert!(PathTemplate::parse("{bad token}").is_err());
    }

    #[test]
    fn type_token_classifies() {
        let retail = game("Game A (USA)", "Set");
        let f = file("/in/g.sfc");
        assert!(render_one("{type}", &retail, &f)[0].starts_with("retail"));
        let beta = game("Game A (Beta)", "Set");
        assert!(render_one("{type}", &beta, &f)[0].starts_with("unofficial"));
        let bios = game("[BIOS] Console (World)", "Set");
        assert!(render_one("{type}", &bios, &f)[0].starts_with("bios"));
    }

    #[test]
    fn genre_prefers_enrichment_values() {
        let game = game("Game A (USA)", "Set");
        let file = file("/in/g.sfc");
        let (template, _) = PathTemplate::parse("{genre}").unwrap();
        let genres = vec!["Platformer".to_string()];
        let ctx = RenderContext {
            game: &game,
            rom: &game.roms[0],
            file: &file,
            catalog_description: None,
            genres: &genres,
        };
        let paths = template.render(&ctx).unwrap();
        assert!(paths[0].starts_with("Platformer"));
    }
}
