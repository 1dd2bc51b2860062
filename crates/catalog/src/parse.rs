//! Logiqx-style catalog parsing.
//!
//! Accepts the dialect in the wild rather than the DTD: `game` and
//! `machine` elements are interchangeable, `rom` elements appear both
//! self-closed and with children, attribute names vary in case, and the
//! `header` block may be missing entirely (the file stem then names the
//! catalog).

use crate::error::{ErrorKind, Result};
use crate::tags::NameTags;
use crate::{GameEntry, RomEntry};
use exn::ResultExt;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::path::Path;
use tracing::instrument;

/// A parsed catalog document.
#[derive(Clone, Debug)]
pub struct Catalog {
    pub name: String,
    pub description: Option<String>,
    pub games: Vec<GameEntry>,
}

/// Which text element we are currently inside, if any.
#[derive(PartialEq)]
enum TextTarget {
    None,
    HeaderName,
    HeaderDescription,
    GameDescription,
    GameCategory,
}

/// Parse one catalog file.
///
/// I/O and parsing are synchronous; call from a blocking context.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn parse_catalog(path: &Path) -> Result<Catalog> {
    let mut reader = Reader::from_file(path).or_raise(|| ErrorKind::Io)?;
    reader.config_mut().trim_text(true);

    let fallback_name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "catalog".to_string());

    let mut header_name: Option<String> = None;
    let mut header_description: Option<String> = None;
    let mut games: Vec<GameEntry> = Vec::new();
    let mut current: Option<GameEntry> = None;
    let mut in_header = false;
    let mut text_target = TextTarget::None;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).or_raise(|| ErrorKind::Parse)? {
            Event::Start(ref e) => match e.name().as_ref() {
                b"header" => in_header = true,
                b"name" if in_header => text_target = TextTarget::HeaderName,
                b"description" if in_header => text_target = TextTarget::HeaderDescription,
                b"game" | b"machine" => {
                    let name = attr_value(e, b"name").unwrap_or_default();
                    current = Some(GameEntry {
                        catalog: String::new(), // patched once the header is known
                        tags: NameTags::parse(&name),
                        name,
                        description: None,
                        category: None,
                        roms: Vec::new(),
                    });
                },
                b"description" if current.is_some() => {
                    text_target = TextTarget::GameDescription;
                },
                b"category" if current.is_some() => text_target = TextTarget::GameCategory,
                b"rom" => {
                    if let Some(game) = current.as_mut() {
                        game.roms.push(parse_rom(e));
                    }
                },
                _ => {},
            },
            Event::Empty(ref e) => {
                if e.name().as_ref() == b"rom"
                    && let Some(game) = current.as_mut()
                {
                    game.roms.push(parse_rom(e));
                }
            },
            Event::Text(e) => {
                let text = e.unescape().unwrap_or_default().into_owned();
                match text_target {
                    TextTarget::HeaderName => header_name = Some(text),
                    TextTarget::HeaderDescription => header_description = Some(text),
                    TextTarget::GameDescription => {
                        if let Some(game) = current.as_mut() {
                            game.description = Some(text);
                        }
                    },
                    TextTarget::GameCategory => {
                        if let Some(game) = current.as_mut() {
                            game.category = Some(text);
                        }
                    },
                    TextTarget::None => {},
                }
                text_target = TextTarget::None;
            },
            Event::End(ref e) => match e.name().as_ref() {
                b"header" => in_header = false,
                b"game" | b"machine" => {
                    if let Some(game) = current.take() {
                        games.push(game);
                    }
                },
                _ => {},
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }

    // A catalog that defines no games at all is useless enough to count as
    // malformed; better to warn per file than match against nothing.
    if games.is_empty() {
        exn::bail!(ErrorKind::Parse);
    }

    let name = header_name.unwrap_or(fallback_name);
    for game in &mut games {
        game.catalog = name.clone();
    }

    Ok(Catalog { name, description: header_description, games })
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref().eq_ignore_ascii_case(key))
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

fn parse_rom(e: &BytesStart<'_>) -> RomEntry {
    let mut rom = RomEntry::default();
    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        match attr.key.as_ref().to_ascii_lowercase().as_slice() {
            b"name" => rom.name = value,
            b"size" => rom.size = value.parse().ok(),
            b"crc" | b"crc32" => rom.crc32 = Some(value.to_ascii_lowercase()),
            b"md5" => rom.md5 = Some(value.to_ascii_lowercase()),
            b"sha1" => rom.sha1 = Some(value.to_ascii_lowercase()),
            b"sha256" => rom.sha256 = Some(value.to_ascii_lowercase()),
            _ => {},
        }
    }
    rom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_catalog_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<datafile>
  <header>
    <name>Example Console</name>
    <description>Example Console (Parent-Clone)</description>
  </header>
  <game name="Game A (USA)">
    <category>Games</category>
    <description>Game A (USA)</description>
    <rom name="Game A (USA).nes" size="40976" crc="1B2C3D4E"
         md5="900150983CD24FB0D6963F7D28E17F72"
         sha1="A9993E364706816ABA3E25717850C26C9CD0D89D"/>
  </game>
  <game name="Game B (Europe) (Rev 1)">
    <rom name="Game B (Europe) (Rev 1).md" size="524288" crc="deadbeef"/>
  </game>
</datafile>
"#;

    #[test]
    fn parses_header_and_games() {
        let file = write_catalog_file(SAMPLE);
        let catalog = parse_catalog(file.path()).unwrap();
        assert_eq!(catalog.name, "Example Console");
        assert_eq!(catalog.description.as_deref(), Some("Example Console (Parent-Clone)"));
        assert_eq!(catalog.games.len(), 2);

        let game_a = &catalog.games[0];
        assert_eq!(game_a.name, "Game A (USA)");
        assert_eq!(game_a.catalog, "Example Console");
        assert_eq!(game_a.category.as_deref(), Some("Games"));
        assert_eq!(game_a.tags.region.as_deref(), Some("USA"));
        assert_eq!(game_a.roms.len(), 1);

        let rom = &game_a.roms[0];
        assert_eq!(rom.size, Some(40976));
        // Digest casing is normalized on the way in.
        assert_eq!(rom.crc32.as_deref(), Some("1b2c3d4e"));
        assert_eq!(rom.sha1.as_deref(), Some("a9993e364706816aba3e25717850c26c9cd0d89d"));
    }

    #[test]
    fn machine_elements_and_non_self_closed_roms() {
        let file = write_catalog_file(
            r#"<datafile>
  <machine name="Arcade Game (World)">
    <rom name="ag.bin" size="128" crc="0A0B0C0D"></rom>
  </machine>
</datafile>"#,
        );
        let catalog = parse_catalog(file.path()).unwrap();
        assert_eq!(catalog.games.len(), 1);
        assert_eq!(catalog.games[0].roms.len(), 1);
        assert_eq!(catalog.games[0].roms[0].crc32.as_deref(), Some("0a0b0c0d"));
    }

    #[test]
    fn missing_header_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("My Console Set.dat");
        std::fs::write(
            &path,
            r#"<datafile><game name="G"><rom name="g.bin" size="1"/></game></datafile>"#,
        )
        .unwrap();
        let catalog = parse_catalog(&path).unwrap();
        assert_eq!(catalog.name, "My Console Set");
    }

    #[test]
    fn empty_catalog_is_an_error() {
        let file = write_catalog_file("<datafile><header><name>X</name></header></datafile>");
        assert!(parse_catalog(file.path()).is_err());
    }

    #[test]
    fn garbage_is_an_error() {
        let file = write_catalog_file("not xml { at all");
        assert!(parse_catalog(file.path()).is_err());
    }
}
