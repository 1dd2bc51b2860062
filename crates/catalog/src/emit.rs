//! Catalog emission: `dir2dat` and `fixdat` documents.
//!
//! The default output dialect is Logiqx XML — the same dialect
//! [`parse_catalog`](crate::parse_catalog) consumes, so an emitted catalog
//! round-trips through our own loader. JSON is available for toolchains
//! that would rather not touch XML; the two are not interchangeable and the
//! choice is recorded per action.

use crate::GameEntry;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::Serialize;
use std::io::Write;

/// Output dialect for emitted catalogs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogFormat {
    #[default]
    Xml,
    Json,
}

/// Write `games` as a catalog document named `name`.
pub fn write_catalog<W: Write>(
    out: W,
    name: &str,
    description: Option<&str>,
    games: &[GameEntry],
    format: CatalogFormat,
) -> Result<()> {
    match format {
        CatalogFormat::Xml => write_xml(out, name, description, games),
        CatalogFormat::Json => write_json(out, name, description, games),
    }
}

fn write_xml<W: Write>(
    out: W,
    name: &str,
    description: Option<&str>,
    games: &[GameEntry],
) -> Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .or_raise(|| ErrorKind::Emit)?;
    writer
        .write_event(Event::Start(BytesStart::new("datafile")))
        .or_raise(|| ErrorKind::Emit)?;

    writer
        .write_event(Event::Start(BytesStart::new("header")))
        .or_raise(|| ErrorKind::Emit)?;
    write_simple(&mut writer, "name", name)?;
    if let Some(description) = description {
        write_simple(&mut writer, "description", description)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("header")))
        .or_raise(|| ErrorKind::Emit)?;

    for game in games {
        let mut start = BytesStart::new("game");
        start.push_attribute(("name", game.name.as_str()));
        writer.write_event(Event::Start(start)).or_raise(|| ErrorKind::Emit)?;

        if let Some(category) = game.category.as_deref() {
            write_simple(&mut writer, "category", category)?;
        }
        if let Some(description) = game.description.as_deref() {
            write_simple(&mut writer, "description", description)?;
        }
        for rom in &game.roms {
            let size_text = rom.size.map(|size| size.to_string());
            let mut element = BytesStart::new("rom");
            element.push_attribute(("name", rom.name.as_str()));
            if let Some(size) = size_text.as_deref() {
                element.push_attribute(("size", size));
            }
            if let Some(crc) = rom.crc32.as_deref() {
                element.push_attribute(("crc", crc));
            }
            if let Some(md5) = rom.md5.as_deref() {
                element.push_attribute(("md5", md5));
            }
            if let Some(sha1) = rom.sha1.as_deref() {
                element.push_attribute(("sha1", sha1));
            }
            if let Some(sha256) = rom.sha256.as_deref() {
                element.push_attribute(("sha256", sha256));
            }
            writer.write_event(Event::Empty(element)).or_raise(|| ErrorKind::Emit)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("game")))
            .or_raise(|| ErrorKind::Emit)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("datafile")))
        .or_raise(|| ErrorKind::Emit)?;
    Ok(())
}

fn write_simple<W: Write>(writer: &mut Writer<W>, element: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(element)))
        .or_raise(|| ErrorKind::Emit)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .or_raise(|| ErrorKind::Emit)?;
    writer
        .write_event(Event::End(BytesEnd::new(element)))
        .or_raise(|| ErrorKind::Emit)?;
    Ok(())
}

#[derive(Serialize)]
struct JsonCatalog<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    games: &'a [GameEntry],
}

fn write_json<W: Write>(
    out: W,
    name: &str,
    description: Option<&str>,
    games: &[GameEntry],
) -> Result<()> {
    serde_json::to_writer_pretty(out, &JsonCatalog { name, description, games })
        .or_raise(|| ErrorKind::Emit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::NameTags;
    use crate::{GameEntry, RomEntry};

    fn sample_games() -> Vec<GameEntry> {
        vec![GameEntry {
            catalog: "Example".to_string(),
            name: "Game A (USA)".to_string(),
            description: Some("Game A (USA)".to_string()),
            category: Some("Games".to_string()),
            tags: NameTags::parse("Game A (USA)"),
            roms: vec![RomEntry {
                name: "Game A (USA).nes".to_string(),
                size: Some(40976),
                crc32: Some("1b2c3d4e".to_string()),
                md5: None,
                sha1: Some("a9993e364706816aba3e25717850c26c9cd0d89d".to_string()),
                sha256: None,
            }],
        }]
    }

    #[test]
    fn xml_roundtrips_through_our_own_parser() {
        let mut bytes = Vec::new();
        write_catalog(&mut bytes, "Fix Set", None, &sample_games(), CatalogFormat::Xml).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fix.dat");
        std::fs::write(&path, &bytes).unwrap();

        let parsed = crate::parse_catalog(&path).unwrap();
        assert_eq!(parsed.name, "Fix Set");
        assert_eq!(parsed.games.len(), 1);
        assert_eq!(parsed.games[0].name, "Game A (USA)");
        assert_eq!(parsed.games[0].roms[0].crc32.as_deref(), Some("1b2c3d4e"));
        assert_eq!(parsed.games[0].roms[0].size, Some(40976));
    }

    #[test]
    fn xml_escapes_special_characters() {
        let mut games = sample_games();
        games[0].name = "Game <A> & Friends".to_string();
        games[0].roms[0].name = "Game <A> & Friends.nes".to_string();
        let mut bytes = Vec::new();
        write_catalog(&mut bytes, "Set", None, &games, CatalogFormat::Xml).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Game &lt;A&gt; &amp; Friends"));
    }

    #[test]
    fn json_output_contains_digests() {
        let mut bytes = Vec::new();
        write_catalog(&mut bytes, "Set", Some("desc"), &sample_games(), CatalogFormat::Json)
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["name"], "Set");
        assert_eq!(value["games"][0]["roms"][0]["crc32"], "1b2c3d4e");
    }

    #[test]
    fn identical_input_emits_identical_bytes() {
        let mut first = Vec::new();
        let mut second = Vec::new();
        write_catalog(&mut first, "Set", None, &sample_games(), CatalogFormat::Xml).unwrap();
        write_catalog(&mut second, "Set", None, &sample_games(), CatalogFormat::Xml).unwrap();
        assert_eq!(first, second);
    }
}
