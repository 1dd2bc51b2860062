//! The hardware-profile routing table.
//!
//! Maps what we know about a record — its catalog's name, its file
//! extension — to a platform slug, which the `{platform}` template token
//! and every frontend token resolve through. Catalog names are the more
//! authoritative signal; extensions are the fallback.

use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

static EXTENSION_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("sfc", "snes"),
        ("smc", "snes"),
        ("fig", "snes"),
        ("nes", "nes"),
        ("nez", "nes"),
        ("fds", "fds"),
        ("gb", "gb"),
        ("sgb", "gb"),
        ("gbc", "gbc"),
        ("gba", "gba"),
        ("n64", "n64"),
        ("v64", "n64"),
        ("z64", "n64"),
        ("nds", "nds"),
        ("3ds", "3ds"),
        ("cia", "3ds"),
        ("md", "genesis"),
        ("gen", "genesis"),
        ("smd", "genesis"),
        ("32x", "sega32x"),
        ("sms", "sms"),
        ("gg", "gamegear"),
        ("sg", "sg1000"),
        ("pce", "pcengine"),
        ("sgx", "supergrafx"),
        ("a26", "atari2600"),
        ("a52", "atari5200"),
        ("a78", "atari7800"),
        ("lnx", "lynx"),
        ("lyx", "lynx"),
        ("j64", "jaguar"),
        ("vb", "virtualboy"),
        ("min", "pokemini"),
        ("int", "intellivision"),
        ("iso", "cdrom"),
        ("cue", "cdrom"),
        ("bin", "cdrom"),
        ("chd", "cdrom"),
        ("pbp", "psx"),
        ("psexe", "psx"),
    ])
});

static CATALOG_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    // First match wins; more specific names go first.
    [
        (r"(?i)Game ?Boy Advance|GBA", "gba"),
        (r"(?i)Game ?Boy Color|GBC", "gbc"),
        (r"(?i)Game ?Boy|GB\b", "gb"),
        (r"(?i)Super Nintendo|SNES|Super Famicom", "snes"),
        (r"(?i)Famicom Disk|Disk System|FDS", "fds"),
        (r"(?i)Nintendo 64|N64", "n64"),
        (r"(?i)Nintendo 3DS|3DS", "3ds"),
        (r"(?i)Nintendo DS|NDS", "nds"),
        (r"(?i)Nintendo Entertainment System|NES|Famicom", "nes"),
        (r"(?i)Virtual Boy", "virtualboy"),
        (r"(?i)Mega Drive|Genesis", "genesis"),
        (r"(?i)Master System", "sms"),
        (r"(?i)Game Gear", "gamegear"),
        (r"(?i)SG-?1000", "sg1000"),
        (r"(?i)32X", "sega32x"),
        (r"(?i)Sega CD|Mega CD", "segacd"),
        (r"(?i)Saturn", "saturn"),
        (r"(?i)Dreamcast", "dreamcast"),
        (r"(?i)PC Engine|TurboGrafx", "pcengine"),
        (r"(?i)PlayStation Portable|PSP", "psp"),
        (r"(?i)PlayStation 2|PS2", "ps2"),
        (r"(?i)PlayStation|PSX|PS1", "psx"),
        (r"(?i)Atari 2600", "atari2600"),
        (r"(?i)Atari 5200", "atari5200"),
        (r"(?i)Atari 7800", "atari7800"),
        (r"(?i)Lynx", "lynx"),
        (r"(?i)Jaguar", "jaguar"),
        (r"(?i)Neo ?Geo Pocket Color", "ngpc"),
        (r"(?i)Neo ?Geo Pocket", "ngp"),
        (r"(?i)WonderSwan Color", "wsc"),
        (r"(?i)WonderSwan", "ws"),
        (r"(?i)Intellivision", "intellivision"),
        (r"(?i)ColecoVision", "colecovision"),
        (r"(?i)Vectrex", "vectrex"),
        (r"(?i)Pokemon Mini|Pok\u{e9}mon Mini", "pokemini"),
    ]
    .into_iter()
    .map(|(pattern, slug)| (Regex::new(pattern).expect("platform pattern is valid"), slug))
    .collect()
});

/// The frontend directory-name tokens the template grammar recognizes.
/// Each resolves to the platform slug; the token only names which frontend
/// the tree is laid out for.
pub const FRONTEND_TOKENS: [&str; 12] = [
    "es", "batocera", "retrodeck", "onion", "mister", "pocket", "adam", "twmenu", "minui",
    "funkeyos", "jelos", "miyoocfw",
];

/// Platform slug from a catalog name, e.g.
/// `"Nintendo - Super Nintendo Entertainment System"` → `snes`.
pub fn from_catalog_name(name: &str) -> Option<&'static str> {
    CATALOG_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(name))
        .map(|(_, slug)| *slug)
}

/// Platform slug from a file extension.
pub fn from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    EXTENSION_MAP.get(ext.as_str()).copied()
}

/// Best available slug: catalog name first, extension second.
pub fn resolve(catalog_name: &str, rom_name: &Path) -> Option<&'static str> {
    from_catalog_name(catalog_name).or_else(|| from_extension(rom_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;

    #[rstest]
    #[case("Nintendo - Super Nintendo Entertainment System", Some("snes"))]
    #[case("Sega - Mega Drive - Genesis", Some("genesis"))]
    #[case("Sony - PlayStation", Some("psx"))]
    #[case("Nintendo - Game Boy Color", Some("gbc"))]
    #[case("Some Unknown Platform", None)]
    fn catalog_name_mapping(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(from_catalog_name(name), expected);
    }

    #[rstest]
    #[case("game.sfc", Some("snes"))]
    #[case("game.NES", Some("nes"))]
    #[case("game.gg", Some("gamegear"))]
    #[case("game.xyz", None)]
    #[case("noextension", None)]
    fn extension_mapping(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(from_extension(&PathBuf::from(name)), expected);
    }

    #[test]
    fn catalog_outranks_extension() {
        // A .bin under a Genesis catalog is a cartridge, not a disc.
        let slug = resolve("Sega - Mega Drive - Genesis", &PathBuf::from("game.bin"));
        assert_eq!(slug, Some("genesis"));
        let fallback = resolve("Mystery Set", &PathBuf::from("game.bin"));
        assert_eq!(fallback, Some("cdrom"));
    }
}
