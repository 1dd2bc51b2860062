//! The release-name tag grammar.
//!
//! Release names carry convention-encoded metadata in parenthesized and
//! bracketed segments: `Game C (USA) (En,Fr) (Rev 2) [!]`. This module
//! extracts those segments and normalizes them into comparable values.
//!
//! The grammar is folklore, not a standard; the token tables below cover
//! the conventions the major catalog groups actually use.

use serde::Serialize;

/// Which bracket pair delimited a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagDelimiter {
    Parenthesis,
    Bracket,
}

/// One extracted tag segment, delimiter retained because the two families
/// carry different conventions (parens: release info, brackets: dump info).
#[derive(Clone, Debug)]
pub struct TagSegment {
    pub value: String,
    pub delimiter: TagDelimiter,
}

/// Dump quality parsed from a release name's bracket tags. The derived
/// ordering ranks cleaner dumps first; how the selector weighs the tiers
/// against each other is its own concern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum QualityTier {
    /// `[!]` — verified good dump.
    Verified,
    /// `[f]` — fixed dump.
    Fixed,
    /// `[!p]` — pending verification.
    Pending,
    /// No dump-quality marker at all.
    #[default]
    Clean,
    /// Beta, proto, demo, sample, trial, hacks, translations.
    Modified,
    /// `[b]` — bad dump.
    Bad,
}

/// Parsed revision, comparable so "newest" is simply the minimum.
///
/// `priority` ranks the revision grammar (program revision before dotted
/// version before `Rev N` before `Rev A`); `score` inverts the numeric value
/// so that a plain tuple comparison puts the newest revision first.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Revision {
    priority: u8,
    score: u32,
    pub label: Option<String>,
}

impl Default for Revision {
    fn default() -> Self {
        Self { priority: u8::MAX, score: u32::MAX, label: None }
    }
}

impl Revision {
    /// Comparison key for "prefer oldest" runs. An untagged release is the
    /// original pressing, so it sorts before any tagged revision; tagged
    /// revisions then sort by ascending value.
    pub fn oldest_first_key(&self) -> (u8, u32) {
        if self.priority == u8::MAX {
            (0, 0)
        } else {
            (1, u32::MAX - self.score)
        }
    }
}

/// Everything the selector needs from a release name, parsed once.
#[derive(Clone, Debug, Default)]
pub struct NameTags {
    pub region: Option<String>,
    pub languages: Vec<String>,
    pub quality: QualityTier,
    pub revision: Revision,
    pub set_number: Option<u32>,
    pub bios: bool,
    pub device: bool,
    pub unlicensed: bool,
}

impl NameTags {
    /// Parse every tag family out of a release name.
    pub fn parse(name: &str) -> NameTags {
        let segments = extract_tags(name);
        NameTags {
            region: detect_region(&segments),
            languages: detect_languages(&segments),
            quality: detect_quality(&segments),
            revision: detect_revision(&segments),
            set_number: detect_set_number(&segments),
            bios: name.to_ascii_uppercase().contains("[BIOS]")
                || segments.iter().any(|t| t.value.eq_ignore_ascii_case("BIOS")),
            device: segments.iter().any(|t| t.value.eq_ignore_ascii_case("DEVICE")),
            unlicensed: segments.iter().any(|t| {
                let v = t.value.to_ascii_uppercase();
                v == "UNL" || v == "UNLICENSED" || v == "PIRATE"
            }),
        }
    }
}

/// Pull out every top-level parenthesized/bracketed segment. Nested pairs
/// collapse into their outermost segment; unbalanced closers reset state.
pub fn extract_tags(name: &str) -> Vec<TagSegment> {
    let mut tags = Vec::new();
    let mut current = String::new();
    let mut stack: Vec<TagDelimiter> = Vec::new();

    for ch in name.chars() {
        match ch {
            '(' => {
                if stack.is_empty() {
                    current.clear();
                }
                stack.push(TagDelimiter::Parenthesis);
            },
            '[' => {
                if stack.is_empty() {
                    current.clear();
                }
                stack.push(TagDelimiter::Bracket);
            },
            ')' => {
                if let Some(TagDelimiter::Parenthesis) = stack.pop() {
                    if stack.is_empty() && !current.trim().is_empty() {
                        tags.push(TagSegment {
                            value: current.trim().to_string(),
                            delimiter: TagDelimiter::Parenthesis,
                        });
                        current.clear();
                    }
                } else {
                    stack.clear();
                    current.clear();
                }
            },
            ']' => {
                if let Some(TagDelimiter::Bracket) = stack.pop() {
                    if stack.is_empty() && !current.trim().is_empty() {
                        tags.push(TagSegment {
                            value: current.trim().to_string(),
                            delimiter: TagDelimiter::Bracket,
                        });
                        current.clear();
                    }
                } else {
                    stack.clear();
                    current.clear();
                }
            },
            _ => {
                if !stack.is_empty() {
                    current.push(ch);
                }
            },
        }
    }

    tags
}

/// The bare title: tag segments removed, whitespace collapsed.
pub fn normalize_title(name: &str) -> String {
    let mut clean = String::new();
    let mut depth = 0usize;

    for ch in name.chars() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ => {
                if depth == 0 {
                    clean.push(ch);
                }
            },
        }
    }

    clean.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// The matcher's name key: lowercase bare title, extension stripped.
pub fn normalize_for_index(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        // Only treat short alphanumeric suffixes as extensions; a dot inside
        // a title ("Dr. Mario") is not one.
        Some((stem, ext)) if ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            stem
        },
        _ => name,
    };
    normalize_title(stem).to_lowercase()
}

fn tag_tokens(tag: &str) -> Vec<String> {
    tag.split(|c: char| !c.is_ascii_alphabetic())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_uppercase())
        .collect()
}

fn detect_region(tags: &[TagSegment]) -> Option<String> {
    for tag in tags {
        for token in tag_tokens(&tag.value) {
            if let Some(region) = normalize_region_token(&token) {
                return Some(region.to_string());
            }
        }
    }
    None
}

fn detect_languages(tags: &[TagSegment]) -> Vec<String> {
    let mut langs = Vec::new();
    for tag in tags {
        for token in tag_tokens(&tag.value) {
            if let Some(lang) = normalize_language_token(&token) {
                let lang = lang.to_string();
                if !langs.contains(&lang) {
                    langs.push(lang);
                }
            }
        }
    }
    langs
}

fn normalize_region_token(token: &str) -> Option<&'static str> {
    match token {
        "EUROPE" | "EURO" | "EUR" | "EU" => Some("EUR"),
        "FRANCE" | "GERMANY" | "SPAIN" | "ITALY" | "NETHERLANDS" | "BELGIUM" | "PORTUGAL"
        | "SWEDEN" | "NORWAY" | "FINLAND" | "DENMARK" | "POLAND" | "CZECH" | "HUNGARY" | "UK"
        | "ENGLAND" | "SCOTLAND" | "IRELAND" | "WALES" => Some("EUR"),
        "USA" | "US" | "AMERICA" | "STATES" | "CANADA" | "MEXICO" => Some("USA"),
        "JAPAN" | "JPN" | "JP" => Some("JPN"),
        "ASIA" | "KOREA" | "CHINA" | "TAIWAN" | "HONGKONG" => Some("ASI"),
        "AUSTRALIA" | "BRAZIL" => Some("OCE"),
        "WORLD" | "GLOBAL" | "INTERNATIONAL" => Some("WORLD"),
        _ => None,
    }
}

fn normalize_language_token(token: &str) -> Option<&'static str> {
    match token {
        "EN" | "ENG" | "ENGLISH" | "BRITISH" | "AMERICAN" => Some("EN"),
        "FR" | "FRE" | "FRENCH" | "FRA" => Some("FR"),
        "DE" | "GER" | "GERMAN" => Some("DE"),
        "ES" | "SPA" | "SPANISH" | "ESP" => Some("ES"),
        "IT" | "ITA" | "ITALIAN" => Some("IT"),
        "PT" | "POR" | "PORTUGUESE" | "BRA" => Some("PT"),
        "DA" | "DAN" | "DANISH" => Some("DA"),
        "FI" | "FIN" | "FINNISH" => Some("FI"),
        "EL" | "ELL" | "GRE" | "GREEK" => Some("EL"),
        "JA" | "JPN" | "JAP" | "JAPANESE" => Some("JA"),
        "KO" | "KOR" | "KOREAN" => Some("KO"),
        "NL" | "DUT" | "DUTCH" | "HOLLAND" => Some("NL"),
        "NO" | "NOR" | "NORWEGIAN" => Some("NO"),
        "RU" | "RUS" | "RUSSIAN" => Some("RU"),
        "SV" | "SWE" | "SWEDISH" => Some("SV"),
        "ZH" | "CHN" | "CHINESE" | "MANDARIN" => Some("ZH"),
        _ => None,
    }
}

fn detect_quality(tags: &[TagSegment]) -> QualityTier {
    let mut fixed = false;
    let mut pending = false;
    let mut modified = false;
    let mut bad = false;

    for tag in tags {
        let normalized = tag.value.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            continue;
        }

        if tag.delimiter == TagDelimiter::Bracket {
            if normalized == "!" {
                return QualityTier::Verified;
            }
            if normalized == "!P" {
                pending = true;
                continue;
            }
            match normalized.chars().next().unwrap_or_default() {
                'F' => fixed = true,
                'B' => bad = true,
                // Hacks, pirates, trainers, overdumps, alternates, bad
                // translations — all "modified" for selection purposes.
                'H' | 'P' | 'T' | 'O' | 'A' | 'U' => modified = true,
                _ => {},
            }
        } else if ["BETA", "PROTO", "ALPHA", "SAMPLE", "DEMO", "TRIAL"]
            .iter()
            .any(|marker| normalized.contains(marker))
        {
            modified = true;
        }
    }

    if bad {
        QualityTier::Bad
    } else if fixed {
        QualityTier::Fixed
    } else if pending {
        QualityTier::Pending
    } else if modified {
        QualityTier::Modified
    } else {
        QualityTier::Clean
    }
}

fn detect_revision(tags: &[TagSegment]) -> Revision {
    let mut best = Revision::default();

    for tag in tags {
        let normalized = tag.value.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            continue;
        }

        let candidate = if let Some(value) = parse_program_revision(&normalized) {
            Some((0u8, u32::MAX - value))
        } else if let Some((major, minor, patch)) = parse_version_components(&normalized) {
            Some((1, u32::MAX - ((major << 20) | (minor << 10) | patch)))
        } else if let Some(value) = parse_rev_number(&normalized) {
            Some((2, u32::MAX - value))
        } else {
            parse_rev_letter(&normalized).map(|value| (3, u32::MAX - value))
        };

        if let Some((priority, score)) = candidate
            && (priority, score) < (best.priority, best.score)
        {
            best = Revision { priority, score, label: Some(tag.value.trim().to_string()) };
        }
    }

    best
}

fn detect_set_number(tags: &[TagSegment]) -> Option<u32> {
    for tag in tags {
        let upper = tag.value.to_ascii_uppercase();
        if let Some(pos) = upper.find("SET") {
            let digits: String = upper[pos + 3..]
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(number) = digits.parse() {
                return Some(number);
            }
        }
    }
    None
}

fn parse_program_revision(input: &str) -> Option<u32> {
    let rest = input.strip_prefix("PRG")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() { None } else { digits.parse().ok() }
}

fn parse_version_components(input: &str) -> Option<(u32, u32, u32)> {
    if !(input.starts_with('V') || input.starts_with("VERSION")) {
        return None;
    }
    let idx = input.find(|c: char| c.is_ascii_digit())?;
    let mut parts = input[idx..].split(['.', '_', '-']);
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some((major, minor, patch))
}

fn parse_rev_number(input: &str) -> Option<u32> {
    let rest = input.strip_prefix("REV")?;
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() { None } else { digits.parse().ok() }
}

fn parse_rev_letter(input: &str) -> Option<u32> {
    let rest = input.strip_prefix("REV")?;
    let letter = rest
        .trim_start_matches(['.', ' '])
        .chars()
        .find(|c| c.is_ascii_alphabetic())?
        .to_ascii_uppercase();
    Some((letter as u8 - b'A' + 1) as u32)
}
