//! Known OCR misreads and their corrections.
//!
//! Tesseract reliably confuses a handful of glyph pairs on the game's font
//! (`O`/`0`, `l`/`1`, full-width punctuation). Every field is run through
//! these tables before typed parsing.

use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use strsim::levenshtein;

use crate::record::{timestamp_text, ItemKind, Rarity};

/// Date, optional separator, time; `.` is accepted for either separator and
/// the space between date and time may be missing (`2024-06-0112:30`).
const TIMESTAMP_PATTERN: &str =
    r"(\d{4})[-.](\d{1,2})[-.](\d{1,2}) ?(\d{1,2})[:.](\d{2})(?:[:.](\d{2}))?";

const STAR_WORD_PATTERN: &str = r"(?i)([345])\s*(?:★|☆|星|stars?)";

/// Characters trimmed from both ends of item and pool names
const EDGE_NOISE: &[char] = &['|', '_', '.', ',', '\'', '"', '`', '‘', '’', '“', '”'];

fn timestamp_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TIMESTAMP_PATTERN).ok()).as_ref()
}

fn star_word_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(STAR_WORD_PATTERN).ok()).as_ref()
}

/// Maps full-width ASCII forms (U+FF01..U+FF5E) and the ideographic space
/// to their ASCII counterparts.
pub fn normalize_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Digit a letter is commonly misread from, if any.
fn misread_digit(c: char) -> Option<char> {
    Some(match c {
        'O' | 'o' | 'D' | 'Q' => '0',
        'I' | 'l' | '|' | 'i' | '!' => '1',
        'Z' | 'z' => '2',
        'S' | 's' => '5',
        'B' => '8',
        'G' | 'b' => '6',
        'g' | 'q' => '9',
        'T' => '7',
        _ => return None,
    })
}

/// Applies the timestamp correction table, leaving a string shaped like
/// `YYYY-MM-DD HH:MM[:SS]` when the reading was close enough.
pub fn correct_timestamp_text(raw: &str) -> String {
    let mapped: String = normalize_width(raw)
        .chars()
        .map(|c| match c {
            '/' | '年' | '月' | '_' | '—' | '–' | '−' => '-',
            '日' => ' ',
            ';' => ':',
            c if c.is_whitespace() => ' ',
            c => misread_digit(c).unwrap_or(c),
        })
        .collect();

    // Drop spaces around separators, then collapse the rest
    let collapsed = mapped.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = collapsed.chars().collect();
    let mut compact = String::with_capacity(collapsed.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let at_separator = [prev, next]
                .iter()
                .any(|n| matches!(n, Some('-') | Some(':') | Some('.')));
            if at_separator {
                continue;
            }
        }
        compact.push(c);
    }
    compact
}

/// Parses an OCR'd timestamp after correction.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let corrected = correct_timestamp_text(raw);
    let caps = timestamp_regex()?.captures(&corrected)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let year = num(1)? as i32;
    let (month, day, hour, minute) = (num(2)?, num(3)?, num(4)?, num(5)?);
    let second = num(6).unwrap_or(0);

    // Range check, then round-trip through the canonical text formats
    let timestamp = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    timestamp_text::parse(&timestamp_text::format(&timestamp))
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3000}'..='\u{303F}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{FF00}'..='\u{FFEF}'
        | '·'
    )
}

/// Cleans an item or pool name: full-width to ASCII, no spaces next to CJK
/// characters (Tesseract separates every ideograph), collapsed whitespace,
/// no stray punctuation at the edges.
pub fn clean_name(raw: &str) -> String {
    let normalized = normalize_width(raw);
    let words: Vec<&str> = normalized.split_whitespace().collect();

    let mut name = String::new();
    for word in words {
        let joins_cjk = name.chars().last().is_some_and(is_cjk)
            || word.chars().next().is_some_and(is_cjk);
        if !name.is_empty() && !joins_cjk {
            name.push(' ');
        }
        name.push_str(word);
    }

    name.trim_matches(|c: char| EDGE_NOISE.contains(&c) || c.is_whitespace())
        .to_string()
}

/// Item kind from the kind column. Exact labels after cleanup, then a Latin
/// label regardless of case or one edit away (`Weap0n`, `0perative`).
pub fn item_kind(raw: &str) -> Option<ItemKind> {
    let label = clean_name(raw);
    if let Some(kind) = ItemKind::from_label(&label) {
        return Some(kind);
    }

    let lower = label.to_lowercase();
    let mut candidates = ItemKind::ALL.into_iter().filter(|kind| {
        kind.screen_labels()
            .iter()
            .filter(|known| known.is_ascii())
            .any(|known| levenshtein(&known.to_lowercase(), &lower) <= 1)
    });
    match (candidates.next(), candidates.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// Explicit rarity written in the text: a run of 3-5 star glyphs, or a
/// digit followed by a star word ("5★", "4星", "3 stars").
pub fn rarity_from_text(text: &str) -> Option<Rarity> {
    let glyphs = text
        .chars()
        .filter(|c| matches!(c, '★' | '☆' | '*'))
        .count();
    if (3..=5).contains(&glyphs) {
        return Rarity::from_stars(glyphs as u8);
    }

    let caps = star_word_regex()?.captures(text)?;
    let stars = caps.get(1)?.as_str().parse::<u8>().ok()?;
    Rarity::from_stars(stars)
}

/// Page number from the page indicator text.
pub fn page_number(raw: &str) -> Option<u32> {
    let digits: String = normalize_width(raw)
        .chars()
        .map(|c| misread_digit(c).unwrap_or(c))
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Digits of a "UID: 12345678" label; the label itself is dropped before
/// misread correction so its letters are not turned into digits.
pub fn uid_digits(raw: &str) -> Option<String> {
    let normalized = normalize_width(raw);
    let value = match normalized.to_ascii_uppercase().rfind("UID") {
        Some(pos) => &normalized[pos + 3..],
        None => normalized.as_str(),
    };
    let digits: String = value
        .chars()
        .filter(|c| !matches!(c, ':' | '：' | ' '))
        .map(|c| misread_digit(c).unwrap_or(c))
        .filter(char::is_ascii_digit)
        .collect();
    (!digits.is_empty()).then_some(digits)
}
