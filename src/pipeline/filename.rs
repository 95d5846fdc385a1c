//! File-name repair: undo mojibake and restore human formatting.
//!
//! File names cross two hostile boundaries before they reach us: ZIP archives
//! written by tools that store names in a DOS codepage, and messaging clients
//! that swap spaces for underscores. The typical damage is UTF-8 bytes shown
//! through CP437, which turns `Договор` into `╨ö╨╛╨│╨╛╨▓╨╛╤Ç`.
//!
//! ## Rule Order
//!
//! 1. Detect corruption signatures (box-drawing characters, `Γäû`)
//! 2. Re-decode through an ordered list of codepage hops
//! 3. Fall back to an ordered literal replacement table
//! 4. Cosmetic rules: underscores, dates, whitespace, trailing separators
//!
//! Every step is total: the worst outcome is the input, cosmetically tidied.

use encoding_rs::{Encoding, IBM866, UTF_8, WINDOWS_1251, WINDOWS_1252};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

/// Result of running [`normalize_filename`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedName {
    /// The repaired, display-ready file name including its extension.
    pub display: String,
    /// Which repair path produced `display`.
    pub repair: RepairOutcome,
}

impl NormalizedName {
    /// The display name without its extension.
    pub fn stem(&self) -> &str {
        split_extension(&self.display).0
    }

    /// The extension including the leading dot, or `""`.
    pub fn extension(&self) -> &str {
        split_extension(&self.display).1
    }
}

/// How the encoding of a name was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// No corruption signature present.
    Clean,
    /// A codepage re-decoding candidate succeeded.
    Recoded,
    /// The literal replacement table changed the name.
    Replaced,
    /// Corruption detected but nothing could be repaired.
    Failed,
}

/// Normalise a raw file name. Never fails.
///
/// `normalize_filename(&normalize_filename(x).display)` yields the same
/// display name as `normalize_filename(x)`.
pub fn normalize_filename(raw: &str) -> NormalizedName {
    let (repaired, repair) = repair_encoding(raw);
    let display_name = restore_formatting(&repaired);
    if display_name != raw {
        debug!("Normalised file name: {:?} → {:?}", raw, display_name);
    }
    NormalizedName {
        display: display_name,
        repair,
    }
}

/// Steps 1–3: detect mojibake, re-decode, or fall back to the table.
pub fn repair_encoding(name: &str) -> (String, RepairOutcome) {
    if !contains_mojibake(name) {
        return (apply_replacements(name), RepairOutcome::Clean);
    }

    if let Some(fixed) = try_recodings(name) {
        info!("Repaired file name by re-decoding: {} → {}", name, fixed);
        return (fixed, RepairOutcome::Recoded);
    }

    let replaced = apply_replacements(name);
    if replaced != name {
        info!("Repaired file name by replacement: {} → {}", name, replaced);
        (replaced, RepairOutcome::Replaced)
    } else {
        warn!("File name looks corrupted but could not be repaired: {}", name);
        (name.to_string(), RepairOutcome::Failed)
    }
}

// ── Step 1: Corruption signatures ────────────────────────────────────────────

const MOJIBAKE_CHARS: &[char] = &[
    '╨', '╤', '╠', '╡', '╛', '╜', '╝', '╞', '╟', '╢', '╣', '╚', '╔', '╦', '╩', '╬',
];

const MOJIBAKE_SEQUENCES: &[&str] = &["Γäû"];

/// Whether `text` carries any known encoding-mismatch signature.
pub fn contains_mojibake(text: &str) -> bool {
    text.contains(MOJIBAKE_CHARS) || MOJIBAKE_SEQUENCES.iter().any(|s| text.contains(s))
}

// ── Step 2: Codepage re-decoding ─────────────────────────────────────────────

/// Character sets a name may have been misread through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codepage {
    Cp437,
    Cp866,
    Windows1251,
    Windows1252,
    Latin1,
    Utf8,
}

impl Codepage {
    /// Encode `text` into this codepage. `None` if any char is unmappable.
    pub fn encode(self, text: &str) -> Option<Vec<u8>> {
        match self {
            Codepage::Cp437 => text.chars().map(cp437_byte).collect(),
            Codepage::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).ok())
                .collect(),
            Codepage::Utf8 => Some(text.as_bytes().to_vec()),
            Codepage::Cp866 | Codepage::Windows1251 | Codepage::Windows1252 => {
                let (bytes, _, had_unmappable) = self.encoding_rs()?.encode(text);
                (!had_unmappable).then(|| bytes.into_owned())
            }
        }
    }

    /// Decode `bytes` strictly. `None` on any malformed sequence.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Codepage::Cp437 => Some(bytes.iter().map(|&b| cp437_char(b)).collect()),
            Codepage::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
            _ => self
                .encoding_rs()?
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|s| s.into_owned()),
        }
    }

    fn encoding_rs(self) -> Option<&'static Encoding> {
        match self {
            Codepage::Cp866 => Some(IBM866),
            Codepage::Windows1251 => Some(WINDOWS_1251),
            Codepage::Windows1252 => Some(WINDOWS_1252),
            Codepage::Utf8 => Some(UTF_8),
            Codepage::Cp437 | Codepage::Latin1 => None,
        }
    }
}

/// One hop: encode through `.0`, decode the bytes as `.1`.
type Hop = (Codepage, Codepage);

/// Re-decoding candidates, tried in order; the first plausible result wins.
///
/// Single hops cover one wrong decode; double hops cover names that were
/// mangled twice on their way through an archive and a chat client.
const RECODINGS: &[&[Hop]] = &[
    &[(Codepage::Cp437, Codepage::Utf8)],
    &[(Codepage::Cp866, Codepage::Utf8)],
    &[(Codepage::Windows1252, Codepage::Utf8)],
    &[(Codepage::Latin1, Codepage::Utf8)],
    &[(Codepage::Windows1251, Codepage::Utf8)],
    &[(Codepage::Latin1, Codepage::Cp866)],
    &[(Codepage::Latin1, Codepage::Windows1251)],
    &[(Codepage::Cp437, Codepage::Cp866)],
    &[
        (Codepage::Cp437, Codepage::Utf8),
        (Codepage::Windows1252, Codepage::Utf8),
    ],
    &[
        (Codepage::Windows1252, Codepage::Utf8),
        (Codepage::Cp437, Codepage::Utf8),
    ],
];

fn try_recodings(name: &str) -> Option<String> {
    RECODINGS.iter().find_map(|hops| {
        let candidate = hops.iter().try_fold(name.to_string(), |text, (enc, dec)| {
            dec.decode(&enc.encode(&text)?)
        })?;
        is_plausible(&candidate).then_some(candidate)
    })
}

/// A recovered name must contain Cyrillic and nothing that still looks broken.
fn is_plausible(candidate: &str) -> bool {
    candidate.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c))
        && !candidate.contains('\u{FFFD}')
        && !candidate.chars().any(char::is_control)
        && !contains_mojibake(candidate)
}

/// Upper half (0x80–0xFF) of IBM code page 437.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{A0}',
];

fn cp437_char(b: u8) -> char {
    if b < 0x80 {
        char::from(b)
    } else {
        CP437_HIGH[usize::from(b - 0x80)]
    }
}

fn cp437_byte(c: char) -> Option<u8> {
    if c.is_ascii() {
        return Some(c as u8);
    }
    CP437_HIGH
        .iter()
        .position(|&h| h == c)
        .and_then(|i| u8::try_from(i + 0x80).ok())
}

// ── Step 3: Literal replacements ─────────────────────────────────────────────

/// Hand-curated entries that the per-letter table cannot express: decomposed
/// letters with a combining mark, and the numero sign.
const CURATED_REPLACEMENTS: &[(&str, &str)] = &[
    ("╨╕╠å", "й"),
    ("╨ÿ╠å", "Й"),
    ("╨╡╠ê", "ё"),
    ("╨ò╠ê", "Ё"),
    ("Γäû", "№"),
];

/// Curated entries first, then one entry per Cyrillic letter as it appears
/// when its UTF-8 bytes are read through CP437.
///
/// Order is load-bearing: an entry must never be a substring of a later one,
/// otherwise the shorter entry would eat part of the longer match first.
static REPLACEMENTS: Lazy<Vec<(String, String)>> = Lazy::new(|| {
    let curated = CURATED_REPLACEMENTS
        .iter()
        .map(|(from, to)| (from.to_string(), to.to_string()));

    let letters = ('А'..='я').chain(['Ё', 'ё']).map(|letter| {
        let mut buf = [0u8; 4];
        let bytes = letter.encode_utf8(&mut buf).as_bytes();
        let garbled: String = bytes.iter().map(|&b| cp437_char(b)).collect();
        (garbled, letter.to_string())
    });

    curated.chain(letters).collect()
});

fn apply_replacements(name: &str) -> String {
    REPLACEMENTS
        .iter()
        .fold(name.to_string(), |acc, (from, to)| {
            if acc.contains(from.as_str()) {
                acc.replace(from.as_str(), to)
            } else {
                acc
            }
        })
}

// ── Step 4: Cosmetic formatting ──────────────────────────────────────────────

static RE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s+(\d{1,2})\s+(\d{4})(\s+г\b)?").unwrap());

/// Restore spaces, dates and trailing separators on the stem; keep the extension.
fn restore_formatting(name: &str) -> String {
    let (stem, ext) = split_extension(name);

    let s = stem.replace('_', " ");
    let s = RE_DATE.replace_all(&s, |caps: &Captures<'_>| {
        let mut out = format!("{}.{}.{}", &caps[1], &caps[2], &caps[3]);
        if caps.get(4).is_some() {
            out.push_str(" г.");
        }
        out
    });
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let s = s.trim_end_matches([' ', '.', '_', '-']);
    // A stem made only of separators stays as it was.
    let s = if s.is_empty() { stem } else { s };

    format!("{s}{ext}")
}

/// Split at the last dot that is not part of a leading run of dots.
///
/// Returns `(stem, extension_with_dot)`; the extension is `""` when absent.
pub fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(i) => name.split_at(leading + i),
        None => (name, ""),
    }
}

/// `name` with `< > : " / \ | ? *` and control characters replaced by `_`,
/// or `document` if nothing printable is left. The result is a single path
/// component.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

// ── Validation ───────────────────────────────────────────────────────────────

const MAX_NAME_CHARS: usize = 200;
const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Reasons a normalised name is suspicious. An empty list means the name is fine.
///
/// None of these stop a file from being processed.
pub fn validate_name(name: &str) -> Vec<String> {
    let mut reasons = Vec::new();
    if name.chars().count() > MAX_NAME_CHARS {
        reasons.push(format!("name longer than {MAX_NAME_CHARS} characters"));
    }
    if split_extension(name).1.is_empty() {
        reasons.push("name has no extension".to_string());
    }
    for c in INVALID_NAME_CHARS.iter().filter(|c| name.contains(**c)) {
        reasons.push(format!("name contains invalid character '{c}'"));
    }
    reasons
}
