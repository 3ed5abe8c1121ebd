//! Block splitting
//!
//! Splits a raw paste into blocks that each describe at most one node.
//! One paste may mix single-line records, blank-line separated key/value
//! groups and dashed separators; comment lines are dropped and banner noise
//! is kept only as the header of the multi-line block it precedes.
//!
//! A free-text line (a channel name like "Fresh Nodes Channel") is held
//! until the next meaningful line: a field line makes it header noise,
//! anything else turns it into an `Unknown` block.

use once_cell::sync::Lazy;
use regex::Regex;

use super::normalizer::strip_inline_comment;

static IPV4_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(?:\.\d{1,3}){3}\b").expect("valid regex"));

static IPV4_ANYWHERE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("valid regex"));

static KEY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z _\-]{0,24}?)\s*:\s*(.*)$").expect("valid regex"));

static SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\-=_*~—–\s]{3,}$").expect("valid regex"));

/// Field names recognized on the left of `Key: value` lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Ip,
    Login,
    Password,
    State,
    City,
    Zip,
    Country,
    Provider,
    Credentials,
    Location,
    Comment,
}

impl FieldKey {
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "ip" | "ipaddress" | "host" | "server" | "address" => Some(FieldKey::Ip),
            "login" | "user" | "username" => Some(FieldKey::Login),
            "pass" | "password" | "pwd" => Some(FieldKey::Password),
            "state" | "region" => Some(FieldKey::State),
            "city" => Some(FieldKey::City),
            "zip" | "zipcode" | "postal" | "postalcode" => Some(FieldKey::Zip),
            "country" => Some(FieldKey::Country),
            "provider" | "isp" => Some(FieldKey::Provider),
            "credentials" | "creds" => Some(FieldKey::Credentials),
            "location" | "geo" => Some(FieldKey::Location),
            "comment" | "note" => Some(FieldKey::Comment),
            _ => None,
        }
    }
}

/// A `Key: value` line inside a multi-line block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLine {
    pub key: FieldKey,
    pub value: String,
    pub raw: String,
}

/// A candidate chunk of import text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// One line that starts with an IPv4 address
    SingleLine(String),
    /// Consecutive `Key: value` lines, optionally preceded by banner lines
    MultiLine {
        header: Vec<String>,
        fields: Vec<FieldLine>,
        /// Unrecognized lines interleaved with the fields
        extra: Vec<String>,
    },
    /// A line that is neither record, field, comment nor banner
    Unknown(String),
}

impl Block {
    /// Text of the block as it appeared (comments stripped)
    pub fn raw_text(&self) -> String {
        match self {
            Block::SingleLine(line) | Block::Unknown(line) => line.clone(),
            Block::MultiLine { header, fields, .. } => header
                .iter()
                .cloned()
                .chain(fields.iter().map(|f| f.raw.clone()))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineKind {
    Blank,
    Comment,
    Separator,
    Record,
    Field(FieldKey, String),
    Noise,
    Other,
}

fn classify(line: &str) -> LineKind {
    if line.is_empty() {
        return LineKind::Blank;
    }
    if line.starts_with('#') || line.starts_with("//") {
        return LineKind::Comment;
    }
    if SEPARATOR.is_match(line) {
        return LineKind::Separator;
    }
    if IPV4_PREFIX.is_match(line) {
        return LineKind::Record;
    }
    if let Some(caps) = KEY_VALUE.captures(line) {
        return match FieldKey::from_label(&caps[1]) {
            Some(key) => LineKind::Field(key, caps[2].trim().to_string()),
            None if IPV4_ANYWHERE.is_match(line) => LineKind::Other,
            None => LineKind::Noise,
        };
    }
    if is_banner(line) {
        return LineKind::Noise;
    }
    LineKind::Other
}

/// Channel names, bot handles, emoji banners
fn is_banner(line: &str) -> bool {
    if IPV4_ANYWHERE.is_match(line) {
        return false;
    }
    if line.starts_with('@') || line.contains("t.me/") || line.contains("http") {
        return true;
    }
    if !line.is_ascii() {
        return true;
    }
    let has_letters = line.chars().any(|c| c.is_ascii_alphabetic());
    let shouting = line
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .all(|c| c.is_ascii_uppercase());
    has_letters && shouting
}

/// Accumulates the multi-line block being built
#[derive(Default)]
struct Pending {
    header: Vec<String>,
    fields: Vec<FieldLine>,
    extra: Vec<String>,
    /// Banner lines seen since the last field; header of the next block
    noise: Vec<String>,
    /// Free-text lines waiting to learn whether a record follows them
    held: Vec<String>,
}

impl Pending {
    fn flush_into(&mut self, blocks: &mut Vec<Block>) {
        if !self.fields.is_empty() {
            blocks.push(Block::MultiLine {
                header: std::mem::take(&mut self.header),
                fields: std::mem::take(&mut self.fields),
                extra: std::mem::take(&mut self.extra),
            });
        }
        self.header.clear();
        self.extra.clear();
    }

    /// Held free text did not lead into a record
    fn release_held(&mut self, blocks: &mut Vec<Block>) {
        blocks.extend(self.held.drain(..).map(Block::Unknown));
    }

    fn push_field(&mut self, blocks: &mut Vec<Block>, field: FieldLine) {
        // Held lines are already in `noise`, in paste order
        self.held.clear();
        let repeats = self.fields.iter().any(|f| f.key == field.key);
        if repeats && field.key == FieldKey::Ip {
            // Next record started without a blank line in between
            self.flush_into(blocks);
        }
        if self.fields.is_empty() {
            self.header = std::mem::take(&mut self.noise);
        } else {
            // Banner lines between fields of one record are decoration
            self.extra.append(&mut self.noise);
        }
        self.fields.push(field);
    }
}

/// Split raw import text into blocks
pub fn split_blocks(raw_text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut pending = Pending::default();

    for raw_line in raw_text.lines() {
        let line = strip_inline_comment(raw_line.trim()).trim();

        match classify(line) {
            LineKind::Comment => continue,
            LineKind::Blank | LineKind::Separator => {
                pending.flush_into(&mut blocks);
                pending.release_held(&mut blocks);
                pending.noise.clear();
            }
            LineKind::Field(key, value) => {
                pending.push_field(
                    &mut blocks,
                    FieldLine {
                        key,
                        value,
                        raw: line.to_string(),
                    },
                );
            }
            LineKind::Noise => pending.noise.push(line.to_string()),
            LineKind::Record => {
                pending.flush_into(&mut blocks);
                pending.release_held(&mut blocks);
                pending.noise.clear();
                blocks.push(Block::SingleLine(line.to_string()));
            }
            LineKind::Other if IPV4_ANYWHERE.is_match(line) => {
                pending.flush_into(&mut blocks);
                pending.release_held(&mut blocks);
                pending.noise.clear();
                blocks.push(Block::Unknown(line.to_string()));
            }
            LineKind::Other => {
                pending.flush_into(&mut blocks);
                // A second free-text line means the first led nowhere
                pending.release_held(&mut blocks);
                pending.held.push(line.to_string());
                pending.noise.push(line.to_string());
            }
        }
    }
    pending.flush_into(&mut blocks);
    pending.release_held(&mut blocks);

    tracing::debug!(blocks = blocks.len(), "Split import text into blocks");
    blocks
}
