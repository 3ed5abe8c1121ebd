//! Format recognition
//!
//! Classifies each block into one known record shape. Each shape carries
//! only the fields its layout guarantees; normalization into a
//! [`NodeCandidate`] happens on the shape, not on loose key lookups.

use once_cell::sync::Lazy;
use regex::Regex;

use super::normalizer::{
    clean_ip, clean_value, clean_zip, looks_like_zip, normalize_country, normalize_state,
};
use super::splitter::{Block, FieldKey, FieldLine};
use crate::models::{NodeCandidate, Protocol};

/// `IP - LOGIN:PASSWORD - LOCATION [| TIMESTAMP]`
static DASH_PIPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\S+)\s+-\s+([^:\s]*):(\S*)\s+-\s+([^|]*?)\s*(?:\|.*)?$").expect("valid regex")
});

/// `STATE (CITY)`
static PAREN_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)\s*\(([^)]*)\)\s*$").expect("valid regex"));

/// Fields of a `Key: value` block; any subset, any order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueRecord {
    pub ip: String,
    pub login: Option<String>,
    pub password: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
    pub country: Option<String>,
    pub provider: Option<String>,
    pub comment: Option<String>,
}

/// Four-line `IP / Credentials / Location / ZIP` body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatedRecord {
    pub ip: String,
    pub login: String,
    pub password: String,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
}

/// A block classified into exactly one record shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizedBlock {
    KeyValue(KeyValueRecord),
    /// `IP LOGIN PASSWORD STATE_CODE [noise...]`
    SpaceSeparated {
        ip: String,
        login: String,
        password: String,
        state_code: Option<String>,
    },
    /// `IP - LOGIN:PASSWORD - STATE/CITY ZIP | TIMESTAMP`, timestamp dropped
    DashPipe {
        ip: String,
        login: String,
        password: String,
        state: Option<String>,
        city: Option<String>,
        zipcode: Option<String>,
    },
    /// `IP:LOGIN:PASSWORD:COUNTRY:STATE:ZIP`; trailing fields may be absent
    ColonSeparated {
        ip: String,
        login: String,
        password: String,
        country: Option<String>,
        state: Option<String>,
        zipcode: Option<String>,
    },
    Located(LocatedRecord),
    /// Located body preceded by decorative banner lines
    HeaderLocated {
        header: Vec<String>,
        record: LocatedRecord,
    },
    Unrecognized {
        reason: String,
    },
}

impl RecognizedBlock {
    fn unrecognized(reason: impl Into<String>) -> Self {
        RecognizedBlock::Unrecognized {
            reason: reason.into(),
        }
    }

    pub fn format_name(&self) -> &'static str {
        match self {
            RecognizedBlock::KeyValue(_) => "key_value",
            RecognizedBlock::SpaceSeparated { .. } => "space_separated",
            RecognizedBlock::DashPipe { .. } => "dash_pipe",
            RecognizedBlock::ColonSeparated { .. } => "colon_separated",
            RecognizedBlock::Located(_) => "located",
            RecognizedBlock::HeaderLocated { .. } => "header_located",
            RecognizedBlock::Unrecognized { .. } => "unrecognized",
        }
    }

    /// Normalize into a candidate stamped with `protocol`
    ///
    /// Returns the failure reason for unrecognized blocks.
    pub fn into_candidate(self, protocol: Protocol) -> Result<NodeCandidate, String> {
        let candidate = match self {
            RecognizedBlock::KeyValue(kv) => NodeCandidate {
                ip: kv.ip,
                login: kv.login.unwrap_or_default(),
                password: kv.password.unwrap_or_default(),
                protocol,
                provider: kv.provider.as_deref().and_then(clean_value),
                country: kv.country.as_deref().and_then(normalize_country),
                state: kv.state.as_deref().and_then(normalize_state),
                city: kv.city.as_deref().and_then(clean_value),
                zipcode: kv.zipcode.as_deref().and_then(clean_zip),
                comment: kv.comment.as_deref().and_then(clean_value),
            },
            RecognizedBlock::SpaceSeparated {
                ip,
                login,
                password,
                state_code,
            } => NodeCandidate {
                ip,
                login,
                password,
                protocol,
                state: state_code.as_deref().and_then(normalize_state),
                ..NodeCandidate::default()
            },
            RecognizedBlock::DashPipe {
                ip,
                login,
                password,
                state,
                city,
                zipcode,
            } => NodeCandidate {
                ip,
                login,
                password,
                protocol,
                state: state.as_deref().and_then(normalize_state),
                city: city.as_deref().and_then(clean_value),
                zipcode: zipcode.as_deref().and_then(clean_zip),
                ..NodeCandidate::default()
            },
            RecognizedBlock::ColonSeparated {
                ip,
                login,
                password,
                country,
                state,
                zipcode,
            } => NodeCandidate {
                ip,
                login,
                password,
                protocol,
                country: country.as_deref().and_then(normalize_country),
                state: state.as_deref().and_then(normalize_state),
                zipcode: zipcode.as_deref().and_then(clean_zip),
                ..NodeCandidate::default()
            },
            RecognizedBlock::Located(record)
            | RecognizedBlock::HeaderLocated { record, .. } => NodeCandidate {
                ip: record.ip,
                login: record.login,
                password: record.password,
                protocol,
                state: record.state.as_deref().and_then(normalize_state),
                city: record.city.as_deref().and_then(clean_value),
                zipcode: record.zipcode.as_deref().and_then(clean_zip),
                ..NodeCandidate::default()
            },
            RecognizedBlock::Unrecognized { reason } => return Err(reason),
        };
        Ok(candidate)
    }
}

/// Classify a block
pub fn recognize(block: &Block) -> RecognizedBlock {
    match block {
        Block::SingleLine(line) => recognize_line(line),
        Block::MultiLine { header, fields, .. } => recognize_fields(header, fields),
        Block::Unknown(_) => RecognizedBlock::unrecognized("No known record format"),
    }
}

fn recognize_line(line: &str) -> RecognizedBlock {
    let ip_end = line
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(line.len());
    let (ip_raw, rest) = line.split_at(ip_end);
    let ip = match clean_ip(ip_raw) {
        Some(ip) => ip,
        None => return RecognizedBlock::unrecognized(format!("Invalid IP address: {}", ip_raw)),
    };

    if rest.starts_with(':') {
        return recognize_colon(ip, rest);
    }
    if rest.trim_start().starts_with("- ") || rest.contains('|') {
        return recognize_dash_pipe(line);
    }
    recognize_space(ip, rest)
}

fn recognize_colon(ip: String, rest: &str) -> RecognizedBlock {
    let parts: Vec<&str> = rest[1..].split(':').map(str::trim).collect();
    if parts.len() < 2 {
        return RecognizedBlock::unrecognized("Colon-separated line needs IP:LOGIN:PASSWORD");
    }
    if parts.len() > 5 {
        return RecognizedBlock::unrecognized(format!(
            "Colon-separated line has {} fields, at most 6 expected",
            parts.len() + 1
        ));
    }
    let optional = |idx: usize| parts.get(idx).and_then(|p| clean_value(p));
    RecognizedBlock::ColonSeparated {
        ip,
        login: parts[0].to_string(),
        password: parts[1].to_string(),
        country: optional(2),
        state: optional(3),
        zipcode: optional(4),
    }
}

fn recognize_dash_pipe(line: &str) -> RecognizedBlock {
    let caps = match DASH_PIPE.captures(line) {
        Some(caps) => caps,
        None => {
            return RecognizedBlock::unrecognized(
                "Dash/pipe line must read IP - LOGIN:PASSWORD - LOCATION",
            )
        }
    };
    let ip = match clean_ip(&caps[1]) {
        Some(ip) => ip,
        None => return RecognizedBlock::unrecognized(format!("Invalid IP address: {}", &caps[1])),
    };
    let (state, city, zipcode) = split_slash_location(&caps[4]);
    RecognizedBlock::DashPipe {
        ip,
        login: caps[2].to_string(),
        password: caps[3].to_string(),
        state,
        city,
        zipcode,
    }
}

/// `STATE/CITY ZIP`, `STATE ZIP` or `STATE`
fn split_slash_location(location: &str) -> (Option<String>, Option<String>, Option<String>) {
    let mut tokens: Vec<&str> = location.split_whitespace().collect();
    let zipcode = match tokens.last() {
        Some(last) if looks_like_zip(last) => tokens.pop().map(str::to_string),
        _ => None,
    };
    let remainder = tokens.join(" ");
    match remainder.split_once('/') {
        Some((state, city)) => (clean_value(state), clean_value(city), zipcode),
        None => (clean_value(&remainder), None, zipcode),
    }
}

fn recognize_space(ip: String, rest: &str) -> RecognizedBlock {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() < 2 {
        return RecognizedBlock::unrecognized("Single-line record needs IP LOGIN PASSWORD");
    }
    RecognizedBlock::SpaceSeparated {
        ip,
        login: tokens[0].to_string(),
        password: tokens[1].to_string(),
        // Anything after the state code is noise
        state_code: tokens.get(2).map(|t| t.to_string()),
    }
}

fn field<'a>(fields: &'a [FieldLine], key: FieldKey) -> Option<&'a str> {
    fields
        .iter()
        .find(|f| f.key == key)
        .map(|f| f.value.as_str())
        .filter(|v| !v.is_empty())
}

fn recognize_fields(header: &[String], fields: &[FieldLine]) -> RecognizedBlock {
    let ip = match field(fields, FieldKey::Ip) {
        Some(raw) => match clean_ip(raw) {
            Some(ip) => ip,
            None => return RecognizedBlock::unrecognized(format!("Invalid IP address: {}", raw)),
        },
        None => return RecognizedBlock::unrecognized("Block has no IP field"),
    };

    let located = field(fields, FieldKey::Credentials).is_some()
        || field(fields, FieldKey::Location).is_some();

    if !located {
        return RecognizedBlock::KeyValue(KeyValueRecord {
            ip,
            login: field(fields, FieldKey::Login).map(str::to_string),
            password: field(fields, FieldKey::Password).map(str::to_string),
            state: field(fields, FieldKey::State).map(str::to_string),
            city: field(fields, FieldKey::City).map(str::to_string),
            zipcode: field(fields, FieldKey::Zip).map(str::to_string),
            country: field(fields, FieldKey::Country).map(str::to_string),
            provider: field(fields, FieldKey::Provider).map(str::to_string),
            comment: field(fields, FieldKey::Comment).map(str::to_string),
        });
    }

    let (login, password) = match field(fields, FieldKey::Credentials) {
        Some(creds) => match creds.split_once(':') {
            Some((login, password)) => (login.trim().to_string(), password.trim().to_string()),
            None => {
                return RecognizedBlock::unrecognized(format!(
                    "Credentials must read LOGIN:PASSWORD: {}",
                    creds
                ))
            }
        },
        None => (
            field(fields, FieldKey::Login).unwrap_or_default().to_string(),
            field(fields, FieldKey::Password).unwrap_or_default().to_string(),
        ),
    };

    let (state, city) = match field(fields, FieldKey::Location) {
        Some(location) => match PAREN_LOCATION.captures(location) {
            Some(caps) => (clean_value(&caps[1]), clean_value(&caps[2])),
            None => (clean_value(location), None),
        },
        None => (
            field(fields, FieldKey::State).map(str::to_string),
            field(fields, FieldKey::City).map(str::to_string),
        ),
    };

    let record = LocatedRecord {
        ip,
        login,
        password,
        state,
        city,
        zipcode: field(fields, FieldKey::Zip).map(str::to_string),
    };

    if header.is_empty() {
        RecognizedBlock::Located(record)
    } else {
        RecognizedBlock::HeaderLocated {
            header: header.to_vec(),
            record,
        }
    }
}
