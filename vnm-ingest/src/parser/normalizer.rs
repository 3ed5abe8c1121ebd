//! Field normalization
//!
//! Canonicalizes location codes and strips decorative noise from field
//! values. Unknown codes pass through unchanged.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::net::Ipv4Addr;

const US_STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("PR", "Puerto Rico"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

const COUNTRIES: &[(&str, &str)] = &[
    ("US", "United States"),
    ("USA", "United States"),
    ("CA", "Canada"),
    ("MX", "Mexico"),
    ("BR", "Brazil"),
    ("AR", "Argentina"),
    ("GB", "United Kingdom"),
    ("UK", "United Kingdom"),
    ("IE", "Ireland"),
    ("DE", "Germany"),
    ("FR", "France"),
    ("NL", "Netherlands"),
    ("BE", "Belgium"),
    ("CH", "Switzerland"),
    ("AT", "Austria"),
    ("IT", "Italy"),
    ("ES", "Spain"),
    ("PT", "Portugal"),
    ("SE", "Sweden"),
    ("NO", "Norway"),
    ("FI", "Finland"),
    ("DK", "Denmark"),
    ("PL", "Poland"),
    ("CZ", "Czech Republic"),
    ("RO", "Romania"),
    ("UA", "Ukraine"),
    ("RU", "Russia"),
    ("TR", "Turkey"),
    ("IL", "Israel"),
    ("AE", "United Arab Emirates"),
    ("IN", "India"),
    ("SG", "Singapore"),
    ("HK", "Hong Kong"),
    ("JP", "Japan"),
    ("KR", "South Korea"),
    ("CN", "China"),
    ("AU", "Australia"),
    ("NZ", "New Zealand"),
    ("ZA", "South Africa"),
];

static STATE_NAMES: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| US_STATES.iter().copied().collect());

static COUNTRY_NAMES: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| COUNTRIES.iter().copied().collect());

/// Trim a field and drop it if nothing is left
pub fn clean_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|c: char| c == ',' || c == ';').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Canonical IPv4 from a field that may carry trailing decoration
///
/// `"76.178.64.46 (fast)"` and `"76.178.64.46,"` both yield `76.178.64.46`.
pub fn clean_ip(raw: &str) -> Option<String> {
    let token = raw.split_whitespace().next()?;
    let token = token.trim_matches(|c: char| !c.is_ascii_digit() && c != '.');
    token.parse::<Ipv4Addr>().ok().map(|ip| ip.to_string())
}

/// First whitespace token of a zip field
pub fn clean_zip(raw: &str) -> Option<String> {
    raw.split_whitespace()
        .next()
        .map(|token| token.trim_matches(|c: char| c == ',' || c == ';' || c == '.'))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// True for US-style zip codes (`85001`, `85001-1234`) and short numeric postcodes
pub fn looks_like_zip(token: &str) -> bool {
    let (main, ext) = match token.split_once('-') {
        Some((main, ext)) => (main, Some(ext)),
        None => (token, None),
    };
    let main_ok = (4..=6).contains(&main.len()) && main.chars().all(|c| c.is_ascii_digit());
    let ext_ok = ext.map_or(true, |e| e.len() == 4 && e.chars().all(|c| c.is_ascii_digit()));
    main_ok && ext_ok
}

/// Map a US state code to its name; anything else passes through trimmed
pub fn normalize_state(raw: &str) -> Option<String> {
    let value = clean_value(raw)?;
    let upper = value.to_ascii_uppercase();
    match STATE_NAMES.get(upper.as_str()) {
        Some(name) if value.len() == 2 => Some((*name).to_string()),
        _ => Some(value),
    }
}

/// Map a country code to its name; anything else passes through trimmed
pub fn normalize_country(raw: &str) -> Option<String> {
    let value = clean_value(raw)?;
    let key = value.replace('.', "").to_ascii_uppercase();
    match COUNTRY_NAMES.get(key.as_str()) {
        Some(name) if key.len() <= 3 => Some((*name).to_string()),
        _ => Some(value),
    }
}

/// Remove a trailing `// comment` from a line
///
/// Only a `//` preceded by whitespace starts a comment, so values that
/// merely contain slashes survive.
pub fn strip_inline_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (idx, window) in bytes.windows(2).enumerate() {
        if window == b"//" && idx > 0 && bytes[idx - 1].is_ascii_whitespace() {
            return line[..idx].trim_end();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_expand() {
        assert_eq!(normalize_state("CA").as_deref(), Some("California"));
        assert_eq!(normalize_state(" tx ").as_deref(), Some("Texas"));
        assert_eq!(normalize_state("Arizona").as_deref(), Some("Arizona"));
    }

    #[test]
    fn test_unknown_codes_pass_through() {
        assert_eq!(normalize_state("QQ").as_deref(), Some("QQ"));
        assert_eq!(normalize_country("Atlantis").as_deref(), Some("Atlantis"));
        assert_eq!(normalize_state("   "), None);
    }

    #[test]
    fn test_country_codes_expand() {
        assert_eq!(normalize_country("US").as_deref(), Some("United States"));
        assert_eq!(normalize_country("U.S.A.").as_deref(), Some("United States"));
        assert_eq!(normalize_country("CA").as_deref(), Some("Canada"));
    }

    #[test]
    fn test_clean_ip_strips_decoration() {
        assert_eq!(clean_ip("76.178.64.46 (fast)").as_deref(), Some("76.178.64.46"));
        assert_eq!(clean_ip("76.178.64.46,").as_deref(), Some("76.178.64.46"));
        assert_eq!(clean_ip("999.1.1.1"), None);
        assert_eq!(clean_ip("example.com"), None);
        assert_eq!(clean_ip(""), None);
    }

    #[test]
    fn test_zip_detection() {
        assert!(looks_like_zip("85001"));
        assert!(looks_like_zip("85001-1234"));
        assert!(!looks_like_zip("Phoenix"));
        assert!(!looks_like_zip("85001-12"));
        assert_eq!(clean_zip(" 90210, ").as_deref(), Some("90210"));
    }

    #[test]
    fn test_inline_comment_stripping() {
        assert_eq!(
            strip_inline_comment("1.2.3.4 admin admin CA // works"),
            "1.2.3.4 admin admin CA"
        );
        assert_eq!(strip_inline_comment("pass//word"), "pass//word");
        assert_eq!(strip_inline_comment("no comment"), "no comment");
    }
}
