//! Multi-format import text parser
//!
//! `split_blocks` → `recognize` → `RecognizedBlock::into_candidate`.
//! A bad block becomes one [`FormatError`]; parsing always continues with
//! the next block.

pub mod normalizer;
pub mod recognizer;
pub mod splitter;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{FormatError, NodeCandidate, Protocol};
pub use recognizer::{recognize, RecognizedBlock};
pub use splitter::{split_blocks, Block};

/// Candidates and per-block failures from one paste
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub candidates: Vec<NodeCandidate>,
    pub errors: Vec<FormatError>,
}

impl ParseOutcome {
    pub fn blocks_examined(&self) -> usize {
        self.candidates.len() + self.errors.len()
    }
}

/// Parser bound to the protocol hint of one import
#[derive(Debug, Clone, Copy, Default)]
pub struct TextImportParser {
    protocol: Protocol,
}

impl TextImportParser {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn parse(&self, raw_text: &str) -> ParseOutcome {
        self.parse_at(raw_text, Utc::now())
    }

    /// Parse with an explicit timestamp for the recorded format errors
    pub fn parse_at(&self, raw_text: &str, now: DateTime<Utc>) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();

        for block in split_blocks(raw_text) {
            let recognized = recognize(&block);
            let format = recognized.format_name();

            match recognized.into_candidate(self.protocol) {
                Ok(candidate) => {
                    debug!(format, ip = %candidate.ip, "Recognized block");
                    outcome.candidates.push(candidate);
                }
                Err(reason) => {
                    let raw = block.raw_text();
                    warn!(reason = %reason, block = %raw, "Unparsable import block");
                    outcome.errors.push(FormatError::new(raw, reason, now));
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_paste_with_comments() {
        let text = "# fresh batch\n76.178.64.46 admin admin CA\n\n// ignore me\n70.171.218.52:admin:admin:US:Arizona:85001 // best\n";
        let outcome = TextImportParser::new(Protocol::Pptp).parse(text);
        assert_eq!(outcome.candidates.len(), 2);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_bad_block_does_not_stop_parsing() {
        let text = "garbage line here\n1.1.1.1 a b TX\nLogin: x\nPass: y\n\n2.2.2.2 c d NY\n";
        let outcome = TextImportParser::new(Protocol::Pptp).parse(text);
        let ips: Vec<_> = outcome.candidates.iter().map(|c| c.ip.as_str()).collect();
        assert_eq!(ips, vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.errors[0].raw_line_or_block, "garbage line here");
        assert_eq!(outcome.blocks_examined(), 4);
    }

    #[test]
    fn test_channel_header_noise_is_not_an_error() {
        let text = "Fresh Nodes Channel\n@vpn_bot\nIP: 9.9.9.9\nCredentials: bob:hunter2\nLocation: Ohio (Columbus)\nZIP: 43004";
        let outcome = TextImportParser::new(Protocol::Pptp).parse(text);
        assert_eq!(outcome.candidates.len(), 1);
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(outcome.candidates[0].city.as_deref(), Some("Columbus"));

        let blocks = split_blocks(text);
        assert_eq!(recognize(&blocks[0]).format_name(), "header_located");
    }

    #[test]
    fn test_protocol_hint_is_stamped() {
        let outcome = TextImportParser::new(Protocol::Ovpn).parse("1.1.1.1 a b");
        assert_eq!(outcome.candidates[0].protocol, Protocol::Ovpn);
    }

    #[test]
    fn test_empty_input() {
        let outcome = TextImportParser::default().parse("\n\n   \n");
        assert_eq!(outcome.blocks_examined(), 0);
    }
}
