//! HTTP/2 detection: the connection preface is the only thing this agent
//! needs — full frame decoding is out of scope (spec Non-goals).

use super::{ParsedContent, Verdict};

/// `PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n`, always exactly this many bytes.
const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub struct Http2PrefaceParser;

impl Http2PrefaceParser {
    pub fn probe(buf: &[u8]) -> Verdict {
        if buf.len() < PREFACE.len() {
            if PREFACE.starts_with(buf) {
                return Verdict::NeedMoreData { leading_junk: 0 };
            }
            return Verdict::Reject { consumed: 0 };
        }
        if &buf[..PREFACE.len()] == PREFACE {
            Verdict::Accept {
                content: ParsedContent::Http2Preface,
                consumed: PREFACE.len(),
            }
        } else {
            Verdict::Reject { consumed: 0 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_preface_is_accepted() {
        assert!(matches!(
            Http2PrefaceParser::probe(PREFACE),
            Verdict::Accept { consumed, .. } if consumed == PREFACE.len()
        ));
    }

    #[test]
    fn partial_matching_prefix_needs_more_data() {
        assert!(matches!(
            Http2PrefaceParser::probe(&PREFACE[..5]),
            Verdict::NeedMoreData { .. }
        ));
    }

    #[test]
    fn non_matching_bytes_are_rejected() {
        assert!(matches!(
            Http2PrefaceParser::probe(b"GET / HTTP/1.1\r\n"),
            Verdict::Reject { .. }
        ));
    }
}
