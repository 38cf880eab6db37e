//! Stream parsing: verdicts, content types, and the built-in parser/factory
//! variants.
//!
//! Parsers are modeled as a tagged variant plus a small `feed` capability
//! (spec §9 "Parser polymorphism") rather than a trait-object hierarchy, so
//! the dispatcher is a match over a closed set of kinds.

mod http;
mod http2;
mod tls;

pub use http::{HttpRequestContent, HttpRequestParser, HttpResponseContent, HttpResponseParser};
pub use http2::Http2PrefaceParser;
pub use tls::{TlsHelloContent, TlsHelloKind, TlsHelloParser};

/// What a parser (or a factory probing for one) decided about the current
/// buffered prefix.
#[derive(Debug)]
pub enum Verdict {
    /// `consumed` bytes formed a complete message; the rest of the buffer
    /// is unconsumed and available to the next factory/parser.
    Accept { content: ParsedContent, consumed: usize },
    /// Not enough bytes yet. `leading_junk` bytes at the front are known
    /// not to matter and may be discarded by the dispatcher.
    NeedMoreData { leading_junk: usize },
    /// Abandon this factory/parser; `consumed` bytes are counted as
    /// dropped (unparsed).
    Reject { consumed: usize },
}

/// A parsed unit of content, independent of which built-in parser produced
/// it.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedContent {
    HttpRequest(HttpRequestContent),
    HttpResponse(HttpResponseContent),
    Http2Preface,
    TlsHello(TlsHelloKind, TlsHelloContent),
    DroppedBytes(usize),
}

/// Enforce the "NeedMoreData at stream end becomes Reject" invariant in one
/// place so every parser/factory gets it for free.
fn finalize_at_end(verdict: Verdict, buf: &[u8], is_end: bool) -> Verdict {
    match verdict {
        Verdict::NeedMoreData { .. } if is_end => Verdict::Reject { consumed: buf.len() },
        other => other,
    }
}

/// Identifies one of the built-in factories, in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryKind {
    HttpRequest,
    HttpResponse,
    Http2Preface,
    TlsClientHello,
    TlsServerHello,
}

pub const FACTORY_PRIORITY: [FactoryKind; 5] = [
    FactoryKind::Http2Preface,
    FactoryKind::TlsClientHello,
    FactoryKind::TlsServerHello,
    FactoryKind::HttpRequest,
    FactoryKind::HttpResponse,
];

/// Probe `buf` with the named factory. Every built-in parser recomputes
/// from the full buffered prefix on each call, so no state needs to
/// persist across `NeedMoreData` verdicts — the dispatcher just re-probes
/// once more bytes arrive.
pub fn probe(kind: FactoryKind, buf: &[u8], is_end: bool) -> Verdict {
    let verdict = match kind {
        FactoryKind::Http2Preface => Http2PrefaceParser::probe(buf),
        FactoryKind::TlsClientHello => TlsHelloParser::probe(buf, TlsHelloKind::Client),
        FactoryKind::TlsServerHello => TlsHelloParser::probe(buf, TlsHelloKind::Server),
        FactoryKind::HttpRequest => HttpRequestParser::default().feed(buf),
        FactoryKind::HttpResponse => HttpResponseParser::default().feed(buf),
    };
    finalize_at_end(verdict, buf, is_end)
}
