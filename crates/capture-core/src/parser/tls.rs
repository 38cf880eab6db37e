//! TLS client/server hello metadata extraction.
//!
//! Only enough of the handshake is decoded to pull out connection metadata
//! (SNI, negotiated version/cipher) — the session itself is never decrypted
//! or followed past the hello (spec Non-goals: no TLS termination).

use super::{ParsedContent, Verdict};

const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_TYPE_SERVER_HELLO: u8 = 0x02;
const EXTENSION_TYPE_SNI: u16 = 0x0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsHelloKind {
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsHelloContent {
    pub legacy_version: u16,
    pub sni: Option<String>,
    pub cipher_suite: Option<u16>,
    pub cipher_suite_count: usize,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(slice)
    }
    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|s| s[0])
    }
    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|s| u16::from_be_bytes([s[0], s[1]]))
    }
    fn u24(&mut self) -> Option<usize> {
        self.take(3).map(|s| (usize::from(s[0]) << 16) | (usize::from(s[1]) << 8) | usize::from(s[2]))
    }
}

fn parse_sni(extension_data: &[u8]) -> Option<String> {
    let mut c = Cursor { buf: extension_data, pos: 0 };
    let list_len = c.u16()? as usize;
    let list = c.take(list_len)?;
    let mut lc = Cursor { buf: list, pos: 0 };
    while lc.pos < list.len() {
        let name_type = lc.u8()?;
        let name_len = lc.u16()? as usize;
        let name = lc.take(name_len)?;
        if name_type == 0 {
            return std::str::from_utf8(name).ok().map(str::to_string);
        }
    }
    None
}

fn find_extension(extensions: &[u8], wanted: u16) -> Option<&[u8]> {
    let mut c = Cursor { buf: extensions, pos: 0 };
    while c.pos < extensions.len() {
        let ext_type = c.u16()?;
        let ext_len = c.u16()? as usize;
        let ext_data = c.take(ext_len)?;
        if ext_type == wanted {
            return Some(ext_data);
        }
    }
    None
}

pub struct TlsHelloParser;

impl TlsHelloParser {
    pub fn probe(buf: &[u8], kind: TlsHelloKind) -> Verdict {
        if buf.len() < RECORD_HEADER_LEN {
            return Verdict::NeedMoreData { leading_junk: 0 };
        }
        if buf[0] != CONTENT_TYPE_HANDSHAKE {
            return Verdict::Reject { consumed: 0 };
        }
        let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
        let total = RECORD_HEADER_LEN + record_len;
        if buf.len() < total {
            return Verdict::NeedMoreData { leading_junk: 0 };
        }
        let handshake = &buf[RECORD_HEADER_LEN..total];
        if handshake.len() < HANDSHAKE_HEADER_LEN {
            return Verdict::Reject { consumed: 0 };
        }
        let expected_type = match kind {
            TlsHelloKind::Client => HANDSHAKE_TYPE_CLIENT_HELLO,
            TlsHelloKind::Server => HANDSHAKE_TYPE_SERVER_HELLO,
        };
        if handshake[0] != expected_type {
            return Verdict::Reject { consumed: 0 };
        }
        let mut c = Cursor { buf: handshake, pos: 0 };
        let Some(_hs_type) = c.u8() else {
            return Verdict::Reject { consumed: 0 };
        };
        let Some(_hs_len) = c.u24() else {
            return Verdict::Reject { consumed: 0 };
        };
        let Some(legacy_version) = c.u16() else {
            return Verdict::Reject { consumed: 0 };
        };
        if c.take(32).is_none() {
            return Verdict::Reject { consumed: 0 };
        }
        let Some(session_id_len) = c.u8() else {
            return Verdict::Reject { consumed: 0 };
        };
        if c.take(session_id_len as usize).is_none() {
            return Verdict::Reject { consumed: 0 };
        }

        let content = match kind {
            TlsHelloKind::Client => {
                let Some(cs_len) = c.u16() else {
                    return Verdict::Reject { consumed: 0 };
                };
                let Some(_cs) = c.take(cs_len as usize) else {
                    return Verdict::Reject { consumed: 0 };
                };
                let Some(comp_len) = c.u8() else {
                    return Verdict::Reject { consumed: 0 };
                };
                if c.take(comp_len as usize).is_none() {
                    return Verdict::Reject { consumed: 0 };
                }
                let sni = c
                    .u16()
                    .and_then(|ext_len| c.take(ext_len as usize))
                    .and_then(|extensions| find_extension(extensions, EXTENSION_TYPE_SNI))
                    .and_then(parse_sni);
                TlsHelloContent {
                    legacy_version,
                    sni,
                    cipher_suite: None,
                    cipher_suite_count: (cs_len as usize) / 2,
                }
            }
            TlsHelloKind::Server => {
                let Some(cipher_suite) = c.u16() else {
                    return Verdict::Reject { consumed: 0 };
                };
                let Some(_compression_method) = c.u8() else {
                    return Verdict::Reject { consumed: 0 };
                };
                TlsHelloContent {
                    legacy_version,
                    sni: None,
                    cipher_suite: Some(cipher_suite),
                    cipher_suite_count: 1,
                }
            }
        };

        Verdict::Accept {
            content: ParsedContent::TlsHello(kind, content),
            consumed: total,
        }
    }
}
