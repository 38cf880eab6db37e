//! HTTP/1.x request and response parsing, built on `httparse` for the
//! start-line/header grammar with hand-rolled body framing (content-length
//! and chunked transfer-encoding).

use super::Verdict;

const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequestContent {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub host: Option<String>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponseContent {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn parse_cookies(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn split_path_query(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    }
}

/// Body framing shared by request and response parsers: given the headers
/// and the bytes following them, decide how much of the body is present.
enum BodyFraming {
    /// No body expected (no Content-Length, no chunked Transfer-Encoding).
    None,
    Fixed(usize),
    Chunked,
}

fn framing_of(headers: &[(String, String)]) -> BodyFraming {
    if let Some(te) = header_value(headers, "transfer-encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return BodyFraming::Chunked;
        }
    }
    if let Some(len) = header_value(headers, "content-length") {
        if let Ok(n) = len.trim().parse::<usize>() {
            return BodyFraming::Fixed(n);
        }
    }
    BodyFraming::None
}

/// Decode a chunked body. Returns `(body, bytes_consumed)` on success, or
/// `None` if the terminating `0\r\n\r\n` chunk hasn't arrived yet.
fn decode_chunked(buf: &[u8]) -> Option<(Vec<u8>, usize)> {
    let mut body = Vec::new();
    let mut pos = 0;
    loop {
        let line_end = find_crlf(&buf[pos..])? + pos;
        let size_line = std::str::from_utf8(&buf[pos..line_end]).ok()?;
        let size_str = size_line.split(';').next().unwrap_or(size_line).trim();
        let size = usize::from_str_radix(size_str, 16).ok()?;
        let chunk_start = line_end + 2;
        if size == 0 {
            let term_end = chunk_start + 2;
            if buf.len() < term_end {
                return None;
            }
            return Some((body, term_end));
        }
        let chunk_end = chunk_start + size;
        if buf.len() < chunk_end + 2 {
            return None;
        }
        body.extend_from_slice(&buf[chunk_start..chunk_end]);
        pos = chunk_end + 2;
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[derive(Default)]
pub struct HttpRequestParser;

impl HttpRequestParser {
    pub fn feed(&mut self, buf: &[u8]) -> Verdict {
        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut raw_headers);
        let header_len = match req.parse(buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => {
                return Verdict::NeedMoreData { leading_junk: 0 };
            }
            Err(_) => return Verdict::Reject { consumed: buf.len().max(1) },
        };

        let method = req.method.unwrap_or("").to_string();
        let target = req.path.unwrap_or("");
        let (path, query) = split_path_query(target);
        let headers: Vec<(String, String)> = req
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect();

        let host = header_value(&headers, "host").map(str::to_string);
        let content_type = header_value(&headers, "content-type").map(str::to_string);
        let cookies = header_value(&headers, "cookie")
            .map(parse_cookies)
            .unwrap_or_default();

        let after_headers = &buf[header_len..];
        let (body, body_len) = match framing_of(&headers) {
            BodyFraming::None => (Vec::new(), 0),
            BodyFraming::Fixed(n) => {
                if after_headers.len() < n {
                    return Verdict::NeedMoreData { leading_junk: 0 };
                }
                (after_headers[..n].to_vec(), n)
            }
            BodyFraming::Chunked => match decode_chunked(after_headers) {
                Some((body, consumed)) => (body, consumed),
                None => return Verdict::NeedMoreData { leading_junk: 0 },
            },
        };

        let content = HttpRequestContent {
            method,
            path,
            query,
            host,
            headers,
            cookies,
            content_type,
            body,
        };
        Verdict::Accept {
            content: super::ParsedContent::HttpRequest(content),
            consumed: header_len + body_len,
        }
    }
}

#[derive(Default)]
pub struct HttpResponseParser;

impl HttpResponseParser {
    pub fn feed(&mut self, buf: &[u8]) -> Verdict {
        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut raw_headers);
        let header_len = match resp.parse(buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => {
                return Verdict::NeedMoreData { leading_junk: 0 };
            }
            Err(_) => return Verdict::Reject { consumed: buf.len().max(1) },
        };

        let status = resp.code.unwrap_or(0);
        let reason = resp.reason.unwrap_or("").to_string();
        let headers: Vec<(String, String)> = resp
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect();
        let content_type = header_value(&headers, "content-type").map(str::to_string);

        let after_headers = &buf[header_len..];
        // 1xx/204/304 and HEAD responses carry no body; this parser doesn't
        // track the paired request method, so it relies on framing headers
        // only, matching the conservative subset the dispatcher needs.
        let (body, body_len) = match framing_of(&headers) {
            BodyFraming::None => (Vec::new(), 0),
            BodyFraming::Fixed(n) => {
                if after_headers.len() < n {
                    return Verdict::NeedMoreData { leading_junk: 0 };
                }
                (after_headers[..n].to_vec(), n)
            }
            BodyFraming::Chunked => match decode_chunked(after_headers) {
                Some((body, consumed)) => (body, consumed),
                None => return Verdict::NeedMoreData { leading_junk: 0 },
            },
        };

        let content = HttpResponseContent {
            status,
            reason,
            headers,
            content_type,
            body,
        };
        Verdict::Accept {
            content: super::ParsedContent::HttpResponse(content),
            consumed: header_len + body_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedContent;

    #[test]
    fn parses_a_complete_request_with_fixed_body() {
        let raw = b"POST /cart?id=9 HTTP/1.1\r\nHost: shop.example\r\nContent-Type: application/json\r\nContent-Length: 13\r\nCookie: sid=abc; theme=dark\r\n\r\n{\"qty\": 2}\r\n\r\n";
        let mut p = HttpRequestParser::default();
        match p.feed(raw) {
            Verdict::Accept { content: ParsedContent::HttpRequest(r), consumed } => {
                assert_eq!(r.method, "POST");
                assert_eq!(r.path, "/cart");
                assert_eq!(r.query.as_deref(), Some("id=9"));
                assert_eq!(r.host.as_deref(), Some("shop.example"));
                assert_eq!(r.body, b"{\"qty\": 2}\r\n".to_vec());
                assert_eq!(
                    r.cookies,
                    vec![
                        ("sid".to_string(), "abc".to_string()),
                        ("theme".to_string(), "dark".to_string())
                    ]
                );
                assert_eq!(consumed, raw.len());
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn partial_headers_ask_for_more_data() {
        let raw = b"GET / HTTP/1.1\r\nHost: a.example\r\n";
        let mut p = HttpRequestParser::default();
        assert!(matches!(p.feed(raw), Verdict::NeedMoreData { .. }));
    }

    #[test]
    fn response_decodes_a_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let mut p = HttpResponseParser::default();
        match p.feed(raw) {
            Verdict::Accept { content: ParsedContent::HttpResponse(r), consumed } => {
                assert_eq!(r.status, 200);
                assert_eq!(r.body, b"wikipedia".to_vec());
                assert_eq!(consumed, raw.len());
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn malformed_start_line_is_rejected() {
        let raw = b"not a request\r\n\r\n";
        let mut p = HttpRequestParser::default();
        assert!(matches!(p.feed(raw), Verdict::Reject { .. }));
    }
}
