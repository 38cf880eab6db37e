//! Turns a paired request/response into the wire `Witness` shape: headers,
//! query params, cookies, and templated path segments become `Data` nodes;
//! bodies are represented by length only (raw bytes never leave the agent).

use capture_core::parser::{HttpRequestContent, HttpResponseContent};
use capture_core::pairer::PairedExchange;
use capture_protocol::{Data, LocationMeta, MethodDescriptor, ObfuscationState, Primitive, Witness, WitnessMeta};
use std::collections::BTreeMap;

pub struct ObservedTimes {
    pub request_at_ms: Option<i64>,
    pub response_at_ms: Option<i64>,
}

fn is_templatable_segment(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    let all_digits = segment.bytes().all(|b| b.is_ascii_digit());
    let looks_like_uuid = segment.len() == 36 && segment.chars().filter(|c| *c == '-').count() == 4;
    all_digits || looks_like_uuid
}

fn templated_path(path: &str, args: &mut BTreeMap<String, Data>) -> String {
    let mut out_segments = Vec::new();
    for (index, segment) in path.split('/').enumerate() {
        if is_templatable_segment(segment) {
            args.insert(
                format!("path:{index}"),
                Data::string(segment, Some(LocationMeta::PathSegment { index })),
            );
            out_segments.push("{id}".to_string());
        } else {
            out_segments.push(segment.to_string());
        }
    }
    out_segments.join("/")
}

fn header_nodes(headers: &[(String, String)], args: &mut BTreeMap<String, Data>) {
    for (name, value) in headers {
        args.insert(
            format!("header:{}", name.to_ascii_lowercase()),
            Data::string(value.clone(), Some(LocationMeta::Header { key: name.clone() })),
        );
    }
}

fn query_nodes(query: Option<&str>, args: &mut BTreeMap<String, Data>) {
    let Some(query) = query else { return };
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if k.is_empty() {
            continue;
        }
        args.insert(
            format!("query:{k}"),
            Data::string(v, Some(LocationMeta::Query { key: k.to_string() })),
        );
    }
}

fn cookie_nodes(cookies: &[(String, String)], args: &mut BTreeMap<String, Data>) {
    for (k, v) in cookies {
        args.insert(
            format!("cookie:{k}"),
            Data::string(v.clone(), Some(LocationMeta::Cookie { key: k.clone() })),
        );
    }
}

fn body_node(content_type: Option<&str>, body: &[u8]) -> Option<Data> {
    if body.is_empty() {
        return None;
    }
    Some(Data::Primitive {
        value: Primitive::Bytes { len: body.len() },
        location: Some(LocationMeta::Body { content_type: content_type.map(str::to_string) }),
    })
}

fn request_args(req: &HttpRequestContent) -> BTreeMap<String, Data> {
    let mut args = BTreeMap::new();
    header_nodes(&req.headers, &mut args);
    query_nodes(req.query.as_deref(), &mut args);
    cookie_nodes(&req.cookies, &mut args);
    if let Some(body) = body_node(req.content_type.as_deref(), &req.body) {
        args.insert("body".to_string(), body);
    }
    args
}

fn response_data(resp: &HttpResponseContent) -> BTreeMap<String, Data> {
    let mut out = BTreeMap::new();
    let mut headers = BTreeMap::new();
    header_nodes(&resp.headers, &mut headers);
    if let Some(body) = body_node(resp.content_type.as_deref(), &resp.body) {
        headers.insert("body".to_string(), body);
    }
    out.insert(
        resp.status.to_string(),
        Data::Struct { fields: headers, location: None },
    );
    out
}

/// Build a witness from a paired exchange. When `exchange.request` is
/// present, `path_template` has already had numeric/uuid segments replaced
/// with `{id}`, with the captured values carried as `path:<index>` args. A
/// response-only exchange (server spoke first) carries no method/path
/// information at all.
pub fn build_witness(
    exchange: PairedExchange,
    interface: &str,
    stream_id: String,
    times: ObservedTimes,
    request_bytes: u64,
    response_bytes: u64,
) -> Witness {
    let (method, args) = match &exchange.request {
        Some(req) => {
            let mut args = request_args(req);
            let path_template = templated_path(&req.path, &mut args);
            (
                MethodDescriptor {
                    verb: req.method.clone(),
                    host: req.host.clone().unwrap_or_default(),
                    path_template,
                },
                args,
            )
        }
        None => (MethodDescriptor { verb: String::new(), host: String::new(), path_template: String::new() }, BTreeMap::new()),
    };
    let responses = exchange.response.as_ref().map(response_data).unwrap_or_default();

    Witness {
        id: uuid::Uuid::new_v4(),
        method,
        args,
        responses,
        meta: WitnessMeta {
            captured_interface: interface.to_string(),
            stream_id,
            request_observed_at_ms: times.request_at_ms,
            response_observed_at_ms: times.response_at_ms,
            request_bytes,
            response_bytes,
            obfuscation_state: ObfuscationState::None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture_core::models::FlowKey;

    fn req() -> HttpRequestContent {
        HttpRequestContent {
            method: "GET".to_string(),
            path: "/users/482/orders".to_string(),
            query: Some("sort=desc".to_string()),
            host: Some("api.example.com".to_string()),
            headers: vec![("Authorization".to_string(), "Bearer xyz".to_string())],
            cookies: vec![("sid".to_string(), "abc".to_string())],
            content_type: None,
            body: Vec::new(),
        }
    }

    #[test]
    fn numeric_path_segments_are_templated_and_captured_as_args() {
        let exchange = PairedExchange {
            flow_key: FlowKey::new("10.0.0.1:1".parse().unwrap(), "10.0.0.2:80".parse().unwrap()),
            request: Some(req()),
            response: None,
        };
        let w = build_witness(
            exchange,
            "eth0",
            "flow-1".to_string(),
            ObservedTimes { request_at_ms: Some(0), response_at_ms: None },
            10,
            0,
        );
        assert_eq!(w.method.path_template, "/users/{id}/orders");
        assert!(matches!(
            &w.args["path:2"],
            Data::Primitive { value: Primitive::String(s), .. } if s == "482"
        ));
        assert!(w.args.contains_key("header:authorization"));
        assert!(w.args.contains_key("query:sort"));
        assert!(w.args.contains_key("cookie:sid"));
        assert!(w.is_request_only());
    }

    #[test]
    fn response_only_exchange_builds_a_witness_with_no_method_info() {
        let exchange = PairedExchange {
            flow_key: FlowKey::new("10.0.0.1:1".parse().unwrap(), "10.0.0.2:80".parse().unwrap()),
            request: None,
            response: Some(HttpResponseContent {
                status: 200,
                reason: "OK".to_string(),
                headers: Vec::new(),
                content_type: None,
                body: Vec::new(),
            }),
        };
        let w = build_witness(
            exchange,
            "eth0",
            "flow-1".to_string(),
            ObservedTimes { request_at_ms: None, response_at_ms: Some(0) },
            0,
            0,
        );
        assert_eq!(w.method.verb, "");
        assert!(w.args.is_empty());
        assert!(w.responses.contains_key("200"));
    }
}
