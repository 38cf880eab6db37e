//! Redaction: baked-in rules plus a dynamically-refreshed backend layer,
//! applied to a witness's `args`/`responses` trees, and to the method's
//! path template, before upload.
//!
//! Three passes, in order: a value pass (primitives located at `Auth` or
//! `Cookie` are redacted regardless of content; primitive string values
//! matching a sensitive-value regex are redacted), a name pass (exact or
//! regex match against field names, case-insensitive), then a
//! path-template pass (segments of the method's path template matching a
//! sensitive-value regex are replaced). Once a node is redacted it stays
//! redacted — later passes only add coverage, matching the
//! monotonic-redaction invariant. `zero_all_primitives` mode zeroes every
//! primitive unconditionally, except for W3C trace-context headers.
use capture_protocol::{Data, LocationMeta, ObfuscationState, Primitive, RedactionRuleSet, Witness};
use regex::Regex;
use std::sync::RwLock;

const REDACTED_PLACEHOLDER: &str = "[redacted]";

/// Header names preserved by zero-all-primitives mode (case-insensitive):
/// the W3C trace-context headers are load-bearing for distributed tracing
/// and carry no sensitive content of their own.
fn trace_context_exceptions() -> &'static [&'static str] {
    &["traceparent", "tracestate"]
}

/// Field names redacted regardless of backend config — credentials and
/// session identifiers an operator should never need to opt into hiding.
fn baked_in_names() -> &'static [&'static str] {
    &["authorization", "cookie", "set-cookie", "password", "secret", "api_key", "apikey"]
}

struct CompiledRules {
    field_names: Vec<String>,
    field_name_regexps: Vec<Regex>,
    value_regexps: Vec<Regex>,
}

impl CompiledRules {
    fn compile(raw: &RedactionRuleSet) -> Self {
        CompiledRules {
            field_names: raw.field_names.iter().map(|s| s.to_ascii_lowercase()).collect(),
            field_name_regexps: raw
                .field_name_regexps
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            value_regexps: raw.value_regexps.iter().filter_map(|p| Regex::new(p).ok()).collect(),
        }
    }

    fn name_matches(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        baked_in_names().contains(&lower.as_str())
            || self.field_names.iter().any(|n| n == &lower)
            || self.field_name_regexps.iter().any(|re| re.is_match(name))
    }

    fn value_matches(&self, value: &str) -> bool {
        self.value_regexps.iter().any(|re| re.is_match(value))
    }
}

/// Shared, hot-swappable rule set. The refresh task replaces the whole
/// `CompiledRules` under a write lock; readers never block each other.
pub struct Redactor {
    rules: RwLock<CompiledRules>,
    zero_all_primitives: bool,
}

impl Redactor {
    pub fn new(initial: RedactionRuleSet, zero_all_primitives: bool) -> Self {
        Redactor {
            rules: RwLock::new(CompiledRules::compile(&initial)),
            zero_all_primitives,
        }
    }

    /// Swap in a freshly-fetched rule set (called by the refresh task).
    pub fn update_rules(&self, fresh: RedactionRuleSet) {
        *self.rules.write().unwrap() = CompiledRules::compile(&fresh);
    }

    /// Redact a witness in place, returning the strongest obfuscation state
    /// that applied to any field.
    pub fn redact(&self, witness: &mut Witness) {
        let rules = self.rules.read().unwrap();
        let mut any_redacted = false;
        for data in witness.args.values_mut() {
            any_redacted |= redact_node(data, &rules, self.zero_all_primitives);
        }
        for data in witness.responses.values_mut() {
            any_redacted |= redact_node(data, &rules, self.zero_all_primitives);
        }
        any_redacted |= redact_path_template(&mut witness.method.path_template, &rules);
        witness.meta.obfuscation_state = if self.zero_all_primitives {
            ObfuscationState::Zeroed
        } else if any_redacted {
            ObfuscationState::Redacted
        } else {
            ObfuscationState::None
        };
    }
}

fn redact_node(data: &mut Data, rules: &CompiledRules, zero_all: bool) -> bool {
    match data {
        Data::Primitive { value, location } => {
            if zero_all {
                if is_trace_context_exception(location.as_ref()) {
                    return false;
                }
                zero_primitive(value);
                return true;
            }
            let forced = location.as_ref().map(is_always_redacted_location).unwrap_or(false);
            let name_hit = location.as_ref().and_then(field_name_of).map(|n| rules.name_matches(n)).unwrap_or(false);
            let value_hit = matches!(value, Primitive::String(s) if rules.value_matches(s));
            if forced || name_hit || value_hit {
                redact_primitive(value);
                true
            } else {
                false
            }
        }
        Data::List { items, .. } => {
            let mut any = false;
            for item in items {
                any |= redact_node(item, rules, zero_all);
            }
            any
        }
        Data::Struct { fields, .. } => {
            let mut any = false;
            for (name, value) in fields.iter_mut() {
                if rules.name_matches(name) {
                    any |= force_redact(value);
                } else {
                    any |= redact_node(value, rules, zero_all);
                }
            }
            any
        }
    }
}

/// Path-template pass: replace any `/`-separated segment matching a
/// sensitive-value regex with the redaction token.
fn redact_path_template(path_template: &mut String, rules: &CompiledRules) -> bool {
    let mut any = false;
    let redacted: Vec<&str> = path_template
        .split('/')
        .map(|segment| {
            if rules.value_matches(segment) {
                any = true;
                REDACTED_PLACEHOLDER
            } else {
                segment
            }
        })
        .collect();
    if any {
        *path_template = redacted.join("/");
    }
    any
}

fn force_redact(data: &mut Data) -> bool {
    match data {
        Data::Primitive { value, .. } => {
            redact_primitive(value);
            true
        }
        Data::List { items, .. } => {
            for item in items {
                force_redact(item);
            }
            true
        }
        Data::Struct { fields, .. } => {
            for value in fields.values_mut() {
                force_redact(value);
            }
            true
        }
    }
}

fn field_name_of(loc: &LocationMeta) -> Option<&str> {
    match loc {
        LocationMeta::Header { key } | LocationMeta::Query { key } | LocationMeta::Cookie { key } => {
            Some(key)
        }
        _ => None,
    }
}

/// Value-pass rule (a): `Auth` and `Cookie` primitives are redacted
/// regardless of content, independent of the cookie's key or the value's
/// text.
fn is_always_redacted_location(loc: &LocationMeta) -> bool {
    matches!(loc, LocationMeta::Auth | LocationMeta::Cookie { .. })
}

fn is_trace_context_exception(loc: Option<&LocationMeta>) -> bool {
    matches!(loc, Some(LocationMeta::Header { key }) if trace_context_exceptions().iter().any(|n| key.eq_ignore_ascii_case(n)))
}

fn redact_primitive(value: &mut Primitive) {
    match value {
        Primitive::String(s) => *s = REDACTED_PLACEHOLDER.to_string(),
        Primitive::I64(n) => *n = 0,
        Primitive::F64(n) => *n = 0.0,
        Primitive::Bool(b) => *b = false,
        Primitive::Bytes { len } => *len = 0,
    }
}

fn zero_primitive(value: &mut Primitive) {
    redact_primitive(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn witness_with(name: &str, value: &str) -> Witness {
        witness_with_location(name, value, LocationMeta::Header { key: name.to_string() })
    }

    fn witness_with_location(name: &str, value: &str, location: LocationMeta) -> Witness {
        let mut args = BTreeMap::new();
        args.insert(
            name.to_string(),
            Data::Primitive { value: Primitive::String(value.to_string()), location: Some(location) },
        );
        Witness {
            id: uuid::Uuid::new_v4(),
            method: capture_protocol::MethodDescriptor {
                verb: "GET".into(),
                host: "a.example".into(),
                path_template: "/x".into(),
            },
            args,
            responses: BTreeMap::new(),
            meta: capture_protocol::WitnessMeta {
                captured_interface: "eth0".into(),
                stream_id: "s".into(),
                request_observed_at_ms: Some(0),
                response_observed_at_ms: None,
                request_bytes: 0,
                response_bytes: 0,
                obfuscation_state: ObfuscationState::None,
            },
        }
    }

    #[test]
    fn baked_in_name_is_redacted_even_with_empty_dynamic_rules() {
        let r = Redactor::new(RedactionRuleSet::default(), false);
        let mut w = witness_with("Authorization", "Bearer abc");
        r.redact(&mut w);
        assert!(matches!(
            &w.args["Authorization"],
            Data::Primitive { value: Primitive::String(s), .. } if s == "[redacted]"
        ));
        assert_eq!(w.meta.obfuscation_state, ObfuscationState::Redacted);
    }

    #[test]
    fn value_regex_redacts_regardless_of_field_name() {
        let rules = RedactionRuleSet {
            value_regexps: vec![r"^\d{16}$".to_string()],
            ..Default::default()
        };
        let r = Redactor::new(rules, false);
        let mut w = witness_with("card_number", "4111111111111111");
        r.redact(&mut w);
        assert!(matches!(
            &w.args["card_number"],
            Data::Primitive { value: Primitive::String(s), .. } if s == "[redacted]"
        ));
    }

    #[test]
    fn zero_all_primitives_mode_wins_over_untouched_fields() {
        let r = Redactor::new(RedactionRuleSet::default(), true);
        let mut w = witness_with("harmless", "plain value");
        r.redact(&mut w);
        assert_eq!(w.meta.obfuscation_state, ObfuscationState::Zeroed);
        assert!(matches!(
            &w.args["harmless"],
            Data::Primitive { value: Primitive::String(s), .. } if s == "[redacted]"
        ));
    }

    #[test]
    fn rule_refresh_is_visible_to_subsequent_redact_calls() {
        let r = Redactor::new(RedactionRuleSet::default(), false);
        let mut w = witness_with("x-trace-id", "t-1");
        r.redact(&mut w);
        assert_eq!(w.meta.obfuscation_state, ObfuscationState::None);

        r.update_rules(RedactionRuleSet {
            field_names: vec!["x-trace-id".to_string()],
            ..Default::default()
        });
        let mut w2 = witness_with("x-trace-id", "t-2");
        r.redact(&mut w2);
        assert_eq!(w2.meta.obfuscation_state, ObfuscationState::Redacted);
    }

    #[test]
    fn benign_cookie_is_redacted_regardless_of_name_or_value() {
        let r = Redactor::new(RedactionRuleSet::default(), false);
        let mut w = witness_with_location("theme", "dark", LocationMeta::Cookie { key: "theme".to_string() });
        r.redact(&mut w);
        assert!(matches!(
            &w.args["theme"],
            Data::Primitive { value: Primitive::String(s), .. } if s == "[redacted]"
        ));
    }

    #[test]
    fn auth_location_is_redacted_even_with_no_matching_name_rule() {
        let r = Redactor::new(RedactionRuleSet::default(), false);
        let mut w = witness_with_location("bearer", "anything at all", LocationMeta::Auth);
        r.redact(&mut w);
        assert!(matches!(
            &w.args["bearer"],
            Data::Primitive { value: Primitive::String(s), .. } if s == "[redacted]"
        ));
    }

    #[test]
    fn path_template_segment_matching_a_sensitive_value_regex_is_redacted() {
        let rules = RedactionRuleSet {
            value_regexps: vec![r"^[\w.+-]+@[\w.-]+$".to_string()],
            ..Default::default()
        };
        let r = Redactor::new(rules, false);
        let mut w = witness_with("harmless", "plain");
        w.method.path_template = "/users/person@example.com/profile".to_string();
        r.redact(&mut w);
        assert_eq!(w.method.path_template, "/users/[redacted]/profile");
    }

    #[test]
    fn zero_all_primitives_mode_preserves_trace_context_headers() {
        let r = Redactor::new(RedactionRuleSet::default(), true);
        let mut w = witness_with("traceparent", "00-abc-def-01");
        r.redact(&mut w);
        assert!(matches!(
            &w.args["traceparent"],
            Data::Primitive { value: Primitive::String(s), .. } if s == "00-abc-def-01"
        ));

        let mut w2 = witness_with("TRACESTATE", "vendor=value");
        r.redact(&mut w2);
        assert!(matches!(
            &w2.args["TRACESTATE"],
            Data::Primitive { value: Primitive::String(s), .. } if s == "vendor=value"
        ));
    }
}
