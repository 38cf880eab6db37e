//! A minimal but realistic [`Witness`] for exercising the collector,
//! redactor, and uploader without going through live capture and parsing.

use capture_protocol::{
    Data, LocationMeta, MethodDescriptor, ObfuscationState, Primitive, Witness, WitnessMeta,
};
use std::collections::BTreeMap;

pub struct WitnessBuilder {
    verb: String,
    host: String,
    path: String,
    args: BTreeMap<String, Data>,
    responses: BTreeMap<String, Data>,
}

impl WitnessBuilder {
    pub fn new(host: &str, path: &str) -> Self {
        WitnessBuilder {
            verb: "GET".to_string(),
            host: host.to_string(),
            path: path.to_string(),
            args: BTreeMap::new(),
            responses: BTreeMap::new(),
        }
    }

    pub fn verb(mut self, verb: &str) -> Self {
        self.verb = verb.to_string();
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.args.insert(
            format!("header:{key}"),
            Data::Primitive {
                value: Primitive::String(value.to_string()),
                location: Some(LocationMeta::Header { key: key.to_string() }),
            },
        );
        self
    }

    pub fn with_response(mut self, status: u16) -> Self {
        self.responses.insert(
            status.to_string(),
            Data::Primitive { value: Primitive::Bytes { len: 0 }, location: Some(LocationMeta::Body { content_type: None }) },
        );
        self
    }

    pub fn build(self) -> Witness {
        Witness {
            id: uuid::Uuid::new_v4(),
            method: MethodDescriptor { verb: self.verb, host: self.host, path_template: self.path },
            args: self.args,
            responses: self.responses,
            meta: WitnessMeta {
                captured_interface: "eth0".to_string(),
                stream_id: "test-stream".to_string(),
                request_observed_at_ms: Some(0),
                response_observed_at_ms: None,
                request_bytes: 0,
                response_bytes: 0,
                obfuscation_state: ObfuscationState::None,
            },
        }
    }
}

pub fn sample_witness(host: &str, path: &str) -> Witness {
    WitnessBuilder::new(host, path).with_response(200).build()
}
