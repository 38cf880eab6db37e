//! Matches HTTP requests to responses on the same flow.
//!
//! Requests queue per flow in arrival order; each response dequeues the
//! oldest outstanding request on its flow, which is what correctly pairs
//! pipelined HTTP/1.1 requests sent back-to-back on one connection. A
//! response with no outstanding request (server speaks first) surfaces
//! immediately as a response-only exchange; a request left pending when
//! its flow closes surfaces as request-only.

use crate::dispatcher::DispatchEvent;
use crate::models::FlowKey;
use crate::parser::{HttpRequestContent, HttpResponseContent, ParsedContent};
use std::collections::{HashMap, VecDeque};

/// A paired request/response, or a one-sided witness when either side
/// arrived with no counterpart on its flow.
#[derive(Debug)]
pub struct PairedExchange {
    pub flow_key: FlowKey,
    pub request: Option<HttpRequestContent>,
    pub response: Option<HttpResponseContent>,
}

#[derive(Default)]
pub struct Pairer {
    pending: HashMap<FlowKey, VecDeque<HttpRequestContent>>,
}

impl Pairer {
    /// Feed one dispatch event. Only request/response content produces
    /// anything; other content kinds are ignored here.
    pub fn on_event(&mut self, event: DispatchEvent) -> Option<PairedExchange> {
        match event.content {
            ParsedContent::HttpRequest(req) => {
                self.pending.entry(event.flow_key).or_default().push_back(req);
                None
            }
            ParsedContent::HttpResponse(resp) => {
                let mut should_remove = false;
                let req = self.pending.get_mut(&event.flow_key).and_then(|queue| {
                    let req = queue.pop_front();
                    should_remove = queue.is_empty();
                    req
                });
                if should_remove {
                    self.pending.remove(&event.flow_key);
                }
                Some(PairedExchange {
                    flow_key: event.flow_key,
                    request: req,
                    response: Some(resp),
                })
            }
            _ => None,
        }
    }

    /// Drain any requests still waiting on a response for `flow_key`
    /// (called when the flow closes), each surfaced as a request-only
    /// exchange.
    pub fn flush_flow(&mut self, flow_key: &FlowKey) -> Vec<PairedExchange> {
        self.pending
            .remove(flow_key)
            .into_iter()
            .flatten()
            .map(|request| PairedExchange {
                flow_key: flow_key.clone(),
                request: Some(request),
                response: None,
            })
            .collect()
    }

    pub fn pending_flow_count(&self) -> usize {
        self.pending.len()
    }
}
