//! Filter contract and the ordered chain.
//!
//! # State Machine (per inbound request)
//! ```text
//! PRE → filter(order 0) → filter(order 1) → ... → ROUTE_DECISION
//!          │ ShortCircuit
//!          └──────────────→ response written, routing never happens
//! ```

use arc_swap::ArcSwap;
use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode, Uri},
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What a filter decided.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterAction {
    Continue,
    ShortCircuit { status: StatusCode, body: Bytes },
}

/// Per-request view handed to each filter. Filters may annotate it through
/// `attributes` for later filters.
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub request_id: String,
    query: Vec<(String, String)>,
    pub attributes: Vec<(String, String)>,
}

impl FilterContext {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        let query = uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        Self {
            method,
            uri,
            headers,
            request_id,
            query,
            attributes: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// First value of a query parameter, decoded.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A pre-routing filter.
pub trait GatewayFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower runs first.
    fn order(&self) -> i32;

    fn should_apply(&self, ctx: &FilterContext) -> bool;

    fn run(&self, ctx: &mut FilterContext) -> FilterAction;
}

/// Chain result.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Route,
    Rejected {
        filter: &'static str,
        status: StatusCode,
        body: Bytes,
    },
}

#[derive(Clone)]
struct Entry {
    seq: u64,
    filter: Arc<dyn GatewayFilter>,
}

/// Filters sorted by `(order, insertion)`. Readers never block; adding a
/// filter swaps in a new list.
#[derive(Default)]
pub struct FilterChain {
    entries: ArcSwap<Vec<Entry>>,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain").field("filters", &self.names()).finish()
    }
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, filter: Arc<dyn GatewayFilter>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(filter = filter.name(), order = filter.order(), "Registering gateway filter");
        self.entries.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Entry {
                seq,
                filter: filter.clone(),
            });
            next.sort_by_key(|e| (e.filter.order(), e.seq));
            next
        });
    }

    /// Filter names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.load().iter().map(|e| e.filter.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Run every applicable filter in order; stop at the first short-circuit.
    pub fn run(&self, ctx: &mut FilterContext) -> ChainOutcome {
        let entries = self.entries.load();
        for entry in entries.iter() {
            let filter = &entry.filter;
            if !filter.should_apply(ctx) {
                continue;
            }
            match filter.run(ctx) {
                FilterAction::Continue => {}
                FilterAction::ShortCircuit { status, body } => {
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        filter = filter.name(),
                        status = %status,
                        "Filter short-circuited request"
                    );
                    return ChainOutcome::Rejected {
                        filter: filter.name(),
                        status,
                        body,
                    };
                }
            }
        }
        ChainOutcome::Route
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        order: i32,
        reject: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl GatewayFilter for Recording {
        fn name(&self) -> &'static str {
            self.name
        }
        fn order(&self) -> i32 {
            self.order
        }
        fn should_apply(&self, ctx: &FilterContext) -> bool {
            !ctx.path().starts_with("/skip")
        }
        fn run(&self, _ctx: &mut FilterContext) -> FilterAction {
            self.log.lock().unwrap().push(self.name);
            if self.reject {
                FilterAction::ShortCircuit {
                    status: StatusCode::FORBIDDEN,
                    body: Bytes::from_static(b"no"),
                }
            } else {
                FilterAction::Continue
            }
        }
    }

    fn filter(name: &'static str, order: i32, reject: bool, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn GatewayFilter> {
        Arc::new(Recording {
            name,
            order,
            reject,
            log: log.clone(),
        })
    }

    fn ctx(uri: &str) -> FilterContext {
        FilterContext::new(Method::GET, uri.parse().unwrap(), HeaderMap::new())
    }

    #[test]
    fn test_ascending_order_with_stable_ties() {
        let log = Arc::default();
        let chain = FilterChain::new();
        chain.add(filter("c", 5, false, &log));
        chain.add(filter("a", 0, false, &log));
        chain.add(filter("b1", 1, false, &log));
        chain.add(filter("b2", 1, false, &log));

        assert_eq!(chain.names(), vec!["a", "b1", "b2", "c"]);
        assert_eq!(chain.run(&mut ctx("/user/hello")), ChainOutcome::Route);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b1", "b2", "c"]);
    }

    #[test]
    fn test_short_circuit_stops_chain() {
        let log = Arc::default();
        let chain = FilterChain::new();
        chain.add(filter("first", 0, true, &log));
        chain.add(filter("second", 1, false, &log));

        let outcome = chain.run(&mut ctx("/user/hello"));
        assert_eq!(
            outcome,
            ChainOutcome::Rejected {
                filter: "first",
                status: StatusCode::FORBIDDEN,
                body: Bytes::from_static(b"no"),
            }
        );
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_inapplicable_filters_are_skipped() {
        let log = Arc::default();
        let chain = FilterChain::new();
        chain.add(filter("reject", 0, true, &log));

        assert_eq!(chain.run(&mut ctx("/skip/me")), ChainOutcome::Route);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_query_params_are_decoded() {
        let c = ctx("/user/hello?accessToken=a%20b&id=1&id=2");
        assert_eq!(c.query_param("accessToken"), Some("a b"));
        assert_eq!(c.query_param("id"), Some("1"));
        assert_eq!(c.query_param("missing"), None);
    }
}
