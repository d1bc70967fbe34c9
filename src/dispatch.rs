//! Request dispatch
//!
//! Maps (host tokens, path tokens) to a handler via an ordered table of
//! fixed-arity token patterns. First match wins; there is deliberately no
//! variable-length wildcard. Matching is a pure function over one table
//! snapshot and never backtracks into already-rejected rules.

use std::collections::HashMap;
use std::sync::Arc;

use crate::http::handler::{HandlerOpts, HttpHandler};

/// One matching unit of a host or path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Matches a segment byte-for-byte.
    Literal(String),
    /// Matches exactly one segment; the value is discarded.
    Wildcard,
    /// Matches exactly one non-empty segment; the value is captured
    /// under the given name.
    Bind(String),
}

impl Token {
    pub fn lit(s: impl Into<String>) -> Self {
        Token::Literal(s.into())
    }

    pub fn bind(name: impl Into<String>) -> Self {
        Token::Bind(name.into())
    }
}

/// A host or path pattern: either match-any or a fixed-arity token list.
#[derive(Debug, Clone)]
pub enum Matcher {
    Any,
    Tokens(Vec<Token>),
}

impl Matcher {
    pub fn tokens(toks: impl IntoIterator<Item = Token>) -> Self {
        Matcher::Tokens(toks.into_iter().collect())
    }

    /// Match against a segment list. Returns captured bindings on success.
    ///
    /// Token lists match only when lengths are equal and every position
    /// matches; `Any` matches everything and captures nothing.
    fn matches(&self, segments: &[String]) -> Option<Vec<(String, String)>> {
        let toks = match self {
            Matcher::Any => return Some(Vec::new()),
            Matcher::Tokens(toks) => toks,
        };

        if toks.len() != segments.len() {
            return None;
        }

        let mut captured = Vec::new();
        for (tok, seg) in toks.iter().zip(segments) {
            match tok {
                Token::Literal(lit) => {
                    if lit != seg {
                        return None;
                    }
                }
                Token::Wildcard => {}
                Token::Bind(name) => {
                    if seg.is_empty() {
                        return None;
                    }
                    captured.push((name.clone(), seg.clone()));
                }
            }
        }

        Some(captured)
    }
}

/// A (path pattern, handler, options) triple under one host pattern.
#[derive(Clone)]
pub struct Route {
    pub path: Matcher,
    pub handler: Arc<dyn HttpHandler>,
    pub opts: HandlerOpts,
}

impl Route {
    pub fn new(path: Matcher, handler: Arc<dyn HttpHandler>, opts: HandlerOpts) -> Self {
        Self {
            path,
            handler,
            opts,
        }
    }
}

/// One dispatch rule: a host pattern and its ordered routes.
#[derive(Clone)]
pub struct DispatchRule {
    pub host: Matcher,
    pub routes: Vec<Route>,
}

impl DispatchRule {
    pub fn new(host: Matcher, routes: Vec<Route>) -> Self {
        Self { host, routes }
    }
}

/// A successful dispatch: the handler, its table options, and the union of
/// bindings captured at host and path level.
#[derive(Clone)]
pub struct Match {
    pub handler: Arc<dyn HttpHandler>,
    pub opts: HandlerOpts,
    pub bindings: HashMap<String, String>,
}

/// Ordered routing table. Order is significant: first match wins.
///
/// The table is never mutated during matching; swap it atomically between
/// requests if routes need to change.
#[derive(Clone, Default)]
pub struct DispatchTable {
    rules: Vec<DispatchRule>,
}

impl DispatchTable {
    pub fn new(rules: Vec<DispatchRule>) -> Self {
        Self { rules }
    }

    /// Match raw host and path against the table.
    ///
    /// A rule whose host matches but whose routes all miss does not stop
    /// the scan; later rules in table order are still considered.
    pub fn matching(&self, host_raw: &str, path_raw: &str) -> Option<Match> {
        let host_segs = host_tokens(host_raw);
        let path_segs = path_tokens(path_raw);

        for rule in &self.rules {
            let Some(host_bound) = rule.host.matches(&host_segs) else {
                continue;
            };

            for route in &rule.routes {
                if let Some(path_bound) = route.path.matches(&path_segs) {
                    let mut bindings = HashMap::new();
                    bindings.extend(host_bound.iter().cloned());
                    bindings.extend(path_bound);
                    return Some(Match {
                        handler: Arc::clone(&route.handler),
                        opts: route.opts.clone(),
                        bindings,
                    });
                }
            }
        }

        None
    }
}

/// Split a raw host into domain labels, dropping any trailing port.
pub fn host_tokens(raw: &str) -> Vec<String> {
    let name = raw.rsplit_once(':').map_or(raw, |(name, _port)| name);
    if name.is_empty() {
        return Vec::new();
    }
    name.split('.').map(str::to_string).collect()
}

/// Split a raw request path into segments, dropping the query string and
/// empty segments from leading/doubled slashes.
pub fn path_tokens(raw: &str) -> Vec<String> {
    let path = raw.split_once('?').map_or(raw, |(path, _query)| path);
    path.split('/')
        .filter(|seg| !seg.is_empty())
        .map(str::to_string)
        .collect()
}
