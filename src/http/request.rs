use std::collections::HashMap;
use std::net::SocketAddr;

use crate::dispatch::{host_tokens, path_tokens};
use crate::http::body::BodyState;

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    OPTIONS,
    PATCH,
}

impl Method {
    /// Parses an HTTP method from its wire form (case-sensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }
}

/// HTTP protocol versions the engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// One request cycle's state.
///
/// Created fresh per cycle by the connection state machine, mutated only by
/// the machine itself and by handler-invoked primitives, and discarded when
/// the cycle ends (or carried into the framing session on upgrade).
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub version: Version,
    peer: SocketAddr,
    local_port: u16,
    raw_host: String,
    host_toks: Vec<String>,
    raw_path: String,
    path_toks: Vec<String>,
    /// Parsed on first access.
    query: Option<Vec<(String, String)>>,
    /// Keys are ASCII-lowercased at parse time.
    headers: HashMap<String, String>,
    pub bindings: HashMap<String, String>,
    pub(crate) body: BodyState,
    pub(crate) replied: bool,
    keep_alive: bool,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        version: Version,
        peer: SocketAddr,
        local_port: u16,
        target: &str,
        headers: HashMap<String, String>,
        body: BodyState,
    ) -> Self {
        let raw_host = headers.get("host").cloned().unwrap_or_default();
        let host_toks = host_tokens(&raw_host);
        let path_toks = path_tokens(target);
        let keep_alive = derive_keep_alive(version, &headers);

        Self {
            method,
            version,
            peer,
            local_port,
            raw_host,
            host_toks,
            raw_path: target.to_string(),
            path_toks,
            query: None,
            headers,
            bindings: HashMap::new(),
            body,
            replied: false,
            keep_alive,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The port this listener accepted the connection on.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Raw Host header value, port included if the client sent one.
    pub fn host(&self) -> &str {
        &self.raw_host
    }

    pub fn host_tokens(&self) -> &[String] {
        &self.host_toks
    }

    /// Raw request target, query string included.
    pub fn path(&self) -> &str {
        &self.raw_path
    }

    pub fn path_tokens(&self) -> &[String] {
        &self.path_toks
    }

    /// Retrieves a header value by name, case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// A value captured by a binding token during dispatch.
    pub fn binding(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(|v| v.as_str())
    }

    /// Query parameters, parsed from the request target on first call.
    pub fn query_params(&mut self) -> &[(String, String)] {
        if self.query.is_none() {
            let q = self.raw_path.split_once('?').map_or("", |(_, q)| q);
            let parsed = url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect();
            self.query = Some(parsed);
        }
        self.query.as_deref().unwrap_or(&[])
    }

    /// True once a reply has been written for this cycle.
    pub fn replied(&self) -> bool {
        self.replied
    }

    /// Keep-alive eligibility derived from version and headers at parse
    /// time. Actually looping also requires a sent reply and a drained body.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

fn derive_keep_alive(version: Version, headers: &HashMap<String, String>) -> bool {
    let conn = headers.get("connection").map(|v| v.as_str());
    match version {
        // HTTP/1.1 defaults to keep-alive unless the client opts out.
        Version::Http11 => !conn.is_some_and(|v| v.eq_ignore_ascii_case("close")),
        // HTTP/1.0 must opt in.
        Version::Http10 => conn.is_some_and(|v| v.eq_ignore_ascii_case("keep-alive")),
    }
}

/// Builder for constructing Request values outside the parser, mostly in
/// handler unit tests.
pub struct RequestBuilder {
    method: Method,
    version: Version,
    peer: SocketAddr,
    local_port: u16,
    target: String,
    headers: HashMap<String, String>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            version: Version::Http11,
            peer: "127.0.0.1:0".parse().expect("static addr"),
            local_port: 0,
            target: "/".to_string(),
            headers: HashMap::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    pub fn build(self) -> Request {
        Request::new(
            self.method,
            self.version,
            self.peer,
            self.local_port,
            &self.target,
            self.headers,
            BodyState::None,
        )
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
