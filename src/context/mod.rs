//! Per-request context handed to middleware and route handlers.

use std::collections::HashMap;

use crate::Request;

/// Path parameters extracted from the matched route.
///
/// Wildcard routes store the matched tail under [`PathParams::WILDCARD`].
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    values: HashMap<String, String>,
}

impl PathParams {
    /// Key under which a `/prefix/*` route stores the remainder of the path.
    pub const WILDCARD: &'static str = "wildcard";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the tail captured by a wildcard route, if any.
    pub fn wildcard(&self) -> Option<&str> {
        self.get(Self::WILDCARD)
    }
}

/// A request travelling through the middleware stack and router.
///
/// Middleware sees a `Context` with empty params; the router fills them in
/// once a route has matched.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    /// A context with no route params yet.
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    /// Create a context carrying the params captured by a matched route.
    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Hands the request back, e.g. so the router can re-match it.
    pub fn into_request(self) -> Request {
        self.request
    }
}
