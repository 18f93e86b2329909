//! Radix-tree route table.
//!
//! One [`matchit`] tree per HTTP method, O(path-length) lookup. Patterns use
//! `:name` for a named segment and `*name` for a catch-all tail; they are
//! translated to matchit's `{name}` / `{*name}` syntax at registration.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use matchit::Router as MatchitRouter;

use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, BoxedRawHandler};
use crate::method::Method;
use crate::middleware::Chain;
use crate::values::Values;

/// What a matched route runs.
#[derive(Clone)]
pub(crate) enum Endpoint {
    /// A context handler behind the registering view's middleware chain.
    Chained {
        handler: BoxedHandler,
        chain: Chain,
        values: Arc<ArcSwap<Values>>,
    },
    /// A raw handler: no middleware, no error handler.
    Raw(BoxedRawHandler),
}

pub(crate) enum Lookup {
    Found {
        endpoint: Endpoint,
        params: HashMap<String, String>,
    },
    /// The path exists under other methods only.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

#[derive(Default)]
pub(crate) struct RouteTable {
    trees: HashMap<Method, MatchitRouter<Endpoint>>,
}

impl RouteTable {
    /// Registers `pattern` (already prefix-joined) for `method`.
    pub(crate) fn insert(&mut self, method: Method, pattern: &str, endpoint: Endpoint) -> Result<()> {
        self.trees
            .entry(method)
            .or_default()
            .insert(to_matchit(pattern), endpoint)
            .map_err(|source| Error::Route { path: pattern.to_owned(), source })
    }

    pub(crate) fn lookup(&self, method: &http::Method, path: &str) -> Lookup {
        let method = Method::from_http(method);

        if let Some(tree) = method.and_then(|m| self.trees.get(&m)) {
            if let Ok(matched) = tree.at(path) {
                let params = matched.params.iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                return Lookup::Found { endpoint: matched.value.clone(), params };
            }
        }

        let mut allowed: Vec<Method> = self.trees.iter()
            .filter(|(m, tree)| Some(**m) != method && tree.at(path).is_ok())
            .map(|(m, _)| *m)
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort();
        Lookup::MethodNotAllowed(allowed)
    }
}

/// Joins a group prefix and a route path the way a slash path join does:
/// empty and `.` segments vanish, `..` pops, the result is rooted and has no
/// trailing slash.
pub(crate) fn join_paths(prefix: &str, route: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in prefix.split('/').chain(route.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// `/users/:id/*rest` → `/users/{id}/{*rest}`. Segments already in matchit
/// syntax pass through.
fn to_matchit(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
