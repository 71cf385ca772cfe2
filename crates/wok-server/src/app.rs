//! Application seam: how a request maps onto a plan tree.

use std::sync::Arc;

use axum::http::{HeaderMap, Method, Uri};
use wok_core::{Params, Route, Segment};
use wok_runtime::PlanNode;

/// Parsed request head, from HTTP or a `REQUEST` frame.
#[derive(Clone, Debug)]
pub struct RequestHead {
    /// Request method.
    pub method: Method,
    /// Request target.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Path component of the target.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Query parameters. An unparseable query yields empty params.
    pub fn query_params(&self) -> Params {
        self.uri
            .query()
            .and_then(|query| Params::from_query(query).ok())
            .unwrap_or_default()
    }

    /// Header value as text, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// What a request resolves to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Target route.
    pub route: Route,
    /// Target params.
    pub params: Params,
    /// Keep a channel invocation open and rerun on `EVENT` updates.
    pub reload_on_events: bool,
}

impl Resolution {
    /// Resolution for `route` with `params`.
    pub fn new(route: Route, params: Params) -> Self {
        Self {
            route,
            params,
            reload_on_events: false,
        }
    }

    /// Rerun on every `EVENT` delivered to the invocation.
    #[must_use]
    pub fn reload_on_events(mut self) -> Self {
        self.reload_on_events = true;
        self
    }
}

/// Supplies the plan tree and resolves requests against it.
pub trait Application: Send + Sync + 'static {
    /// Root of the plan tree.
    fn root(&self) -> Arc<dyn PlanNode>;

    /// Map a request onto a route and params. `None` means not found.
    fn resolve(&self, head: &RequestHead) -> Option<Resolution>;
}

/// Maps each path segment onto a route segment and the query onto params.
///
/// `/` resolves to the empty route. Every path resolves; a path with no
/// matching tree node simply runs no plans.
pub struct PathApplication {
    root: Arc<dyn PlanNode>,
    reload_on_events: bool,
}

impl PathApplication {
    /// Serve `root`.
    pub fn new(root: Arc<dyn PlanNode>) -> Self {
        Self {
            root,
            reload_on_events: false,
        }
    }

    /// Keep channel invocations open for `EVENT` updates.
    #[must_use]
    pub fn reload_on_events(mut self) -> Self {
        self.reload_on_events = true;
        self
    }
}

impl Application for PathApplication {
    fn root(&self) -> Arc<dyn PlanNode> {
        Arc::clone(&self.root)
    }

    fn resolve(&self, head: &RequestHead) -> Option<Resolution> {
        let route: Route = head
            .path()
            .split('/')
            .filter(|part| !part.is_empty())
            .map(Segment::from)
            .collect();
        Some(Resolution {
            route,
            params: head.query_params(),
            reload_on_events: self.reload_on_events,
        })
    }
}

impl std::fmt::Debug for PathApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathApplication")
            .field("reload_on_events", &self.reload_on_events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wok_runtime::StaticNode;

    fn head(target: &str) -> RequestHead {
        RequestHead {
            method: Method::GET,
            uri: target.parse().unwrap(),
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn path_becomes_route() {
        let app = PathApplication::new(StaticNode::new().into_root());
        let res = app.resolve(&head("/users/42/posts?tab=new")).unwrap();
        assert_eq!(res.route, Route::from_iter(["users", "42", "posts"]));
        assert_eq!(res.params.first("tab"), Some("new"));
        assert!(!res.reload_on_events);
    }

    #[test]
    fn root_path_is_empty_route() {
        let app = PathApplication::new(StaticNode::new().into_root());
        let res = app.resolve(&head("/")).unwrap();
        assert!(res.route.is_empty());
        assert!(res.params.is_empty());
    }

    #[test]
    fn bad_query_is_ignored() {
        let h = head("/a?%zz");
        assert!(h.query_params().is_empty());
    }

    #[test]
    fn reload_flag_propagates() {
        let app = PathApplication::new(StaticNode::new().into_root()).reload_on_events();
        assert!(app.resolve(&head("/a")).unwrap().reload_on_events);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut h = head("/");
        let _ = h.headers.insert("x-wok-route", "a,b".parse().unwrap());
        assert_eq!(h.header("X-Wok-Route"), Some("a,b"));
        assert_eq!(h.header("missing"), None);
    }
}
