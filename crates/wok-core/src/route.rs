//! Route segments and divergence between routes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of one step in a plan tree.
///
/// Under raw encoding any non-empty string is valid; the header codec escapes
/// separators. Under base-36
/// encoding a segment is the canonical lowercase rendering of a `u64`, as
/// produced by [`Segment::index`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Segment(String);

impl Segment {
    /// Create a segment from any string token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Create a segment from a numeric index, rendered in base 36.
    pub fn index(n: u64) -> Self {
        Self(to_base36(n))
    }

    /// Parse a base-36 token. Returns `None` when it is not a valid `u64`.
    pub fn parse_index(token: &str) -> Option<Self> {
        if token.is_empty() || token.starts_with('+') {
            return None;
        }
        let n = u64::from_str_radix(token, 36).ok()?;
        Some(Self::index(n))
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Self(s)
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(13);
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    buf.into_iter().map(char::from).collect()
}

/// Ordered path of segments from the tree root to the active leaf.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route(Vec<Segment>);

impl Route {
    /// Empty route.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the route has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Segments in order.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Iterate over segments.
    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.0.iter()
    }

    /// The first `len` segments.
    pub fn prefix(&self, len: usize) -> Route {
        Route(self.0[..len.min(self.0.len())].to_vec())
    }

    /// A new route made of `self` followed by `tail`.
    pub fn join<I, S>(&self, tail: I) -> Route
    where
        I: IntoIterator<Item = S>,
        S: Into<Segment>,
    {
        let mut segments = self.0.clone();
        segments.extend(tail.into_iter().map(Into::into));
        Route(segments)
    }

    /// Append one segment.
    pub fn push(&mut self, segment: impl Into<Segment>) {
        self.0.push(segment.into());
    }
}

impl<S: Into<Segment>> FromIterator<S> for Route {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Route(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a Route {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(segment.as_str())?;
        }
        Ok(())
    }
}

/// First position where `next` stops following `prev`.
///
/// Returns `prev.len()` when `prev` is a prefix of (or equal to) `next`.
pub fn divergence(prev: &Route, next: &Route) -> usize {
    prev.iter()
        .enumerate()
        .find(|(i, segment)| next.segments().get(*i) != Some(*segment))
        .map_or(prev.len(), |(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn route(s: &[&str]) -> Route {
        s.iter().copied().collect()
    }

    #[test]
    fn divergence_identical() {
        assert_eq!(divergence(&route(&["a", "b"]), &route(&["a", "b"])), 2);
    }

    #[test]
    fn divergence_at_middle() {
        assert_eq!(divergence(&route(&["a", "b", "c"]), &route(&["a", "e"])), 1);
    }

    #[test]
    fn divergence_prev_is_prefix() {
        assert_eq!(divergence(&route(&["a"]), &route(&["a", "b", "c"])), 1);
    }

    #[test]
    fn divergence_next_is_prefix() {
        assert_eq!(divergence(&route(&["a", "b", "c"]), &route(&["a"])), 1);
    }

    #[test]
    fn divergence_empty_prev() {
        assert_eq!(divergence(&Route::new(), &route(&["a"])), 0);
    }

    #[test]
    fn divergence_root_differs() {
        assert_eq!(divergence(&route(&["x"]), &route(&["a", "b"])), 0);
    }

    #[test]
    fn base36_index() {
        assert_eq!(Segment::index(0).as_str(), "0");
        assert_eq!(Segment::index(35).as_str(), "z");
        assert_eq!(Segment::index(36).as_str(), "10");
        assert_eq!(Segment::index(u64::MAX).as_str(), "3w5e11264sgsf");
    }

    #[test]
    fn parse_index_normalizes_case() {
        assert_eq!(Segment::parse_index("Z"), Some(Segment::index(35)));
        assert_eq!(Segment::parse_index("010"), Some(Segment::index(36)));
    }

    #[test]
    fn parse_index_rejects_garbage() {
        assert_eq!(Segment::parse_index(""), None);
        assert_eq!(Segment::parse_index("+1"), None);
        assert_eq!(Segment::parse_index("a-b"), None);
        assert_eq!(Segment::parse_index("3w5e11264sgsg"), None);
    }

    #[test]
    fn route_display_is_comma_joined() {
        assert_eq!(route(&["a", "b", "c"]).to_string(), "a,b,c");
        assert_eq!(Route::new().to_string(), "");
    }

    #[test]
    fn join_and_prefix() {
        let r = route(&["a", "b", "c"]);
        assert_eq!(r.prefix(1).join(["e"]), route(&["a", "e"]));
        assert_eq!(r.prefix(10), r);
    }

    proptest! {
        #[test]
        fn divergence_is_bounded(a in proptest::collection::vec(0u64..4, 0..6),
                                 b in proptest::collection::vec(0u64..4, 0..6)) {
            let ra: Route = a.iter().map(|n| Segment::index(*n)).collect();
            let rb: Route = b.iter().map(|n| Segment::index(*n)).collect();
            let d = divergence(&ra, &rb);
            prop_assert!(d <= ra.len());
            prop_assert_eq!(ra.prefix(d), rb.prefix(d));
        }

        #[test]
        fn index_roundtrips(n in any::<u64>()) {
            let seg = Segment::index(n);
            prop_assert_eq!(Segment::parse_index(seg.as_str()), Some(seg));
        }
    }
}
