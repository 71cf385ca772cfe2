//! Wire codec for route-memo and dependency headers.
//!
//! A header value is the comma-joined list of segment tokens, optionally
//! followed by `?` and the query encoding of the parameter set:
//!
//! ```text
//! 1,a,2s?id=4&tab=info
//! ```
//!
//! Raw tokens percent-escape `,`, `?`, `%`, spaces and anything outside
//! printable ASCII, so any non-empty segment survives the round trip.

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::params::Params;
use crate::route::{Route, Segment};

const SEGMENT_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b',').add(b'?').add(b'%');

/// How segment tokens are written on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentEncoding {
    /// Tokens are opaque strings.
    #[default]
    Raw,
    /// Tokens are base-36 `u64` values. Unparseable tokens are dropped on decode.
    Base36,
}

/// Encode a route and its params as a header value.
pub fn to_header(params: &Params, route: &Route) -> String {
    let path = route
        .iter()
        .map(|segment| utf8_percent_encode(segment.as_str(), SEGMENT_ESCAPE).to_string())
        .collect::<Vec<_>>()
        .join(",");
    let query = params.to_query();
    if query.is_empty() {
        path
    } else {
        format!("{path}?{query}")
    }
}

/// Decode a header value into params and route.
///
/// Spaces around tokens are trimmed and empty tokens skipped. Anything after
/// a second `?` is ignored. A query that fails to decode yields empty params.
pub fn from_header(value: &str, encoding: SegmentEncoding) -> (Params, Route) {
    let mut parts = value.split('?');
    let raw_route = parts.next().unwrap_or_default();
    let raw_query = parts.next().unwrap_or_default();

    let route = raw_route
        .split(',')
        .map(|token| token.trim_matches(' '))
        .filter(|token| !token.is_empty())
        .filter_map(|token| match encoding {
            SegmentEncoding::Raw => Some(Segment::new(percent_decode_str(token).decode_utf8_lossy())),
            SegmentEncoding::Base36 => Segment::parse_index(token),
        })
        .collect();

    let params = Params::from_query(raw_query).unwrap_or_else(|e| {
        debug!(error = %e, "discarding undecodable header query");
        Params::new()
    });

    (params, route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn route(s: &[&str]) -> Route {
        s.iter().copied().collect()
    }

    #[test]
    fn route_only() {
        assert_eq!(to_header(&Params::new(), &route(&["a", "b"])), "a,b");
    }

    #[test]
    fn route_and_params() {
        let params = Params::new().with("tab", ["info"]).with("id", ["4"]);
        let value = to_header(&params, &route(&["1", "a", "2s"]));
        insta::assert_snapshot!(value, @"1,a,2s?id=4&tab=info");
    }

    #[test]
    fn empty_route_with_params() {
        let params = Params::new().with("q", ["x y"]);
        assert_eq!(to_header(&params, &Route::new()), "?q=x+y");
    }

    #[test]
    fn decode_raw_trims_spaces() {
        let (params, r) = from_header(" a , b ,c?id=1", SegmentEncoding::Raw);
        assert_eq!(r, route(&["a", "b", "c"]));
        assert_eq!(params.first("id"), Some("1"));
    }

    #[test]
    fn decode_base36_drops_invalid_and_normalizes() {
        let (_, r) = from_header("1, Z ,not-a-number,10", SegmentEncoding::Base36);
        assert_eq!(
            r,
            [Segment::index(1), Segment::index(35), Segment::index(36)]
                .into_iter()
                .collect::<Route>()
        );
    }

    #[test]
    fn decode_bad_query_yields_empty_params() {
        let (params, r) = from_header("a?x=%zz", SegmentEncoding::Raw);
        assert!(params.is_empty());
        assert_eq!(r, route(&["a"]));
    }

    #[test]
    fn decode_ignores_after_second_question_mark() {
        let (params, _) = from_header("a?x=1?y=2", SegmentEncoding::Raw);
        assert_eq!(params.first("x"), Some("1"));
        assert!(!params.contains("y"));
    }

    #[test]
    fn decode_empty_value() {
        let (params, r) = from_header("", SegmentEncoding::Raw);
        assert!(params.is_empty());
        assert!(r.is_empty());
    }

    #[test]
    fn encode_then_decode_agrees() {
        let params = Params::new().with("q", ["a&b", "c d"]);
        let r = route(&["home", "items"]);
        let (p2, r2) = from_header(&to_header(&params, &r), SegmentEncoding::Raw);
        assert_eq!(p2, params);
        assert_eq!(r2, r);
    }

    #[test]
    fn raw_separators_are_escaped() {
        let r = route(&["a,b", "what?", "100%", " padded "]);
        let value = to_header(&Params::new().with("x", ["1"]), &r);
        insta::assert_snapshot!(value, @"a%2Cb,what%3F,100%25,%20padded%20?x=1");
        assert_eq!(from_header(&value, SegmentEncoding::Raw).1, r);
    }

    #[test]
    fn escaped_comma_is_not_a_separator() {
        let (_, joined) = from_header("a%2Cb", SegmentEncoding::Raw);
        let (_, split) = from_header("a,b", SegmentEncoding::Raw);
        assert_eq!(joined, route(&["a,b"]));
        assert_eq!(split, route(&["a", "b"]));
        assert_ne!(joined, split);
    }

    proptest! {
        #[test]
        fn raw_route_roundtrips(segments in proptest::collection::vec(".+", 0..5)) {
            let r: Route = segments.iter().map(String::as_str).collect();
            let (_, decoded) = from_header(&to_header(&Params::new(), &r), SegmentEncoding::Raw);
            prop_assert_eq!(decoded, r);
        }
    }

    #[test]
    fn encoding_serde_lowercase() {
        let json = serde_json::to_string(&SegmentEncoding::Base36).unwrap();
        assert_eq!(json, "\"base36\"");
    }
}
