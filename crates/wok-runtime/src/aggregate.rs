//! Folding instance outputs into one response.

use wok_core::Output;

use crate::dedupe::Deduper;
use crate::plan::Payload;

/// Merge outputs in tree order.
///
/// Side effects contribute nothing. A dependency plan renders every key
/// loaded at this moment, in load order.
pub fn aggregate<'a, I>(contributions: I, deduper: &Deduper) -> Output
where
    I: IntoIterator<Item = (&'a Payload, Output)>,
{
    let mut parts = Vec::new();
    for (payload, output) in contributions {
        match payload {
            Payload::SideEffect(_) => {}
            Payload::Deps(render) => {
                parts.extend(deduper.snapshot().iter().map(|key| render(key)));
            }
            Payload::Run(_) | Payload::Static(_) => parts.push(output),
        }
    }
    Output::list(parts)
}
