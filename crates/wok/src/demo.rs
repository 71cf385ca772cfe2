//! Demo plan tree served by the binary.
//!
//! ```text
//! /app              layout + stylesheet dependencies
//! /app/items?page=N paged list, reruns only when `page` changes
//! /app/old          redirects to /app/items
//! /app/clock        pushes ticks over a channel invocation
//! ```

use std::time::Duration;

use serde_json::json;
use tracing::info;
use wok_core::{Output, Params, Route};
use wok_runtime::{PlanDescriptor, StaticNode, TransportClass};

const PAGE_SIZE: u64 = 3;

fn layout() -> StaticNode {
    StaticNode::new()
        .plan(
            PlanDescriptor::run(|ctx| async move {
                ctx.load(["app.css"]);
                Output::Value(json!({ "layout": "app" }))
            })
            .sync(),
        )
        .plan(PlanDescriptor::deps(|key| Output::Value(json!({ "load": key }))))
        .plan(
            PlanDescriptor::side_effect(|ctx| async move {
                info!(route = %ctx.route(), instance = ?ctx.instance_id(), "visit");
            })
            .always(),
        )
}

fn items() -> StaticNode {
    StaticNode::new().plan(
        PlanDescriptor::run(|ctx| async move {
            ctx.load(["items.css"]);
            let page: u64 = ctx
                .param("page")
                .and_then(|p| p.parse().ok())
                .unwrap_or(1)
                .max(1);
            let first = (page - 1) * PAGE_SIZE + 1;
            let rows: Vec<String> = (first..first + PAGE_SIZE)
                .map(|n| format!("item {n}"))
                .collect();
            Output::Value(json!({ "page": page, "items": rows }))
        })
        .with_params(["page"]),
    )
}

fn old() -> StaticNode {
    StaticNode::new().plan(
        PlanDescriptor::run(|ctx| async move {
            let _ = ctx.partial_redirect(Route::from_iter(["items"]), Params::new());
            Output::Nil
        })
        .sync(),
    )
}

fn clock() -> StaticNode {
    StaticNode::new().plan(
        PlanDescriptor::run(|ctx| async move {
            if ctx.transport() != TransportClass::Socket {
                return Output::Value(json!({ "clock": "connect over /ws for ticks" }));
            }
            let push = ctx.clone();
            drop(tokio::spawn(async move {
                let mut tick: u64 = 0;
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        () = push.cancelled() => break,
                    }
                    tick += 1;
                    if push.send(Output::Value(json!({ "tick": tick }))).await.is_err() {
                        break;
                    }
                }
            }));
            Output::Value(json!({ "clock": "started" }))
        })
        .always(),
    )
}

/// Root of the demo tree.
pub fn tree() -> StaticNode {
    StaticNode::new().child(
        "app",
        layout()
            .child("items", items())
            .child("old", old())
            .child("clock", clock()),
    )
}
