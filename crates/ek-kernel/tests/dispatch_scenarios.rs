// SPDX-License-Identifier: Apache-2.0
//! Integration coverage for context propagation, cancellation handles, and
//! predicate-driven once removal.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use ek_kernel::{Kernel, KernelOptions, ListenOptions, Once, Signal};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn later_listeners_observe_context_written_by_earlier_ones() {
    let kernel = Kernel::new(KernelOptions::default());
    kernel
        .on(
            "request",
            Arc::new(|event, _ctx| {
                event.context_set("user_id", json!(42));
                Box::pin(async { Ok(()) })
            }),
            ListenOptions { id: Some("auth".into()), priority: 10, ..ListenOptions::default() },
        )
        .unwrap();

    let seen = Arc::new(std::sync::Mutex::new(None));
    let seen_clone = Arc::clone(&seen);
    kernel
        .on(
            "request",
            Arc::new(move |event, _ctx| {
                let seen = Arc::clone(&seen_clone);
                let value = event.context_get("user_id");
                Box::pin(async move {
                    *seen.lock().unwrap() = value;
                    Ok(())
                })
            }),
            ListenOptions { id: Some("handle".into()), after: vec!["auth".into()], ..ListenOptions::default() },
        )
        .unwrap();

    kernel.emit_serial("request", json!(null)).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(json!(42)));
}

#[tokio::test]
async fn triggered_signal_removes_listener_on_next_registry_touch() {
    let kernel = Kernel::new(KernelOptions::default());
    let signal = Signal::new();
    kernel
        .on(
            "ping",
            Arc::new(|_event, _ctx| Box::pin(async { Ok(()) })),
            ListenOptions { signal: Some(signal.clone()), ..ListenOptions::default() },
        )
        .unwrap();
    assert_eq!(kernel.listener_count(Some("ping")), 1);

    signal.trigger();
    assert_eq!(kernel.listener_count(Some("ping")), 0);
}

#[tokio::test]
async fn once_predicate_is_evaluated_after_the_handler_runs() {
    let kernel = Kernel::new(KernelOptions::default());
    kernel
        .on(
            "retry",
            Arc::new(|event, _ctx| {
                event.context_set("attempts", json!(1));
                Box::pin(async { Ok(()) })
            }),
            ListenOptions {
                id: Some("retrier".into()),
                once: Once::If(Arc::new(|event| event.context_get("attempts") == Some(json!(1)))),
                ..ListenOptions::default()
            },
        )
        .unwrap();

    kernel.emit("retry", json!(null)).await.unwrap();
    assert_eq!(kernel.listener_count(Some("retry")), 0);
}

#[tokio::test]
async fn parallel_waves_run_dependents_only_after_their_dependency_wave_completes() {
    let kernel = Kernel::new(KernelOptions::default());
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    for (id, after) in [("base", vec![]), ("mid", vec!["base".to_owned()]), ("top", vec!["mid".to_owned()])] {
        let order = Arc::clone(&order);
        kernel
            .on(
                "pipeline",
                Arc::new(move |_event, _ctx| {
                    let order = Arc::clone(&order);
                    Box::pin(async move {
                        order.lock().unwrap().push(id.to_owned());
                        Ok(())
                    })
                }),
                ListenOptions { id: Some(id.to_owned()), after, ..ListenOptions::default() },
            )
            .unwrap();
    }

    kernel.emit("pipeline", json!(null)).await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["base", "mid", "top"]);
}
