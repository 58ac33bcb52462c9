// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! End-to-end behavior of dual-breaker-protected resources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use culpable::{Blame, Culpable};
use fusebox::breaker::{BreakerMetrics, BreakerMode};
use fusebox::bus::Event;
use fusebox::options::{AdaptiveOptions, ClassicOptions, ResourceOptions};
use fusebox::{AcquireArgs, AcquireError, Engine, Environment, ProtectedResource};
use metronome::ClockControl;

#[derive(Debug)]
enum UpstreamError {
    Unavailable,
}

impl Culpable for UpstreamError {
    fn blame(&self) -> Blame {
        Blame::dependency()
    }
}

fn dual_options() -> ResourceOptions {
    ResourceOptions::dual(
        ClassicOptions::builder()
            .error_threshold(3)
            .error_timeout(Duration::from_secs(15))
            .success_threshold(2)
            .build()
            .expect("valid options"),
        AdaptiveOptions::default(),
    )
    .without_bulkhead()
}

fn dual_metrics(resource: &ProtectedResource) -> (BreakerMode, u64, u64) {
    let BreakerMetrics::Dual { active, adaptive, .. } = resource.metrics() else {
        panic!("expected dual metrics");
    };
    (active, adaptive.successes, adaptive.errors)
}

#[test]
fn selector_flip_emits_exactly_one_mode_change() {
    let control = ClockControl::new();
    let adaptive_turn = Arc::new(AtomicBool::new(false));
    let adaptive_turn_selector = Arc::clone(&adaptive_turn);

    let engine = Engine::builder()
        .environment(Environment::enabled())
        .dual_selector(move |_| adaptive_turn_selector.load(Ordering::SeqCst))
        .build(&control.to_clock());

    let changes = Arc::new(Mutex::new(Vec::new()));
    let changes_clone = Arc::clone(&changes);
    let _ = engine.bus().subscribe(move |notification| {
        if let Event::ModeChange { old, new } = notification.event {
            changes_clone
                .lock()
                .expect("changes lock")
                .push((notification.resource.to_string(), old, new));
        }
    });

    let resource = engine.register("upstream", dual_options()).expect("registration");

    // Ten calls routed to the classic child: no mode change.
    for _ in 0..10 {
        let ok: Result<_, AcquireError<UpstreamError>> = resource.acquire(AcquireArgs::new(), |_| Ok(()));
        assert!(ok.is_ok());
    }
    assert!(changes.lock().expect("changes lock").is_empty());

    // The eleventh call flips to the adaptive child: exactly one event.
    adaptive_turn.store(true, Ordering::SeqCst);
    let ok: Result<_, AcquireError<UpstreamError>> = resource.acquire(AcquireArgs::new(), |_| Ok(()));
    assert!(ok.is_ok());
    let ok: Result<_, AcquireError<UpstreamError>> = resource.acquire(AcquireArgs::new(), |_| Ok(()));
    assert!(ok.is_ok());

    assert_eq!(
        *changes.lock().expect("changes lock"),
        vec![(
            "upstream".to_string(),
            BreakerMode::Classic,
            BreakerMode::Adaptive
        )]
    );
}

#[test]
fn both_children_observe_identical_outcome_histories() {
    let control = ClockControl::new();
    let engine = Engine::builder()
        .environment(Environment::enabled())
        .build(&control.to_clock());
    let resource = engine.register("upstream", dual_options()).expect("registration");

    // Routed to classic throughout; both children must still see every outcome.
    for _ in 0..2 {
        let failed: Result<(), _> = resource.acquire(AcquireArgs::new(), |_| Err(UpstreamError::Unavailable));
        assert!(failed.is_err());
    }
    for _ in 0..5 {
        let ok: Result<_, AcquireError<UpstreamError>> = resource.acquire(AcquireArgs::new(), |_| Ok(()));
        assert!(ok.is_ok());
    }

    let BreakerMetrics::Dual { classic, adaptive, .. } = resource.metrics() else {
        panic!("expected dual metrics");
    };
    assert_eq!(classic.window_failures, 2);
    assert_eq!(adaptive.errors, 2);
    assert_eq!(adaptive.successes, 5);
}

#[test]
fn concurrent_outcomes_reach_both_children_equally() {
    let control = ClockControl::new();
    let engine = Engine::builder()
        .environment(Environment::enabled())
        .build(&control.to_clock());
    let resource = engine.register("upstream", dual_options()).expect("registration");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let resource = Arc::clone(&resource);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    resource.mark_success();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    let (_, successes, _) = dual_metrics(&resource);
    assert_eq!(successes, 400);
}

#[test]
fn open_classic_child_rejects_while_active() {
    let control = ClockControl::new();
    let engine = Engine::builder()
        .environment(Environment::enabled())
        .build(&control.to_clock());
    let resource = engine.register("upstream", dual_options()).expect("registration");

    for _ in 0..3 {
        let failed: Result<(), _> = resource.acquire(AcquireArgs::new(), |_| Err(UpstreamError::Unavailable));
        assert!(failed.is_err());
    }

    assert!(resource.is_open());
    let rejected = resource.acquire::<(), UpstreamError, _>(AcquireArgs::new(), |_| unreachable!());
    assert!(matches!(rejected, Err(AcquireError::Rejected(_))));
}
