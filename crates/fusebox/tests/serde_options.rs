// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! Round-trips of configuration and metric snapshots through serde.

#![cfg(feature = "serde")]

use std::time::Duration;

use fusebox::breaker::BreakerMetrics;
use fusebox::options::{AdaptiveOptions, BaselineOptions, ClassicOptions, ResourceOptions};
use fusebox::{Engine, Environment};
use metronome::ClockControl;

fn classic() -> ClassicOptions {
    ClassicOptions::builder()
        .error_threshold(3)
        .error_threshold_timeout(Duration::from_secs(20))
        .error_timeout(Duration::from_secs(15))
        .success_threshold(2)
        .lumping_interval(Duration::from_secs(5))
        .build()
        .expect("valid options")
}

#[test]
fn classic_options_round_trip() {
    let options = classic();

    let json = serde_json::to_string(&options).expect("serializes");
    let restored: ClassicOptions = serde_json::from_str(&json).expect("deserializes");

    assert_eq!(restored, options);
}

#[test]
fn adaptive_options_round_trip() {
    let options = AdaptiveOptions::default()
        .with_window(Duration::from_secs(5))
        .with_gains(0.8, 0.05, 0.0)
        .with_baseline(BaselineOptions::Quantile { q: 0.75 });

    let json = serde_json::to_string(&options).expect("serializes");
    let restored: AdaptiveOptions = serde_json::from_str(&json).expect("deserializes");

    assert_eq!(restored, options);
}

#[test]
fn resource_options_round_trip_and_still_validate() {
    let options = ResourceOptions::dual(classic(), AdaptiveOptions::default())
        .with_name("primary_db")
        .with_tickets(4)
        .with_acquire_timeout(Duration::from_millis(100));

    let json = serde_json::to_string(&options).expect("serializes");
    let restored: ResourceOptions = serde_json::from_str(&json).expect("deserializes");

    assert_eq!(restored, options);
    restored.validate().expect("restored options validate");
}

#[test]
fn deserialized_options_register_resources() {
    let json = serde_json::to_string(&ResourceOptions::classic(classic()).with_tickets(2)).expect("serializes");
    let options: ResourceOptions = serde_json::from_str(&json).expect("deserializes");

    let control = ClockControl::new();
    let engine = Engine::builder()
        .environment(Environment::enabled())
        .build(&control.to_clock());

    let resource = engine.register("db", options).expect("registration");
    assert!(resource.is_closed());
}

#[test]
fn metric_snapshots_serialize() {
    let control = ClockControl::new();
    let engine = Engine::builder()
        .environment(Environment::enabled())
        .build(&control.to_clock());
    let resource = engine
        .register(
            "upstream",
            ResourceOptions::adaptive(AdaptiveOptions::default()).without_bulkhead(),
        )
        .expect("registration");

    resource.mark_failed("down");
    resource.mark_success();

    let metrics = resource.metrics();
    let json = serde_json::to_string(&metrics).expect("serializes");
    let restored: BreakerMetrics = serde_json::from_str(&json).expect("deserializes");

    assert_eq!(restored, metrics);
}
