//! The serving loop: cadence, dispatch and teardown

use std::fs;
use std::panic::{self, AssertUnwindSafe};

use candle_core::Device;
use super::fixtures::*;
use super::init_test_logging;
use trainctl::checkpoint::{LATEST, META_FILE};
use trainctl::control::pair;
use trainctl::{Control, Driver, DriverState, Error, Fixed, OwnedState, Request, Response, Result};

fn driver(ws: &Workspace, save_every: u64) -> Result<Driver> {
    let mut settings = ws.settings();
    settings.save_every = save_every;
    Driver::builder(config("served", 0.1), &ws.script)
        .settings(settings)
        .state("model", OwnedState::stateful(linear_model(&Device::Cpu)))
        .control(Control::input("increment_lr", "Double a value", "0.1", |_, v| {
            let v: f64 = v.trim().parse()?;
            Ok(v * 2.0)
        }))
        .control(Control::input("set_lr", "Set the learning rate", "0.01", |ctx, v| {
            let lr: f64 = v.trim().parse()?;
            ctx.config.set("lr", lr);
            Ok(format!("lr set to {lr} at step {}", ctx.global_step()))
        }))
        .control(Control::action("snapshot", "Save a named checkpoint", |ctx| {
            let dir = ctx.save_checkpoint("snapshot")?;
            Ok(dir.display().to_string())
        }))
        .decision(Fixed(true))
        .build()
}

#[test]
fn test_one_latest_save_per_cadence_window() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let mut driver = driver(&ws, 4)?;
    driver.register()?;

    let mut scope = driver.serve()?;
    let mut saved_at = Vec::new();
    for _ in 0..12 {
        let before = scope.global_step();
        if scope.step()?.checkpoint.is_some() {
            saved_at.push(before);
        }
    }
    assert_eq!(saved_at, vec![3, 7, 11]);
    scope.finish()?;
    Ok(())
}

#[test]
fn test_requests_are_dispatched_between_steps() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let mut driver = driver(&ws, 1000)?;
    driver.register()?;
    let (worker, mut client) = pair(driver.session_info());
    assert_eq!(client.list_controls().len(), 3);

    let mut scope = driver.serve_with_channel(worker)?;

    // nothing waiting
    let idle = scope.step()?;
    assert_eq!(idle.handled, None);

    client.endpoint().submit(Request::input("increment_lr", "0.1"))?;
    let report = scope.step()?;
    assert_eq!(report.handled.map(|(_, r)| r), Some(Response::ok("0.2")));
    let answered = client.endpoint().recv_response()?;
    assert_eq!(answered.content, "0.2");
    assert!(answered.success);

    client.endpoint().submit(Request::input("set_lr", "0.05"))?;
    scope.step()?;
    let answered = client.endpoint().recv_response()?;
    assert_eq!(answered.content, "lr set to 0.05 at step 3");
    assert_eq!(scope.config().get_f64("lr"), Some(0.05));
    // the controller sees the configuration the callback left behind
    assert_eq!(answered.config.as_ref(), Some(scope.config()));

    client.endpoint().submit(Request::action("snapshot"))?;
    scope.step()?;
    assert!(client.endpoint().recv_response()?.success);
    assert!(scope.run_dir().unwrap().join("snapshot").join(META_FILE).exists());

    scope.finish()?;
    Ok(())
}

#[test]
fn test_unknown_control_changes_nothing() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let mut driver = driver(&ws, 1000)?;
    driver.register()?;
    let (worker, mut client) = pair(driver.session_info());
    let mut scope = driver.serve_with_channel(worker)?;

    let config_before = scope.config().clone();
    client.endpoint().submit(Request::input("does_not_exist", ""))?;
    let report = scope.step()?;

    assert_eq!(report.global_step, 1);
    assert_eq!(scope.config(), &config_before);
    let response = client.endpoint().recv_response()?;
    assert!(!response.success);
    assert_eq!(response.content, "unknown control: does_not_exist");
    Ok(())
}

#[test]
fn test_unwinding_out_of_scope_still_saves() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let mut driver = driver(&ws, 1000)?;
    driver.register()?;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut scope = driver.serve().unwrap();
        scope.step().unwrap();
        scope.step().unwrap();
        panic!("loss went to NaN");
    }));
    assert!(outcome.is_err());

    assert_eq!(driver.state(), DriverState::Terminating);
    let meta = fs::read_to_string(ws.run_dir("served").join(LATEST).join(META_FILE))?;
    assert_eq!(meta, r#"{"global_step":2}"#);
    Ok(())
}

#[test]
fn test_lifecycle_order_is_enforced() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let mut driver = driver(&ws, 1000)?;

    assert!(matches!(driver.serve(), Err(Error::State(_))));
    driver.register()?;
    assert!(matches!(driver.register(), Err(Error::State(_))));
    Ok(())
}

#[test]
fn test_duplicate_control_names_fail_to_build() {
    let ws = Workspace::new();
    let result = Driver::builder(config("dupes", 0.1), &ws.script)
        .settings(ws.settings())
        .control(Control::action("save", "one", |_| Ok("")))
        .control(Control::action("save", "two", |_| Ok("")))
        .build();
    assert!(matches!(result, Err(Error::Config(_))));
}
