//! Resuming runs from checkpoints written by the driver

use std::fs;

use candle_core::{DType, Device, Tensor, Var};
use super::fixtures::*;
use super::init_test_logging;
use trainctl::checkpoint::{CheckpointStore, META_FILE};
use trainctl::{Driver, Fixed, OwnedState, Result, Scripted, Stateful};

fn flatten(state: &std::collections::HashMap<String, Tensor>) -> Vec<(String, Vec<f32>)> {
    let mut flat: Vec<_> = state
        .iter()
        .map(|(name, t)| (name.clone(), t.flatten_all().unwrap().to_vec1::<f32>().unwrap()))
        .collect();
    flat.sort_by(|a, b| a.0.cmp(&b.0));
    flat
}

#[test]
fn test_named_checkpoint_restores_step_and_tensors() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let device = Device::Cpu;

    let model = linear_model(&device);
    let scale = Var::from_tensor(&Tensor::new(&[1.5f32, -2.0, 0.25], &device)?)?;
    let mut driver = Driver::builder(config("resume", 0.1), &ws.script)
        .settings(ws.settings())
        .state("model", OwnedState::stateful(model.clone()))
        .state("scale", OwnedState::raw_tensor(scale.clone()))
        .decision(Fixed(true))
        .build()?;
    driver.register()?;
    {
        let mut scope = driver.serve()?;
        for _ in 0..5 {
            scope.step()?;
        }
        scope.save_checkpoint("x")?;
        scope.finish()?;
    }
    let saved = flatten(&model.state_dict()?);

    let fresh = linear_model(&device);
    let fresh_scale = Var::zeros(3, DType::F32, &device)?;
    let store_dir = ws.run_dir("resume");
    let mut store = CheckpointStore::new(&store_dir, device.clone());
    store.insert("model", OwnedState::stateful(fresh.clone()))?;
    store.insert("scale", OwnedState::raw_tensor(fresh_scale.clone()))?;

    let step = store.load("x", &mut Scripted::default())?;
    assert_eq!(step, Some(5));
    assert_eq!(flatten(&fresh.state_dict()?), saved);
    assert_eq!(fresh_scale.to_vec1::<f32>()?, vec![1.5, -2.0, 0.25]);
    Ok(())
}

#[test]
fn test_driver_resumes_global_step() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let device = Device::Cpu;

    let mut first = Driver::builder(config("steps", 0.1), &ws.script)
        .settings(ws.settings())
        .state("model", OwnedState::stateful(linear_model(&device)))
        .decision(Fixed(true))
        .build()?;
    first.register()?;
    let mut scope = first.serve()?;
    for _ in 0..12 {
        scope.step()?;
    }
    scope.finish()?;

    let meta = fs::read_to_string(ws.run_dir("steps").join("latest").join(META_FILE))?;
    assert_eq!(meta, r#"{"global_step":12}"#);

    // Same configuration again: confirm the duplicate and the overwrite
    let mut second = Driver::builder(config("steps", 0.1), &ws.script)
        .settings(ws.settings())
        .state("model", OwnedState::stateful(linear_model(&device)))
        .decision(Fixed(true))
        .build()?;
    second.register()?;
    second.load_checkpoint(Some("latest"))?;
    assert_eq!(second.global_step(), 12);
    Ok(())
}

#[test]
fn test_checkpoint_path_outside_run_directory() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let device = Device::Cpu;

    let source = linear_model(&device);
    let elsewhere = ws.path().join("exported");
    let mut exporting = CheckpointStore::new(&elsewhere, device.clone());
    exporting.insert("model", OwnedState::stateful(source.clone()))?;
    let dir = exporting.save("snapshot", 3)?;

    let target = linear_model(&device);
    let mut store = CheckpointStore::new(ws.run_dir("other"), device);
    store.insert("model", OwnedState::stateful(target.clone()))?;
    let step = store.load(dir.to_str().unwrap_or_default(), &mut Scripted::default())?;

    assert_eq!(step, Some(3));
    assert_eq!(flatten(&target.state_dict()?), flatten(&source.state_dict()?));
    Ok(())
}
