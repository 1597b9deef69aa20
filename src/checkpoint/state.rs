//! Worker-owned state objects and how each one is serialized

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Anything that can export and re-import its state as named tensors:
/// model parameter maps, optimizer moments, schedulers.
pub trait Stateful {
    /// Snapshot of the current state
    fn state_dict(&self) -> candle_core::Result<HashMap<String, Tensor>>;

    /// Replace the current state with `state`
    fn load_state_dict(&mut self, state: HashMap<String, Tensor>) -> candle_core::Result<()>;
}

impl Stateful for VarMap {
    fn state_dict(&self) -> candle_core::Result<HashMap<String, Tensor>> {
        let data = self
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("var map lock poisoned".to_string()))?;
        Ok(data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect())
    }

    fn load_state_dict(&mut self, state: HashMap<String, Tensor>) -> candle_core::Result<()> {
        let data = self
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("var map lock poisoned".to_string()))?;
        for (name, var) in data.iter() {
            let tensor = state
                .get(name)
                .ok_or_else(|| candle_core::Error::Msg(format!("no saved state for {name}")))?;
            var.set(tensor)?;
        }
        Ok(())
    }
}

impl<T: Stateful> Stateful for Arc<Mutex<T>> {
    fn state_dict(&self) -> candle_core::Result<HashMap<String, Tensor>> {
        self.lock().state_dict()
    }

    fn load_state_dict(&mut self, state: HashMap<String, Tensor>) -> candle_core::Result<()> {
        self.lock().load_state_dict(state)
    }
}

/// How an owned object is checkpointed, decided once at registration
pub enum OwnedState {
    /// Exports a named tensor map
    Stateful(Box<dyn Stateful>),
    /// A single trainable tensor stored as-is
    RawTensor(Var),
}

impl OwnedState {
    /// Wrap a stateful object
    pub fn stateful(object: impl Stateful + 'static) -> Self {
        Self::Stateful(Box::new(object))
    }

    /// Wrap a bare parameter tensor
    pub fn raw_tensor(var: Var) -> Self {
        Self::RawTensor(var)
    }

    pub(crate) fn save(&self, key: &str, path: &Path) -> Result<()> {
        let tensors = match self {
            OwnedState::Stateful(object) => object.state_dict()?,
            OwnedState::RawTensor(var) => HashMap::from([(key.to_string(), var.as_tensor().clone())]),
        };
        candle_core::safetensors::save(&tensors, path)?;
        Ok(())
    }

    pub(crate) fn load(&mut self, key: &str, path: &Path, device: &Device) -> Result<()> {
        let mut tensors = candle_core::safetensors::load(path, device)?;
        match self {
            OwnedState::Stateful(object) => object.load_state_dict(tensors)?,
            OwnedState::RawTensor(var) => {
                let tensor = tensors.remove(key).ok_or_else(|| {
                    Error::checkpoint(format!("{} holds no tensor named {key}", path.display()))
                })?;
                var.set(&tensor)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for OwnedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnedState::Stateful(_) => f.write_str("Stateful"),
            OwnedState::RawTensor(var) => write!(f, "RawTensor({:?})", var.shape()),
        }
    }
}
