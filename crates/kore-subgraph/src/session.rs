//! Session-side view of graph values: where each value lives and its index.

use std::collections::HashMap;
use std::fmt;

use kore_core::{Device, KoreError, Result};

/// Execution provider registered with a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionProvider {
    Cpu,
    Cuda(usize),
}

impl ExecutionProvider {
    /// Memory space the provider allocates its outputs in.
    pub fn device(&self) -> Device {
        match self {
            ExecutionProvider::Cpu => Device::Cpu,
            ExecutionProvider::Cuda(idx) => Device::Cuda(*idx),
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionProvider::Cpu => write!(f, "cpu"),
            ExecutionProvider::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

/// Lookup of value placement and indices in a planned session.
///
/// Lookups are pure functions of the value name; unknown names are a
/// [`KoreError::GraphError`].
pub trait SessionState: Send + Sync {
    /// Device the value is allocated on.
    fn memory_location(&self, name: &str) -> Result<Device>;

    /// Dense index of the value in the session's value table.
    fn value_index(&self, name: &str) -> Result<usize>;

    /// Registered providers, in priority order.
    fn providers(&self) -> &[ExecutionProvider];
}

/// In-memory [`SessionState`].
#[derive(Debug, Clone, Default)]
pub struct SessionStateMap {
    providers: Vec<ExecutionProvider>,
    /// Values in index order.
    values: Vec<(String, Device)>,
    /// Map from value name to index in `values`.
    index: HashMap<String, usize>,
}

impl SessionStateMap {
    pub fn new(providers: impl Into<Vec<ExecutionProvider>>) -> Self {
        Self {
            providers: providers.into(),
            ..Self::default()
        }
    }

    /// Register `name` on `device`, returning its index. Registering a name
    /// twice moves it and keeps the original index.
    pub fn register(&mut self, name: impl Into<String>, device: Device) -> usize {
        let name = name.into();
        if let Some(&idx) = self.index.get(&name) {
            self.values[idx].1 = device;
            return idx;
        }
        let idx = self.values.len();
        self.index.insert(name.clone(), idx);
        self.values.push((name, device));
        idx
    }

    pub fn with_value(mut self, name: impl Into<String>, device: Device) -> Self {
        self.register(name, device);
        self
    }

    /// Register every name on the same device.
    pub fn with_values<I, S>(mut self, names: I, device: Device) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.register(name, device);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value_name(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).map(|(name, _)| name.as_str())
    }

    fn lookup(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| KoreError::GraphError(format!("value '{name}' is not known to the session")))
    }
}

impl SessionState for SessionStateMap {
    fn memory_location(&self, name: &str) -> Result<Device> {
        Ok(self.values[self.lookup(name)?].1)
    }

    fn value_index(&self, name: &str) -> Result<usize> {
        self.lookup(name)
    }

    fn providers(&self) -> &[ExecutionProvider] {
        &self.providers
    }
}
