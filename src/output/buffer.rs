use super::OutputCollector;
use crate::error::{RuntimeError, RuntimeResult};

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking emitter cannot leave a Vec half-pushed.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Single-destination output buffer. Addressed emit is rejected.
pub struct OutputBuffer<T> {
    live: Mutex<Vec<T>>,
}

impl<T> OutputBuffer<T> {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(Vec::new()),
        }
    }

    /// Takes everything emitted so far and leaves an empty buffer behind.
    pub fn drain_and_reset(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.live))
    }

    pub fn len(&self) -> usize {
        lock(&self.live).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for OutputBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> OutputCollector<T> for OutputBuffer<T> {
    fn emit(&self, record: T) {
        lock(&self.live).push(record);
    }

    fn emit_to(&self, destination: &str, _record: T) -> RuntimeResult<()> {
        Err(RuntimeError::CapabilityNotSupported(format!(
            "OutputBuffer has a single destination; cannot emit to '{}'",
            destination
        )))
    }

    fn supports_addressed_emit(&self) -> bool {
        false
    }
}

/// Output buffer with one live buffer per declared downstream vertex plus a default one.
pub struct RoutedOutputBuffer<T> {
    default: Mutex<Vec<T>>,
    routed: BTreeMap<String, Mutex<Vec<T>>>,
}

impl<T> RoutedOutputBuffer<T> {
    pub fn new<I, S>(destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            default: Mutex::new(Vec::new()),
            routed: destinations
                .into_iter()
                .map(|name| (name.into(), Mutex::new(Vec::new())))
                .collect(),
        }
    }

    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.routed.keys().map(String::as_str)
    }

    /// Drains the default output.
    pub fn drain_and_reset(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.default))
    }

    pub fn drain_destination(&self, destination: &str) -> RuntimeResult<Vec<T>> {
        let live = self.routed.get(destination).ok_or_else(|| unknown(destination))?;
        Ok(std::mem::take(&mut *lock(live)))
    }

    /// Drains every declared destination. Each one is swapped on its own.
    pub fn drain_all(&self) -> BTreeMap<String, Vec<T>> {
        self.routed
            .iter()
            .map(|(name, live)| (name.clone(), std::mem::take(&mut *lock(live))))
            .collect()
    }
}

impl<T: Send> OutputCollector<T> for RoutedOutputBuffer<T> {
    fn emit(&self, record: T) {
        lock(&self.default).push(record);
    }

    fn emit_to(&self, destination: &str, record: T) -> RuntimeResult<()> {
        let live = self.routed.get(destination).ok_or_else(|| unknown(destination))?;
        lock(live).push(record);
        Ok(())
    }

    fn supports_addressed_emit(&self) -> bool {
        true
    }
}

fn unknown(destination: &str) -> RuntimeError {
    RuntimeError::InvalidPlan(format!("unknown output destination '{}'", destination))
}
