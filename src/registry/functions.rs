//! Function registry - name to callable lookup consulted at node execution time
//!
//! Nodes hold function names, never callables, so a binding registered (or
//! replaced) after a workflow is registered still takes effect for nodes that
//! have not run yet.

use super::RegistryError;
use crate::Data;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Failure raised by a node function itself
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FunctionError {
    pub message: String,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for FunctionError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for FunctionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for FunctionError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("invalid data: {}", e))
    }
}

/// A callable bound to a name in the registry
///
/// Task and loop-body functions return a mapping that the engine merges into
/// the run data. Condition functions return a branch label, and loop
/// predicates return a bool.
#[async_trait]
pub trait NodeFunction: Send + Sync {
    async fn call(&self, data: &Data) -> Result<Value, FunctionError>;
}

/// Adapter for plain synchronous closures
pub struct SyncFunction<F>(F);

#[async_trait]
impl<F> NodeFunction for SyncFunction<F>
where
    F: Fn(&Data) -> Result<Value, FunctionError> + Send + Sync,
{
    async fn call(&self, data: &Data) -> Result<Value, FunctionError> {
        (self.0)(data)
    }
}

/// Adapter for async closures; the closure receives an owned snapshot of the data
pub struct AsyncFunction<F>(F);

#[async_trait]
impl<F, Fut> NodeFunction for AsyncFunction<F>
where
    F: Fn(Data) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FunctionError>> + Send,
{
    async fn call(&self, data: &Data) -> Result<Value, FunctionError> {
        (self.0)(data.clone()).await
    }
}

/// Wrap a synchronous closure
pub fn sync_fn<F>(f: F) -> SyncFunction<F>
where
    F: Fn(&Data) -> Result<Value, FunctionError> + Send + Sync,
{
    SyncFunction(f)
}

/// Wrap an async closure
pub fn async_fn<F, Fut>(f: F) -> AsyncFunction<F>
where
    F: Fn(Data) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FunctionError>> + Send,
{
    AsyncFunction(f)
}

#[derive(Default)]
struct Bindings {
    functions: HashMap<String, Arc<dyn NodeFunction>>,
    order: Vec<String>,
}

/// Process-scoped name to callable table
///
/// Writes take the single writer lock; resolutions share the read lock and
/// release it before the function is invoked.
#[derive(Default)]
pub struct FunctionRegistry {
    bindings: RwLock<Bindings>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to a function; an existing binding is replaced (last write wins)
    pub fn register(&self, name: impl Into<String>, function: impl NodeFunction + 'static) {
        self.register_arc(name, Arc::new(function));
    }

    /// Bind `name` to a synchronous closure
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&Data) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.register(name, sync_fn(f));
    }

    /// Bind `name` to an async closure
    pub fn register_async<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Data) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FunctionError>> + Send + 'static,
    {
        self.register(name, async_fn(f));
    }

    /// Bind `name` to a shared function object
    pub fn register_arc(&self, name: impl Into<String>, function: Arc<dyn NodeFunction>) {
        let name = name.into();
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);

        if bindings.functions.insert(name.clone(), function).is_some() {
            tracing::warn!(function = %name, "Replaced existing function binding");
        } else {
            tracing::debug!(function = %name, "Registered function");
            bindings.order.push(name);
        }
    }

    /// Look up a function by name
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn NodeFunction>, RegistryError> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnresolvedFunction {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.functions.contains_key(name)
    }

    /// Registered names, in first-registration order
    pub fn names(&self) -> Vec<String> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.order.clone()
    }

    pub fn len(&self) -> usize {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
