//! Callables and their serializable references.
//!
//! A job's unit of work is a [`Callable`]. To survive serialization it must be
//! reachable through a textual reference of the form `module:name`, resolved by a
//! [`CallableResolver`]. [`CallableRegistry`] is the in-process resolver.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a callable when invoked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallError(String);

impl CallError {
    /// Create a new call error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors raised while turning a textual reference back into a callable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    /// The reference is not of the form `module:name`.
    #[error("invalid reference '{0}': expected the form 'module:name'")]
    Malformed(String),

    /// Nothing is registered under the reference.
    #[error("no callable registered for reference '{0}'")]
    NotFound(String),
}

type JobFn = dyn Fn(&[Value], &Map<String, Value>) -> Result<Value, CallError> + Send + Sync;

/// A unit of work a job invokes with its positional and keyword arguments.
///
/// Cloning is cheap; clones share the underlying function, which is what
/// [`CallableResolver::derive`] keys on.
#[derive(Clone)]
pub struct Callable {
    func: Arc<JobFn>,
    name: Arc<str>,
}

impl Callable {
    /// Wrap a function, naming it after its Rust type.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[Value], &Map<String, Value>) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        let name = callable_name(std::any::type_name::<F>());
        Self::named(name, func)
    }

    /// Wrap a function under an explicit human-readable name.
    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value], &Map<String, Value>) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            name: Arc::from(name.into()),
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the callable.
    pub fn call(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, CallError> {
        (self.func)(args, kwargs)
    }

    /// Whether both handles share the same underlying function.
    pub fn same_as(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callable").field(&self.name).finish()
    }
}

/// Derive a display name from a Rust type path.
///
/// `app::reports::send_daily` becomes `send_daily`; a closure defined inside
/// `app::jobs::setup` becomes `setup.<closure>`.
fn callable_name(type_name: &str) -> String {
    let path = type_name.split('<').next().unwrap_or(type_name);
    let segments: Vec<&str> = path.split("::").filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        [.., parent, "{{closure}}"] => format!("{}.<closure>", parent),
        [.., last] => (*last).to_string(),
        [] => type_name.to_string(),
    }
}

/// Check that a reference has the `module:name` form.
pub fn validate_reference(reference: &str) -> Result<(), ReferenceError> {
    let valid = reference
        .split_once(':')
        .is_some_and(|(module, name)| {
            !module.is_empty()
                && !name.is_empty()
                && !name.contains(':')
                && !reference.chars().any(char::is_whitespace)
        });

    if valid {
        Ok(())
    } else {
        Err(ReferenceError::Malformed(reference.to_string()))
    }
}

/// Maps textual references to callables and back.
pub trait CallableResolver: Send + Sync {
    /// Resolve a textual reference to a callable.
    fn resolve(&self, reference: &str) -> Result<Callable, ReferenceError>;

    /// Find the textual reference of a callable, if it has one.
    fn derive(&self, callable: &Callable) -> Option<String>;
}

/// In-process resolver built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct CallableRegistry {
    entries: BTreeMap<String, Callable>,
}

impl CallableRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under `reference`, named after the reference's name part.
    ///
    /// Returns the stored [`Callable`] so it can also be handed to jobs directly.
    pub fn register<F>(
        &mut self,
        reference: impl Into<String>,
        func: F,
    ) -> Result<Callable, ReferenceError>
    where
        F: Fn(&[Value], &Map<String, Value>) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        let reference = reference.into();
        validate_reference(&reference)?;
        let name = reference
            .rsplit_once(':')
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| reference.clone());
        let callable = Callable::named(name, func);
        self.entries.insert(reference, callable.clone());
        Ok(callable)
    }

    /// Register an existing callable under `reference`.
    pub fn register_callable(
        &mut self,
        reference: impl Into<String>,
        callable: Callable,
    ) -> Result<(), ReferenceError> {
        let reference = reference.into();
        validate_reference(&reference)?;
        self.entries.insert(reference, callable);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, reference: impl Into<String>, func: F) -> Result<Self, ReferenceError>
    where
        F: Fn(&[Value], &Map<String, Value>) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.register(reference, func)?;
        Ok(self)
    }

    /// Registered references, sorted.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered callables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CallableResolver for CallableRegistry {
    fn resolve(&self, reference: &str) -> Result<Callable, ReferenceError> {
        validate_reference(reference)?;
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| ReferenceError::NotFound(reference.to_string()))
    }

    fn derive(&self, callable: &Callable) -> Option<String> {
        self.entries
            .iter()
            .find(|(_, registered)| registered.same_as(callable))
            .map(|(reference, _)| reference.clone())
    }
}
