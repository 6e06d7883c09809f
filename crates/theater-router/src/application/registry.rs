//! Source/Destination registry: the name → capability table of live controllers.
//!
//! The registry is built once from the set of active device controllers and
//! is read-only afterwards.  The dispatch engine uses it to resolve a rule's
//! `action_destination` to a callable [`Destination`]; a rule editor uses the
//! descriptors to enumerate legal sources and actions.
//!
//! The engine never owns the controllers' lifetimes beyond the `Arc` handles
//! collected here; controllers remain free to run their own I/O threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use theater_core::{Rule, Value, ValueType};
use thiserror::Error;
use tracing::warn;

/// A device that publishes envelopes.
///
/// Publishing itself goes through an
/// [`EventPublisher`](crate::application::dispatch::EventPublisher) handed to
/// the controller; this trait only describes what it publishes.
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Type of the values this source publishes.
    fn match_type(&self) -> ValueType;
}

/// A device that accepts string-keyed actions with typed arguments.
#[async_trait]
pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    /// Action name → argument type.
    fn actions(&self) -> BTreeMap<String, ValueType>;

    /// Performs `action` with `args` and returns a human-readable result.
    ///
    /// Expected to be short.  Failures are returned as `Err(text)`, never
    /// raised; the engine additionally bounds every call with a timeout.
    async fn route_action(&self, action: &str, args: &Value) -> Result<String, String>;
}

/// Registry entry for a [`Source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub name: String,
    pub match_type: ValueType,
}

/// Registry entry for a [`Destination`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationDescriptor {
    pub name: String,
    pub actions: BTreeMap<String, ValueType>,
}

/// Why a rule does not fit the registered controllers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no source named {0:?}")]
    UnknownSource(String),
    #[error("no destination named {0:?}")]
    UnknownDestination(String),
    #[error("destination {destination:?} has no action {action:?}")]
    UnknownAction { destination: String, action: String },
    #[error("{context} expects {expected}, rule has {actual}")]
    TypeMismatch {
        context: String,
        expected: ValueType,
        actual: ValueType,
    },
}

/// The live controllers handed to
/// [`DispatchEngine::bind_registry`](crate::application::dispatch::DispatchEngine::bind_registry).
///
/// A controller that both publishes and accepts actions is added twice.
#[derive(Default, Clone)]
pub struct Controllers {
    sources: Vec<Arc<dyn Source>>,
    destinations: Vec<Arc<dyn Destination>>,
}

impl Controllers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_destination(mut self, destination: Arc<dyn Destination>) -> Self {
        self.destinations.push(destination);
        self
    }
}

struct DestinationEntry {
    descriptor: DestinationDescriptor,
    handle: Arc<dyn Destination>,
}

/// Read-only name-keyed lookup of sources and destinations.
///
/// `BTreeMap` keeps the descriptors in name order so an editor can list them
/// without sorting.
#[derive(Default)]
pub struct Registry {
    sources: BTreeMap<String, SourceDescriptor>,
    destinations: BTreeMap<String, DestinationEntry>,
}

impl Registry {
    /// Builds descriptors from `controllers`.
    ///
    /// A later controller with a duplicate name replaces an earlier one.
    pub fn build(controllers: &Controllers) -> Self {
        let mut registry = Self::default();

        for source in &controllers.sources {
            let descriptor = SourceDescriptor {
                name: source.name().to_string(),
                match_type: source.match_type(),
            };
            if registry
                .sources
                .insert(descriptor.name.clone(), descriptor)
                .is_some()
            {
                warn!("duplicate source name {:?}; keeping the last one", source.name());
            }
        }

        for destination in &controllers.destinations {
            let descriptor = DestinationDescriptor {
                name: destination.name().to_string(),
                actions: destination.actions(),
            };
            let entry = DestinationEntry {
                descriptor,
                handle: Arc::clone(destination),
            };
            if registry
                .destinations
                .insert(destination.name().to_string(), entry)
                .is_some()
            {
                warn!(
                    "duplicate destination name {:?}; keeping the last one",
                    destination.name()
                );
            }
        }

        registry
    }

    pub fn destination(&self, name: &str) -> Option<&Arc<dyn Destination>> {
        self.destinations.get(name).map(|entry| &entry.handle)
    }

    pub fn source(&self, name: &str) -> Option<&SourceDescriptor> {
        self.sources.get(name)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.values()
    }

    pub fn destinations(&self) -> impl Iterator<Item = &DestinationDescriptor> {
        self.destinations.values().map(|entry| &entry.descriptor)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn destination_count(&self) -> usize {
        self.destinations.len()
    }

    /// Checks that `rule` refers to a registered source, destination and
    /// action, with compatible types.
    ///
    /// Used by editors; the engine itself only requires the destination.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistryError`] found.
    pub fn check_rule(&self, rule: &Rule) -> Result<(), RegistryError> {
        let source = self
            .source(&rule.match_source)
            .ok_or_else(|| RegistryError::UnknownSource(rule.match_source.clone()))?;
        if let Some(actual) = &rule.match_value_type {
            if *actual != source.match_type {
                return Err(RegistryError::TypeMismatch {
                    context: format!("source {:?}", source.name),
                    expected: source.match_type.clone(),
                    actual: actual.clone(),
                });
            }
        }

        let entry = self
            .destinations
            .get(&rule.action_destination)
            .ok_or_else(|| RegistryError::UnknownDestination(rule.action_destination.clone()))?;
        let expected = entry.descriptor.actions.get(&rule.action_name).ok_or_else(|| {
            RegistryError::UnknownAction {
                destination: rule.action_destination.clone(),
                action: rule.action_name.clone(),
            }
        })?;
        if let Some(actual) = &rule.args_type {
            if actual != expected {
                return Err(RegistryError::TypeMismatch {
                    context: format!("{}.{}", rule.action_destination, rule.action_name),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
        Ok(())
    }
}
