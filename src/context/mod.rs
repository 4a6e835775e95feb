//! Resource context — a type-erased, named registry that fixtures resolve
//! their data sources from.
//!
//! Every resource is registered under a unique name. Lookups come in two
//! flavours:
//!
//! - **Named** — [`ResourceLookup::lookup_named`] finds the resource with the
//!   given name and checks that it has the requested type.
//! - **Unique** — [`ResourceLookup::lookup`] finds the single resource of the
//!   requested type. When several match, exactly one of them must be marked
//!   primary (see [`Context::register_primary`]).
//!
//! Values are stored as `Box<dyn Any>` and handed out by clone, so resources
//! are normally registered as cheap handles such as `Arc<dyn DataSource>`.

use std::any::{Any, TypeId, type_name};

use thiserror::Error;

/// Errors produced by context lookups and registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("no resource named '{name}' is registered")]
    NoSuchResource { name: String },

    #[error("resource '{name}' has type {actual}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("no resource of type {type_name} is registered")]
    NoResourceOfType { type_name: &'static str },

    #[error("expected a single resource of type {type_name} but found {}: {candidates:?}", .candidates.len())]
    AmbiguousResource {
        type_name: &'static str,
        candidates: Vec<String>,
    },

    #[error("a resource named '{name}' is already registered")]
    DuplicateName { name: String },
}

/// Lookup capability the fixture loader depends on.
///
/// Implementors decide how resources are stored; [`Context`] is the
/// in-crate registry.
pub trait ResourceLookup {
    /// Returns the single resource of type `T`.
    ///
    /// # Errors
    ///
    /// Fails when no resource of type `T` exists, or when several exist and
    /// the implementation cannot decide between them.
    fn lookup<T>(&self) -> Result<T, ContextError>
    where
        T: Clone + Send + Sync + 'static;

    /// Returns the resource registered under `name`, which must be a `T`.
    fn lookup_named<T>(&self, name: &str) -> Result<T, ContextError>
    where
        T: Clone + Send + Sync + 'static;
}

// A single registered resource.
struct Entry {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    primary: bool,
    value: Box<dyn Any + Send + Sync>,
}

impl Entry {
    fn downcast<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.value.downcast_ref::<T>().cloned()
    }
}

/// Named resource registry.
///
/// # Examples
///
/// ```
/// use dbfixture::context::{Context, ResourceLookup};
///
/// let mut context = Context::new();
/// context.register("greeting", String::from("hello")).unwrap();
///
/// let value: String = context.lookup().unwrap();
/// assert_eq!(value, "hello");
/// ```
#[derive(Default)]
pub struct Context {
    entries: Vec<Entry>,
}

impl Context {
    /// Create a new empty context
    pub fn new() -> Self {
        return Self {
            entries: Vec::new(),
        };
    }

    /// Register `value` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::DuplicateName`] if `name` is already taken.
    pub fn register<T>(&mut self, name: impl Into<String>, value: T) -> Result<(), ContextError>
    where
        T: Send + Sync + 'static,
    {
        self.insert(name.into(), value, false)
    }

    /// Register `value` under `name` and mark it as the primary resource of
    /// its type, used to break ties in unique lookups.
    pub fn register_primary<T>(
        &mut self,
        name: impl Into<String>,
        value: T,
    ) -> Result<(), ContextError>
    where
        T: Send + Sync + 'static,
    {
        self.insert(name.into(), value, true)
    }

    fn insert<T>(&mut self, name: String, value: T, primary: bool) -> Result<(), ContextError>
    where
        T: Send + Sync + 'static,
    {
        if self.contains(&name) {
            return Err(ContextError::DuplicateName { name });
        }

        self.entries.push(Entry {
            name,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            primary,
            value: Box::new(value),
        });
        Ok(())
    }

    /// Returns `true` if a resource is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    /// Names of all resources of type `T`, in registration order.
    pub fn names_for<T>(&self) -> Vec<&str>
    where
        T: Send + Sync + 'static,
    {
        self.entries
            .iter()
            .filter(|entry| entry.type_id == TypeId::of::<T>())
            .map(|entry| entry.name.as_str())
            .collect()
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceLookup for Context {
    fn lookup<T>(&self) -> Result<T, ContextError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let candidates: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|entry| entry.type_id == TypeId::of::<T>())
            .collect();

        let chosen = match candidates.as_slice() {
            [] => {
                return Err(ContextError::NoResourceOfType {
                    type_name: type_name::<T>(),
                });
            }
            [only] => *only,
            many => {
                let mut primaries = many.iter().filter(|entry| entry.primary);
                match (primaries.next(), primaries.next()) {
                    (Some(primary), None) => *primary,
                    _ => {
                        return Err(ContextError::AmbiguousResource {
                            type_name: type_name::<T>(),
                            candidates: self
                                .names_for::<T>()
                                .into_iter()
                                .map(str::to_owned)
                                .collect(),
                        });
                    }
                }
            }
        };

        chosen
            .downcast::<T>()
            .ok_or_else(|| ContextError::NoResourceOfType {
                type_name: type_name::<T>(),
            })
    }

    fn lookup_named<T>(&self, name: &str) -> Result<T, ContextError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| ContextError::NoSuchResource {
                name: name.to_owned(),
            })?;

        entry.downcast::<T>().ok_or(ContextError::TypeMismatch {
            name: name.to_owned(),
            expected: type_name::<T>(),
            actual: entry.type_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // ── Registration ──────────────────────────────────────────────────────────

    #[test]
    fn new_context_is_empty() {
        let context = Context::new();
        assert!(context.is_empty());
        assert_eq!(context.len(), 0);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut context = Context::new();
        context.register("a", 1u32).unwrap();
        let err = context.register("a", String::from("x")).unwrap_err();
        assert_eq!(err, ContextError::DuplicateName { name: "a".into() });
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn names_for_lists_registration_order() {
        let mut context = Context::new();
        context.register("second", 2u32).unwrap();
        context.register("label", "x").unwrap();
        context.register("first", 1u32).unwrap();
        assert_eq!(context.names_for::<u32>(), vec!["second", "first"]);
    }

    // ── Named lookup ──────────────────────────────────────────────────────────

    #[test]
    fn named_lookup_targets_named_resource() {
        let mut context = Context::new();
        context.register("primary", Arc::new(1u32)).unwrap();
        context.register("secondary", Arc::new(2u32)).unwrap();

        let value: Arc<u32> = context.lookup_named("secondary").unwrap();
        assert_eq!(*value, 2);
    }

    #[test]
    fn named_lookup_unknown_name() {
        let context = Context::new();
        let err = context.lookup_named::<u32>("missing").unwrap_err();
        assert!(matches!(err, ContextError::NoSuchResource { name } if name == "missing"));
    }

    #[test]
    fn named_lookup_wrong_type() {
        let mut context = Context::new();
        context.register("n", 7u32).unwrap();
        let err = context.lookup_named::<String>("n").unwrap_err();
        match err {
            ContextError::TypeMismatch { name, actual, .. } => {
                assert_eq!(name, "n");
                assert_eq!(actual, "u32");
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    // ── Unique lookup ─────────────────────────────────────────────────────────

    #[test]
    fn unique_lookup_single_match() {
        let mut context = Context::new();
        context.register("label", String::from("x")).unwrap();
        context.register("only", 5u32).unwrap();
        assert_eq!(context.lookup::<u32>().unwrap(), 5);
    }

    #[test]
    fn unique_lookup_no_match() {
        let context = Context::new();
        assert!(matches!(
            context.lookup::<u32>(),
            Err(ContextError::NoResourceOfType { .. })
        ));
    }

    #[test]
    fn unique_lookup_ambiguous() {
        let mut context = Context::new();
        context.register("a", 1u32).unwrap();
        context.register("b", 2u32).unwrap();
        let err = context.lookup::<u32>().unwrap_err();
        match err {
            ContextError::AmbiguousResource { candidates, .. } => {
                assert_eq!(candidates, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected AmbiguousResource, got {other:?}"),
        }
    }

    #[test]
    fn unique_lookup_prefers_single_primary() {
        let mut context = Context::new();
        context.register("a", 1u32).unwrap();
        context.register_primary("b", 2u32).unwrap();
        context.register("c", 3u32).unwrap();
        assert_eq!(context.lookup::<u32>().unwrap(), 2);
    }

    #[test]
    fn unique_lookup_two_primaries_is_ambiguous() {
        let mut context = Context::new();
        context.register_primary("a", 1u32).unwrap();
        context.register_primary("b", 2u32).unwrap();
        assert!(matches!(
            context.lookup::<u32>(),
            Err(ContextError::AmbiguousResource { .. })
        ));
    }
}
