//! Service repository with lazy dependency resolution.
//!
//! # Responsibilities
//! - Hold named service registrations, each with the names it depends on
//! - Resolve a service and its dependencies on first use, caching the result
//! - Detect dependency cycles and name the offending service
//!
//! # Design Decisions
//! - Failed resolutions are never cached: registering the missing piece
//!   later makes the next resolve succeed
//! - No map guard is held across a recursive resolve

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::error::{ConfigError, Result};

pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

type ServiceFactory = dyn Fn(&ResolvedDependencies) -> Result<ServiceInstance> + Send + Sync;

#[derive(Clone)]
struct Registration {
    dependencies: Vec<String>,
    factory: Arc<ServiceFactory>,
}

/// Dependencies handed to a service factory, by name.
pub struct ResolvedDependencies {
    services: HashMap<String, ServiceInstance>,
}

impl ResolvedDependencies {
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnresolvedDependency(name.to_string()))?
            .downcast::<T>()
            .map_err(|_| ConfigError::invalid(name, std::any::type_name::<T>(), "service has a different type"))
    }
}

#[derive(Default)]
pub struct ServiceRepository {
    registrations: DashMap<String, Registration>,
    instances: DashMap<String, ServiceInstance>,
}

impl ServiceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready-made instance.
    pub fn register_instance<T: Any + Send + Sync>(&self, name: &str, instance: Arc<T>) {
        self.registrations.remove(name);
        self.instances.insert(name.to_string(), instance);
    }

    /// Register a factory that is run on first resolve, after every name in
    /// `dependencies` has been resolved.
    pub fn register<F>(&self, name: &str, dependencies: &[&str], factory: F)
    where
        F: Fn(&ResolvedDependencies) -> Result<ServiceInstance> + Send + Sync + 'static,
    {
        self.instances.remove(name);
        self.registrations.insert(
            name.to_string(),
            Registration {
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                factory: Arc::new(factory),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name) || self.registrations.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<ServiceInstance> {
        self.resolve_path(name, &mut Vec::new())
    }

    pub fn resolve_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.resolve(name)?.downcast::<T>().map_err(|_| {
            ConfigError::invalid(name, std::any::type_name::<T>(), "service has a different type")
        })
    }

    fn resolve_path(&self, name: &str, path: &mut Vec<String>) -> Result<ServiceInstance> {
        if let Some(instance) = self.instances.get(name) {
            return Ok(instance.value().clone());
        }

        if path.iter().any(|p| p == name) {
            let mut chain = path.clone();
            chain.push(name.to_string());
            return Err(ConfigError::DependencyCycle {
                name: name.to_string(),
                chain,
            });
        }

        let registration = self
            .registrations
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ConfigError::UnresolvedDependency(name.to_string()))?;

        path.push(name.to_string());
        let mut services = HashMap::new();
        for dependency in &registration.dependencies {
            let instance = self.resolve_path(dependency, path)?;
            services.insert(dependency.clone(), instance);
        }
        path.pop();

        let instance = (registration.factory)(&ResolvedDependencies { services })?;
        let instance = self
            .instances
            .entry(name.to_string())
            .or_insert(instance)
            .value()
            .clone();
        Ok(instance)
    }
}

impl fmt::Debug for ServiceRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRepository")
            .field("registrations", &self.registrations.len())
            .field("instances", &self.instances.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock(u32);
    struct Greeter {
        clock: Arc<Clock>,
    }

    #[test]
    fn resolves_dependencies_and_caches() {
        let repo = ServiceRepository::new();
        repo.register_instance("clock", Arc::new(Clock(7)));
        repo.register("greeter", &["clock"], |deps| {
            Ok(Arc::new(Greeter {
                clock: deps.get::<Clock>("clock")?,
            }))
        });
        let first = repo.resolve_as::<Greeter>("greeter").unwrap();
        let second = repo.resolve_as::<Greeter>("greeter").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.clock.0, 7);
    }

    #[test]
    fn missing_dependency_is_retried_later() {
        let repo = ServiceRepository::new();
        repo.register("greeter", &["clock"], |deps| {
            Ok(Arc::new(Greeter {
                clock: deps.get::<Clock>("clock")?,
            }))
        });
        assert!(matches!(
            repo.resolve("greeter"),
            Err(ConfigError::UnresolvedDependency(name)) if name == "clock"
        ));
        repo.register_instance("clock", Arc::new(Clock(1)));
        assert!(repo.resolve_as::<Greeter>("greeter").is_ok());
    }

    #[test]
    fn cycle_is_reported_with_offender() {
        let repo = ServiceRepository::new();
        repo.register("a", &["b"], |_| Ok(Arc::new(())));
        repo.register("b", &["c"], |_| Ok(Arc::new(())));
        repo.register("c", &["a"], |_| Ok(Arc::new(())));
        match repo.resolve("a") {
            Err(ConfigError::DependencyCycle { name, chain }) => {
                assert_eq!(name, "a");
                assert_eq!(chain, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn wrong_type_is_an_error() {
        let repo = ServiceRepository::new();
        repo.register_instance("clock", Arc::new(Clock(1)));
        assert!(repo.resolve_as::<Greeter>("clock").is_err());
    }
}
