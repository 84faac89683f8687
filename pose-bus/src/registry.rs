use std::sync::Arc;

use crate::{
    model::{ModelHandle, PoseModel},
    types::ModelDescriptor,
};

pub type ModelFactory = Arc<dyn Fn() -> Box<dyn PoseModel> + Send + Sync>;

struct RegistryEntry {
    descriptor: ModelDescriptor,
    factory: ModelFactory,
}

/// Table of selectable models. Built once at startup and shared read-only.
#[derive(Default)]
pub struct ModelRegistry {
    entries: Vec<RegistryEntry>,
}

impl ModelRegistry {
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entry(id).is_some()
    }

    pub fn descriptor(&self, id: &str) -> Option<&ModelDescriptor> {
        self.entry(id).map(|e| &e.descriptor)
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Creates a fresh, unloaded handle for `id`.
    pub fn create(&self, id: &str, generation: u64) -> Option<ModelHandle> {
        self.entry(id)
            .map(|e| ModelHandle::new(e.descriptor.clone(), (e.factory)(), generation))
    }

    fn entry(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.descriptor.id == id)
    }
}

#[derive(Default)]
pub struct ModelRegistryBuilder {
    entries: Vec<RegistryEntry>,
}

impl ModelRegistryBuilder {
    /// Registers a model. A later registration with the same id replaces the
    /// earlier one.
    pub fn register<F>(mut self, descriptor: ModelDescriptor, factory: F) -> Self
    where
        F: Fn() -> Box<dyn PoseModel> + Send + Sync + 'static,
    {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.descriptor.id == descriptor.id)
        {
            log::warn!("model {} registered twice, keeping the last one", descriptor.id);
            self.entries.remove(pos);
        }
        self.entries.push(RegistryEntry {
            descriptor,
            factory: Arc::new(factory),
        });
        self
    }

    pub fn build(self) -> ModelRegistry {
        ModelRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::NoopModel, model::ModelState, types::Color};

    #[test]
    fn test_registry_lookup_and_create() {
        let registry = ModelRegistry::builder()
            .register(
                ModelDescriptor::new("posenet", "PoseNet", Color::rgb(255, 165, 0)),
                || Box::new(NoopModel),
            )
            .register(
                ModelDescriptor::new("movenet", "MoveNet", Color::rgb(0, 0, 255)),
                || Box::new(NoopModel),
            )
            .build();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("movenet"));
        assert!(!registry.contains("blazepose"));
        let ids: Vec<_> = registry.descriptors().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["posenet", "movenet"]);

        let handle = registry.create("posenet", 7).unwrap();
        assert_eq!(handle.id(), "posenet");
        assert_eq!(handle.generation(), 7);
        assert_eq!(handle.state(), ModelState::Unloaded);
        assert!(registry.create("nope", 8).is_none());
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let registry = ModelRegistry::builder()
            .register(ModelDescriptor::new("a", "First", Color::rgb(0, 0, 0)), || {
                Box::new(NoopModel)
            })
            .register(ModelDescriptor::new("a", "Second", Color::rgb(0, 0, 0)), || {
                Box::new(NoopModel)
            })
            .build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.descriptor("a").unwrap().display_name, "Second");
    }
}
