//! Typed resources and their type-erased form

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A typed capability object tied to one package source
pub trait Resource: Any + Send + Sync {}

/// Type-erased resource as stored in a repository cache
pub type AnyResource = Arc<dyn Any + Send + Sync>;

/// Identity of a resource type
#[derive(Clone, Copy)]
pub struct ResourceType {
    id: TypeId,
    name: &'static str,
}

impl ResourceType {
    pub fn of<T: Resource>() -> Self {
        let full = std::any::type_name::<T>();
        Self {
            id: TypeId::of::<T>(),
            name: full.rsplit("::").next().unwrap_or(full),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Short type name, used in logs and errors
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether `resource` is an instance of this type
    pub fn is_instance(&self, resource: &AnyResource) -> bool {
        (**resource).type_id() == self.id
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceType {}

impl Hash for ResourceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Erase a resource for storage
pub fn erase<T: Resource>(resource: T) -> AnyResource {
    Arc::new(resource)
}

/// Recover the typed resource, `None` on type mismatch
pub fn downcast<T: Resource>(resource: AnyResource) -> Option<Arc<T>> {
    resource.downcast::<T>().ok()
}
