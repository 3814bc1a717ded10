//! Resource provider registry
//!
//! Providers declare `before`/`after` constraints against other providers by
//! name. The registry resolves them once, at construction, into a fixed
//! order per resource type:
//!
//! - constraints only relate providers of the same resource type; names of
//!   other types' providers or unknown names are ignored
//! - among providers whose constraints are satisfied, the earliest registered
//!   runs first, so the order is deterministic
//! - a cycle is a configuration error and the registry is not built

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SourceError};
use crate::provider::ResourceProvider;
use crate::resource::{Resource, ResourceType};

/// Immutable, ordered set of resource providers
pub struct ResourceProviderRegistry {
    ordered: HashMap<ResourceType, Vec<Arc<dyn ResourceProvider>>>,
    len: usize,
}

impl ResourceProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Providers of `resource_type` in the order they must be tried
    pub fn resolve_order(&self, resource_type: ResourceType) -> &[Arc<dyn ResourceProvider>] {
        self.ordered
            .get(&resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn resolve_order_of<T: Resource>(&self) -> &[Arc<dyn ResourceProvider>] {
        self.resolve_order(ResourceType::of::<T>())
    }

    /// Provider names for `resource_type`, in resolved order
    pub fn provider_names(&self, resource_type: ResourceType) -> Vec<&str> {
        self.resolve_order(resource_type)
            .iter()
            .map(|p| p.descriptor().name())
            .collect()
    }

    /// Total number of registered providers
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for ResourceProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (resource_type, providers) in &self.ordered {
            let names: Vec<_> = providers.iter().map(|p| p.descriptor().name()).collect();
            map.entry(resource_type, &names);
        }
        map.finish()
    }
}

/// Collects providers, then resolves their order
#[derive(Default)]
pub struct RegistryBuilder {
    providers: Vec<Arc<dyn ResourceProvider>>,
}

impl RegistryBuilder {
    pub fn register(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Result<ResourceProviderRegistry> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            let name = provider.descriptor().name();
            if !names.insert(name) {
                return Err(SourceError::configuration(format!(
                    "duplicate resource provider name '{}'",
                    name
                )));
            }
        }

        // Group by produced type, keeping registration order within a group.
        let mut groups: Vec<(ResourceType, Vec<Arc<dyn ResourceProvider>>)> = Vec::new();
        for provider in &self.providers {
            let resource_type = provider.descriptor().resource_type();
            match groups.iter_mut().find(|(t, _)| *t == resource_type) {
                Some((_, group)) => group.push(provider.clone()),
                None => groups.push((resource_type, vec![provider.clone()])),
            }
        }

        let mut ordered = HashMap::with_capacity(groups.len());
        for (resource_type, group) in groups {
            let order = topological_order(resource_type, &group, &names)?;
            let sorted: Vec<_> = order.into_iter().map(|i| group[i].clone()).collect();
            tracing::debug!(
                resource_type = resource_type.name(),
                order = ?sorted.iter().map(|p| p.descriptor().name()).collect::<Vec<_>>(),
                "resolved provider order"
            );
            ordered.insert(resource_type, sorted);
        }

        Ok(ResourceProviderRegistry {
            ordered,
            len: self.providers.len(),
        })
    }
}

/// Kahn's algorithm over one resource type's providers
///
/// Returns indices into `group`. The ready set is keyed by registration index
/// so ties always go to the earliest registered provider.
fn topological_order(
    resource_type: ResourceType,
    group: &[Arc<dyn ResourceProvider>],
    all_names: &HashSet<&str>,
) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = group
        .iter()
        .enumerate()
        .map(|(i, p)| (p.descriptor().name(), i))
        .collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); group.len()];
    let mut in_degree = vec![0usize; group.len()];

    let mut add_edge = |from: usize, to: usize| {
        successors[from].push(to);
        in_degree[to] += 1;
    };

    for (i, provider) in group.iter().enumerate() {
        let descriptor = provider.descriptor();
        for name in descriptor.before_names() {
            match index.get(name.as_str()) {
                Some(&j) => add_edge(i, j),
                None => log_ignored_constraint(descriptor.name(), "before", name, all_names),
            }
        }
        for name in descriptor.after_names() {
            match index.get(name.as_str()) {
                Some(&j) => add_edge(j, i),
                None => log_ignored_constraint(descriptor.name(), "after", name, all_names),
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..group.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(group.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &succ in &successors[next] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if order.len() < group.len() {
        let stuck: Vec<&str> = (0..group.len())
            .filter(|i| !order.contains(i))
            .map(|i| group[i].descriptor().name())
            .collect();
        return Err(SourceError::configuration(format!(
            "cyclic ordering constraints between {} providers: {}",
            resource_type.name(),
            stuck.join(", ")
        )));
    }

    Ok(order)
}

fn log_ignored_constraint(provider: &str, relation: &str, target: &str, all_names: &HashSet<&str>) {
    if all_names.contains(target) {
        tracing::debug!(
            provider,
            relation,
            target,
            "ignoring ordering constraint against a provider of another resource type"
        );
    } else {
        tracing::debug!(provider, relation, target, "ignoring ordering constraint against unknown provider");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderDescriptor;
    use crate::testing::{Catalog, Listing, StubProvider};

    fn provider(descriptor: ProviderDescriptor) -> Arc<dyn ResourceProvider> {
        StubProvider::new(descriptor, Box::new(|_| Ok(None)))
    }

    fn listing(name: &str) -> ProviderDescriptor {
        ProviderDescriptor::new::<Listing>(name)
    }

    fn build(descriptors: Vec<ProviderDescriptor>) -> Result<ResourceProviderRegistry> {
        descriptors
            .into_iter()
            .fold(ResourceProviderRegistry::builder(), |b, d| b.register(provider(d)))
            .build()
    }

    fn listing_order(registry: &ResourceProviderRegistry) -> Vec<&str> {
        registry.provider_names(ResourceType::of::<Listing>())
    }

    /// Every before/after constraint between listed providers holds
    fn assert_constraints_hold(order: &[&str], descriptors: &[ProviderDescriptor]) {
        let pos = |name: &str| order.iter().position(|n| *n == name);
        for d in descriptors {
            let me = pos(d.name()).unwrap();
            for b in d.before_names() {
                if let Some(other) = pos(b) {
                    assert!(me < other, "{} must run before {} in {:?}", d.name(), b, order);
                }
            }
            for a in d.after_names() {
                if let Some(other) = pos(a) {
                    assert!(me > other, "{} must run after {} in {:?}", d.name(), a, order);
                }
            }
        }
    }

    #[test]
    fn test_registration_order_without_constraints() {
        let registry = build(vec![listing("a"), listing("b"), listing("c")]).unwrap();
        assert_eq!(listing_order(&registry), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_before_constraint_moves_provider_forward() {
        let registry = build(vec![
            listing("RemoteV2"),
            listing("Local"),
            listing("HttpFileSystem").before("RemoteV2"),
        ])
        .unwrap();
        assert_eq!(listing_order(&registry), vec!["Local", "HttpFileSystem", "RemoteV2"]);
    }

    #[test]
    fn test_after_constraint_moves_provider_back() {
        let registry = build(vec![listing("fallback").after("primary"), listing("primary")]).unwrap();
        assert_eq!(listing_order(&registry), vec!["primary", "fallback"]);
    }

    #[test]
    fn test_acyclic_constraint_sets_yield_valid_orders() {
        let cases = vec![
            vec![
                listing("a").after("c"),
                listing("b").before("a"),
                listing("c"),
                listing("d").after("a").before("e"),
                listing("e"),
            ],
            vec![
                listing("x").before("y").before("z"),
                listing("z").after("y"),
                listing("y"),
            ],
            vec![
                listing("p4").after("p3"),
                listing("p3").after("p2"),
                listing("p2").after("p1"),
                listing("p1"),
            ],
        ];

        for descriptors in cases {
            let registry = build(descriptors.clone()).unwrap();
            let order = listing_order(&registry);
            assert_eq!(order.len(), descriptors.len());
            assert_constraints_hold(&order, &descriptors);
        }
    }

    #[test]
    fn test_cycle_is_configuration_error() {
        let err = build(vec![
            listing("a").before("b"),
            listing("b").before("c"),
            listing("c").before("a"),
            listing("free"),
        ])
        .unwrap_err();

        assert!(err.is_configuration());
        insta::assert_snapshot!(
            err.to_string(),
            @"Invalid configuration: cyclic ordering constraints between Listing providers: a, b, c"
        );
    }

    #[test]
    fn test_before_and_after_contradiction_is_cycle() {
        let err = build(vec![listing("a").before("b"), listing("b").before("a")]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_self_reference_is_cycle() {
        assert!(build(vec![listing("a").before("a")]).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = build(vec![listing("a"), listing("a")]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_constraints_across_types_are_ignored() {
        let registry = build(vec![
            listing("first"),
            listing("second").before("catalog"),
            ProviderDescriptor::new::<Catalog>("catalog").before("first"),
            listing("third").after("missing"),
        ])
        .unwrap();

        assert_eq!(listing_order(&registry), vec!["first", "second", "third"]);
        assert_eq!(registry.provider_names(ResourceType::of::<Catalog>()), vec!["catalog"]);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_unknown_type_has_no_providers() {
        let registry = build(vec![listing("a")]).unwrap();
        assert!(registry.resolve_order_of::<Catalog>().is_empty());
    }
}
