//! Migration registry: the dependency graph owned by a [`Migrator`](super::Migrator)

use super::error::MigrationError;
use super::migration::Migration;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

struct Node<C: ?Sized> {
    id: String,
    /// Declared dependencies plus the implicit head, duplicates removed
    dependencies: Vec<String>,
    migration: Box<dyn Migration<C>>,
}

/// Registered migrations in registration order, plus the head pointer
///
/// Registration order is the only tie-breaker for ordering: among migrations
/// whose dependencies are all placed, the one registered first goes first.
pub struct MigrationRegistry<C: ?Sized> {
    nodes: Vec<Node<C>>,
    index: HashMap<String, usize>,
    head: Option<String>,
}

impl<C: ?Sized> Default for MigrationRegistry<C> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            head: None,
        }
    }
}

impl<C: ?Sized> MigrationRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration and make it the head
    ///
    /// With `depends_on_head`, the current head (if any) is added to the
    /// migration's dependencies. Dependencies are not checked for existence
    /// here; unknown ids surface when the graph is resolved.
    ///
    /// # Errors
    ///
    /// `InvalidId` for an empty id, `AlreadyRegistered` for a duplicate id.
    /// The registry and head are unchanged on error.
    pub fn register(
        &mut self,
        migration: Box<dyn Migration<C>>,
        depends_on_head: bool,
    ) -> Result<&str, MigrationError> {
        let id = migration.id().to_string();
        if id.is_empty() {
            return Err(MigrationError::InvalidId);
        }
        if self.index.contains_key(&id) {
            return Err(MigrationError::AlreadyRegistered { id });
        }

        let mut dependencies: Vec<String> = Vec::with_capacity(migration.dependencies().len() + 1);
        for dependency in migration.dependencies() {
            if !dependencies.contains(dependency) {
                dependencies.push(dependency.clone());
            }
        }
        if depends_on_head {
            if let Some(head) = &self.head {
                if !dependencies.contains(head) {
                    dependencies.push(head.clone());
                }
            }
        }

        log::debug!("registered migration {id} (dependencies: {dependencies:?})");
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(Node {
            id: id.clone(),
            dependencies,
            migration,
        });
        Ok(self.head.insert(id).as_str())
    }

    /// Id of the most recently registered migration
    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&dyn Migration<C>> {
        self.index.get(id).map(|&idx| self.nodes[idx].migration.as_ref())
    }

    /// Effective dependencies of `id`, as stored at registration
    pub fn dependencies(&self, id: &str) -> Option<&[String]> {
        self.index.get(id).map(|&idx| self.nodes[idx].dependencies.as_slice())
    }

    /// Ids in registration order
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.iter().map(|node| node.id.as_str())
    }

    pub(crate) fn id_at(&self, idx: usize) -> &str {
        &self.nodes[idx].id
    }

    pub(crate) fn migration_at(&self, idx: usize) -> &dyn Migration<C> {
        self.nodes[idx].migration.as_ref()
    }

    /// Total order over every registered migration, dependencies first
    ///
    /// # Errors
    ///
    /// `UnknownDependency` if any migration depends on an unregistered id,
    /// `DependencyCycle` if some migrations can never become ready.
    pub fn sorted_ids(&self) -> Result<Vec<String>, MigrationError> {
        let members = vec![true; self.nodes.len()];
        let order = self.topological_order(&members)?;
        Ok(self.to_ids(&order))
    }

    /// `target` plus everything it transitively depends on, dependencies first
    ///
    /// # Errors
    ///
    /// `IncorrectHead` if `target` is not registered, otherwise as
    /// [`sorted_ids`](Self::sorted_ids) restricted to the closure.
    pub fn closure(&self, target: &str) -> Result<Vec<String>, MigrationError> {
        let order = self.closure_order(target)?;
        Ok(self.to_ids(&order))
    }

    pub(crate) fn closure_order(&self, target: &str) -> Result<Vec<usize>, MigrationError> {
        let &start = self.index.get(target).ok_or_else(|| MigrationError::IncorrectHead {
            head: Some(target.to_string()),
        })?;

        let mut members = vec![false; self.nodes.len()];
        members[start] = true;
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            for dependency in &node.dependencies {
                let dep_idx = self.lookup_dependency(node, dependency)?;
                if !members[dep_idx] {
                    members[dep_idx] = true;
                    stack.push(dep_idx);
                }
            }
        }

        self.topological_order(&members)
    }

    /// Kahn's algorithm over the nodes flagged in `members`, which must be
    /// closed under dependencies. Ties go to the lowest registration index.
    fn topological_order(&self, members: &[bool]) -> Result<Vec<usize>, MigrationError> {
        let mut in_degree = vec![0_usize; self.nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut member_count = 0;

        for (idx, node) in self.nodes.iter().enumerate() {
            if !members[idx] {
                continue;
            }
            member_count += 1;
            for dependency in &node.dependencies {
                let dep_idx = self.lookup_dependency(node, dependency)?;
                in_degree[idx] += 1;
                dependents[dep_idx].push(idx);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..self.nodes.len())
            .filter(|&idx| members[idx] && in_degree[idx] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(member_count);

        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() < member_count {
            let ids: Vec<String> = (0..self.nodes.len())
                .filter(|&idx| members[idx] && in_degree[idx] > 0)
                .map(|idx| self.nodes[idx].id.clone())
                .collect();
            return Err(MigrationError::DependencyCycle { ids });
        }

        Ok(order)
    }

    fn lookup_dependency(&self, node: &Node<C>, dependency: &str) -> Result<usize, MigrationError> {
        self.index
            .get(dependency)
            .copied()
            .ok_or_else(|| MigrationError::UnknownDependency {
                id: node.id.clone(),
                dependency: dependency.to_string(),
            })
    }

    fn to_ids(&self, order: &[usize]) -> Vec<String> {
        order.iter().map(|&idx| self.nodes[idx].id.clone()).collect()
    }
}

impl<C: ?Sized> fmt::Debug for MigrationRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.nodes.iter().map(|node| (&node.id, &node.dependencies)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{BoxError, FnMigration};

    fn noop(id: &str, deps: &[&str]) -> Box<dyn Migration<()>> {
        Box::new(
            FnMigration::new(id, |_: &()| -> Result<(), BoxError> { Ok(()) })
                .depends_on(deps.iter().copied()),
        )
    }

    fn registry(entries: &[(&str, &[&str])]) -> MigrationRegistry<()> {
        let mut registry = MigrationRegistry::new();
        for (id, deps) in entries {
            registry.register(noop(id, deps), false).expect("register");
        }
        registry
    }

    #[test]
    fn test_register_moves_head() {
        let mut registry = MigrationRegistry::new();
        assert_eq!(registry.head(), None);

        let head = registry.register(noop("001", &[]), false).expect("register");
        assert_eq!(head, "001");
        registry.register(noop("002", &[]), false).expect("register");
        assert_eq!(registry.head(), Some("002"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_depends_on_head_adds_previous_head_once() {
        let mut registry = MigrationRegistry::new();
        registry.register(noop("001", &[]), true).expect("register");
        assert_eq!(registry.dependencies("001"), Some(&[][..]));

        registry.register(noop("002", &["001"]), true).expect("register");
        assert_eq!(registry.dependencies("002").expect("deps"), ["001".to_string()]);

        registry.register(noop("003", &[]), true).expect("register");
        assert_eq!(registry.dependencies("003").expect("deps"), ["002".to_string()]);
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let registry = registry(&[("a", &[]), ("b", &["a", "a"]), ("c", &["b", "a", "b"])]);
        assert_eq!(registry.dependencies("c").expect("deps"), ["b".to_string(), "a".to_string()]);
        assert_eq!(registry.sorted_ids().expect("sorted"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_registration_rejected_and_registry_unchanged() {
        let mut registry = registry(&[("001", &[]), ("002", &["001"])]);
        let err = registry.register(noop("001", &[]), true).unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyRegistered { ref id } if id == "001"));
        assert_eq!(registry.head(), Some("002"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut registry = MigrationRegistry::new();
        let err = registry.register(noop("", &[]), false).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidId));
        assert_eq!(registry.head(), None);
    }

    #[test]
    fn test_ties_break_by_registration_order_not_lexical() {
        let registry = registry(&[("zeta", &[]), ("alpha", &[]), ("mid", &["alpha"])]);
        assert_eq!(registry.sorted_ids().expect("sorted"), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_dependency_registered_later_still_placed_first() {
        let registry = registry(&[("b", &["a"]), ("c", &[]), ("a", &[])]);
        assert_eq!(registry.sorted_ids().expect("sorted"), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_closure_excludes_unrelated_branch() {
        let registry = registry(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("d", &["a"])]);
        assert_eq!(registry.closure("d").expect("closure"), vec!["a", "d"]);
        assert_eq!(registry.closure("c").expect("closure"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_closure_is_subsequence_of_sorted_ids() {
        let registry = registry(&[
            ("x", &[]),
            ("a", &["x"]),
            ("y", &[]),
            ("b", &["y", "a"]),
            ("z", &["x"]),
            ("t", &["b", "z"]),
        ]);
        let sorted = registry.sorted_ids().expect("sorted");
        let closure = registry.closure("t").expect("closure");
        let filtered: Vec<String> = sorted.into_iter().filter(|id| closure.contains(id)).collect();
        assert_eq!(closure, filtered);
    }

    #[test]
    fn test_closure_of_unknown_target_is_incorrect_head() {
        let registry = registry(&[("a", &[])]);
        let err = registry.closure("nope").unwrap_err();
        assert!(matches!(err, MigrationError::IncorrectHead { head: Some(ref h) } if h == "nope"));
    }

    #[test]
    fn test_dangling_dependency_reported() {
        let registry = registry(&[("a", &["z"])]);
        let err = registry.closure("a").unwrap_err();
        assert!(matches!(
            err,
            MigrationError::UnknownDependency { ref id, ref dependency } if id == "a" && dependency == "z"
        ));
        assert!(matches!(registry.sorted_ids(), Err(MigrationError::UnknownDependency { .. })));
    }

    #[test]
    fn test_cycle_detected() {
        let registry = registry(&[("root", &[]), ("a", &["b"]), ("b", &["a"]), ("c", &["root"])]);
        let err = registry.sorted_ids().unwrap_err();
        match err {
            MigrationError::DependencyCycle { ids } => assert_eq!(ids, vec!["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
        // the acyclic part of the graph still resolves on its own
        assert_eq!(registry.closure("c").expect("closure"), vec!["root", "c"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let registry = registry(&[("a", &["a"])]);
        assert!(matches!(registry.closure("a"), Err(MigrationError::DependencyCycle { .. })));
    }

    #[test]
    fn test_sorted_ids_stable_across_calls() {
        let registry = registry(&[("1", &[]), ("2", &["1"]), ("3", &["2"]), ("4", &["3", "2"])]);
        let first = registry.sorted_ids().expect("sorted");
        assert_eq!(first, registry.sorted_ids().expect("sorted"));
        assert_eq!(first, vec!["1", "2", "3", "4"]);
    }
}
