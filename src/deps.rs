//! Batched startup ordering over the service dependency graph.
//!
//! The resolver turns `depends_on` declarations into an ordered list of
//! batches. Every service in a batch has all of its dependencies in
//! earlier batches, so a batch is safe to bring up concurrently. Batch
//! composition is deterministic: services drain in ascending name order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Error, Result};
use crate::manifest::{ComposeFile, Condition, Service};

/// The dependency graph of a manifest, optionally restricted to a subset
#[derive(Debug, Clone)]
pub struct ServiceGraph {
    /// Service name to the set of services it depends on
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl ServiceGraph {
    /// Build the graph over every service in the manifest.
    ///
    /// Fails with [`Error::MissingDependency`] when a `depends_on` entry
    /// names an unknown service.
    pub fn from_manifest(file: &ComposeFile) -> Result<Self> {
        Self::build(file, file.services.keys().cloned().collect())
    }

    /// Build the graph over `roots` and their transitive dependencies.
    ///
    /// Starting a filtered set still brings up everything those services
    /// need, so the closure is taken over `depends_on` edges.
    pub fn filtered(file: &ComposeFile, roots: &[String]) -> Result<Self> {
        let mut selected = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for root in roots {
            file.service(root)?;
            queue.push_back(root.clone());
        }
        while let Some(name) = queue.pop_front() {
            if !selected.insert(name.clone()) {
                continue;
            }
            if let Some(service) = file.services.get(&name) {
                for dependency in service.depends_on.names() {
                    queue.push_back(dependency.to_string());
                }
            }
        }
        Self::build(file, selected)
    }

    fn build(file: &ComposeFile, selected: BTreeSet<String>) -> Result<Self> {
        let mut dependencies = BTreeMap::new();
        for name in &selected {
            let service = file.service(name)?;
            let mut edges = BTreeSet::new();
            for dependency in service.depends_on.names() {
                if !file.services.contains_key(dependency) {
                    return Err(Error::MissingDependency {
                        service: name.clone(),
                        dependency: dependency.to_string(),
                    });
                }
                edges.insert(dependency.to_string());
            }
            dependencies.insert(name.clone(), edges);
        }
        Ok(Self { dependencies })
    }

    /// The services covered by this graph, in name order
    pub fn services(&self) -> Vec<&str> {
        self.dependencies.keys().map(String::as_str).collect()
    }

    /// Resolve the batched startup order.
    ///
    /// Kahn's algorithm, draining every zero-indegree service into the
    /// current batch in ascending name order. Fails with the offending
    /// cycle when the graph cannot drain.
    pub fn startup_batches(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .dependencies
            .iter()
            .map(|(name, edges)| {
                let pending: BTreeSet<&str> = edges
                    .iter()
                    .filter(|dependency| self.dependencies.contains_key(*dependency))
                    .map(String::as_str)
                    .collect();
                (name.as_str(), pending)
            })
            .collect();

        let mut batches = Vec::new();
        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|(_, pending)| pending.is_empty())
                .map(|(name, _)| (*name).to_string())
                .collect();

            if ready.is_empty() {
                let path = self
                    .find_cycle_path()
                    .unwrap_or_else(|| remaining.keys().map(|s| s.to_string()).collect());
                return Err(Error::CircularDependency { path });
            }

            for name in &ready {
                remaining.remove(name.as_str());
            }
            for pending in remaining.values_mut() {
                for name in &ready {
                    pending.remove(name.as_str());
                }
            }
            batches.push(ready);
        }
        Ok(batches)
    }

    /// Resolve the teardown order: startup batches reversed
    pub fn shutdown_batches(&self) -> Result<Vec<Vec<String>>> {
        let mut batches = self.startup_batches()?;
        batches.reverse();
        Ok(batches)
    }

    fn find_cycle_path(&self) -> Option<Vec<String>> {
        find_cycle_in(&self.dependencies)
    }
}

/// Find a dependency cycle among `services`, if any.
///
/// Returns one full walk of the cycle (first node repeated at the end).
/// Edges to undefined services are ignored here; they are reported as
/// missing dependencies elsewhere.
pub fn find_cycle(services: &BTreeMap<String, Service>) -> Option<Vec<String>> {
    let graph: BTreeMap<String, BTreeSet<String>> = services
        .iter()
        .map(|(name, service)| {
            let edges = service
                .depends_on
                .names()
                .into_iter()
                .filter(|dependency| services.contains_key(*dependency))
                .map(str::to_string)
                .collect();
            (name.clone(), edges)
        })
        .collect();
    find_cycle_in(&graph)
}

fn find_cycle_in(graph: &BTreeMap<String, BTreeSet<String>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        graph: &'a BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::InProgress);
        stack.push(node);
        if let Some(edges) = graph.get(node) {
            for next in edges {
                match marks.get(next.as_str()).copied().unwrap_or(Mark::Unvisited) {
                    Mark::InProgress => {
                        let start = stack.iter().position(|n| *n == next.as_str()).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        path.push(next.clone());
                        return Some(path);
                    }
                    Mark::Unvisited => {
                        if let Some(path) = visit(next, graph, marks, stack) {
                            return Some(path);
                        }
                    }
                    Mark::Done => {}
                }
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    for node in graph.keys() {
        if marks.get(node.as_str()).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
            let mut stack = Vec::new();
            if let Some(path) = visit(node, graph, &mut marks, &mut stack) {
                return Some(path);
            }
        }
    }
    None
}

/// Invert `service_healthy` requirements: dependency name to the set of
/// services that will not start until it is healthy.
pub fn health_dependencies(file: &ComposeFile) -> BTreeMap<String, BTreeSet<String>> {
    let mut inverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (name, service) in &file.services {
        for (dependency, condition) in service.depends_on.conditions() {
            if condition == Condition::ServiceHealthy {
                inverse.entry(dependency).or_default().insert(name.clone());
            }
        }
    }
    inverse
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DependsOn, DependsOnEntry};
    use proptest::prelude::*;

    fn as_strs(batches: &[Vec<String>]) -> Vec<Vec<&str>> {
        batches
            .iter()
            .map(|batch| batch.iter().map(String::as_str).collect())
            .collect()
    }

    fn manifest(edges: &[(&str, &[&str])]) -> ComposeFile {
        let services = edges
            .iter()
            .map(|(name, deps)| {
                let service = Service {
                    image: Some("img".into()),
                    depends_on: DependsOn::List(deps.iter().map(|d| d.to_string()).collect()),
                    ..Default::default()
                };
                (name.to_string(), service)
            })
            .collect();
        ComposeFile {
            services,
            ..Default::default()
        }
    }

    #[test]
    fn test_linear_chain() {
        let file = manifest(&[("web", &["app"]), ("app", &["db"]), ("db", &[])]);
        let graph = ServiceGraph::from_manifest(&file).unwrap();
        let batches = graph.startup_batches().unwrap();
        assert_eq!(as_strs(&batches), vec![vec!["db"], vec!["app"], vec!["web"]]);
    }

    #[test]
    fn test_diamond() {
        let file = manifest(&[
            ("app", &["s1", "s2"]),
            ("s1", &["db"]),
            ("s2", &["db"]),
            ("db", &[]),
        ]);
        let graph = ServiceGraph::from_manifest(&file).unwrap();
        let batches = graph.startup_batches().unwrap();
        assert_eq!(
            as_strs(&batches),
            vec![vec!["db"], vec!["s1", "s2"], vec!["app"]]
        );

        let shutdown = graph.shutdown_batches().unwrap();
        assert_eq!(
            as_strs(&shutdown),
            vec![vec!["app"], vec!["s1", "s2"], vec!["db"]]
        );
    }

    #[test]
    fn test_independent_services_form_one_batch() {
        let file = manifest(&[("b", &[]), ("a", &[]), ("c", &[])]);
        let graph = ServiceGraph::from_manifest(&file).unwrap();
        let batches = graph.startup_batches().unwrap();
        assert_eq!(as_strs(&batches), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_cycle_reported_with_path() {
        let file = manifest(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let graph = ServiceGraph::from_manifest(&file).unwrap();
        match graph.startup_batches() {
            Err(Error::CircularDependency { path }) => {
                assert!(path.len() >= 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency() {
        let file = manifest(&[("web", &["ghost"])]);
        match ServiceGraph::from_manifest(&file) {
            Err(Error::MissingDependency { dependency, .. }) => {
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected missing dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_filtered_includes_transitive_dependencies() {
        let file = manifest(&[("web", &["app"]), ("app", &["db"]), ("db", &[]), ("other", &[])]);
        let graph = ServiceGraph::filtered(&file, &["web".to_string()]).unwrap();
        assert_eq!(graph.services(), vec!["app", "db", "web"]);
    }

    #[test]
    fn test_filtered_unknown_root() {
        let file = manifest(&[("web", &[])]);
        assert!(matches!(
            ServiceGraph::filtered(&file, &["ghost".to_string()]),
            Err(Error::ServiceNotFound { .. })
        ));
    }

    #[test]
    fn test_health_dependencies_inverse() {
        let mut file = manifest(&[("web", &[]), ("api", &[]), ("db", &[])]);
        let entry = DependsOnEntry {
            condition: Condition::ServiceHealthy,
            restart: false,
        };
        file.services.get_mut("web").unwrap().depends_on =
            DependsOn::Map(BTreeMap::from([("db".to_string(), entry.clone())]));
        file.services.get_mut("api").unwrap().depends_on =
            DependsOn::Map(BTreeMap::from([("db".to_string(), entry)]));

        let inverse = health_dependencies(&file);
        assert_eq!(
            inverse["db"],
            BTreeSet::from(["api".to_string(), "web".to_string()])
        );
        assert!(!inverse.contains_key("web"));
    }

    proptest! {
        /// Batches over any DAG partition the services and respect edges.
        #[test]
        fn prop_batches_partition_and_order(edges in dag_strategy()) {
            let file = manifest_from_indices(&edges);
            let graph = ServiceGraph::from_manifest(&file).unwrap();
            let batches = graph.startup_batches().unwrap();

            let mut seen = BTreeSet::new();
            let mut batch_of = BTreeMap::new();
            for (index, batch) in batches.iter().enumerate() {
                for name in batch {
                    prop_assert!(seen.insert(name.clone()), "service listed twice");
                    batch_of.insert(name.clone(), index);
                }
            }
            prop_assert_eq!(seen.len(), file.services.len());

            for (name, service) in &file.services {
                for dependency in service.depends_on.names() {
                    prop_assert!(batch_of[dependency] < batch_of[name]);
                }
            }
        }
    }

    /// Services `s0..sN` where each may depend only on lower indices, so
    /// the generated graph is always acyclic.
    fn dag_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
        (2usize..8).prop_flat_map(|count| {
            let deps = (0..count)
                .map(|index| proptest::sample::subsequence((0..index).collect::<Vec<_>>(), 0..=index))
                .collect::<Vec<_>>();
            deps
        })
    }

    fn manifest_from_indices(edges: &[Vec<usize>]) -> ComposeFile {
        let services = edges
            .iter()
            .enumerate()
            .map(|(index, deps)| {
                let service = Service {
                    image: Some("img".into()),
                    depends_on: DependsOn::List(
                        deps.iter().map(|dep| format!("s{dep}")).collect(),
                    ),
                    ..Default::default()
                };
                (format!("s{index}"), service)
            })
            .collect();
        ComposeFile {
            services,
            ..Default::default()
        }
    }
}
