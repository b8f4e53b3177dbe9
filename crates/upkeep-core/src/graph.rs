//! Plugin dependency graph validation and readiness.

use std::collections::{BTreeMap, BTreeSet};

/// Error type for dependency graph validation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A plugin lists itself as a dependency.
    #[error("plugin '{0}' depends on itself")]
    SelfDep(String),

    /// A plugin depends on a name that is not in the set.
    #[error("plugin '{plugin}' depends on unknown plugin '{dependency}'")]
    MissingDep {
        /// The plugin with the bad dependency.
        plugin: String,
        /// The name that does not exist.
        dependency: String,
    },

    /// The graph contains a cycle. The path lists the plugins along the
    /// cycle, ending where it began.
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle {
        /// The plugins forming the cycle, first repeated at the end.
        path: Vec<String>,
    },
}

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// A validated mapping from plugin name to its dependencies.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    deps: BTreeMap<String, BTreeSet<String>>,
}

enum VisitColor {
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Build and validate a graph from `(plugin, deps)` pairs.
    ///
    /// Validation order: self-dependencies first, then unknown names,
    /// then cycles (reported with the offending path).
    pub fn new<I, S, D>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: IntoIterator<Item = S>,
    {
        let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (plugin, plugin_deps) in entries {
            let plugin = plugin.into();
            let set: BTreeSet<String> = plugin_deps.into_iter().map(Into::into).collect();
            deps.insert(plugin, set);
        }

        let graph = Self { deps };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<()> {
        for (plugin, plugin_deps) in &self.deps {
            if plugin_deps.contains(plugin) {
                return Err(GraphError::SelfDep(plugin.clone()));
            }
            for dep in plugin_deps {
                if !self.deps.contains_key(dep) {
                    return Err(GraphError::MissingDep {
                        plugin: plugin.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Three-colour DFS: absent = white, InProgress = grey, Done = black.
        let mut colors: BTreeMap<&str, VisitColor> = BTreeMap::new();
        for plugin in self.deps.keys() {
            if !colors.contains_key(plugin.as_str()) {
                let mut stack = Vec::new();
                self.dfs(plugin, &mut colors, &mut stack)?;
            }
        }
        Ok(())
    }

    fn dfs<'a>(
        &'a self,
        node: &'a str,
        colors: &mut BTreeMap<&'a str, VisitColor>,
        stack: &mut Vec<&'a str>,
    ) -> Result<()> {
        colors.insert(node, VisitColor::InProgress);
        stack.push(node);

        if let Some(deps) = self.deps.get(node) {
            for dep in deps {
                match colors.get(dep.as_str()) {
                    Some(VisitColor::Done) => {}
                    Some(VisitColor::InProgress) => {
                        // Close the loop for the error path.
                        let start = stack
                            .iter()
                            .position(|n| *n == dep.as_str())
                            .unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|s| (*s).to_string()).collect();
                        path.push(dep.clone());
                        return Err(GraphError::Cycle { path });
                    }
                    None => self.dfs(dep, colors, stack)?,
                }
            }
        }

        stack.pop();
        colors.insert(node, VisitColor::Done);
        Ok(())
    }

    /// All plugin names in the graph.
    pub fn plugins(&self) -> impl Iterator<Item = &str> {
        self.deps.keys().map(String::as_str)
    }

    /// Dependencies of one plugin; empty when the plugin has none.
    pub fn deps_of(&self, plugin: &str) -> impl Iterator<Item = &str> {
        self.deps
            .get(plugin)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// The subset of `remaining` whose dependencies are all in `done`.
    ///
    /// "Done" means the predecessor reached a terminal state that counts
    /// for readiness; the orchestrator decides whether failures qualify.
    pub fn ready<'a>(
        &self,
        remaining: impl IntoIterator<Item = &'a str>,
        done: &BTreeSet<String>,
    ) -> Vec<String> {
        remaining
            .into_iter()
            .filter(|plugin| {
                self.deps_of(plugin).all(|dep| done.contains(dep))
            })
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn graph(entries: &[(&str, &[&str])]) -> Result<DependencyGraph> {
        DependencyGraph::new(
            entries
                .iter()
                .map(|(p, d)| (*p, d.to_vec())),
        )
    }

    #[test]
    fn empty_graph_is_valid() {
        assert!(graph(&[]).is_ok());
    }

    #[test]
    fn self_dependency_is_rejected() {
        let err = graph(&[("apt", &["apt"])]).unwrap_err();
        assert_eq!(err, GraphError::SelfDep("apt".into()));
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let err = graph(&[("conda-packages", &["conda-self"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDep {
                plugin: "conda-packages".into(),
                dependency: "conda-self".into(),
            }
        );
    }

    #[test]
    fn two_node_cycle_names_both_plugins() {
        let err = graph(&[("a", &["b"]), ("b", &["a"])]).unwrap_err();
        match err {
            GraphError::Cycle { path } => {
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn longer_cycle_is_detected() {
        let err = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn diamond_is_valid() {
        let g = graph(&[
            ("base", &[]),
            ("left", &["base"]),
            ("right", &["base"]),
            ("top", &["left", "right"]),
        ])
        .unwrap();
        assert_eq!(g.plugins().count(), 4);
    }

    #[test]
    fn ready_respects_done_set() {
        let g = graph(&[("conda-self", &[]), ("conda-packages", &["conda-self"])]).unwrap();

        let mut done = BTreeSet::new();
        let remaining = ["conda-self", "conda-packages"];
        assert_eq!(g.ready(remaining, &done), vec!["conda-self".to_string()]);

        done.insert("conda-self".to_string());
        assert_eq!(
            g.ready(["conda-packages"], &done),
            vec!["conda-packages".to_string()]
        );
    }

    #[test]
    fn ready_with_no_deps_returns_everything() {
        let g = graph(&[("apt", &[]), ("snap", &[])]).unwrap();
        let done = BTreeSet::new();
        let mut ready = g.ready(["apt", "snap"], &done);
        ready.sort();
        assert_eq!(ready, vec!["apt".to_string(), "snap".to_string()]);
    }
}
