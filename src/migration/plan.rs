//! Dependency graph checks and per-wave runnable sets.

use super::unit::MigrationUnit;
use crate::error::MigrationError;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Reject duplicate namespaces, dependencies that are neither loaded nor applied, and cycles.
pub(crate) fn validate_graph(units: &[MigrationUnit], applied: &BTreeSet<String>) -> Result<(), MigrationError> {
    let mut loaded: HashSet<String> = HashSet::with_capacity(units.len());
    for u in units {
        let ns = u.namespace();
        if !loaded.insert(ns.clone()) {
            return Err(MigrationError::DuplicateNamespace(ns));
        }
    }
    for u in units {
        for dep in &u.depends_on {
            if !loaded.contains(dep) && !applied.contains(dep) {
                return Err(MigrationError::UnknownDependency {
                    unit: u.namespace(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Peel off units whose loaded dependencies are all resolved; whatever remains is on a cycle.
    let mut done: HashSet<String> = HashSet::with_capacity(units.len());
    loop {
        let mut made_progress = false;
        for u in units {
            let ns = u.namespace();
            if done.contains(&ns) {
                continue;
            }
            if u.depends_on.iter().all(|d| done.contains(d) || !loaded.contains(d)) {
                done.insert(ns);
                made_progress = true;
            }
        }
        if !made_progress {
            break;
        }
    }
    if done.len() < units.len() {
        let mut stuck: Vec<String> = units
            .iter()
            .map(MigrationUnit::namespace)
            .filter(|ns| !done.contains(ns))
            .collect();
        stuck.sort();
        return Err(MigrationError::Cycle(stuck));
    }
    Ok(())
}

/// Not applied, not failed, every dependency applied. Declaration order.
pub(crate) fn forward_runnable<'a>(
    units: &'a [MigrationUnit],
    applied: &BTreeSet<String>,
    failed: &BTreeSet<String>,
) -> Vec<&'a MigrationUnit> {
    units
        .iter()
        .filter(|u| {
            let ns = u.namespace();
            !applied.contains(&ns) && !failed.contains(&ns) && u.depends_on.iter().all(|d| applied.contains(d))
        })
        .collect()
}

/// Applied, not failed, and no other applied record depends on it. `applied` maps namespace to dependencies.
pub(crate) fn backward_runnable<'a>(
    units: &'a [MigrationUnit],
    applied: &BTreeMap<String, Vec<String>>,
    failed: &BTreeSet<String>,
) -> Vec<&'a MigrationUnit> {
    units
        .iter()
        .filter(|u| {
            let ns = u.namespace();
            applied.contains_key(&ns)
                && !failed.contains(&ns)
                && !applied
                    .iter()
                    .any(|(other, deps)| *other != ns && deps.iter().any(|d| *d == ns))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, deps: &[&str]) -> MigrationUnit {
        deps.iter()
            .fold(MigrationUnit::new("app", "core", name), |u, d| u.depends_on(format!("app.core.{}", d)))
    }

    fn graph() -> Vec<MigrationUnit> {
        vec![
            unit("alpha", &[]),
            unit("beta", &["alpha"]),
            unit("gamma", &["alpha"]),
            unit("delta", &["beta"]),
            unit("iota", &["gamma", "delta"]),
            unit("theta", &[]),
        ]
    }

    fn names(units: &[&MigrationUnit]) -> Vec<String> {
        units.iter().map(|u| u.name.clone()).collect()
    }

    #[test]
    fn forward_waves_follow_dependencies() {
        let units = graph();
        let failed = BTreeSet::new();
        let mut applied = BTreeSet::new();
        let mut waves = Vec::new();
        loop {
            let wave = forward_runnable(&units, &applied, &failed);
            if wave.is_empty() {
                break;
            }
            waves.push(names(&wave));
            applied.extend(wave.iter().map(|u| u.namespace()));
        }
        assert_eq!(
            waves,
            vec![
                vec!["alpha", "theta"],
                vec!["beta", "gamma"],
                vec!["delta"],
                vec!["iota"],
            ]
        );
    }

    #[test]
    fn backward_waves_remove_leaves_first() {
        let units = graph();
        let mut applied: BTreeMap<String, Vec<String>> = units
            .iter()
            .map(|u| (u.namespace(), u.depends_on.clone()))
            .collect();
        let failed = BTreeSet::new();
        let mut waves = Vec::new();
        loop {
            let wave = backward_runnable(&units, &applied, &failed);
            if wave.is_empty() {
                break;
            }
            waves.push(names(&wave));
            for u in wave {
                applied.remove(&u.namespace());
            }
        }
        assert_eq!(
            waves,
            vec![
                vec!["iota", "theta"],
                vec!["gamma", "delta"],
                vec!["beta"],
                vec!["alpha"],
            ]
        );
    }

    #[test]
    fn failed_units_block_dependents() {
        let units = graph();
        let failed: BTreeSet<String> = ["app.core.beta".to_string()].into();
        let applied: BTreeSet<String> = ["app.core.alpha".to_string(), "app.core.theta".to_string()].into();
        assert_eq!(names(&forward_runnable(&units, &applied, &failed)), vec!["gamma"]);
    }

    #[test]
    fn graph_errors_are_reported_up_front() {
        let cyclic = vec![unit("a", &["b"]), unit("b", &["c"]), unit("c", &["a"]), unit("d", &[])];
        match validate_graph(&cyclic, &BTreeSet::new()) {
            Err(MigrationError::Cycle(stuck)) => {
                assert_eq!(stuck, vec!["app.core.a", "app.core.b", "app.core.c"])
            }
            other => panic!("expected cycle, got {:?}", other),
        }

        let dangling = vec![unit("a", &["missing"])];
        assert!(matches!(
            validate_graph(&dangling, &BTreeSet::new()),
            Err(MigrationError::UnknownDependency { .. })
        ));
        let applied: BTreeSet<String> = ["app.core.missing".to_string()].into();
        assert!(validate_graph(&dangling, &applied).is_ok());

        let dup = vec![unit("a", &[]), unit("a", &[])];
        assert!(matches!(
            validate_graph(&dup, &BTreeSet::new()),
            Err(MigrationError::DuplicateNamespace(ns)) if ns == "app.core.a"
        ));
    }
}
