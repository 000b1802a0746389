//! Keeping dependency specs consistent across the owned packages.
//!
//! Enforcement runs in two phases. First every third-party package gets one
//! agreed constraint list, merged from what its owners declare. Then every
//! owned package has its specs on other owned packages moved up to their
//! current versions and its third-party specs replaced by the merged lists.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use pbt_version::{parse_version_spec, Version, VersionSpec};

use crate::error::EngineError;
use crate::graph::PkgGraph;
use crate::manager::{manager_for, Managers, PkgManager};
use crate::package::{DepConstraint, Dependencies};

/// How strictly specs must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionConsistent {
    /// Owned specs track the exact current version; third-party specs must
    /// be written identically by every owner.
    Strict,
    /// Owned specs only need to admit the current version; third-party specs
    /// must overlap.
    Compatible,
    /// Nothing is checked; third-party specs still converge on one choice.
    NoCheck,
}

impl fmt::Display for VersionConsistent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VersionConsistent::Strict => "strict",
            VersionConsistent::Compatible => "compatible",
            VersionConsistent::NoCheck => "no-check",
        })
    }
}

struct Candidate {
    constraint: DepConstraint,
    spec: VersionSpec,
    first_text: String,
    accumulated: VersionSpec,
    owners: Vec<String>,
}

/// Merge the constraints every owner places on the third-party `package`
/// into one list, one entry per constraint key, sorted by key.
///
/// Within a key the preferred constraint has the largest lower bound, then
/// the tightest upper bound, then the smallest spec text. `mode` decides
/// what disagreement is tolerated. In compatible mode, when the preferred
/// rule admits versions another owner excludes, the intersection of all
/// rules is returned instead, keeping the preferred constraint's fields.
///
/// # Errors
/// Returns [`EngineError::ThirdPartyConflict`] naming the owners when specs
/// under one key differ (strict) or do not overlap (compatible), or a parse
/// error for a malformed spec.
pub fn find_latest_specs(
    package: &str,
    dependents: &BTreeMap<String, Vec<DepConstraint>>,
    mode: VersionConsistent,
) -> Result<Vec<DepConstraint>, EngineError> {
    let mut by_key: BTreeMap<Option<String>, Candidate> = BTreeMap::new();

    for (owner, constraints) in dependents {
        for constraint in constraints {
            let spec = parse_version_spec(&constraint.version_spec)?;
            let Some(current) = by_key.get_mut(&constraint.constraint_key) else {
                by_key.insert(
                    constraint.constraint_key.clone(),
                    Candidate {
                        constraint: constraint.clone(),
                        spec: spec.clone(),
                        first_text: constraint.version_spec.trim().to_owned(),
                        accumulated: spec,
                        owners: vec![owner.clone()],
                    },
                );
                continue;
            };

            if !current.owners.contains(owner) {
                current.owners.push(owner.clone());
            }
            match mode {
                VersionConsistent::Strict => {
                    if constraint.version_spec.trim() != current.first_text {
                        return Err(conflict(
                            package,
                            &current.owners,
                            format!("`{}` differs from `{}`", constraint.version_spec, current.first_text),
                        ));
                    }
                }
                VersionConsistent::Compatible => {
                    current.accumulated = current
                        .accumulated
                        .intersect(&spec)
                        .map_err(|e| conflict(package, &current.owners, e.to_string()))?;
                }
                VersionConsistent::NoCheck => {}
            }

            if preference(&spec, &constraint.version_spec, &current.spec, &current.constraint.version_spec)
                == Ordering::Greater
            {
                current.spec = spec;
                current.constraint = constraint.clone();
            }
        }
    }

    Ok(by_key
        .into_values()
        .map(|c| {
            if mode != VersionConsistent::Compatible || same_interval(&c.spec, &c.accumulated) {
                return c.constraint;
            }
            // the preferred rule is wider than what every owner admits
            DepConstraint {
                version_spec: c.accumulated.to_string(),
                ..c.constraint
            }
        })
        .collect())
}

fn same_interval(a: &VersionSpec, b: &VersionSpec) -> bool {
    a.lowerbound == b.lowerbound
        && a.upperbound == b.upperbound
        && (a.lowerbound.is_none() || a.lower_inclusive == b.lower_inclusive)
        && (a.upperbound.is_none() || a.upper_inclusive == b.upper_inclusive)
}

/// `Greater` when `a` is preferred over `b`.
fn preference(a: &VersionSpec, a_text: &str, b: &VersionSpec, b_text: &str) -> Ordering {
    let lower = |s: &VersionSpec| (s.lowerbound.clone(), !s.lower_inclusive);
    let upper = |s: &VersionSpec| (s.upperbound.is_none(), s.upperbound.clone(), s.upper_inclusive);

    lower(a)
        .cmp(&lower(b))
        .then_with(|| upper(b).cmp(&upper(a)))
        .then_with(|| b_text.trim().cmp(a_text.trim()))
}

fn conflict(package: &str, owners: &[String], reason: String) -> EngineError {
    EngineError::ThirdPartyConflict {
        package: package.to_owned(),
        owners: owners.join(", "),
        reason,
    }
}

/// Bring every spec in the graph in line with `mode` for owned dependencies
/// and `thirdparty_mode` for third-party ones, saving changed manifests.
///
/// Packages in `frozen` are neither rewritten nor consulted when merging
/// third-party specs. Returns the names of rewritten packages, sorted.
///
/// # Errors
/// Any third-party conflict aborts the whole pass before a manifest is
/// written. Otherwise returns the first rewrite or save error.
pub fn enforce_version_consistency(
    graph: &mut PkgGraph,
    managers: &Managers,
    mode: VersionConsistent,
    thirdparty_mode: VersionConsistent,
    frozen: &BTreeSet<String>,
) -> Result<Vec<String>, EngineError> {
    let merged = merge_third_party(graph, thirdparty_mode, frozen)?;

    let names: Vec<String> = graph
        .packages()
        .iter()
        .filter(|p| !frozen.contains(&p.name))
        .map(|p| p.name.clone())
        .collect();

    let mut modified = Vec::new();
    for name in names {
        let Some(pkg) = graph.package(&name) else {
            continue;
        };
        let manager = manager_for(managers, pkg.kind)?;
        let fixed = manager.fixed_version_pkg_names();

        let dependencies = propagate(graph, manager, &name, &pkg.dependencies, &merged, &fixed, mode)?;
        let dev_dependencies = propagate(graph, manager, &name, &pkg.dev_dependencies, &merged, &fixed, mode)?;
        if dependencies == pkg.dependencies && dev_dependencies == pkg.dev_dependencies {
            continue;
        }

        let Some(pkg) = graph.package_mut(&name) else {
            continue;
        };
        pkg.dependencies = dependencies;
        pkg.dev_dependencies = dev_dependencies;
        manager.save(pkg)?;
        log::info!("updated dependency specs of {name}");
        modified.push(name);
    }
    Ok(modified)
}

fn merge_third_party(
    graph: &mut PkgGraph,
    mode: VersionConsistent,
    frozen: &BTreeSet<String>,
) -> Result<HashMap<String, Vec<DepConstraint>>, EngineError> {
    let names: Vec<String> = graph
        .third_party_packages()
        .iter()
        .map(|p| p.name.clone())
        .collect();

    let mut merged = HashMap::new();
    for name in names {
        let Some(tp) = graph.third_party_mut(&name) else {
            continue;
        };
        let owners: BTreeMap<String, Vec<DepConstraint>> = tp
            .inverted_dependents
            .iter()
            .filter(|(owner, _)| !frozen.contains(*owner))
            .map(|(owner, specs)| (owner.clone(), specs.clone()))
            .collect();
        if owners.is_empty() {
            continue;
        }

        let specs = find_latest_specs(&name, &owners, mode)?;
        for constraints in tp.inverted_dependents.values_mut() {
            constraints.clone_from(&specs);
        }
        merged.insert(name, specs);
    }
    Ok(merged)
}

fn propagate(
    graph: &PkgGraph,
    manager: &dyn PkgManager,
    owner: &str,
    deps: &Dependencies,
    merged: &HashMap<String, Vec<DepConstraint>>,
    fixed: &BTreeSet<String>,
    mode: VersionConsistent,
) -> Result<Dependencies, EngineError> {
    let mut out = Dependencies::new();
    for (dep, constraints) in deps {
        if fixed.contains(dep) {
            out.insert(dep.clone(), constraints.clone());
            continue;
        }

        if let Some(local) = graph.package(dep) {
            let version = manager.parse_version(&local.version)?;
            let mut rewritten = Vec::with_capacity(constraints.len());
            for constraint in constraints {
                let mut constraint = constraint.clone();
                if needs_rewrite(&constraint.version_spec, &version, mode)? {
                    let spec = manager.update_version_spec(&constraint.version_spec, &version)?;
                    log::info!("{owner}: {dep} {} -> {spec}", constraint.version_spec);
                    constraint.version_spec = spec;
                }
                rewritten.push(constraint);
            }
            out.insert(dep.clone(), rewritten);
        } else if let Some(specs) = merged.get(dep) {
            if specs != constraints {
                log::debug!("{owner}: aligning {dep} with the other packages");
            }
            out.insert(dep.clone(), specs.clone());
        } else {
            out.insert(dep.clone(), constraints.clone());
        }
    }
    Ok(out)
}

fn needs_rewrite(rule: &str, version: &Version, mode: VersionConsistent) -> Result<bool, EngineError> {
    let spec = parse_version_spec(rule)?;
    Ok(match mode {
        VersionConsistent::Strict => spec.lowerbound.as_ref() != Some(version),
        VersionConsistent::Compatible => !spec.is_version_compatible(version),
        VersionConsistent::NoCheck => false,
    })
}
