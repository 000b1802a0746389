//! The install/build/clean/publish driver over a discovered project.

use std::collections::{BTreeMap, BTreeSet};

use pbt_config::PbtConfig;

use crate::cache::{BuildCache, BuildKey};
use crate::consistency::{enforce_version_consistency, VersionConsistent};
use crate::diff::{Diff, RemoteDiff};
use crate::error::EngineError;
use crate::graph::{PkgGraph, PkgNode};
use crate::manager::{manager_for, Managers, Registries, Vcs};
use crate::package::{DepConstraint, Dependencies, Package};
use crate::store::SnapshotStores;

/// What happened to a package asked to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The build step ran.
    Fresh,
    /// Artifacts exist and nothing changed since the last build.
    Skipped,
    /// Already built with the same options earlier in this run.
    Cached,
}

/// One pipeline per command: owns the graph, the adapters, the build cache
/// and the snapshot stores.
pub struct BtPipeline {
    config: PbtConfig,
    managers: Managers,
    vcs: Box<dyn Vcs>,
    graph: PkgGraph,
    cache: BuildCache,
    stores: SnapshotStores,
}

impl BtPipeline {
    /// Create a pipeline. The graph is empty until [`discover`](Self::discover).
    pub fn new(config: PbtConfig, managers: Managers, vcs: Box<dyn Vcs>) -> Self {
        let stores = SnapshotStores::new(config.cache_dir_path());
        Self {
            config,
            managers,
            vcs,
            graph: PkgGraph::default(),
            cache: BuildCache::default(),
            stores,
        }
    }

    pub fn config(&self) -> &PbtConfig {
        &self.config
    }

    pub fn graph(&self) -> &PkgGraph {
        &self.graph
    }

    /// Find and load every package under the project root and rebuild the graph.
    ///
    /// Managers are consulted in kind order.
    ///
    /// # Errors
    /// Returns an error if a package fails to load, two packages share a
    /// name, or the graph is invalid.
    pub fn discover(&mut self) -> Result<(), EngineError> {
        let root = self.config.root.clone();
        log::debug!("discovering packages under {}", root.display());

        let ignore_dirs = self.config.ignored_dirs();
        let mut kinds: Vec<_> = self.managers.keys().copied().collect();
        kinds.sort();

        let mut packages: BTreeMap<String, Package> = BTreeMap::new();
        for kind in kinds {
            let manager = manager_for(&self.managers, kind)?;
            for dir in manager.discover(&root, &ignore_dirs, &self.config.ignore_directory_names)? {
                if !manager.is_package_directory(&dir) {
                    continue;
                }
                let pkg = manager.load(&dir)?;
                if let Some(existing) = packages.get(&pkg.name) {
                    return Err(EngineError::DuplicatePackage {
                        name: pkg.name.clone(),
                        first: existing.location.display().to_string(),
                        second: pkg.location.display().to_string(),
                    });
                }
                log::debug!("found {kind} package {} at {}", pkg.name, pkg.location.display());
                packages.insert(pkg.name.clone(), pkg);
            }
        }

        let count = packages.len();
        self.graph = PkgGraph::from_packages(packages)?;
        log::debug!("discovered {count} packages");
        Ok(())
    }

    /// Validate requested package names; no names means every package.
    ///
    /// # Errors
    /// Returns [`EngineError::UnknownPackage`] listing the available names.
    pub fn resolve_names(&self, names: &[String]) -> Result<Vec<String>, EngineError> {
        if names.is_empty() {
            return Ok(self.graph.packages().iter().map(|p| p.name.clone()).collect());
        }
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            if self.graph.package(name).is_none() {
                return Err(self.graph.unknown(name));
            }
            if !resolved.contains(name) {
                resolved.push(name.clone());
            }
        }
        Ok(resolved)
    }

    /// See [`enforce_version_consistency`]. Frozen packages come from the config.
    ///
    /// # Errors
    /// Returns an error on a third-party conflict or a failed rewrite.
    pub fn enforce_version_consistency(
        &mut self,
        mode: VersionConsistent,
        thirdparty_mode: VersionConsistent,
    ) -> Result<Vec<String>, EngineError> {
        enforce_version_consistency(
            &mut self.graph,
            &self.managers,
            mode,
            thirdparty_mode,
            &self.config.freeze_packages,
        )
    }

    /// Install each package with its dependencies.
    ///
    /// Local dependencies are left out of the package's own install and
    /// installed afterwards from their current sources, unless they are
    /// listed under `use_prebuilt_binaries`. Transitive dependencies the
    /// package does not declare itself are passed as additional ones.
    ///
    /// # Errors
    /// Returns the first install or build error.
    pub fn install(&mut self, names: &[String], include_dev: bool) -> Result<(), EngineError> {
        let names = self.resolve_names(names)?;
        self.with_build_cache(|this| {
            for name in &names {
                this.install_package(name, include_dev)?;
            }
            Ok(())
        })
    }

    fn install_package(&mut self, name: &str, include_dev: bool) -> Result<(), EngineError> {
        let prebuilt = self.config.use_prebuilt_binaries.clone();
        let mut builder = self.builder();
        let graph = builder.graph;
        let managers = builder.managers;

        let pkg = graph.package(name).ok_or_else(|| graph.unknown(name))?;
        let manager = manager_for(managers, pkg.kind)?;

        let mut skip = Vec::new();
        let mut additional = Dependencies::new();
        let mut local = Vec::new();
        for node in graph.dependencies(name, include_dev)? {
            match node {
                PkgNode::Owned(dep) if prebuilt.contains(&dep.name) => {
                    if !pkg.declares(&dep.name) {
                        additional.insert(
                            dep.name.clone(),
                            vec![DepConstraint::new(format!("=={}", dep.version))],
                        );
                    }
                }
                PkgNode::Owned(dep) => {
                    skip.push(dep.name.clone());
                    local.push(dep);
                }
                PkgNode::ThirdParty(tp) => {
                    if pkg.declares(&tp.name) {
                        continue;
                    }
                    if let Some(specs) = tp.inverted_dependents.values().next() {
                        additional.insert(tp.name.clone(), specs.clone());
                    }
                }
            }
        }

        log::info!("installing {name}");
        manager.install(pkg, include_dev, &skip, &additional)?;

        for dep in local {
            let dep_skip = dep.all_dependency_names();
            builder.build(dep, &dep_skip, &Dependencies::new(), false)?;
            log::info!("installing local dependency {} into {name}", dep.name);
            manager.install_dependency(pkg, dep, &dep_skip)?;
        }
        Ok(())
    }

    /// Build the packages, dependencies first, skipping unchanged ones that
    /// still have their artifacts.
    ///
    /// # Errors
    /// Returns the first build, diff or snapshot error.
    pub fn build(&mut self, names: &[String]) -> Result<Vec<(String, BuildOutcome)>, EngineError> {
        let names: BTreeSet<String> = self.resolve_names(names)?.into_iter().collect();
        let order = self.graph.topological_order(&names);
        self.with_build_cache(|this| {
            let mut builder = this.builder();
            let graph = builder.graph;
            let mut outcomes = Vec::with_capacity(order.len());
            for name in order {
                let pkg = graph.package(&name).ok_or_else(|| graph.unknown(&name))?;
                let outcome = builder.build(pkg, &[], &Dependencies::new(), true)?;
                outcomes.push((name, outcome));
            }
            Ok(outcomes)
        })
    }

    /// Remove environments and artifacts of the packages.
    ///
    /// # Errors
    /// Returns the first clean error.
    pub fn clean(&mut self, names: &[String]) -> Result<(), EngineError> {
        for name in self.resolve_names(names)? {
            let pkg = self.graph.package(&name).ok_or_else(|| self.graph.unknown(&name))?;
            log::info!("cleaning {name}");
            manager_for(&self.managers, pkg.kind)?.clean(pkg)?;
        }
        Ok(())
    }

    /// Publish the packages and their production dependencies that are not
    /// yet on their registry, dependencies first.
    ///
    /// Every candidate is checked before anything is uploaded: a package whose
    /// content changed while its version matches the registry stops the whole
    /// publish. Returns the names published.
    ///
    /// Uploads go in dependency order rather than plain name order, so a
    /// dependent never reaches the registry before a dependency it needs;
    /// packages with no ordering between them go by ascending name.
    ///
    /// # Errors
    /// Returns [`EngineError::PublishDrift`] naming every drifting package,
    /// [`EngineError::OutdatedVersion`], or the first registry, build or
    /// publish error.
    pub fn publish(&mut self, names: &[String], registries: &Registries) -> Result<Vec<String>, EngineError> {
        let names = self.resolve_names(names)?;
        self.with_build_cache(|this| this.publish_packages(&names, registries))
    }

    fn publish_packages(&mut self, names: &[String], registries: &Registries) -> Result<Vec<String>, EngineError> {
        let mut candidates = BTreeSet::new();
        for name in names {
            candidates.insert(name.clone());
            for node in self.graph.dependencies(name, false)? {
                if let PkgNode::Owned(dep) = node {
                    candidates.insert(dep.name.clone());
                }
            }
        }
        let order = self.graph.topological_order(&candidates);

        let mut builder = self.builder();
        let graph = builder.graph;
        let managers = builder.managers;

        let mut drifted = Vec::new();
        let mut pending = Vec::new();
        for name in &order {
            let pkg = graph.package(name).ok_or_else(|| graph.unknown(name))?;
            let manager = manager_for(managers, pkg.kind)?;
            let registry = registries.get(&pkg.kind).ok_or_else(|| EngineError::NoRegistry {
                kind: pkg.kind.to_string(),
            })?;

            let remote = registry.latest_version_and_hash(name)?;
            let remote = remote.as_ref().map(|(v, h)| (v.as_str(), h.as_str()));
            let diff = RemoteDiff::from_pkg(manager, pkg, remote, || {
                builder.build(pkg, &[], &Dependencies::new(), true)?;
                manager.compute_pkg_hash(pkg, None)
            })?;

            if diff.is_version_diff {
                pending.push(pkg);
            } else if diff.is_content_changed {
                log::error!(
                    "{name} {} changed since it was published but its version was not bumped",
                    pkg.version
                );
                drifted.push(name.clone());
            } else {
                log::info!("{name} {} is already published", pkg.version);
            }
        }

        if !drifted.is_empty() {
            return Err(EngineError::PublishDrift {
                packages: drifted.join(", "),
            });
        }

        let mut published = Vec::with_capacity(pending.len());
        for pkg in pending {
            builder.build(pkg, &[], &Dependencies::new(), true)?;
            log::info!("publishing {} {}", pkg.name, pkg.version);
            manager_for(managers, pkg.kind)?.publish(pkg)?;
            published.push(pkg.name.clone());
        }
        Ok(published)
    }

    /// Run `f` inside one build-cache scope; nested scopes share the memo.
    fn with_build_cache<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.cache.enter();
        let result = f(self);
        self.cache.exit();
        result
    }

    fn builder(&mut self) -> Builder<'_> {
        Builder {
            graph: &self.graph,
            managers: &self.managers,
            vcs: self.vcs.as_ref(),
            cache: &mut self.cache,
            stores: &mut self.stores,
        }
    }
}

/// Borrowed view of the pipeline used while building, so the graph can be
/// read while the cache and stores are updated.
struct Builder<'a> {
    graph: &'a PkgGraph,
    managers: &'a Managers,
    vcs: &'a dyn Vcs,
    cache: &'a mut BuildCache,
    stores: &'a mut SnapshotStores,
}

impl Builder<'_> {
    fn build(
        &mut self,
        pkg: &Package,
        skip_deps: &[String],
        additional_deps: &Dependencies,
        release: bool,
    ) -> Result<BuildOutcome, EngineError> {
        let key = BuildKey::new(pkg, skip_deps, additional_deps, release);
        if self.cache.contains(&key) {
            log::debug!("{} already built in this run", pkg.name);
            return Ok(BuildOutcome::Cached);
        }

        let manager = manager_for(self.managers, pkg.kind)?;
        let mut diff = Diff::from_local(self.vcs, pkg, manager.manifest_file_names())?;
        let store = self.stores.open(&pkg.name)?;

        if manager.has_artifacts(pkg) && !diff.is_modified(store)? {
            log::info!("{} is unchanged, skipping build", pkg.name);
            self.cache.insert(key);
            return Ok(BuildOutcome::Skipped);
        }

        log::info!("building {} {}", pkg.name, pkg.version);
        manager.build(pkg, skip_deps, additional_deps, release, true)?;
        diff.save(store)?;
        self.cache.insert(key);
        Ok(BuildOutcome::Fresh)
    }
}
