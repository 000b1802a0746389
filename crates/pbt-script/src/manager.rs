//! Package manager for `pbt.toml` packages whose lifecycle steps are shell
//! commands under `[scripts]`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pbt_config::manifest::{DependencyDecl, DetailedDependency, Manifest, MANIFEST_FILE_NAME};
use pbt_config::PbtConfig;
use pbt_engine::package::Dependencies;
use pbt_engine::{DepConstraint, EngineError, Package, PackageKind, PkgManager};
use pbt_util::process::{run_command, shell};

use crate::error::ScriptError;

/// Fields of a table-form dependency that tell alternatives apart.
const KEY_FIELDS: [&str; 3] = ["markers", "platform", "python"];

/// Drives packages through `sh -c` scripts declared in their manifest.
#[derive(Debug, Clone)]
pub struct ScriptManager {
    dist_dir: String,
}

impl ScriptManager {
    pub fn new(config: &PbtConfig) -> Self {
        Self {
            dist_dir: config.distribution_dir.clone(),
        }
    }

    fn dist_path(&self, pkg: &Package) -> PathBuf {
        pkg.location.join(&self.dist_dir)
    }

    fn manifest(pkg: &Package) -> Result<Manifest, ScriptError> {
        Ok(Manifest::from_path(&pkg.location.join(MANIFEST_FILE_NAME))?)
    }

    /// Run one lifecycle script of `pkg` in `dir`. A missing script is fine
    /// unless `required`.
    fn run_script(
        &self,
        pkg: &Package,
        step: &str,
        dir: &Path,
        env: &[(&str, String)],
        required: bool,
    ) -> Result<(), ScriptError> {
        let scripts = Self::manifest(pkg)?.scripts;
        let script = match step {
            "build" => scripts.build,
            "install" => scripts.install,
            "publish" => scripts.publish,
            "clean" => scripts.clean,
            _ => None,
        };
        let Some(script) = script else {
            if required {
                return Err(ScriptError::MissingScript {
                    package: pkg.name.clone(),
                    step: step.to_owned(),
                });
            }
            log::debug!("{} has no {step} script", pkg.name);
            return Ok(());
        };

        log::debug!("running {step} script of {}: {script}", pkg.name);
        let mut cmd = shell(&script, dir);
        cmd.env("PBT_PACKAGE", &pkg.name)
            .env("PBT_VERSION", &pkg.version)
            .env("PBT_DIST_DIR", self.dist_path(pkg));
        for (key, value) in env {
            cmd.env(key, value);
        }

        let output = run_command(&mut cmd)?;
        if !output.success() {
            return Err(ScriptError::ScriptFailed {
                package: pkg.name.clone(),
                step: step.to_owned(),
                stderr: output.failure_message(),
            });
        }
        Ok(())
    }
}

fn flag(value: bool) -> String {
    let text = if value { "1" } else { "0" };
    text.to_owned()
}

fn dependency_env(skip_deps: &[String], additional_deps: &Dependencies) -> Vec<(&'static str, String)> {
    let additional: Vec<String> = additional_deps
        .iter()
        .flat_map(|(name, specs)| specs.iter().map(move |c| format!("{name} {}", c.version_spec)))
        .collect();
    vec![
        ("PBT_SKIP_DEPS", skip_deps.join(",")),
        ("PBT_ADDITIONAL_DEPS", additional.join("\n")),
    ]
}

impl PkgManager for ScriptManager {
    fn is_package_directory(&self, dir: &Path) -> bool {
        dir.join(MANIFEST_FILE_NAME).is_file()
    }

    fn manifest_file_names(&self) -> &[&str] {
        &[MANIFEST_FILE_NAME]
    }

    fn load(&self, dir: &Path) -> Result<Package, EngineError> {
        let manifest = Manifest::from_path(&dir.join(MANIFEST_FILE_NAME)).map_err(ScriptError::from)?;
        let name = manifest.package.name.clone();
        Ok(Package {
            dependencies: to_constraints(&name, &manifest.dependencies)?,
            dev_dependencies: to_constraints(&name, &manifest.dev_dependencies)?,
            name,
            version: manifest.package.version,
            kind: PackageKind::Script,
            location: dir.to_path_buf(),
            include: manifest.package.include,
            exclude: manifest.package.exclude,
        })
    }

    fn save(&self, pkg: &Package) -> Result<(), EngineError> {
        let path = pkg.location.join(MANIFEST_FILE_NAME);
        let mut manifest = Manifest::from_path(&path).map_err(ScriptError::from)?;
        manifest.package.version.clone_from(&pkg.version);
        manifest.dependencies = to_decls(&pkg.name, &pkg.dependencies, &manifest.dependencies)?;
        manifest.dev_dependencies = to_decls(&pkg.name, &pkg.dev_dependencies, &manifest.dev_dependencies)?;

        if manifest.write_to(&path).map_err(ScriptError::from)? {
            log::info!("wrote {}", path.display());
        }
        Ok(())
    }

    fn install(
        &self,
        pkg: &Package,
        include_dev: bool,
        skip_deps: &[String],
        additional_deps: &Dependencies,
    ) -> Result<(), EngineError> {
        let mut env = dependency_env(skip_deps, additional_deps);
        env.push(("PBT_INCLUDE_DEV", flag(include_dev)));
        Ok(self.run_script(pkg, "install", &pkg.location, &env, false)?)
    }

    fn install_dependency(
        &self,
        pkg: &Package,
        dependency: &Package,
        skip_dep_deps: &[String],
    ) -> Result<(), EngineError> {
        let mut env = dependency_env(skip_dep_deps, &Dependencies::new());
        env.push(("PBT_INCLUDE_DEV", flag(false)));
        env.push(("PBT_DEPENDENT_DIR", pkg.location.display().to_string()));
        Ok(self.run_script(dependency, "install", &dependency.location, &env, false)?)
    }

    fn build(
        &self,
        pkg: &Package,
        skip_deps: &[String],
        additional_deps: &Dependencies,
        release: bool,
        clean_dist: bool,
    ) -> Result<(), EngineError> {
        if clean_dist {
            pbt_util::fs::remove_dir_all_if_exists(&self.dist_path(pkg))?;
        }
        let mut env = dependency_env(skip_deps, additional_deps);
        env.push(("PBT_RELEASE", flag(release)));
        Ok(self.run_script(pkg, "build", &pkg.location, &env, false)?)
    }

    fn has_artifacts(&self, pkg: &Package) -> bool {
        std::fs::read_dir(self.dist_path(pkg)).is_ok_and(|mut entries| entries.next().is_some())
    }

    fn publish(&self, pkg: &Package) -> Result<(), EngineError> {
        Ok(self.run_script(pkg, "publish", &pkg.location, &[], true)?)
    }

    fn clean(&self, pkg: &Package) -> Result<(), EngineError> {
        self.run_script(pkg, "clean", &pkg.location, &[], false)?;
        pbt_util::fs::remove_dir_all_if_exists(&self.dist_path(pkg))?;
        Ok(())
    }

    /// Hash of the release artifacts, or of `dist/<target>` for one target.
    /// Builds first when there are no artifacts yet.
    fn compute_pkg_hash(&self, pkg: &Package, target: Option<&str>) -> Result<String, EngineError> {
        if !self.has_artifacts(pkg) {
            self.build(pkg, &[], &Dependencies::new(), true, true)?;
        }
        let dir = match target {
            Some(target) => self.dist_path(pkg).join(target),
            None => self.dist_path(pkg),
        };
        Ok(pbt_util::hash::sha256_dir(&dir)?)
    }
}

fn to_constraints(
    package: &str,
    decls: &BTreeMap<String, DependencyDecl>,
) -> Result<Dependencies, ScriptError> {
    let mut deps = Dependencies::new();
    for (name, decl) in decls {
        let mut constraints = match decl {
            DependencyDecl::Spec(spec) => vec![DepConstraint::new(spec.clone())],
            DependencyDecl::Detailed(detail) => vec![from_detailed(package, name, detail)?],
            DependencyDecl::Alternatives(alternatives) => alternatives
                .iter()
                .map(|detail| from_detailed(package, name, detail))
                .collect::<Result<Vec<_>, _>>()?,
        };
        constraints.sort_by(|a, b| a.constraint_key.cmp(&b.constraint_key));
        deps.insert(name.clone(), constraints);
    }
    Ok(deps)
}

fn from_detailed(package: &str, dependency: &str, detail: &DetailedDependency) -> Result<DepConstraint, ScriptError> {
    let key_parts: Vec<String> = KEY_FIELDS
        .iter()
        .filter_map(|field| {
            detail.fields.get(*field).map(|value| match value {
                toml::Value::String(s) => format!("{field}={s}"),
                other => format!("{field}={other}"),
            })
        })
        .collect();

    let mut origin_spec_fields = BTreeMap::new();
    for (field, value) in &detail.fields {
        let json = serde_json::to_value(value).map_err(|e| ScriptError::InvalidField {
            package: package.to_owned(),
            dependency: dependency.to_owned(),
            field: field.clone(),
            message: e.to_string(),
        })?;
        origin_spec_fields.insert(field.clone(), json);
    }

    Ok(DepConstraint {
        version_spec: detail.version.clone(),
        constraint_key: (!key_parts.is_empty()).then(|| key_parts.join(";")),
        origin_spec_fields,
    })
}

/// Render constraints back into manifest form. Entries whose constraints are
/// unchanged keep their original declaration as written.
fn to_decls(
    package: &str,
    deps: &Dependencies,
    original: &BTreeMap<String, DependencyDecl>,
) -> Result<BTreeMap<String, DependencyDecl>, ScriptError> {
    let mut decls = BTreeMap::new();
    for (name, constraints) in deps {
        if let Some(decl) = original.get(name) {
            let unchanged = to_constraints(package, &BTreeMap::from([(name.clone(), decl.clone())]))?
                .get(name)
                .is_some_and(|c| c == constraints);
            if unchanged {
                decls.insert(name.clone(), decl.clone());
                continue;
            }
        }

        let decl = match constraints.as_slice() {
            [single] if single.constraint_key.is_none() && single.origin_spec_fields.is_empty() => {
                DependencyDecl::Spec(single.version_spec.clone())
            }
            [single] if single.constraint_key.is_none() => {
                DependencyDecl::Detailed(to_detailed(package, name, single)?)
            }
            many => DependencyDecl::Alternatives(
                many.iter()
                    .map(|c| to_detailed(package, name, c))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        decls.insert(name.clone(), decl);
    }
    Ok(decls)
}

fn to_detailed(package: &str, dependency: &str, constraint: &DepConstraint) -> Result<DetailedDependency, ScriptError> {
    let mut fields = BTreeMap::new();
    for (field, value) in &constraint.origin_spec_fields {
        let toml_value = toml::Value::try_from(value).map_err(|e| ScriptError::InvalidField {
            package: package.to_owned(),
            dependency: dependency.to_owned(),
            field: field.clone(),
            message: e.to_string(),
        })?;
        fields.insert(field.clone(), toml_value);
    }
    Ok(DetailedDependency {
        version: constraint.version_spec.clone(),
        fields,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    const LIB1: &str = r#"
[package]
name = "lib1"
version = "0.2.1"
include = ["lib1"]

[dependencies]
lib0 = "^0.5.1"
numpy = [{ version = "^1.19", markers = "win32" }, { version = "^1.20", markers = "linux" }]
requests = { version = "^2.0", extras = ["socks"] }

[dev-dependencies]
pytest = "^7.0"

[scripts]
build = "mkdir -p \"$PBT_DIST_DIR\" && echo \"$PBT_PACKAGE $PBT_VERSION release=$PBT_RELEASE\" > \"$PBT_DIST_DIR/out.txt\""
install = "printf '%s|%s|%s|%s' \"$PBT_SKIP_DEPS\" \"$PBT_ADDITIONAL_DEPS\" \"$PBT_INCLUDE_DEV\" \"$PBT_DEPENDENT_DIR\" > installed.txt"
clean = "rm -f installed.txt"
"#;

    fn setup(manifest: &str) -> (tempfile::TempDir, PathBuf, ScriptManager) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("lib1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE_NAME), manifest).unwrap();
        (tmp, dir, ScriptManager::new(&PbtConfig::default()))
    }

    #[test]
    fn load_converts_dependency_forms() {
        let (_tmp, dir, manager) = setup(LIB1);
        assert!(manager.is_package_directory(&dir));
        let pkg = manager.load(&dir).unwrap();

        assert_eq!(pkg.name, "lib1");
        assert_eq!(pkg.kind, PackageKind::Script);
        assert_eq!(pkg.include, vec!["lib1"]);
        assert_eq!(pkg.dependencies["lib0"], vec![DepConstraint::new("^0.5.1")]);

        let numpy = &pkg.dependencies["numpy"];
        assert_eq!(numpy[0].constraint_key.as_deref(), Some("markers=linux"));
        assert_eq!(numpy[0].version_spec, "^1.20");
        assert_eq!(numpy[1].constraint_key.as_deref(), Some("markers=win32"));

        let requests = &pkg.dependencies["requests"][0];
        assert_eq!(requests.constraint_key, None);
        assert_eq!(requests.origin_spec_fields["extras"], serde_json::json!(["socks"]));
        assert!(pkg.dev_dependencies.contains_key("pytest"));
    }

    #[test]
    fn save_unchanged_leaves_file_alone() {
        let (_tmp, dir, manager) = setup(LIB1);
        let pkg = manager.load(&dir).unwrap();
        manager.save(&pkg).unwrap();
        assert_eq!(fs::read_to_string(dir.join(MANIFEST_FILE_NAME)).unwrap(), LIB1);
    }

    #[test]
    fn save_rewrites_changed_specs() {
        let (_tmp, dir, manager) = setup(LIB1);
        let mut pkg = manager.load(&dir).unwrap();
        pkg.dependencies.get_mut("lib0").unwrap()[0].version_spec = "^0.6.0".to_owned();
        pkg.dependencies.get_mut("requests").unwrap()[0].version_spec = "^2.31".to_owned();
        pkg.dependencies.get_mut("numpy").unwrap()[0].version_spec = "^1.22".to_owned();
        manager.save(&pkg).unwrap();

        let reloaded = manager.load(&dir).unwrap();
        assert_eq!(reloaded.dependencies, pkg.dependencies);
        assert_eq!(reloaded.dev_dependencies, pkg.dev_dependencies);
        let text = fs::read_to_string(dir.join(MANIFEST_FILE_NAME)).unwrap();
        assert!(text.contains("[scripts]"), "other tables kept:\n{text}");
    }

    #[test]
    fn build_runs_script_and_hashes_dist() {
        let (_tmp, dir, manager) = setup(LIB1);
        let pkg = manager.load(&dir).unwrap();
        assert!(!manager.has_artifacts(&pkg));

        manager.build(&pkg, &[], &Dependencies::new(), true, true).unwrap();
        assert!(manager.has_artifacts(&pkg));
        let out = fs::read_to_string(dir.join("dist").join("out.txt")).unwrap();
        assert_eq!(out.trim(), "lib1 0.2.1 release=1");

        let first = manager.compute_pkg_hash(&pkg, None).unwrap();
        assert_eq!(first, manager.compute_pkg_hash(&pkg, None).unwrap());

        manager.build(&pkg, &[], &Dependencies::new(), false, true).unwrap();
        assert_ne!(first, manager.compute_pkg_hash(&pkg, None).unwrap());
    }

    #[test]
    fn compute_hash_builds_when_needed() {
        let (_tmp, dir, manager) = setup(LIB1);
        let pkg = manager.load(&dir).unwrap();
        manager.compute_pkg_hash(&pkg, None).unwrap();
        assert!(manager.has_artifacts(&pkg));
    }

    #[test]
    fn install_passes_dependency_environment() {
        let (_tmp, dir, manager) = setup(LIB1);
        let pkg = manager.load(&dir).unwrap();
        let extra = BTreeMap::from([("numpy".to_owned(), vec![DepConstraint::new("^1.20")])]);
        manager
            .install(&pkg, true, &["lib0".to_owned(), "lib2".to_owned()], &extra)
            .unwrap();
        assert_eq!(
            fs::read_to_string(dir.join("installed.txt")).unwrap(),
            "lib0,lib2|numpy ^1.20|1|"
        );

        let dependent = Package {
            location: PathBuf::from("/repo/app"),
            ..pkg.clone()
        };
        manager.install_dependency(&dependent, &pkg, &["lib0".to_owned()]).unwrap();
        assert_eq!(
            fs::read_to_string(dir.join("installed.txt")).unwrap(),
            "lib0||0|/repo/app"
        );

        manager.clean(&pkg).unwrap();
        assert!(!dir.join("installed.txt").exists());
    }

    #[test]
    fn failing_script_reports_stderr() {
        let manifest = "[package]\nname = \"bad\"\nversion = \"1.0.0\"\n\n[scripts]\nbuild = \"echo broken >&2; exit 4\"\n";
        let (_tmp, dir, manager) = setup(manifest);
        let pkg = manager.load(&dir).unwrap();
        let err = manager.build(&pkg, &[], &Dependencies::new(), true, false).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("build script of bad failed: broken"), "got {message}");
    }

    #[test]
    fn publish_requires_a_script() {
        let (_tmp, dir, manager) = setup(LIB1);
        let pkg = manager.load(&dir).unwrap();
        let err = manager.publish(&pkg).unwrap_err();
        assert!(err.to_string().contains("no publish script"), "got {err}");
    }

    #[test]
    fn missing_optional_scripts_are_skipped() {
        let manifest = "[package]\nname = \"bare\"\nversion = \"1.0.0\"\n";
        let (_tmp, dir, manager) = setup(manifest);
        let pkg = manager.load(&dir).unwrap();
        manager.build(&pkg, &[], &Dependencies::new(), true, true).unwrap();
        manager.install(&pkg, false, &[], &Dependencies::new()).unwrap();
        assert!(!manager.has_artifacts(&pkg));
    }

    #[test]
    fn discovers_through_default_walk() {
        let (tmp, dir, manager) = setup(LIB1);
        let found = manager.discover(tmp.path(), &[], &[]).unwrap();
        assert_eq!(found, vec![dir]);
    }
}
