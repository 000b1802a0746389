#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

use pbt_config::PbtConfig;
use pbt_engine::{BtPipeline, BuildOutcome, Managers, PackageKind, PkgNode, Registries, VersionConsistent};
use pbt_script::{ScriptManager, ScriptRegistry};
use pbt_util::git::Git;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "pbt", about = "Build, version and publish the packages of a project")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct Common {
    /// Package to operate on; repeat for several (defaults to all packages)
    #[arg(short = 'p', long = "package")]
    packages: Vec<String>,
    /// Project root (defaults to the current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Show debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install packages with their dependencies
    Install {
        #[command(flatten)]
        common: Common,
        /// Include dev dependencies
        #[arg(short, long)]
        dev: bool,
    },
    /// Build packages whose sources changed since their last build
    Build {
        #[command(flatten)]
        common: Common,
    },
    /// Remove environments and build artifacts
    Clean {
        #[command(flatten)]
        common: Common,
    },
    /// Pin dependency specs on local packages to their current versions
    Update {
        #[command(flatten)]
        common: Common,
    },
    /// Publish packages whose versions are not yet on the registry
    Publish {
        #[command(flatten)]
        common: Common,
    },
    /// List packages and their versions
    List {
        #[command(flatten)]
        common: Common,
        /// Also list each package's local dependencies, dev included
        #[arg(short, long)]
        dev: bool,
    },
}

impl Command {
    fn common(&self) -> &Common {
        match self {
            Command::Install { common, .. }
            | Command::Build { common }
            | Command::Clean { common }
            | Command::Update { common }
            | Command::Publish { common }
            | Command::List { common, .. } => common,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.command.common().verbose);

    let result = match cli.command {
        Command::Install { common, dev } => cmd_install(&common, dev),
        Command::Build { common } => cmd_build(&common),
        Command::Clean { common } => cmd_clean(&common),
        Command::Update { common } => cmd_update(&common),
        Command::Publish { common } => cmd_publish(&common),
        Command::List { common, dev } => cmd_list(&common, dev),
    };

    if let Err(msg) = result {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}

/// `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Load the project config and discover its packages.
fn open_pipeline(common: &Common) -> Result<BtPipeline, Box<dyn Error>> {
    let dir = match &common.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let config = PbtConfig::from_dir(&dir)?;
    log::debug!("project root: {}", config.root.display());

    let mut managers: Managers = HashMap::new();
    managers.insert(PackageKind::Script, Box::new(ScriptManager::new(&config)));

    let mut pipeline = BtPipeline::new(config, managers, Box::new(Git));
    pipeline.discover()?;
    Ok(pipeline)
}

fn enforce(pipeline: &mut BtPipeline, mode: VersionConsistent) -> CliResult {
    let updated = pipeline.enforce_version_consistency(mode, VersionConsistent::Compatible)?;
    for name in &updated {
        eprintln!("     Updated {name}");
    }
    Ok(())
}

fn cmd_install(common: &Common, dev: bool) -> CliResult {
    let mut pipeline = open_pipeline(common)?;
    enforce(&mut pipeline, VersionConsistent::Compatible)?;

    let names = pipeline.resolve_names(&common.packages)?;
    pipeline.install(&names, dev)?;
    eprintln!("    Finished installing {}", names.join(", "));
    Ok(())
}

fn cmd_build(common: &Common) -> CliResult {
    let mut pipeline = open_pipeline(common)?;
    enforce(&mut pipeline, VersionConsistent::Compatible)?;

    for (name, outcome) in pipeline.build(&common.packages)? {
        match outcome {
            BuildOutcome::Fresh => eprintln!("       Built {name}"),
            BuildOutcome::Skipped => eprintln!("     Skipped {name} (unchanged)"),
            BuildOutcome::Cached => eprintln!("       Fresh {name} (cached)"),
        }
    }
    Ok(())
}

fn cmd_clean(common: &Common) -> CliResult {
    let mut pipeline = open_pipeline(common)?;
    enforce(&mut pipeline, VersionConsistent::Compatible)?;

    let names = pipeline.resolve_names(&common.packages)?;
    pipeline.clean(&names)?;
    eprintln!("     Cleaned {}", names.join(", "));
    Ok(())
}

fn cmd_update(common: &Common) -> CliResult {
    let mut pipeline = open_pipeline(common)?;
    let updated = pipeline.enforce_version_consistency(VersionConsistent::Strict, VersionConsistent::Compatible)?;
    if updated.is_empty() {
        eprintln!("    Finished, all dependency specs are up to date");
    }
    for name in &updated {
        eprintln!("     Updated {name}");
    }
    Ok(())
}

fn cmd_publish(common: &Common) -> CliResult {
    let mut pipeline = open_pipeline(common)?;
    enforce(&mut pipeline, VersionConsistent::Compatible)?;

    let config = pipeline.config();
    let mut registries: Registries = HashMap::new();
    registries.insert(
        PackageKind::Script,
        Box::new(ScriptRegistry::new(config.registry_command.clone(), &config.root)),
    );

    let published = pipeline.publish(&common.packages, &registries)?;
    if published.is_empty() {
        eprintln!("    Finished, nothing to publish");
    }
    for name in &published {
        eprintln!("   Published {name}");
    }
    Ok(())
}

fn cmd_list(common: &Common, dev: bool) -> CliResult {
    let pipeline = open_pipeline(common)?;
    for line in list_lines(&pipeline, &common.packages, dev)? {
        println!("{line}");
    }
    Ok(())
}

fn list_lines(pipeline: &BtPipeline, packages: &[String], dev: bool) -> Result<Vec<String>, Box<dyn Error>> {
    let graph = pipeline.graph();
    let mut lines = Vec::new();
    for name in pipeline.resolve_names(packages)? {
        let Some(pkg) = graph.package(&name) else {
            continue;
        };
        lines.push(format!("{} {}", pkg.name, pkg.version));
        if dev {
            for dep in graph.dependencies(&name, true)?.into_iter().filter_map(PkgNode::as_owned) {
                lines.push(format!("  {} {}", dep.name, dep.version));
            }
        }
    }
    Ok(lines)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_install_with_packages() {
        let cli = Cli::try_parse_from(["pbt", "install", "-p", "lib0", "--package", "lib1", "-d"]).unwrap();
        match cli.command {
            Command::Install { common, dev } => {
                assert_eq!(common.packages, vec!["lib0", "lib1"]);
                assert!(dev);
                assert!(!common.verbose);
                assert!(common.cwd.is_none());
            }
            other => panic!("expected Install, got {other:?}"),
        }
    }

    #[test]
    fn parse_common_flags() {
        let cli = Cli::try_parse_from(["pbt", "publish", "--cwd", "/repo", "-v"]).unwrap();
        let common = cli.command.common();
        assert_eq!(common.cwd.as_deref(), Some(std::path::Path::new("/repo")));
        assert!(common.verbose);
        assert!(common.packages.is_empty());
    }

    #[test]
    fn parse_every_subcommand() {
        for sub in ["install", "build", "clean", "update", "publish", "list"] {
            assert!(Cli::try_parse_from(["pbt", sub]).is_ok(), "{sub}");
        }
    }

    #[test]
    fn dev_flag_only_where_supported() {
        assert!(Cli::try_parse_from(["pbt", "build", "--dev"]).is_err());
        assert!(Cli::try_parse_from(["pbt", "list", "--dev"]).is_ok());
    }

    #[test]
    fn missing_config_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let common = Common {
            packages: Vec::new(),
            cwd: Some(tmp.path().to_path_buf()),
            verbose: false,
        };
        let err = open_pipeline(&common).err().unwrap();
        assert!(err.to_string().contains("pbtconfig.json"), "got {err}");
    }

    #[test]
    fn list_project_packages() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("pbtconfig.json"), "{}").unwrap();
        for (name, deps) in [("lib0", ""), ("lib1", "[dev-dependencies]\nlib0 = \"^0.5\"\n")] {
            let dir = root.join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join("pbt.toml"),
                format!("[package]\nname = \"{name}\"\nversion = \"0.5.0\"\n\n{deps}"),
            )
            .unwrap();
        }

        let common = Common {
            packages: Vec::new(),
            cwd: Some(root.to_path_buf()),
            verbose: false,
        };
        let pipeline = open_pipeline(&common).unwrap();
        assert_eq!(list_lines(&pipeline, &[], false).unwrap(), vec!["lib0 0.5.0", "lib1 0.5.0"]);
        assert_eq!(
            list_lines(&pipeline, &["lib1".to_owned()], true).unwrap(),
            vec!["lib1 0.5.0", "  lib0 0.5.0"]
        );
        assert!(list_lines(&pipeline, &["nope".to_owned()], false).is_err());
    }
}
