#![forbid(unsafe_code)]
//! Package graph, version consistency, change detection and the
//! install/build/publish pipeline for pbt.

pub mod cache;
pub mod consistency;
pub mod diff;
pub mod error;
pub mod graph;
pub mod manager;
pub mod package;
pub mod pipeline;
pub mod store;

pub use cache::{BuildCache, BuildKey};
pub use consistency::{find_latest_specs, VersionConsistent};
pub use diff::{Diff, RemoteDiff};
pub use error::EngineError;
pub use graph::{PkgGraph, PkgNode, ThirdPartyPackage};
pub use manager::{Managers, PkgManager, PkgRegistry, Registries, Vcs};
pub use package::{DepConstraint, Package, PackageKind};
pub use pipeline::{BtPipeline, BuildOutcome};
pub use store::{SnapshotStore, SnapshotStores, WriteBatch};
