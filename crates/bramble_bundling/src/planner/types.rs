use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexSet;

use bramble_core::graph::{ContentGraph, DirectedGraph, NodeId};
use bramble_core::types::{
  Asset, AssetId, Dependency, Environment, FileType, MaybeBundleBehavior, Priority, Target,
};

/// A planned output bundle.
///
/// `size` is kept equal to the sum of `stats.size` over `assets` at all
/// times; every mutation goes through [`Bundle::insert_asset`].
#[derive(Clone, Debug)]
pub struct Bundle {
  /// The root asset this bundle was created for; `None` for synthesized
  /// shared bundles.
  pub entry_asset_id: Option<AssetId>,

  /// The assets assigned to this bundle, in placement order.
  pub assets: IndexSet<AssetId>,

  /// Async import targets this bundle resolves locally instead of issuing a
  /// request for, in discovery order.
  pub internalized_asset_ids: Vec<AssetId>,

  /// The bundles this shared bundle was split out of. Empty for bundles with
  /// a root asset.
  pub source_bundles: Vec<NodeId>,

  /// Total size in bytes of the assets in this bundle.
  pub size: u64,

  pub target: Target,
  pub env: Arc<Environment>,
  pub file_type: FileType,
  pub needs_stable_name: bool,
  pub bundle_behavior: MaybeBundleBehavior,
}

impl Bundle {
  /// A bundle rooted at `asset`, containing the asset itself.
  pub fn from_root_asset(
    asset: &Asset,
    target: Target,
    needs_stable_name: bool,
    bundle_behavior: MaybeBundleBehavior,
  ) -> Self {
    Bundle {
      entry_asset_id: Some(asset.id.clone()),
      assets: IndexSet::from([asset.id.clone()]),
      internalized_asset_ids: Vec::new(),
      source_bundles: Vec::new(),
      size: u64::from(asset.stats.size),
      target,
      env: asset.env.clone(),
      file_type: asset.file_type.clone(),
      needs_stable_name,
      bundle_behavior,
    }
  }

  /// A shared bundle split out of `source_bundles`, initially empty. Type
  /// and environment are taken from the first asset placed in it.
  pub fn shared(
    source_bundles: Vec<NodeId>,
    target: Target,
    env: Arc<Environment>,
    file_type: FileType,
  ) -> Self {
    Bundle {
      entry_asset_id: None,
      assets: IndexSet::new(),
      internalized_asset_ids: Vec::new(),
      source_bundles,
      size: 0,
      target,
      env,
      file_type,
      needs_stable_name: false,
      bundle_behavior: None,
    }
  }

  pub fn is_shared(&self) -> bool {
    !self.source_bundles.is_empty()
  }

  /// Adds an asset, keeping `size` in sync. Returns false when the asset was
  /// already present.
  pub fn insert_asset(&mut self, asset_id: &AssetId, size: u32) -> bool {
    let inserted = self.assets.insert(asset_id.clone());
    if inserted {
      self.size += u64::from(size);
    }
    inserted
  }
}

/// Node payload of the dependency ↔ bundle association graph.
///
/// Dependency nodes are keyed by dependency id, bundle nodes by
/// `bundle:<node id>`; edges carry the dependency priority.
#[derive(Clone, Debug)]
pub enum DependencyBundleGraphNode {
  Dependency(Arc<Dependency>),
  Bundle(NodeId),
}

/// The planner's output. Frozen once emitted; the host translates it into
/// its own bundle graph.
#[derive(Clone, Debug)]
pub struct IdealPlan {
  /// Bundles and their "loaded together with" edges: bundle-group
  /// containment, shared-bundle membership, and bundle reuse.
  pub bundle_graph: DirectedGraph<Bundle>,

  /// Associates dependencies with the bundles they resolve to, labeled with
  /// the dependency priority.
  pub dependency_bundle_graph: ContentGraph<DependencyBundleGraphNode, Priority>,

  /// Bundle nodes that root a bundle group.
  pub bundle_group_bundle_ids: IndexSet<NodeId>,

  /// Bundle nodes created for entry dependencies, in entry order.
  pub entry_bundles: Vec<NodeId>,

  /// For assets split into a sibling bundle, the dependencies that
  /// referenced them and the bundle they were placed in.
  pub asset_reference: HashMap<AssetId, Vec<(String, NodeId)>>,
}

impl IdealPlan {
  /// The bundles of the plan in creation order.
  pub fn bundles(&self) -> impl Iterator<Item = (NodeId, &Bundle)> {
    self
      .bundle_graph
      .node_ids()
      .filter_map(|node_id| Some((node_id, self.bundle_graph.get_node(&node_id)?)))
  }

  /// Looks up the bundle rooted at `asset_id`, if it survived planning.
  pub fn bundle_by_root_asset(&self, asset_id: &str) -> Option<(NodeId, &Bundle)> {
    self
      .bundles()
      .find(|(_, bundle)| bundle.entry_asset_id.as_deref() == Some(asset_id))
  }
}

/// Summary statistics from a planning run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PlanStats {
  pub assets: usize,
  pub dependencies: usize,
  pub bundles: usize,
  pub shared_bundles: usize,
}
