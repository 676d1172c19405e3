use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use anyhow::Context;
use fixedbitset::FixedBitSet;
use indexmap::IndexMap;
use indexmap::IndexSet;
use tracing::debug;
use tracing::instrument;

use bramble_core::asset_graph::AssetGraph;
use bramble_core::graph::ContentGraph;
use bramble_core::graph::DirectedGraph;
use bramble_core::graph::NodeId;
use bramble_core::types::Asset;
use bramble_core::types::AssetId;
use bramble_core::types::BundleBehavior;
use bramble_core::types::Dependency;
use bramble_core::types::Priority;

use crate::config::ResolvedPlannerConfig;

use super::types::Bundle;
use super::types::DependencyBundleGraphNode;
use super::types::IdealPlan;
use super::types::PlanStats;

/// Maps asset ids to small dense keys so availability sets can be bitsets.
#[derive(Debug, Default)]
struct AssetKeyInterner {
  by_id: HashMap<AssetId, u32>,
  ids: Vec<AssetId>,
  sizes: Vec<u32>,
}

impl AssetKeyInterner {
  fn from_asset_graph(asset_graph: &AssetGraph) -> Self {
    let mut assets: Vec<(AssetId, u32)> = asset_graph
      .get_assets()
      .map(|asset| (asset.id.clone(), asset.stats.size))
      .collect();
    assets.sort();
    assets.dedup_by(|a, b| a.0 == b.0);

    let mut by_id = HashMap::with_capacity(assets.len());
    let mut ids = Vec::with_capacity(assets.len());
    let mut sizes = Vec::with_capacity(assets.len());
    for (index, (id, size)) in assets.into_iter().enumerate() {
      let key = u32::try_from(index).expect("too many assets to key");
      by_id.insert(id.clone(), key);
      ids.push(id);
      sizes.push(size);
    }

    Self { by_id, ids, sizes }
  }

  fn key_for(&self, asset_id: &str) -> Option<u32> {
    self.by_id.get(asset_id).copied()
  }

  fn size_for(&self, asset_id: &str) -> u32 {
    self
      .key_for(asset_id)
      .map(|key| self.sizes[key as usize])
      .unwrap_or_default()
  }

  fn len(&self) -> usize {
    self.ids.len()
  }

  fn empty_set(&self) -> FixedBitSet {
    FixedBitSet::with_capacity(self.len())
  }
}

#[derive(Clone, Debug, PartialEq)]
enum AsyncRootNode {
  Root,
  BundleRoot(AssetId),
}

/// Intermediate state for computing an [`IdealPlan`].
///
/// The planner owns three internal graphs next to the output bundle graph:
/// an async bundle-root graph used to order availability propagation, a
/// reachability graph recording which bundle roots synchronously reach which
/// assets, and the dependency ↔ bundle association graph surfaced to the
/// caller. It runs to completion synchronously; the input graph is never
/// mutated.
pub(crate) struct IdealPlanner<'a> {
  asset_graph: &'a AssetGraph,
  config: ResolvedPlannerConfig,
  keys: AssetKeyInterner,

  bundle_graph: DirectedGraph<Bundle>,
  dependency_bundle_graph: ContentGraph<DependencyBundleGraphNode, Priority>,
  async_bundle_root_graph: ContentGraph<AsyncRootNode>,
  async_graph_root: NodeId,
  reachable_roots: ContentGraph<AssetId>,

  /// Bundle root asset id → (bundle node, bundle-group node).
  bundle_roots: IndexMap<AssetId, (NodeId, NodeId)>,
  bundle_group_bundle_ids: IndexSet<NodeId>,
  entry_bundle_ids: Vec<NodeId>,
  entry_asset_ids: IndexSet<AssetId>,
  entries: Vec<(NodeId, NodeId)>,

  /// Bundle node → roots that can lazily reach it.
  reachable_async_roots: HashMap<NodeId, IndexSet<AssetId>>,

  /// Root asset id → async bundle roots reachable below it without crossing
  /// a type or context boundary.
  reachable_bundles: HashMap<AssetId, IndexSet<AssetId>>,

  /// Root asset id → assets guaranteed loaded whenever that root loads.
  ancestor_assets: HashMap<AssetId, FixedBitSet>,

  /// Bundle-group node → per-asset count of group members carrying it.
  group_asset_ref_counts: HashMap<NodeId, Vec<u32>>,

  asset_reference: HashMap<AssetId, Vec<(String, NodeId)>>,
  shared_bundles: HashMap<String, NodeId>,

  /// Asset nodes in discovery order; placement iterates this.
  ordered_assets: Vec<NodeId>,
}

impl<'a> IdealPlanner<'a> {
  pub(crate) fn new(asset_graph: &'a AssetGraph, config: ResolvedPlannerConfig) -> Self {
    let mut async_bundle_root_graph = ContentGraph::new();
    let async_graph_root =
      async_bundle_root_graph.add_node_by_content_key("@@root", AsyncRootNode::Root);

    IdealPlanner {
      asset_graph,
      config,
      keys: AssetKeyInterner::default(),
      bundle_graph: DirectedGraph::new(),
      dependency_bundle_graph: ContentGraph::new(),
      async_bundle_root_graph,
      async_graph_root,
      reachable_roots: ContentGraph::new(),
      bundle_roots: IndexMap::new(),
      bundle_group_bundle_ids: IndexSet::new(),
      entry_bundle_ids: Vec::new(),
      entry_asset_ids: IndexSet::new(),
      entries: Vec::new(),
      reachable_async_roots: HashMap::new(),
      reachable_bundles: HashMap::new(),
      ancestor_assets: HashMap::new(),
      group_asset_ref_counts: HashMap::new(),
      asset_reference: HashMap::new(),
      shared_bundles: HashMap::new(),
      ordered_assets: Vec::new(),
    }
  }

  /// Full pipeline entrypoint.
  #[instrument(level = "debug", skip_all)]
  pub(crate) fn plan(mut self) -> anyhow::Result<(IdealPlan, PlanStats)> {
    self.keys = AssetKeyInterner::from_asset_graph(self.asset_graph);
    debug!(
      assets = self.keys.len(),
      "bundle planning: interned asset ids"
    );

    // Phase 1: bundles at entries and split points.
    self.discover_entries()?;
    self.create_bundles()?;

    // Phase 2: which roots synchronously reach which assets.
    self.compute_reachability()?;

    // Phase 3: which assets are guaranteed loaded at each async root.
    self.compute_availability()?;

    // Phase 4: assign every asset an owning or shared bundle.
    self.place_assets()?;

    // Phase 5: merge and cleanup.
    self.merge_small_shared_bundles()?;
    self.apply_parallel_request_limit()?;
    self.fold_entry_siblings()?;
    self.drop_orphaned_async_bundles()?;

    // Phase 6: freeze and export.
    Ok(self.into_plan())
  }

  // ----------------------------
  // Phase 1: Entry discovery and bundle creation
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn discover_entries(&mut self) -> anyhow::Result<()> {
    let entry_dependencies: Vec<Arc<Dependency>> = self
      .asset_graph
      .get_dependencies()
      .filter(|dependency| dependency.is_entry)
      .cloned()
      .collect();

    for dependency in entry_dependencies {
      let dependency_node = self
        .asset_graph
        .get_node_id_by_content_key(&dependency.id())
        .context("entry dependency missing from asset graph")?;

      let assets = self.asset_graph.get_dependency_assets(&dependency_node);
      anyhow::ensure!(
        assets.len() == 1,
        "entry dependency {} must resolve to exactly one asset",
        dependency.specifier
      );
      let asset_node = assets[0];
      let asset = self
        .asset_graph
        .get_asset_node(&asset_node)
        .context("entry asset missing from asset graph")?
        .clone();

      if self.bundle_roots.contains_key(&asset.id) {
        continue;
      }

      let target = dependency.target.as_deref().cloned().unwrap_or_default();
      let bundle =
        Bundle::from_root_asset(&asset, target, dependency.is_entry, asset.bundle_behavior);
      let bundle_node = self.bundle_graph.add_node(bundle);

      self
        .bundle_roots
        .insert(asset.id.clone(), (bundle_node, bundle_node));
      self.bundle_group_bundle_ids.insert(bundle_node);
      self.entry_bundle_ids.push(bundle_node);
      self.entry_asset_ids.insert(asset.id.clone());

      let async_node = self
        .async_bundle_root_graph
        .add_node_by_content_key(&asset.id, AsyncRootNode::BundleRoot(asset.id.clone()));
      let async_graph_root = self.async_graph_root;
      self
        .async_bundle_root_graph
        .add_edge(&async_graph_root, &async_node, ());

      self.entries.push((asset_node, dependency_node));
    }

    anyhow::ensure!(
      !self.entries.is_empty(),
      "asset graph has no entry dependencies"
    );
    debug!(
      entries = self.entries.len(),
      "bundle planning: discovered entries"
    );
    Ok(())
  }

  /// Walks the asset graph depth-first from the entries, creating bundles at
  /// async, isolation, inline and type-change boundaries. A stack of
  /// enclosing bundle roots provides targets and bundle-group membership for
  /// newly split bundles.
  #[instrument(level = "debug", skip_all)]
  fn create_bundles(&mut self) -> anyhow::Result<()> {
    enum Step {
      Enter(NodeId),
      Exit,
    }

    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut frames: Vec<(AssetId, NodeId)> = Vec::new();
    let mut work: Vec<Step> = Vec::new();

    for (asset_node, _) in self.entries.iter().rev() {
      work.push(Step::Enter(*asset_node));
    }

    while let Some(step) = work.pop() {
      let node = match step {
        Step::Exit => {
          frames.pop();
          continue;
        }
        Step::Enter(node) => node,
      };

      if !visited.insert(node) {
        continue;
      }

      let asset = self
        .asset_graph
        .get_asset_node(&node)
        .context("asset node missing during traversal")?
        .clone();
      self.ordered_assets.push(node);

      if let Some(&(_, group_node)) = self.bundle_roots.get(&asset.id) {
        frames.push((asset.id.clone(), group_node));
        work.push(Step::Exit);
      }

      let mut children: Vec<NodeId> = Vec::new();
      for dependency_node in self.asset_graph.get_outgoing(&node) {
        let Some(dependency) = self.asset_graph.get_dependency_node(&dependency_node) else {
          continue;
        };
        let dependency = dependency.clone();

        for child_node in self.asset_graph.get_dependency_assets(&dependency_node) {
          let child = self
            .asset_graph
            .get_asset_node(&child_node)
            .context("dependency target missing during traversal")?
            .clone();

          self.process_edge(&frames, &asset, &dependency, &child)?;
          children.push(child_node);
        }
      }

      for child_node in children.into_iter().rev() {
        work.push(Step::Enter(child_node));
      }
    }

    debug!(
      bundles = self.bundle_graph.node_count(),
      "bundle planning: created bundles at split points"
    );
    Ok(())
  }

  fn process_edge(
    &mut self,
    frames: &[(AssetId, NodeId)],
    parent: &Asset,
    dependency: &Arc<Dependency>,
    child: &Asset,
  ) -> anyhow::Result<()> {
    // Async split: lazy imports and isolated assets open a new bundle group.
    if dependency.priority == Priority::Lazy
      || child.bundle_behavior == Some(BundleBehavior::Isolated)
    {
      let bundle_node = match self.bundle_roots.get(&child.id) {
        Some(&(bundle_node, _)) => bundle_node,
        None => {
          let target = frames
            .last()
            .and_then(|(root_id, _)| self.bundle_roots.get(root_id))
            .and_then(|(bundle_node, _)| self.bundle_graph.get_node(bundle_node))
            .map(|bundle| bundle.target.clone())
            .unwrap_or_default();

          let inline = dependency.bundle_behavior == Some(BundleBehavior::Inline)
            || child.bundle_behavior == Some(BundleBehavior::Inline);
          let needs_stable_name = if inline {
            false
          } else {
            dependency.is_entry || dependency.needs_stable_name
          };
          let bundle_behavior = dependency.bundle_behavior.or(child.bundle_behavior);

          let bundle = Bundle::from_root_asset(child, target, needs_stable_name, bundle_behavior);
          let bundle_node = self.bundle_graph.add_node(bundle);
          self
            .bundle_roots
            .insert(child.id.clone(), (bundle_node, bundle_node));
          self.bundle_group_bundle_ids.insert(bundle_node);
          debug!(asset = %child.id, "bundle planning: created async bundle");
          bundle_node
        }
      };

      self.add_dependency_bundle_edge(dependency, bundle_node, dependency.priority);

      // Walk the enclosing roots innermost-first until a type, context or
      // isolation boundary, recording that each can lazily reach the new
      // bundle. The innermost root also becomes its parent in the async
      // ordering graph.
      for (index, (ancestor_id, _)) in frames.iter().enumerate().rev() {
        let Some(ancestor) = self.asset_graph.get_asset_by_id(ancestor_id) else {
          break;
        };
        if ancestor.file_type != child.file_type
          || ancestor.env.context != child.env.context
          || ancestor.env.is_isolated()
        {
          break;
        }

        self
          .reachable_bundles
          .entry(ancestor_id.clone())
          .or_default()
          .insert(child.id.clone());

        if index == frames.len() - 1 {
          let parent_async = self
            .async_bundle_root_graph
            .add_node_by_content_key(ancestor_id, AsyncRootNode::BundleRoot(ancestor_id.clone()));
          let child_async = self
            .async_bundle_root_graph
            .add_node_by_content_key(&child.id, AsyncRootNode::BundleRoot(child.id.clone()));
          if !self.async_bundle_root_graph.has_edge(&parent_async, &child_async) {
            self
              .async_bundle_root_graph
              .add_edge(&parent_async, &child_async, ());
          }
        }
      }

      return Ok(());
    }

    // Type-change / inline split: the child starts a sibling bundle inside
    // the current bundle group.
    if parent.file_type != child.file_type || child.bundle_behavior == Some(BundleBehavior::Inline)
    {
      let (_, group_node) = frames
        .last()
        .cloned()
        .context("type-change split outside of any bundle group")?;

      let bundle_node = match self.bundle_roots.get(&child.id) {
        Some(&(bundle_node, _)) => bundle_node,
        None => {
          let target = self
            .bundle_graph
            .get_node(&group_node)
            .map(|bundle| bundle.target.clone())
            .unwrap_or_default();
          let needs_stable_name = dependency.bundle_behavior == Some(BundleBehavior::Inline);

          let bundle =
            Bundle::from_root_asset(child, target, needs_stable_name, child.bundle_behavior);
          let bundle_node = self.bundle_graph.add_node(bundle);
          self
            .bundle_roots
            .insert(child.id.clone(), (bundle_node, group_node));
          debug!(asset = %child.id, "bundle planning: created sibling bundle");
          bundle_node
        }
      };

      if !self.bundle_graph.has_edge(&group_node, &bundle_node) {
        self.bundle_graph.add_edge(&group_node, &bundle_node, ());
      }
      // TODO: also record a reference edge from the group's main bundle to
      // the sibling so hosts can preload it without consulting
      // asset_reference.
      self
        .asset_reference
        .entry(child.id.clone())
        .or_default()
        .push((dependency.id(), bundle_node));
      self.add_dependency_bundle_edge(dependency, bundle_node, Priority::Parallel);
    }

    Ok(())
  }

  fn add_dependency_bundle_edge(
    &mut self,
    dependency: &Arc<Dependency>,
    bundle_node: NodeId,
    priority: Priority,
  ) {
    let dependency_graph_node = self.dependency_bundle_graph.add_node_by_content_key(
      &dependency.id(),
      DependencyBundleGraphNode::Dependency(dependency.clone()),
    );
    let bundle_graph_node = self.dependency_bundle_graph.add_node_by_content_key(
      &format!("bundle:{bundle_node}"),
      DependencyBundleGraphNode::Bundle(bundle_node),
    );
    if !self
      .dependency_bundle_graph
      .has_edge(&dependency_graph_node, &bundle_graph_node)
    {
      self
        .dependency_bundle_graph
        .add_edge(&dependency_graph_node, &bundle_graph_node, priority);
    }
  }

  // ----------------------------
  // Phase 2: Synchronous reachability
  // ----------------------------

  /// For every bundle root, records which assets it reaches without crossing
  /// a split point. Halting on a lazy dependency additionally records the
  /// root as a lazy reacher of the target bundle.
  #[instrument(level = "debug", skip_all)]
  fn compute_reachability(&mut self) -> anyhow::Result<()> {
    let roots: Vec<AssetId> = self.bundle_roots.keys().cloned().collect();

    for root_id in roots {
      let root_reach_node = self
        .reachable_roots
        .add_node_by_content_key(&root_id, root_id.clone());
      let root_asset_node = self
        .asset_graph
        .get_node_id_by_content_key(&root_id)
        .context("bundle root missing from asset graph")?;

      let mut visited: HashSet<NodeId> = HashSet::from([root_asset_node]);
      let mut stack: Vec<NodeId> = vec![root_asset_node];

      while let Some(node) = stack.pop() {
        for dependency_node in self.asset_graph.get_outgoing(&node) {
          let Some(dependency) = self.asset_graph.get_dependency_node(&dependency_node) else {
            continue;
          };

          if self.dependency_bundle_graph.has_content_key(&dependency.id()) {
            // Split point: the target lives in its own bundle.
            if dependency.priority == Priority::Lazy {
              for child_node in self.asset_graph.get_dependency_assets(&dependency_node) {
                let Some(child) = self.asset_graph.get_asset_node(&child_node) else {
                  continue;
                };
                if let Some(&(child_bundle, _)) = self.bundle_roots.get(&child.id) {
                  self
                    .reachable_async_roots
                    .entry(child_bundle)
                    .or_default()
                    .insert(root_id.clone());
                }
              }
            }
            continue;
          }

          for child_node in self.asset_graph.get_dependency_assets(&dependency_node) {
            if !visited.insert(child_node) {
              continue;
            }
            let Some(child) = self.asset_graph.get_asset_node(&child_node) else {
              continue;
            };
            let child_reach_node = self
              .reachable_roots
              .add_node_by_content_key(&child.id, child.id.clone());
            self
              .reachable_roots
              .add_edge(&root_reach_node, &child_reach_node, ());
            stack.push(child_node);
          }
        }
      }
    }

    debug!("bundle planning: computed synchronous reachability");
    Ok(())
  }

  // ----------------------------
  // Phase 3: Ancestor availability
  // ----------------------------

  /// Propagates, in topological order over the async bundle-root graph, the
  /// set of assets guaranteed loaded whenever each root loads.
  ///
  /// A child reachable from multiple parents only keeps assets delivered
  /// along every path, so availability is intersected for multi-parent
  /// children and unioned otherwise. Back-edges from dependency cycles are
  /// ignored by the topological order; the availability they would
  /// contribute is simply not guaranteed.
  #[instrument(level = "debug", skip_all)]
  fn compute_availability(&mut self) -> anyhow::Result<()> {
    let order = self.async_bundle_root_graph.topo_sort();

    for async_node in order {
      let Some(AsyncRootNode::BundleRoot(root_id)) =
        self.async_bundle_root_graph.get_node(&async_node).cloned()
      else {
        continue;
      };
      let Some(&(bundle_node, group_node)) = self.bundle_roots.get(&root_id) else {
        continue;
      };

      let sync_assets = self.sync_reachable_set(&root_id);
      let ancestors = self
        .ancestor_assets
        .get(&root_id)
        .cloned()
        .unwrap_or_else(|| self.keys.empty_set());

      // Everything guaranteed loaded once this bundle is running.
      let mut combined = ancestors;
      combined.union_with(&sync_assets);
      if let Some(key) = self.keys.key_for(&root_id) {
        combined.insert(key as usize);
      }

      let mut child_available = combined.clone();

      if bundle_node == group_node {
        // This root opens a bundle group. Fold the sibling bundles into what
        // the group delivers and count how many members carry each asset;
        // placement uses the counts to detect duplicates across siblings.
        let mut contributions: Vec<(AssetId, NodeId, FixedBitSet)> = Vec::new();
        {
          let mut own = sync_assets.clone();
          if let Some(key) = self.keys.key_for(&root_id) {
            own.insert(key as usize);
          }
          contributions.push((root_id.clone(), bundle_node, own));
        }
        for sibling_node in self.bundle_graph.nodes_connected_from(&group_node) {
          let Some(sibling) = self.bundle_graph.get_node(&sibling_node) else {
            continue;
          };
          if sibling.bundle_behavior.is_some() {
            continue;
          }
          let Some(sibling_root) = sibling.entry_asset_id.clone() else {
            continue;
          };
          let mut bits = self.sync_reachable_set(&sibling_root);
          if let Some(key) = self.keys.key_for(&sibling_root) {
            bits.insert(key as usize);
          }
          contributions.push((sibling_root, sibling_node, bits));
        }

        let capacity = self.keys.len();
        let counts = self
          .group_asset_ref_counts
          .entry(group_node)
          .or_insert_with(|| vec![0; capacity]);
        for (_, _, bits) in &contributions {
          for key in bits.ones() {
            counts[key] += 1;
          }
        }

        for (_, _, bits) in contributions.iter().skip(1) {
          child_available.union_with(bits);
        }

        // Sibling roots inherit everything the group delivers except their
        // own contribution.
        for (index, contribution) in contributions.iter().enumerate().skip(1) {
          let (sibling_root, sibling_node, _) = contribution;
          let mut available = combined.clone();
          for (other_index, (_, _, bits)) in contributions.iter().enumerate() {
            if other_index != index {
              available.union_with(bits);
            }
          }
          let multiple_parents = self.bundle_graph.nodes_connected_to(sibling_node).len() > 1;
          let sibling_root = sibling_root.clone();
          self.merge_ancestor_assets(&sibling_root, available, multiple_parents);
        }
      }

      for child_async_node in self.async_bundle_root_graph.nodes_connected_from(&async_node) {
        let Some(AsyncRootNode::BundleRoot(child_id)) = self
          .async_bundle_root_graph
          .get_node(&child_async_node)
          .cloned()
        else {
          continue;
        };
        let multiple_parents = self
          .async_bundle_root_graph
          .nodes_connected_to(&child_async_node)
          .len()
          > 1;
        self.merge_ancestor_assets(&child_id, child_available.clone(), multiple_parents);
      }
    }

    debug!("bundle planning: computed ancestor availability");
    Ok(())
  }

  fn merge_ancestor_assets(
    &mut self,
    root_id: &AssetId,
    available: FixedBitSet,
    multiple_parents: bool,
  ) {
    // Isolated and inline bundles don't inherit availability.
    if let Some(&(bundle_node, _)) = self.bundle_roots.get(root_id)
      && let Some(bundle) = self.bundle_graph.get_node(&bundle_node)
      && bundle.bundle_behavior.is_some()
    {
      return;
    }

    match self.ancestor_assets.entry(root_id.clone()) {
      Entry::Vacant(entry) => {
        entry.insert(available);
      }
      Entry::Occupied(mut entry) => {
        if multiple_parents {
          entry.get_mut().intersect_with(&available);
        } else {
          entry.get_mut().union_with(&available);
        }
      }
    }
  }

  fn sync_reachable_set(&self, root_id: &AssetId) -> FixedBitSet {
    let mut bits = self.keys.empty_set();
    let Some(root_node) = self.reachable_roots.get_node_id_by_content_key(root_id) else {
      return bits;
    };
    for node in self.reachable_roots.nodes_connected_from(&root_node) {
      if let Some(asset_id) = self.reachable_roots.get_node(&node)
        && let Some(key) = self.keys.key_for(asset_id)
      {
        bits.insert(key as usize);
      }
    }
    bits
  }

  // ----------------------------
  // Phase 4: Placement
  // ----------------------------

  /// Assigns every asset to its owning bundle: the single root that reaches
  /// it, or a shared bundle synthesized for the combination of roots. Roots
  /// whose asset is delivered by ancestors are filtered out first, as are
  /// roots whose bundle group already carries the asset in several sibling
  /// bundles.
  #[instrument(level = "debug", skip_all)]
  fn place_assets(&mut self) -> anyhow::Result<()> {
    let ordered = self.ordered_assets.clone();

    for asset_node in ordered {
      let asset = self
        .asset_graph
        .get_asset_node(&asset_node)
        .context("asset vanished between planning phases")?
        .clone();
      let asset_key = self.keys.key_for(&asset.id);

      let reachers: Vec<AssetId> = self
        .reachable_roots
        .get_node_id_by_content_key(&asset.id)
        .map(|node| self.reachable_roots.nodes_connected_to(&node))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|node| self.reachable_roots.get_node(&node).cloned())
        .collect();

      let mut filtered: Vec<AssetId> = reachers.clone();
      filtered.retain(|root_id| {
        let Some(key) = asset_key else { return true };
        !self
          .ancestor_assets
          .get(root_id)
          .is_some_and(|bits| bits.contains(key as usize))
      });
      // TODO: tighten the sibling duplicate detection; counting group members
      // per asset over-drops when the duplicate is also delivered upstream.
      filtered.retain(|root_id| {
        let Some(key) = asset_key else { return true };
        let Some(&(_, group_node)) = self.bundle_roots.get(root_id) else {
          return true;
        };
        self
          .group_asset_ref_counts
          .get(&group_node)
          .is_none_or(|counts| counts[key as usize] <= 1)
      });

      if let Some(&(asset_bundle, _)) = self.bundle_roots.get(&asset.id) {
        self.connect_and_internalize_root(&asset, asset_bundle, &reachers, &filtered)?;
        continue;
      }

      match filtered.len() {
        0 => {
          debug!(asset = %asset.id, "bundle planning: asset has no owner after availability filtering");
        }
        1 => {
          let (bundle_node, _) = self.bundle_roots[&filtered[0]];
          self.add_asset_to_bundle(bundle_node, &asset.id)?;
        }
        _ => {
          self.place_in_shared_bundle(&asset, &filtered)?;
        }
      }
    }

    debug!("bundle planning: placed assets");
    Ok(())
  }

  /// Placement for assets that are themselves bundle roots: connect the
  /// roots that sync-reach them so the bundle is reused instead of
  /// duplicated, and rewrite async references to it into no-op lookups where
  /// the target is statically guaranteed.
  fn connect_and_internalize_root(
    &mut self,
    asset: &Asset,
    asset_bundle: NodeId,
    reachers: &[AssetId],
    filtered: &[AssetId],
  ) -> anyhow::Result<()> {
    for root_id in filtered {
      if *root_id == asset.id {
        continue;
      }
      let Some(&(root_bundle, _)) = self.bundle_roots.get(root_id) else {
        continue;
      };
      if !self.bundle_graph.has_edge(&root_bundle, &asset_bundle) {
        self.bundle_graph.add_edge(&root_bundle, &asset_bundle, ());
      }
    }

    let Some(holders) = self.reachable_async_roots.get(&asset_bundle).cloned() else {
      return Ok(());
    };
    let asset_key = self.keys.key_for(&asset.id);

    for holder_id in holders {
      if holder_id == asset.id {
        continue;
      }

      let guaranteed_by_sync = reachers.contains(&holder_id);
      let guaranteed_by_ancestors = asset_key.is_some_and(|key| {
        self
          .ancestor_assets
          .get(&holder_id)
          .is_some_and(|bits| bits.contains(key as usize))
      });
      let guaranteed_by_lazy_descendants = !reachers.is_empty() && {
        let descendants = self.reachable_bundles.get(&holder_id);
        reachers.iter().all(|reacher| {
          *reacher == holder_id || descendants.is_some_and(|set| set.contains(reacher))
        })
      };

      if guaranteed_by_sync || guaranteed_by_ancestors || guaranteed_by_lazy_descendants {
        let Some(&(holder_bundle, _)) = self.bundle_roots.get(&holder_id) else {
          continue;
        };
        if let Some(bundle) = self.bundle_graph.get_node_mut(&holder_bundle) {
          bundle.internalized_asset_ids.push(asset.id.clone());
        }
        if let Some(lazy_reachers) = self.reachable_async_roots.get_mut(&asset_bundle) {
          lazy_reachers.shift_remove(&holder_id);
        }
        debug!(
          asset = %asset.id,
          holder = %holder_id,
          "bundle planning: internalized async reference"
        );
      }
    }

    Ok(())
  }

  fn add_asset_to_bundle(&mut self, bundle_node: NodeId, asset_id: &AssetId) -> anyhow::Result<()> {
    let size = self.keys.size_for(asset_id);
    let bundle = self
      .bundle_graph
      .get_node_mut(&bundle_node)
      .context("bundle missing during placement")?;
    bundle.insert_asset(asset_id, size);
    Ok(())
  }

  fn place_in_shared_bundle(&mut self, asset: &Asset, reachers: &[AssetId]) -> anyhow::Result<()> {
    let mut sorted: Vec<AssetId> = reachers.to_vec();
    sorted.sort();
    sorted.dedup();

    // Id-sorted so the same combination of roots maps to the same bundle
    // across runs; type and context keep bundles homogeneous.
    let content_key = format!(
      "{}.{}.{}",
      sorted.join(","),
      asset.file_type.extension(),
      asset.env.context.as_str()
    );

    let bundle_node = match self.shared_bundles.get(&content_key) {
      Some(&bundle_node) => bundle_node,
      None => {
        let source_bundles: Vec<NodeId> = sorted
          .iter()
          .map(|root_id| {
            self
              .bundle_roots
              .get(root_id)
              .map(|(bundle_node, _)| *bundle_node)
              .context("shared bundle source root missing")
          })
          .collect::<anyhow::Result<_>>()?;

        let target = self
          .bundle_graph
          .get_node(&source_bundles[0])
          .map(|bundle| bundle.target.clone())
          .unwrap_or_default();
        let bundle = Bundle::shared(
          source_bundles.clone(),
          target,
          asset.env.clone(),
          asset.file_type.clone(),
        );
        let bundle_node = self.bundle_graph.add_node(bundle);

        for source in &source_bundles {
          if !self.bundle_graph.has_edge(source, &bundle_node) {
            self.bundle_graph.add_edge(source, &bundle_node, ());
          }
        }

        self.shared_bundles.insert(content_key, bundle_node);
        debug!(
          sources = source_bundles.len(),
          "bundle planning: created shared bundle"
        );
        bundle_node
      }
    };

    self.add_asset_to_bundle(bundle_node, &asset.id)
  }

  // ----------------------------
  // Phase 5: Merge and cleanup
  // ----------------------------

  /// Shared bundles below the configured size threshold aren't worth a
  /// request; copy their assets back into each source bundle.
  #[instrument(level = "debug", skip_all)]
  fn merge_small_shared_bundles(&mut self) -> anyhow::Result<()> {
    let candidates: Vec<NodeId> = self.bundle_graph.node_ids().collect();

    for bundle_node in candidates {
      let Some(bundle) = self.bundle_graph.get_node(&bundle_node) else {
        continue;
      };
      if !bundle.is_shared() || bundle.size >= self.config.min_bundle_size {
        continue;
      }
      debug!(
        size = bundle.size,
        "bundle planning: merging small shared bundle into its sources"
      );
      self.dissolve_shared_bundle(bundle_node)?;
    }

    Ok(())
  }

  /// Keeps every bundle group within the configured request parallelism by
  /// dissolving its smallest shared bundles until it fits.
  #[instrument(level = "debug", skip_all)]
  fn apply_parallel_request_limit(&mut self) -> anyhow::Result<()> {
    let limit = self.config.max_parallel_requests as usize;
    let groups: Vec<NodeId> = self.bundle_group_bundle_ids.iter().copied().collect();

    for group_node in groups {
      if !self.bundle_graph.has_node(&group_node) {
        continue;
      }

      loop {
        let members = self.bundle_graph.nodes_connected_from(&group_node);
        if members.len() + 1 <= limit {
          break;
        }

        let mut shared: Vec<(u64, NodeId)> = members
          .iter()
          .filter_map(|member| {
            self
              .bundle_graph
              .get_node(member)
              .filter(|bundle| bundle.is_shared())
              .map(|bundle| (bundle.size, *member))
          })
          .collect();
        if shared.is_empty() {
          break;
        }
        shared.sort();

        let (_, smallest) = shared[0];
        debug!(
          group = group_node,
          "bundle planning: bundle group over the parallel request limit"
        );
        self.dissolve_shared_bundle(smallest)?;
      }
    }

    Ok(())
  }

  /// Entries need deterministic output names, so they can't rely on bundles
  /// whose lifetime is governed by async loading. Shared bundles tied to
  /// async sources and reused async bundles of the entry's own type are
  /// folded back into the entry; shared bundles sourced purely by entries
  /// load predictably and stay.
  #[instrument(level = "debug", skip_all)]
  fn fold_entry_siblings(&mut self) -> anyhow::Result<()> {
    let entry_bundles: Vec<NodeId> = self.entry_bundle_ids.clone();

    for entry_bundle in entry_bundles {
      if !self.bundle_graph.has_node(&entry_bundle) {
        continue;
      }
      let (entry_type, entry_asset_id) = {
        let bundle = self
          .bundle_graph
          .get_node(&entry_bundle)
          .context("entry bundle missing")?;
        let entry_asset_id = bundle
          .entry_asset_id
          .clone()
          .context("entry bundle has no root asset")?;
        (bundle.file_type.clone(), entry_asset_id)
      };

      for sibling_node in self.bundle_graph.nodes_connected_from(&entry_bundle) {
        let Some(sibling) = self.bundle_graph.get_node(&sibling_node) else {
          continue;
        };
        if sibling.bundle_behavior.is_some() || sibling.file_type != entry_type {
          continue;
        }
        let sibling_is_shared = sibling.is_shared();
        let sibling_assets: Vec<AssetId> = sibling.assets.iter().cloned().collect();
        let source_bundles = sibling.source_bundles.clone();

        if sibling_is_shared {
          let has_async_source = source_bundles
            .iter()
            .any(|source| !self.entry_bundle_ids.contains(source));
          if !has_async_source {
            continue;
          }

          for asset_id in &sibling_assets {
            self.add_asset_to_bundle(entry_bundle, asset_id)?;
          }
          self.bundle_graph.remove_edge(&entry_bundle, &sibling_node);
          if let Some(lazy_reachers) = self.reachable_async_roots.get_mut(&sibling_node) {
            lazy_reachers.shift_remove(&entry_asset_id);
          }

          let remaining = {
            let sibling = self
              .bundle_graph
              .get_node_mut(&sibling_node)
              .context("sibling bundle missing")?;
            sibling
              .source_bundles
              .retain(|source| *source != entry_bundle);
            sibling.source_bundles.len()
          };

          if remaining == 1 {
            let lone_source = self
              .bundle_graph
              .get_node(&sibling_node)
              .and_then(|bundle| bundle.source_bundles.first().copied())
              .context("lone shared bundle source missing")?;
            for asset_id in &sibling_assets {
              self.add_asset_to_bundle(lone_source, asset_id)?;
            }
            self.remove_bundle(sibling_node)?;
          } else if remaining == 0 {
            self.remove_bundle(sibling_node)?;
          }
        } else if sibling_node != entry_bundle {
          // A reused async bundle: absorb its assets so the entry's output
          // doesn't depend on load order, and stop counting the entry as a
          // lazy reacher.
          for asset_id in &sibling_assets {
            self.add_asset_to_bundle(entry_bundle, asset_id)?;
          }
          self.bundle_graph.remove_edge(&entry_bundle, &sibling_node);
          if let Some(lazy_reachers) = self.reachable_async_roots.get_mut(&sibling_node) {
            lazy_reachers.shift_remove(&entry_asset_id);
          }
        }
      }
    }

    Ok(())
  }

  /// Async bundles nothing will ever lazily request are dropped. Their
  /// assets are handed to whichever bundles still reference them (the
  /// bundles that internalized the async import and sync-reach the root).
  #[instrument(level = "debug", skip_all)]
  fn drop_orphaned_async_bundles(&mut self) -> anyhow::Result<()> {
    let roots: Vec<(AssetId, NodeId)> = self
      .bundle_roots
      .iter()
      .map(|(root_id, &(bundle_node, _))| (root_id.clone(), bundle_node))
      .collect();

    for (root_id, bundle_node) in roots {
      if !self.bundle_graph.has_node(&bundle_node) {
        continue;
      }
      if self.entry_asset_ids.contains(&root_id) {
        continue;
      }

      // Async bundle roots are those only ever referenced lazily.
      let Some(graph_node) = self
        .dependency_bundle_graph
        .get_node_id_by_content_key(&format!("bundle:{bundle_node}"))
      else {
        continue;
      };
      let incoming = self.dependency_bundle_graph.edges_connected_to(&graph_node);
      if incoming.is_empty()
        || !incoming
          .iter()
          .all(|(_, priority)| *priority == Priority::Lazy)
      {
        continue;
      }

      let lazily_reachable = self
        .reachable_async_roots
        .get(&bundle_node)
        .is_some_and(|lazy_reachers| !lazy_reachers.is_empty());
      if lazily_reachable {
        continue;
      }

      let assets: Vec<AssetId> = self
        .bundle_graph
        .get_node(&bundle_node)
        .map(|bundle| bundle.assets.iter().cloned().collect())
        .unwrap_or_default();
      let referencing = self.bundle_graph.nodes_connected_to(&bundle_node);
      for reference in referencing {
        for asset_id in &assets {
          self.add_asset_to_bundle(reference, asset_id)?;
        }
      }

      debug!(root = %root_id, "bundle planning: dropped orphaned async bundle");
      self.remove_bundle(bundle_node)?;
      self.bundle_roots.shift_remove(&root_id);
    }

    Ok(())
  }

  /// Removes a bundle node and scrubs it from other bundles' source lists.
  /// Shared bundles left with a single source dissolve into it; ones left
  /// with none are removed.
  fn remove_bundle(&mut self, bundle_node: NodeId) -> anyhow::Result<()> {
    self.bundle_graph.remove_node(&bundle_node);
    self.bundle_group_bundle_ids.shift_remove(&bundle_node);
    self.reachable_async_roots.remove(&bundle_node);
    self
      .dependency_bundle_graph
      .remove_node_by_content_key(&format!("bundle:{bundle_node}"));

    let mut collapsed: Vec<NodeId> = Vec::new();
    let remaining: Vec<NodeId> = self.bundle_graph.node_ids().collect();
    for other in remaining {
      let Some(bundle) = self.bundle_graph.get_node_mut(&other) else {
        continue;
      };
      if bundle.source_bundles.is_empty() {
        continue;
      }
      let before = bundle.source_bundles.len();
      bundle.source_bundles.retain(|source| *source != bundle_node);
      if bundle.source_bundles.len() < before && bundle.source_bundles.len() <= 1 {
        collapsed.push(other);
      }
    }

    for other in collapsed {
      let (assets, lone_source) = {
        let Some(bundle) = self.bundle_graph.get_node(&other) else {
          continue;
        };
        let assets: Vec<AssetId> = bundle.assets.iter().cloned().collect();
        (assets, bundle.source_bundles.first().copied())
      };
      if let Some(lone_source) = lone_source
        && self.bundle_graph.has_node(&lone_source)
      {
        for asset_id in &assets {
          self.add_asset_to_bundle(lone_source, asset_id)?;
        }
      }
      self.remove_bundle(other)?;
    }

    Ok(())
  }

  /// Copies a shared bundle's assets back into each source bundle and
  /// removes it.
  fn dissolve_shared_bundle(&mut self, bundle_node: NodeId) -> anyhow::Result<()> {
    let Some(bundle) = self.bundle_graph.get_node(&bundle_node) else {
      return Ok(());
    };
    let assets: Vec<AssetId> = bundle.assets.iter().cloned().collect();
    let sources = bundle.source_bundles.clone();

    for source in sources {
      if !self.bundle_graph.has_node(&source) {
        continue;
      }
      for asset_id in &assets {
        self.add_asset_to_bundle(source, asset_id)?;
      }
    }

    self.remove_bundle(bundle_node)
  }

  // ----------------------------
  // Phase 6: Plan export
  // ----------------------------

  fn into_plan(self) -> (IdealPlan, PlanStats) {
    let shared_bundles = self
      .bundle_graph
      .node_ids()
      .filter(|bundle_node| {
        self
          .bundle_graph
          .get_node(bundle_node)
          .is_some_and(|bundle| bundle.is_shared())
      })
      .count();

    let stats = PlanStats {
      assets: self.keys.len(),
      dependencies: self.asset_graph.dependency_count(),
      bundles: self.bundle_graph.node_count(),
      shared_bundles,
    };
    debug!(
      bundles = stats.bundles,
      shared_bundles = stats.shared_bundles,
      "bundle planning: plan complete"
    );

    let plan = IdealPlan {
      bundle_graph: self.bundle_graph,
      dependency_bundle_graph: self.dependency_bundle_graph,
      bundle_group_bundle_ids: self.bundle_group_bundle_ids,
      entry_bundles: self.entry_bundle_ids,
      asset_reference: self.asset_reference,
    };

    (plan, stats)
  }
}
