//! The ideal-bundle planner.
//!
//! Planning is a pure function over the asset graph, structured as a
//! six-phase pipeline:
//!
//! 1. Walk the graph and create bundles at entries and split points (async
//!    imports, isolation, inline assets, type changes).
//! 2. For every bundle root, compute the assets it synchronously reaches.
//! 3. Propagate, in topological order over async boundaries, the set of
//!    assets guaranteed loaded whenever each root loads.
//! 4. Assign every asset to its owning bundle or a synthesized shared
//!    bundle, and internalize async imports whose target is statically
//!    guaranteed.
//! 5. Merge shared bundles below the size threshold, enforce the request
//!    parallelism limit, fold unstable siblings back into entries, and drop
//!    orphaned async bundles.
//! 6. Export the plan.

mod phases;
mod types;

#[cfg(test)]
mod tests;

use anyhow::Context;

use bramble_core::asset_graph::AssetGraph;

use crate::config::ResolvedPlannerConfig;

use self::phases::IdealPlanner;
pub use self::types::{Bundle, DependencyBundleGraphNode, IdealPlan, PlanStats};

/// Planners take a finished asset graph and decide which assets belong in
/// which output bundles.
pub trait BundlePlanner {
  fn plan(&self, asset_graph: &AssetGraph) -> anyhow::Result<(IdealPlan, PlanStats)>;
}

/// The planner used by default: minimizes duplication between entry points
/// within the configured deployment limits.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdealBundlePlanner {
  pub config: ResolvedPlannerConfig,
}

impl IdealBundlePlanner {
  pub fn new(config: ResolvedPlannerConfig) -> Self {
    Self { config }
  }
}

impl BundlePlanner for IdealBundlePlanner {
  fn plan(&self, asset_graph: &AssetGraph) -> anyhow::Result<(IdealPlan, PlanStats)> {
    IdealPlanner::new(asset_graph, self.config)
      .plan()
      .context("computing ideal bundle plan")
  }
}

/// Convenience for hosts that don't need the trait seam.
pub fn plan(
  asset_graph: &AssetGraph,
  config: ResolvedPlannerConfig,
) -> anyhow::Result<(IdealPlan, PlanStats)> {
  IdealBundlePlanner::new(config).plan(asset_graph)
}
