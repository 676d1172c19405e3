use std::sync::Arc;

use crate::graph::ContentGraph;
use crate::graph::NodeId;
use crate::types::Asset;
use crate::types::Dependency;

#[derive(Clone, Debug, PartialEq)]
pub enum AssetGraphNode {
  Root,
  Asset(Arc<Asset>),
  Dependency(Arc<Dependency>),
}

/// The asset/dependency graph produced by the build phase and consumed
/// read-only by the planner.
///
/// Nodes alternate between assets and dependencies: the root connects to
/// entry dependencies, dependencies connect to the assets they resolve to,
/// and assets connect to the dependencies they request. Nodes are
/// content-addressed by asset or dependency id.
#[derive(Clone, Debug)]
pub struct AssetGraph {
  graph: ContentGraph<AssetGraphNode>,
  root_node_id: NodeId,
}

impl Default for AssetGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl AssetGraph {
  pub fn new() -> Self {
    let mut graph = ContentGraph::new();
    let root_node_id = graph.add_node_by_content_key("@@root", AssetGraphNode::Root);

    AssetGraph {
      graph,
      root_node_id,
    }
  }

  pub fn root_node(&self) -> NodeId {
    self.root_node_id
  }

  pub fn add_asset(&mut self, asset: Arc<Asset>) -> NodeId {
    let content_key = asset.id.clone();
    self
      .graph
      .add_node_by_content_key(&content_key, AssetGraphNode::Asset(asset))
  }

  pub fn add_dependency(&mut self, dependency: Dependency) -> NodeId {
    let content_key = dependency.id();
    self
      .graph
      .add_node_by_content_key(&content_key, AssetGraphNode::Dependency(Arc::new(dependency)))
  }

  /// Adds an entry dependency and connects it to the graph root.
  pub fn add_entry_dependency(&mut self, dependency: Dependency) -> NodeId {
    let root_node_id = self.root_node_id;
    let dependency_node_id = self.add_dependency(dependency);
    self.add_edge(&root_node_id, &dependency_node_id);
    dependency_node_id
  }

  pub fn add_edge(&mut self, from: &NodeId, to: &NodeId) {
    if !self.graph.has_edge(from, to) {
      self.graph.add_edge(from, to, ());
    }
  }

  pub fn get_node(&self, node_id: &NodeId) -> Option<&AssetGraphNode> {
    self.graph.get_node(node_id)
  }

  pub fn get_asset_node(&self, node_id: &NodeId) -> Option<&Arc<Asset>> {
    let AssetGraphNode::Asset(asset) = self.get_node(node_id)? else {
      return None;
    };
    Some(asset)
  }

  pub fn get_dependency_node(&self, node_id: &NodeId) -> Option<&Arc<Dependency>> {
    let AssetGraphNode::Dependency(dependency) = self.get_node(node_id)? else {
      return None;
    };
    Some(dependency)
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<NodeId> {
    self.graph.get_node_id_by_content_key(content_key)
  }

  pub fn get_asset_by_id(&self, asset_id: &str) -> Option<&Arc<Asset>> {
    let node_id = self.get_node_id_by_content_key(asset_id)?;
    self.get_asset_node(&node_id)
  }

  pub fn get_assets(&self) -> impl Iterator<Item = &Arc<Asset>> {
    self.graph.node_ids().filter_map(|node_id| {
      let AssetGraphNode::Asset(asset) = self.graph.get_node(&node_id)? else {
        return None;
      };
      Some(asset)
    })
  }

  pub fn get_dependencies(&self) -> impl Iterator<Item = &Arc<Dependency>> {
    self.graph.node_ids().filter_map(|node_id| {
      let AssetGraphNode::Dependency(dependency) = self.graph.get_node(&node_id)? else {
        return None;
      };
      Some(dependency)
    })
  }

  pub fn get_outgoing(&self, node_id: &NodeId) -> Vec<NodeId> {
    self.graph.nodes_connected_from(node_id)
  }

  /// The asset nodes a dependency resolves to.
  pub fn get_dependency_assets(&self, dependency_node_id: &NodeId) -> Vec<NodeId> {
    self
      .graph
      .nodes_connected_from(dependency_node_id)
      .into_iter()
      .filter(|node_id| self.get_asset_node(node_id).is_some())
      .collect()
  }

  /// The dependency nodes that resolve to an asset.
  pub fn get_incoming_dependencies(&self, asset_node_id: &NodeId) -> Vec<NodeId> {
    self
      .graph
      .nodes_connected_to(asset_node_id)
      .into_iter()
      .filter(|node_id| self.get_dependency_node(node_id).is_some())
      .collect()
  }

  pub fn asset_count(&self) -> usize {
    self.get_assets().count()
  }

  pub fn dependency_count(&self) -> usize {
    self.get_dependencies().count()
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::types::Priority;
  use crate::types::Target;

  use super::*;

  #[test]
  fn connects_entries_to_the_root() {
    let mut asset_graph = AssetGraph::new();

    let target = Target::default();
    let entry_dep = Dependency::entry("entry.js".to_string(), target);
    let entry_dep_node = asset_graph.add_entry_dependency(entry_dep);

    let entry_asset = Arc::new(Asset {
      id: "entry_asset".into(),
      file_path: "entry.js".into(),
      ..Asset::default()
    });
    let entry_asset_node = asset_graph.add_asset(entry_asset);
    asset_graph.add_edge(&entry_dep_node, &entry_asset_node);

    assert_eq!(
      asset_graph.get_outgoing(&asset_graph.root_node()),
      vec![entry_dep_node]
    );
    assert_eq!(
      asset_graph.get_dependency_assets(&entry_dep_node),
      vec![entry_asset_node]
    );
    assert_eq!(asset_graph.asset_count(), 1);
    assert_eq!(asset_graph.dependency_count(), 1);
  }

  #[test]
  fn adding_an_asset_twice_reuses_the_node() {
    let mut asset_graph = AssetGraph::new();

    let asset = Arc::new(Asset {
      id: "shared_asset".into(),
      file_path: "shared.js".into(),
      ..Asset::default()
    });

    let first = asset_graph.add_asset(asset.clone());
    let second = asset_graph.add_asset(asset);

    assert_eq!(first, second);
    assert_eq!(asset_graph.asset_count(), 1);
  }

  #[test]
  fn incoming_dependencies_exclude_the_root() {
    let mut asset_graph = AssetGraph::new();

    let entry_dep_node =
      asset_graph.add_entry_dependency(Dependency::entry("entry.js".into(), Target::default()));
    let entry_asset_node = asset_graph.add_asset(Arc::new(Asset {
      id: "entry_asset".into(),
      file_path: "entry.js".into(),
      ..Asset::default()
    }));
    asset_graph.add_edge(&entry_dep_node, &entry_asset_node);

    let lazy_dep_node = asset_graph.add_dependency(Dependency {
      source_asset_id: Some("entry_asset".into()),
      specifier: "./async.js".into(),
      priority: Priority::Lazy,
      ..Dependency::default()
    });
    asset_graph.add_edge(&entry_asset_node, &lazy_dep_node);

    let async_asset_node = asset_graph.add_asset(Arc::new(Asset {
      id: "async_asset".into(),
      file_path: "async.js".into(),
      ..Asset::default()
    }));
    asset_graph.add_edge(&lazy_dep_node, &async_asset_node);

    assert_eq!(
      asset_graph.get_incoming_dependencies(&async_asset_node),
      vec![lazy_dep_node]
    );
    assert_eq!(
      asset_graph.get_incoming_dependencies(&entry_asset_node),
      vec![entry_dep_node]
    );
  }
}
