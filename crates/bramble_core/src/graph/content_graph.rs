use std::collections::BTreeSet;
use std::collections::HashMap;

use indexmap::IndexMap;

use super::directed_graph::DirectedGraph;
use super::directed_graph::NodeId;

/// A directed graph whose nodes can additionally be addressed by a stable
/// string content key, such as an asset or dependency id.
#[derive(Clone, Debug)]
pub struct ContentGraph<N, W: Copy = ()> {
  graph: DirectedGraph<N, W>,
  content_key_to_node_id: IndexMap<String, NodeId>,
}

impl<N, W: Copy> Default for ContentGraph<N, W> {
  fn default() -> Self {
    Self::new()
  }
}

impl<N, W: Copy> ContentGraph<N, W> {
  pub fn new() -> Self {
    ContentGraph {
      graph: DirectedGraph::new(),
      content_key_to_node_id: IndexMap::new(),
    }
  }

  /// Adds a node under `content_key`, or returns the existing node id if the
  /// key is already present.
  pub fn add_node_by_content_key(&mut self, content_key: &str, node: N) -> NodeId {
    if let Some(node_id) = self.content_key_to_node_id.get(content_key) {
      return *node_id;
    }

    let node_id = self.graph.add_node(node);
    self
      .content_key_to_node_id
      .insert(content_key.to_string(), node_id);
    node_id
  }

  pub fn has_content_key(&self, content_key: &str) -> bool {
    self.content_key_to_node_id.contains_key(content_key)
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<NodeId> {
    self.content_key_to_node_id.get(content_key).copied()
  }

  pub fn remove_node_by_content_key(&mut self, content_key: &str) -> Option<N> {
    let node_id = self.content_key_to_node_id.shift_remove(content_key)?;
    self.graph.remove_node(&node_id)
  }

  pub fn get_node(&self, node_id: &NodeId) -> Option<&N> {
    self.graph.get_node(node_id)
  }

  pub fn get_node_mut(&mut self, node_id: &NodeId) -> Option<&mut N> {
    self.graph.get_node_mut(node_id)
  }

  pub fn has_node(&self, node_id: &NodeId) -> bool {
    self.graph.has_node(node_id)
  }

  pub fn add_edge(&mut self, from: &NodeId, to: &NodeId, weight: W) {
    self.graph.add_edge(from, to, weight);
  }

  pub fn has_edge(&self, from: &NodeId, to: &NodeId) -> bool {
    self.graph.has_edge(from, to)
  }

  pub fn nodes_connected_from(&self, node_id: &NodeId) -> Vec<NodeId> {
    self.graph.nodes_connected_from(node_id)
  }

  pub fn nodes_connected_to(&self, node_id: &NodeId) -> Vec<NodeId> {
    self.graph.nodes_connected_to(node_id)
  }

  pub fn edges_connected_from(&self, node_id: &NodeId) -> Vec<(NodeId, W)> {
    self.graph.edges_connected_from(node_id)
  }

  pub fn edges_connected_to(&self, node_id: &NodeId) -> Vec<(NodeId, W)> {
    self.graph.edges_connected_to(node_id)
  }

  pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
    self.graph.node_ids()
  }

  pub fn node_count(&self) -> usize {
    self.graph.node_count()
  }

  /// Topological order over all live node ids: every edge `u → v` places `u`
  /// before `v`.
  ///
  /// Back-edges are tolerated: when no zero-in-degree node remains but nodes
  /// are still unvisited, the earliest-inserted unvisited node is emitted
  /// next and its unsatisfied in-edges are ignored. Callers that feed this a
  /// cyclic graph get a deterministic order that breaks ties by insertion
  /// order.
  pub fn topo_sort(&self) -> Vec<NodeId> {
    let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
    let mut remaining: BTreeSet<NodeId> = BTreeSet::new();

    for node_id in self.node_ids() {
      in_degree.entry(node_id).or_insert(0);
      remaining.insert(node_id);
      for successor in self.nodes_connected_from(&node_id) {
        *in_degree.entry(successor).or_insert(0) += 1;
      }
    }

    let mut ready: BTreeSet<NodeId> = remaining
      .iter()
      .filter(|node_id| in_degree[node_id] == 0)
      .copied()
      .collect();

    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
      let next = ready
        .first()
        .copied()
        .unwrap_or_else(|| *remaining.first().expect("remaining is non-empty"));

      ready.remove(&next);
      remaining.remove(&next);
      order.push(next);

      for successor in self.nodes_connected_from(&next) {
        if !remaining.contains(&successor) {
          continue;
        }
        let degree = in_degree.get_mut(&successor).expect("successor is known");
        *degree = degree.saturating_sub(1);
        if *degree == 0 {
          ready.insert(successor);
        }
      }
    }

    order
  }
}
