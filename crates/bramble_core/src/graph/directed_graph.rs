use std::collections::HashMap;

use petgraph::Direction;
use petgraph::stable_graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;

/// Opaque node identifier, stable for the lifetime of the graph including
/// across node removals.
pub type NodeId = usize;

/// A directed graph over arbitrary node payloads.
///
/// Node payloads live in an arena indexed by [`NodeId`]; adjacency is kept in
/// a petgraph [`StableDiGraph`] so removals don't shift other nodes around.
/// Neighbor queries return ids in edge insertion order.
#[derive(Clone, Debug)]
pub struct DirectedGraph<N, W: Copy = ()> {
  graph: StableDiGraph<NodeId, W>,
  nodes: Vec<Option<N>>,
  node_id_to_index: HashMap<NodeId, NodeIndex>,
}

impl<N, W: Copy> Default for DirectedGraph<N, W> {
  fn default() -> Self {
    Self::new()
  }
}

impl<N, W: Copy> DirectedGraph<N, W> {
  pub fn new() -> Self {
    DirectedGraph {
      graph: StableDiGraph::new(),
      nodes: Vec::new(),
      node_id_to_index: HashMap::new(),
    }
  }

  pub fn add_node(&mut self, node: N) -> NodeId {
    let node_id = self.nodes.len();
    self.nodes.push(Some(node));

    let node_index = self.graph.add_node(node_id);
    self.node_id_to_index.insert(node_id, node_index);

    node_id
  }

  pub fn get_node(&self, node_id: &NodeId) -> Option<&N> {
    self.nodes.get(*node_id).and_then(|node| node.as_ref())
  }

  pub fn get_node_mut(&mut self, node_id: &NodeId) -> Option<&mut N> {
    self.nodes.get_mut(*node_id).and_then(|node| node.as_mut())
  }

  pub fn has_node(&self, node_id: &NodeId) -> bool {
    self.node_id_to_index.contains_key(node_id)
  }

  /// Removes a node and all of its incident edges, returning the payload.
  pub fn remove_node(&mut self, node_id: &NodeId) -> Option<N> {
    let node_index = self.node_id_to_index.remove(node_id)?;
    self.graph.remove_node(node_index);
    self.nodes.get_mut(*node_id).and_then(|node| node.take())
  }

  pub fn add_edge(&mut self, from: &NodeId, to: &NodeId, weight: W) {
    self.graph.add_edge(
      self.node_id_to_index[from],
      self.node_id_to_index[to],
      weight,
    );
  }

  pub fn has_edge(&self, from: &NodeId, to: &NodeId) -> bool {
    let (Some(from_index), Some(to_index)) = (
      self.node_id_to_index.get(from),
      self.node_id_to_index.get(to),
    ) else {
      return false;
    };

    self.graph.contains_edge(*from_index, *to_index)
  }

  pub fn remove_edge(&mut self, from: &NodeId, to: &NodeId) {
    let (Some(from_index), Some(to_index)) = (
      self.node_id_to_index.get(from),
      self.node_id_to_index.get(to),
    ) else {
      return;
    };

    while let Some(edge) = self.graph.find_edge(*from_index, *to_index) {
      self.graph.remove_edge(edge);
    }
  }

  pub fn nodes_connected_from(&self, node_id: &NodeId) -> Vec<NodeId> {
    self.neighbors(node_id, Direction::Outgoing)
  }

  pub fn nodes_connected_to(&self, node_id: &NodeId) -> Vec<NodeId> {
    self.neighbors(node_id, Direction::Incoming)
  }

  pub fn edges_connected_from(&self, node_id: &NodeId) -> Vec<(NodeId, W)> {
    self.edges(node_id, Direction::Outgoing)
  }

  pub fn edges_connected_to(&self, node_id: &NodeId) -> Vec<(NodeId, W)> {
    self.edges(node_id, Direction::Incoming)
  }

  /// All live node ids in insertion order.
  pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
    (0..self.nodes.len()).filter(|node_id| self.node_id_to_index.contains_key(node_id))
  }

  pub fn node_count(&self) -> usize {
    self.node_id_to_index.len()
  }

  pub fn edge_count(&self) -> usize {
    self.graph.edge_count()
  }

  fn neighbors(&self, node_id: &NodeId, direction: Direction) -> Vec<NodeId> {
    let Some(node_index) = self.node_id_to_index.get(node_id) else {
      return Vec::new();
    };

    let mut neighbors: Vec<NodeId> = self
      .graph
      .neighbors_directed(*node_index, direction)
      .filter_map(|neighbor| self.graph.node_weight(neighbor).copied())
      .collect();

    // petgraph iterates most recently added edges first
    neighbors.reverse();
    neighbors
  }

  fn edges(&self, node_id: &NodeId, direction: Direction) -> Vec<(NodeId, W)> {
    let Some(node_index) = self.node_id_to_index.get(node_id) else {
      return Vec::new();
    };

    let mut edges: Vec<(NodeId, W)> = self
      .graph
      .edges_directed(*node_index, direction)
      .filter_map(|edge| {
        let other = match direction {
          Direction::Outgoing => edge.target(),
          Direction::Incoming => edge.source(),
        };
        let other_id = self.graph.node_weight(other).copied()?;
        Some((other_id, *edge.weight()))
      })
      .collect();

    edges.reverse();
    edges
  }
}
