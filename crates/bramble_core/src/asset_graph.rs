pub use self::asset_graph::*;

mod asset_graph;
