pub use self::content_graph::*;
pub use self::directed_graph::*;

mod content_graph;
mod directed_graph;
