//! Graph description, the immutable info tables derived from it and the
//! routing table.

pub mod definition;
pub mod info;
pub mod routing;
pub mod topology;

pub use definition::{FlowDest, GraphConnection, GraphDefinition, GraphNode, MsgFlow};
pub use info::{AddonInstancePair, ExtensionGroupInfo, ExtensionInfo, DEFAULT_EXTENSION_GROUP};
pub use routing::RoutingTable;
pub use topology::GraphTopology;
