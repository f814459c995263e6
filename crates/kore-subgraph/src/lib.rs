//! # kore-subgraph
//!
//! Binding of nested decoder graphs for iterative generation.
//!
//! Provides:
//! - `GraphDef` / `NodeDef`: declared interface of a nested graph and its owner
//! - `SessionState`: device placement and value indices of a planned session
//! - `FeedsFetchesManager`: feed/fetch plan reused on every decoding step
//! - `Subgraph`: one-time setup and recurrent-state shape validation
//! - GPT and encoder-decoder input/output conventions

pub mod convention;
pub mod feeds_fetches;
pub mod graph;
pub mod session;
pub mod subgraph;

pub use convention::{DecoderConvention, GptConvention, SubgraphConvention, SubgraphLayout};
pub use feeds_fetches::{CopyInfo, FeedsFetchesManager};
pub use graph::{ElemType, GraphDef, NodeDef, ValueInfo};
pub use session::{ExecutionProvider, SessionState, SessionStateMap};
pub use subgraph::{ShapeParameters, Subgraph, SubgraphParameters};
