//! A miniature deep-learning runtime: 4-D blobs, typed layers and a
//! serialized DAG of sub-nets executed by a topological walk.

mod blob;
mod graph;
mod hyper;
mod layers;

pub use blob::Blob;
pub use graph::Graph;
pub use hyper::HyperParams;
pub use layers::SampleKind;
