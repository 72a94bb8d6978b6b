//! Analysis engine: scanning, parsing, layer classification, chunking,
//! coupling analysis, and the batch pipeline.

pub mod chunker;
pub mod coupling;
pub mod filesystem;
pub mod layers;
pub mod parser;
pub mod pipeline;
