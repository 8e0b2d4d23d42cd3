pub mod bm25;
pub mod engine;
pub mod rerank;
