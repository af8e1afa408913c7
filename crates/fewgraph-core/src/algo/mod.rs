//! Graph algorithms behind episode construction.
//!
//! - [`khop`] - k-hop neighborhood extraction around one node (BFS)
//! - [`episode`] - N-way K-shot support/query sampling over a split mask

pub mod episode;
pub mod khop;
