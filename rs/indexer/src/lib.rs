pub mod config;
pub mod error;
pub mod indexer;
pub mod input;
pub mod launcher;
pub mod vocab;
