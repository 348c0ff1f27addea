pub mod indexer;
pub mod settings;
