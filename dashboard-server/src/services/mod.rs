pub mod indexer_sync;
