//! Integration tests for the agent → collector pipeline and durable storage

#[path = "integration/helpers.rs"]
mod helpers;

#[cfg(feature = "api")]
#[path = "integration/agent_to_collector.rs"]
mod agent_to_collector;

#[path = "integration/checkpoint_restore.rs"]
mod checkpoint_restore;

#[cfg(feature = "storage-sqlite")]
#[path = "integration/storage_persistence.rs"]
mod storage_persistence;
