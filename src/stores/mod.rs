// Wallet state and persistence
// Stores own the data the settlement engine reads and mutates

pub mod local_store;
pub mod settings_store;
pub mod nostr_client;
pub mod relay_metadata;
pub mod cloud_sync;
pub mod api_keys;
pub mod cashu_memory_db;
pub mod cashu_cdk_bridge;
pub mod cashu_wallet;
pub mod cashu;
