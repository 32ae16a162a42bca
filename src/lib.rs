//! Ecash settlement engine for an inference marketplace dashboard.
//!
//! Holds Cashu proofs across several mints, moves value in and out over
//! Lightning, pays inference nodes with tokens, and keeps the proof set and
//! API keys in step across devices through encrypted Nostr app data.

// Modules
pub mod services;
pub mod stores;
pub mod utils;

pub use services::node_invoice::{NodeInvoiceClient, NodeInvoiceError, NodeInvoiceState, NodeInvoiceStatus};
pub use stores::api_keys::{ApiKeyRecord, ApiKeyStore};
pub use stores::cashu::errors::{CashuResult, CashuWalletError};
pub use stores::cashu_wallet::{SessionStart, WalletSession, WalletSessionBuilder};
pub use stores::settings_store::{EngineSettings, SettingsStore};

/// Install the browser logger and panic hook.
///
/// Natively this does nothing; the host picks its own `log` implementation.
pub fn init_logging() {
    #[cfg(target_arch = "wasm32")]
    {
        console_error_panic_hook::set_once();
        // Set log level to INFO to filter out DEBUG messages from relay pool
        wasm_logger::init(wasm_logger::Config::new(log::Level::Info));
    }

    log::info!("Ecash settlement engine v{}", env!("CARGO_PKG_VERSION"));
}
