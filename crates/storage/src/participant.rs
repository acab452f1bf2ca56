//! Transaction participant hook
//!
//! State that lives outside the storage session (containment, event
//! buffers) is staged per transaction and finalized through this trait. The
//! transaction calls every participant after the storage session commits,
//! passing the commit instant, and on rollback or expiry.

use archivum_core::{Result, Timestamp};

/// Per-transaction state owned outside the storage session
pub trait TransactionParticipant: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Apply everything staged for `tx_id` as of `instant`
    fn commit(&self, tx_id: &str, instant: Timestamp) -> Result<()>;

    /// Drop everything staged for `tx_id`
    fn rollback(&self, tx_id: &str);
}
