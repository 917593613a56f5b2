//! Integrity ledger for civic complaints
//!
//! Every triaged complaint is reduced to a canonical manifest whose digest is
//! anchored on an append-only ledger. Auditors later re-derive the digest and
//! compare it against the anchored value to detect tampering, and compare the
//! set of anchored ids against the database to detect deletions.
//!
//! # Key Components
//!
//! - [`ComplaintManifest`]: Canonical serialization and Keccak-256 digest
//! - [`LedgerAdapter`]: Trait for anchoring, verifying and enumerating anchors
//! - [`JsonRpcLedger`]: Adapter talking JSON-RPC 2.0 to a ledger gateway
//! - [`JournalLedger`]: Append-only SQLite journal for development and tests
//!
//! # Example
//!
//! ```ignore
//! use civic_ledger::{ComplaintManifest, JournalLedger, LedgerAdapter};
//!
//! let ledger = JournalLedger::open_in_memory()?;
//! let manifest = ComplaintManifest::new(42, "Broken streetlight", 6, filed_at)
//!     .with_evidence(evidence_hashes);
//! let tx_ref = ledger.anchor(42, &manifest.digest()).await?;
//! assert!(ledger.compare(42, &manifest.digest()).await?.matches);
//! ```

pub mod adapter;
pub mod journal;
pub mod manifest;
pub mod rpc;

// Re-export main types
pub use adapter::{checked_digest, AnchorEvent, DigestComparison, LedgerAdapter, LedgerError};
pub use journal::JournalLedger;
pub use manifest::{digests_match, keccak256_hex, normalize_digest, sha256_hex, ComplaintManifest};
pub use rpc::{JsonRpcLedger, JsonRpcLedgerConfig};
