//! The ownership & GC engine (§4.5): the secondary-resource owner index and
//! replacement-chain discovery used by both controllers' reconcile loops.

pub mod index;
pub mod replacement;

pub use index::{OwnerIndex, OwnerKey, SecondaryKey};
pub use replacement::{successors, names_ready_for_deletion, CsvSummary};
