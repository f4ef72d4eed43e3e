/*
Hybrid memory controller.

A small fast tier caches pages of a large bulk tier. The cache is page-granular and
set-associative; where the tags live (controller SRAM, next to the data in fast-tier rows, or
implied by a direct-mapped or channel-per-way layout) is selected by `AssocScheme`.

Transactions are queued, admitted one at a time once their page and set are free, classified as
hit or miss, and then carried through fast- and bulk-tier accesses by continuations kept in the
pending table. Every lock taken on the way is released when the last leg of the transaction
completes.
*/

pub mod access_log;
pub mod config;
pub mod contention;
pub mod decode;
pub mod layout;
pub mod line;
pub mod pending;
pub mod persist;
pub mod prefetch;
pub mod remap;
pub mod stats;
pub mod system;
pub mod tag_buffer;
pub mod tlb;
pub mod transaction;
pub mod victim;

#[cfg(test)]
mod unit_tests;

pub use config::{AssocScheme, HybridConfig, TagReplacement, VictimPolicy};
pub use stats::HybridStats;
pub use system::{HybridSystem, MmioOp};
pub use transaction::{Completion, TransactionKind};
