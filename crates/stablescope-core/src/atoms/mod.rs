// ── Stablescope Atoms Layer ────────────────────────────────────────────────
// Constants, error types, domain types and collaborator traits.
// Dependency rule: atoms may only depend on std, external pure crates and
// the row/primitive helpers of this crate. Nothing here performs I/O.

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
