// ── Stablescope Core ───────────────────────────────────────────────────────
// Pure building blocks shared by the engine and the CLI: error types, the
// collaborator traits, Ethereum primitives, warehouse row decoding, metric
// derivation and the rule-based insight generator.
//
// Nothing in this crate performs I/O. Network and database access lives in
// the `stablescope` engine crate behind the traits defined in `atoms::traits`.

pub mod atoms;
pub mod insights;
pub mod metrics;
pub mod primitives;
pub mod rows;

pub use atoms::error::{EngineError, EngineResult};
