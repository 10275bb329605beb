// Stablescope — stablecoin analytics backend.
// `config` loads the TOML file and environment overrides; `engine` holds
// everything that talks to the chain, the warehouse and the AI provider.

pub mod config;
pub mod engine;

pub use config::StablescopeConfig;
pub use engine::state::AppState;
