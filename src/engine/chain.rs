// Stablescope — Chain Reader
//
// Read-only access to an Ethereum JSON-RPC endpoint:
// - rpc:    HTTP transport with an owned, age-limited connection
// - abi:    ERC-20 calldata encoding and return-value decoding
// - reader: typed operations (blocks, chunked logs, balances, fees, filters)

pub mod abi;
pub mod reader;
pub mod rpc;

pub use reader::{ChainReader, ChainReaderConfig, LogScan};
pub use rpc::HttpRpcTransport;
