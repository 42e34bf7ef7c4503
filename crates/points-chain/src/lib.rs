//! Chain access for the points indexer.
//!
//! - [`rpc`] -- minimal JSON-RPC client and hex helpers
//! - [`erc20`] -- ERC-20 balance [`points_core::ValuationProvider`] and
//!   [`points_boost::BalanceReader`]
//! - [`creation_block`] -- binary search for a contract's deployment block
//! - [`error`] -- [`ChainError`]

pub mod creation_block;
pub mod erc20;
pub mod error;
pub mod rpc;

pub use creation_block::{find_creation_block, first_true};
pub use erc20::{
    BALANCE_AMOUNT, BALANCE_OF_SELECTOR, Erc20HoldingProvider, balance_of_calldata, read_balance,
    scale_amount,
};
pub use error::ChainError;
pub use rpc::{BlockTag, RpcClient, parse_quantity, parse_word};
