//! ERC-20 balance valuation.
//!
//! Values an account's holding of a token as `balance / 10^decimals` times a
//! fixed USD price. Pool shares are valued the same way against the pool's
//! own LP token, so a pool share of `0xpool.0xlp` reads
//! `0xpool.balanceOf(0xlp)`. The same read backs boost production, where
//! ERC-721 collections answer `balanceOf` with the same selector.

use points_boost::{BalanceReader, BoostError};
use points_core::{EntityState, Valuation, ValuationProvider};
use points_types::{Account, EntityId, Holdings, TimestampMilli};
use rust_decimal::Decimal;

use crate::error::ChainError;
use crate::rpc::{BlockTag, RpcClient, address_digits, parse_word};

/// Four-byte selector of `balanceOf(address)`.
pub const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Name of the raw amount recorded in [`Holdings::amounts`].
pub const BALANCE_AMOUNT: &str = "balance";

/// Largest scale a [`Decimal`] can carry.
const MAX_DECIMALS: u32 = 28;

/// Calldata for `balanceOf(holder)`.
///
/// # Errors
///
/// Returns [`ChainError::InvalidAddress`] if `holder` is not an address.
pub fn balance_of_calldata(holder: &str) -> Result<String, ChainError> {
    let digits = address_digits(holder)?;
    Ok(format!("0x{BALANCE_OF_SELECTOR}{digits:0>64}"))
}

/// Convert a raw integer amount into whole tokens.
///
/// # Errors
///
/// Returns [`ChainError::Overflow`] if the amount does not fit a
/// [`Decimal`] or `decimals` exceeds its maximum scale.
pub fn scale_amount(raw: u128, decimals: u32) -> Result<Decimal, ChainError> {
    if decimals > MAX_DECIMALS {
        return Err(ChainError::Overflow(format!(
            "{decimals} decimals exceeds the supported {MAX_DECIMALS}"
        )));
    }
    let mantissa =
        i128::try_from(raw).map_err(|e| ChainError::Overflow(format!("{raw}: {e}")))?;
    Decimal::try_from_i128_with_scale(mantissa, decimals)
        .map(|d| d.normalize())
        .map_err(|e| ChainError::Overflow(format!("{raw}: {e}")))
}

/// Raw `balanceOf(holder)` on `contract` at the latest block.
///
/// # Errors
///
/// Returns [`ChainError`] if the call fails or returns a malformed word.
pub async fn read_balance(
    rpc: &RpcClient,
    contract: &Account,
    holder: &Account,
) -> Result<u128, ChainError> {
    let data = balance_of_calldata(holder.as_str())?;
    let word = rpc.eth_call(contract.as_str(), &data, BlockTag::Latest).await?;
    parse_word(&word)
}

impl BalanceReader for RpcClient {
    async fn balance_of(&self, token: &Account, holder: &Account) -> Result<u128, BoostError> {
        read_balance(self, token, holder)
            .await
            .map_err(|e| BoostError::Balance(format!("{token}.balanceOf({holder}): {e}")))
    }
}

/// [`ValuationProvider`] reading ERC-20 balances at the latest block.
///
/// The node's head can be ahead of the trigger being evaluated, so a
/// balance that changed in between is credited from the trigger time
/// onward. The error is bounded by the node's lead over the trigger stream
/// and is undone by the next trigger for the holder.
pub struct Erc20HoldingProvider {
    rpc: RpcClient,
    token: Account,
    decimals: u32,
    usd_price: Decimal,
}

impl Erc20HoldingProvider {
    /// Value holdings of `token` (with `decimals`) at `usd_price` per whole
    /// token.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidAddress`] if `token` is not an address,
    /// or [`ChainError::Overflow`] if `decimals` cannot be represented.
    pub fn new(
        rpc: RpcClient,
        token: &str,
        decimals: u32,
        usd_price: Decimal,
    ) -> Result<Self, ChainError> {
        address_digits(token)?;
        if decimals > MAX_DECIMALS {
            return Err(ChainError::Overflow(format!(
                "{decimals} decimals exceeds the supported {MAX_DECIMALS}"
            )));
        }
        Ok(Self {
            rpc,
            token: Account::new(token),
            decimals,
            usd_price,
        })
    }

    /// Raw `balanceOf(holder)` on `contract`.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the call fails or returns a malformed word.
    pub async fn balance_of(
        &self,
        contract: &Account,
        holder: &Account,
    ) -> Result<u128, ChainError> {
        read_balance(&self.rpc, contract, holder).await
    }

    /// Holdings of `holder` in `contract`.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the balance read or the decimal math fails.
    pub async fn holdings(
        &self,
        contract: &Account,
        holder: &Account,
    ) -> Result<Holdings, ChainError> {
        let raw = self.balance_of(contract, holder).await?;
        let balance = scale_amount(raw, self.decimals)?;
        let value = balance
            .checked_mul(self.usd_price)
            .ok_or_else(|| ChainError::Overflow(format!("{balance} * {}", self.usd_price)))?;
        Ok(Holdings::new(value).with_amount(BALANCE_AMOUNT, balance))
    }
}

impl ValuationProvider for Erc20HoldingProvider {
    // Balances are read at the latest block; `as_of` only labels the result.
    async fn value_of(&self, entity: &EntityId, _as_of: TimestampMilli) -> Valuation {
        let (contract, holder) = match entity {
            EntityId::Account(holder) => (&self.token, holder),
            EntityId::PoolShare { pool, account } => (pool, account),
            EntityId::Position(token_id) => {
                return Valuation::TransientError(format!(
                    "position {token_id} is not an ERC-20 holding"
                ));
            }
        };
        match self.holdings(contract, holder).await {
            Ok(holdings) => Valuation::Found(EntityState::unowned(holdings)),
            Err(e) => {
                tracing::debug!(entity = %entity, error = %e, "Balance lookup failed");
                Valuation::TransientError(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn calldata_pads_the_holder() {
        let data = balance_of_calldata("0x1111111111111111111111111111111111111111").unwrap();
        assert_eq!(
            data,
            "0x70a08231\
             0000000000000000000000001111111111111111111111111111111111111111"
        );
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(balance_of_calldata("0xnothex").is_err());
    }

    #[test]
    fn amounts_scale_by_decimals() {
        assert_eq!(scale_amount(1_500_000_000_000_000_000, 18).unwrap(), dec!(1.5));
        assert_eq!(scale_amount(1_234_567, 6).unwrap(), dec!(1.234567));
        assert_eq!(scale_amount(0, 18).unwrap(), Decimal::ZERO);
        assert!(scale_amount(1, 29).is_err());
        assert!(scale_amount(u128::MAX, 18).is_err());
    }

    #[test]
    fn provider_rejects_bad_token() {
        let rpc = RpcClient::new("http://localhost:8545").unwrap();
        assert!(Erc20HoldingProvider::new(rpc, "0x1234", 18, Decimal::ONE).is_err());
    }

    #[tokio::test]
    async fn positions_are_not_valued() {
        let rpc = RpcClient::new("http://localhost:8545").unwrap();
        let provider = Erc20HoldingProvider::new(
            rpc,
            "0x2222222222222222222222222222222222222222",
            18,
            Decimal::ONE,
        )
        .unwrap();
        let result = provider
            .value_of(&EntityId::position("7").unwrap(), TimestampMilli(0))
            .await;
        assert!(matches!(result, Valuation::TransientError(_)));
    }
}
