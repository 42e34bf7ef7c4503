//! Contract creation block search.
//!
//! The indexer starts from the block a tracked contract was deployed in.
//! That block is the lower bound of "code exists at this height", found by
//! binary search because deployed code never disappears.

use std::future::Future;

use crate::error::ChainError;
use crate::rpc::{BlockTag, RpcClient, is_empty_code};

/// The smallest `x` in `lo..=hi` for which `predicate(x)` holds, where the
/// predicate is monotonic (false up to some point, true after it).
///
/// Returns `None` when the predicate is false at `hi`.
pub async fn first_true<F, Fut, E>(lo: u64, hi: u64, mut predicate: F) -> Result<Option<u64>, E>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    if lo > hi || !predicate(hi).await? {
        return Ok(None);
    }
    let (mut lo, mut hi) = (lo, hi);
    while lo < hi {
        let mid = lo.midpoint(hi);
        if predicate(mid).await? {
            hi = mid;
        } else {
            lo = mid.saturating_add(1);
        }
    }
    Ok(Some(hi))
}

/// First block at which `address` has deployed code, or `None` if it has
/// none at the latest block.
///
/// # Errors
///
/// Returns [`ChainError`] if any RPC call fails.
pub async fn find_creation_block(
    rpc: &RpcClient,
    address: &str,
) -> Result<Option<u64>, ChainError> {
    let latest = rpc.block_number().await?;
    let block = first_true(0, latest, |height| async move {
        let code = rpc.get_code(address, BlockTag::Number(height)).await?;
        Ok::<_, ChainError>(!is_empty_code(&code))
    })
    .await?;
    if let Some(height) = block {
        tracing::info!(address, block = height, "Found contract creation block");
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    async fn search(lo: u64, hi: u64, threshold: u64) -> (Option<u64>, u32) {
        let calls = AtomicU32::new(0);
        let found = first_true(lo, hi, |x| {
            calls.fetch_add(1, Ordering::Relaxed);
            async move { Ok::<_, ChainError>(x >= threshold) }
        })
        .await
        .unwrap();
        (found, calls.load(Ordering::Relaxed))
    }

    #[tokio::test]
    async fn finds_the_lower_bound() {
        assert_eq!(search(0, 100, 37).await.0, Some(37));
        assert_eq!(search(0, 100, 0).await.0, Some(0));
        assert_eq!(search(0, 100, 100).await.0, Some(100));
        assert_eq!(search(5, 5, 5).await.0, Some(5));
    }

    #[tokio::test]
    async fn none_when_never_true() {
        assert_eq!(search(0, 100, 101).await, (None, 1));
        assert_eq!(search(10, 5, 0).await, (None, 0));
    }

    #[tokio::test]
    async fn search_is_logarithmic() {
        let (found, calls) = search(0, 20_000_000, 12_345_678).await;
        assert_eq!(found, Some(12_345_678));
        assert!(calls <= 27, "{calls} lookups");
    }

    #[tokio::test]
    async fn errors_stop_the_search() {
        let result = first_true(0, 10, |x| async move {
            if x == 5 {
                Err(ChainError::Http("boom".to_owned()))
            } else {
                Ok(x > 5)
            }
        })
        .await;
        assert!(matches!(result, Err(ChainError::Http(_))));
    }
}
