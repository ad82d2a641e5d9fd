use std::{future::Future, time::Duration};

use crate::PescarResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Runs `operation` until it succeeds, fails with something other than a conflict, or has been
/// tried `attempts` times.
///
/// The wait before the n-th retry is `backoff * n`. The last result is returned as is, so a
/// caller can tell an exhausted budget apart by checking [`crate::PescarError::is_conflict`].
pub async fn retry_on_conflict<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut operation: F,
) -> PescarResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PescarResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Err(e) if e.is_conflict() && attempt < attempts => {
                tracing::debug!(attempt, "conflicting write, retrying");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
