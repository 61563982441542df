//! Deadline helper for the async ports.
//!
//! Races a future against an `async-io-mini` reactor timer.  The losing
//! future is dropped, which cancels it.

use core::future::Future;
use core::time::Duration;

/// The deadline passed before the future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

/// Run `fut` to completion or give up after `timeout`.
pub async fn with_timeout<F: Future>(timeout: Duration, fut: F) -> Result<F::Output, Elapsed> {
    futures_lite::future::or(async { Ok(fut.await) }, async {
        async_io_mini::Timer::after(timeout).await;
        Err(Elapsed)
    })
    .await
}
