//! Bounded-window batch execution
//!
//! Items are processed in fixed-size windows: every item in a window runs
//! concurrently and the next window starts only after the whole current
//! window has settled. Each task produces its own result and results are
//! merged afterwards, so no shared collection needs a lock.

use std::future::Future;

use futures::future::join_all;
use tracing::debug;

/// Run `f` over `items` with at most `concurrency` futures in flight.
///
/// Returns exactly one output per input, in input order. Callers that need
/// identity should still carry it in the output rather than rely on position.
pub async fn run_windowed<T, R, F, Fut>(items: Vec<T>, concurrency: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let window_size = concurrency.max(1);
    let total = items.len();
    let mut results = Vec::with_capacity(total);
    let mut items = items.into_iter().peekable();
    let mut window_index = 0usize;

    while items.peek().is_some() {
        let window: Vec<Fut> = items.by_ref().take(window_size).map(&f).collect();
        window_index += 1;
        debug!(
            "Processing window {} ({} items, {}/{} done)",
            window_index,
            window.len(),
            results.len(),
            total
        );
        results.extend(join_all(window).await);
    }

    results
}
