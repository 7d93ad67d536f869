//! Sequential asynchronous iteration.
//!
//! Drives a single-pass sequence one item at a time: the operation for the
//! next item only starts once the future for the current item has resolved.
//! Used for refreshing all subscriptions, initializing them at startup, and
//! anywhere else where work must be chained without overlap.
//!
//! There is no cancellation. Dropping the returned future stops the loop
//! between items; operations that need finer cancellation must handle it
//! themselves.

use std::future::Future;

/// Run `op` for each item in order, awaiting each before starting the next.
///
/// Returns the outputs in item order. An empty sequence completes on the
/// first poll without suspending.
pub async fn sequential<I, F, Fut>(items: I, mut op: F) -> Vec<Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future,
{
    let items = items.into_iter();
    let mut outputs = Vec::with_capacity(items.size_hint().0);
    for item in items {
        outputs.push(op(item).await);
    }
    outputs
}

/// Like [`sequential`] for fallible operations, stopping at the first error.
///
/// Items after the failing one are never started.
pub async fn try_sequential<I, F, Fut, T, E>(items: I, mut op: F) -> Result<Vec<T>, E>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let items = items.into_iter();
    let mut outputs = Vec::with_capacity(items.size_hint().0);
    for item in items {
        outputs.push(op(item).await?);
    }
    Ok(outputs)
}

/// Like [`sequential`], then invoke `on_complete` once every item is done.
pub async fn sequential_then<I, F, Fut, C>(items: I, op: F, on_complete: Option<C>)
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = ()>,
    C: FnOnce(),
{
    sequential(items, op).await;
    if let Some(on_complete) = on_complete {
        on_complete();
    }
}
