//! Concurrent independent calls with progress reporting.

use std::future::Future;
use std::time::Duration;

use llm_dialects::LlmError;
use tokio::task::JoinSet;

/// Runs `tasks` concurrently and returns the successful results in input
/// order.
///
/// A task that fails, or panics, is logged and omitted; it never fails the
/// batch. `on_progress(done, total)` is called once each `poll_interval`
/// while tasks are outstanding and again whenever a task finishes.
///
/// ```rust
/// use std::time::Duration;
///
/// use llm_dialects::LlmError;
/// use llm_dialects_client::fan_out;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let tasks = (0..3).map(|i| async move {
///     if i == 1 { Err(LlmError::configuration("no")) } else { Ok(i * 10) }
/// });
/// let results = fan_out(tasks, Duration::from_millis(50), |_, _| {}).await;
/// assert_eq!(results, vec![0, 20]);
/// # }
/// ```
pub async fn fan_out<I, Fut, T, P>(tasks: I, poll_interval: Duration, mut on_progress: P) -> Vec<T>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, LlmError>> + Send + 'static,
    T: Send + 'static,
    P: FnMut(usize, usize),
{
    let mut set = JoinSet::new();
    let mut total = 0;
    for (index, task) in tasks.into_iter().enumerate() {
        set.spawn(async move { (index, task.await) });
        total += 1;
    }

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut done = 0;
    while !set.is_empty() {
        let Ok(joined) = tokio::time::timeout(poll_interval, set.join_next()).await else {
            on_progress(done, total);
            continue;
        };
        let Some(joined) = joined else {
            break;
        };
        done += 1;
        match joined {
            Ok((index, Ok(value))) => slots[index] = Some(value),
            Ok((index, Err(err))) => {
                tracing::warn!(index, total, error = %err, "fan-out branch failed, omitting");
            }
            Err(err) => tracing::warn!(total, error = %err, "fan-out branch panicked, omitting"),
        }
        on_progress(done, total);
    }
    slots.into_iter().flatten().collect()
}
