//! Bounded parallel fan-out
//!
//! Every machine-level operation (launch, sizing push, statistics query,
//! geometry extraction, save) runs the same per-row job against every worker
//! concurrently and waits for all of them before returning. There is no
//! long-lived pool: each fan-out is its own bounded batch, because the cap
//! legitimately varies by row count and by the platform override below.

use std::collections::BTreeMap;
use std::future::Future;

use futures::stream::{self, StreamExt};

use crate::error::Result;

/// Concurrency cap for a regular fan-out over `rows` workers.
pub fn fanout_cap(rows: usize) -> usize {
    rows.max(1)
}

/// Concurrency cap for the launch fan-out that follows a file-format
/// conversion.
///
/// On Windows the engine races when a conversion is immediately followed by
/// concurrent first topology reads, so launches run strictly in sequence
/// there. This is a correctness override, not a tuning knob.
pub fn launch_cap(rows: usize) -> usize {
    if cfg!(windows) {
        1
    } else {
        fanout_cap(rows)
    }
}

/// Run `op` over every `(name, item)` pair with at most `cap` operations in
/// flight, and wait for all of them.
///
/// Completion order is unspecified; the returned map is keyed by name, so
/// result order is stable. A failing operation yields an `Err` entry for its
/// own key and never cancels or corrupts its siblings.
pub async fn bounded_map<'a, K, V, T, F, Fut>(
    items: impl IntoIterator<Item = (&'a K, &'a V)>,
    cap: usize,
    op: F,
) -> BTreeMap<K, Result<T>>
where
    K: Ord + Clone + 'a,
    V: 'a,
    F: Fn(K, &'a V) -> Fut,
    Fut: Future<Output = Result<T>> + 'a,
{
    let jobs = items.into_iter().map(|(name, item)| {
        let key = name.clone();
        let fut = op(key.clone(), item);
        async move { (key, fut.await) }
    });

    stream::iter(jobs)
        .buffer_unordered(cap.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn respects_the_concurrency_cap() {
        let items: BTreeMap<String, usize> =
            (0..6).map(|i| (format!("row{i}"), i)).collect();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let results = bounded_map(items.iter(), 2, |_, value| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(*value)
            }
        })
        .await;

        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_cancel_siblings() {
        let items: BTreeMap<String, usize> =
            (0..3).map(|i| (format!("row{i}"), i)).collect();

        let results = bounded_map(items.iter(), 3, |name, value| async move {
            if name == "row1" {
                Err(Error::Engine("scripted failure".into()))
            } else {
                Ok(*value * 10)
            }
        })
        .await;

        assert_eq!(results.len(), 3);
        assert!(matches!(results["row0"], Ok(0)));
        assert!(results["row1"].is_err());
        assert!(matches!(results["row2"], Ok(20)));
    }

    #[tokio::test]
    async fn results_are_keyed_in_stable_order() {
        let items: BTreeMap<String, usize> =
            [("b", 1), ("a", 0), ("c", 2)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();

        let results = bounded_map(items.iter(), 1, |_, value| async move { Ok(*value) }).await;
        let keys: Vec<_> = results.keys().cloned().collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn launch_cap_is_serial_only_on_windows() {
        if cfg!(windows) {
            assert_eq!(launch_cap(8), 1);
        } else {
            assert_eq!(launch_cap(8), 8);
        }
        assert_eq!(fanout_cap(0), 1);
    }
}
