//! Redundant dispatcher (spec. §4.5.4, §9): fan out N identical requests
//! for one committed segment, take the first success, cancel the rest via
//! `JoinHandle::abort` (structured cancellation — spec. §9 explicitly
//! rules out wall-clock polling) so a loser's in-flight socket is torn
//! down rather than left to complete and be discarded after the fact.
//! Grounded in `examples/original_source/desktop/backend/asr/asr_siliconflow_worker.py`'s
//! parallel-redundant module docstring: segments are dispatched
//! independently, no shared rate limiter between replicas.

use std::future::Future;
use std::time::{Duration, Instant};

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;

#[derive(Debug, Clone)]
pub struct RaceResult<T> {
    pub value: T,
    pub replica_id: usize,
    pub latency_ms: u64,
}

#[derive(Debug)]
pub enum RaceError<E> {
    /// Every replica failed; carries the last error observed.
    AllFailed(E),
    Timeout,
}

/// Race `replica_count` futures to completion; the first `Ok` wins and
/// every other in-flight task is aborted immediately via its
/// `AbortHandle`. If all fail, returns the last error seen. A
/// `total_timeout` bounds the whole race.
pub async fn race<F, Fut, T, E>(
    replica_count: usize,
    total_timeout: Duration,
    make_replica: F,
) -> Result<RaceResult<T>, RaceError<E>>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let start = Instant::now();

    let mut abort_handles = Vec::with_capacity(replica_count);
    let mut joins = FuturesUnordered::new();
    for id in 0..replica_count {
        let handle = tokio::spawn(make_replica(id));
        abort_handles.push(handle.abort_handle());
        joins.push(async move { (id, handle.await) });
    }

    let outcome = tokio::time::timeout(total_timeout, async {
        let mut last_err: Option<E> = None;
        while let Some((id, joined)) = joins.next().await {
            match joined {
                Ok(Ok(value)) => return Ok((id, value)),
                Ok(Err(e)) => last_err = Some(e),
                Err(_join_err) => {} // aborted or panicked, treat as a failed replica
            }
        }
        Err(last_err)
    })
    .await;

    match outcome {
        Ok(Ok((id, value))) => {
            for h in abort_handles {
                h.abort();
            }
            Ok(RaceResult {
                value,
                replica_id: id,
                latency_ms: start.elapsed().as_millis() as u64,
            })
        }
        Ok(Err(Some(e))) => Err(RaceError::AllFailed(e)),
        Ok(Err(None)) => Err(RaceError::Timeout),
        Err(_elapsed) => {
            for h in abort_handles {
                h.abort();
            }
            Err(RaceError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fastest_successful_replica_wins() {
        let result = race(2, Duration::from_secs(5), |id| async move {
            if id == 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            } else {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok::<_, ()>(format!("replica-{id}"))
        })
        .await
        .unwrap();

        assert_eq!(result.replica_id, 1);
        assert_eq!(result.value, "replica-1");
    }

    #[tokio::test]
    async fn all_replicas_failing_returns_all_failed() {
        let result = race(2, Duration::from_secs(5), |id| async move {
            Err::<String, _>(format!("replica {id} failed"))
        })
        .await;

        assert!(matches!(result, Err(RaceError::AllFailed(_))));
    }

    #[tokio::test]
    async fn timeout_is_reported_when_no_replica_finishes_in_time() {
        let result = race(1, Duration::from_millis(20), |_id| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ()>(())
        })
        .await;

        assert!(matches!(result, Err(RaceError::Timeout)));
    }
}
