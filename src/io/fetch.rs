use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tracing::warn;

use super::{Block, ByteRange, RangeFetcher};
use crate::error::Result;

/// Runs `fetch_one` for every range with at most `fanout` futures in flight.
///
/// Completion order is free; the returned blocks follow the order of `ranges`.
pub async fn fetch_in_order<F, Fut>(ranges: &[ByteRange], fanout: usize, fetch_one: F) -> Result<Vec<Block>>
where
    F: FnMut(ByteRange) -> Fut,
    Fut: Future<Output = Result<Block>>,
{
    futures::stream::iter(ranges.iter().copied())
        .map(fetch_one)
        .buffered(fanout.max(1))
        .try_collect()
        .await
}

/// Retries retryable fetch failures of the wrapped fetcher.
///
/// The whole batch is retried, matching the all-or-nothing contract of
/// [`RangeFetcher::fetch_ranges`].
pub struct Retrying<F> {
    inner: F,
    max_retry: u32,
    backoff: Duration,
}

impl<F: RangeFetcher> Retrying<F> {
    pub fn new(inner: F, max_retry: u32) -> Self {
        Self {
            inner,
            max_retry,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    async fn retry<T, Op, Fut>(&self, what: &str, mut op: Op) -> Result<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry_count = 0;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && retry_count < self.max_retry => {
                    retry_count += 1;
                    warn!(retry = retry_count, max_retry = self.max_retry, error = %e, "{what} failed, retrying");
                    tokio::time::sleep(self.backoff * retry_count).await;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl<F: RangeFetcher> RangeFetcher for Retrying<F> {
    async fn expected_length(&self) -> Result<u64> {
        self.retry("length check", || self.inner.expected_length()).await
    }

    async fn fetch_ranges(&self, ranges: &[ByteRange], fanout: usize) -> Result<Vec<Block>> {
        self.retry("range fetch", || self.inner.fetch_ranges(ranges, fanout)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn out_of_order_completion_keeps_range_order() {
        let ranges = ByteRange::split(0, 64, 16);
        let completed = Mutex::new(Vec::new());

        let blocks = fetch_in_order(&ranges, 4, |range| {
            let completed = &completed;
            async move {
                // Later ranges finish first.
                let delay = 40 - range.start / 2;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                completed.lock().unwrap().push(range.start);
                Ok(Block {
                    data: Bytes::from(vec![range.start as u8; range.len() as usize]),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(*completed.lock().unwrap(), vec![48, 32, 16, 0]);
        let firsts: Vec<u8> = blocks.iter().map(|b| b.data[0]).collect();
        assert_eq!(firsts, vec![0, 16, 32, 48]);
    }

    #[tokio::test]
    async fn fanout_bounds_in_flight_requests() {
        let ranges = ByteRange::split(0, 80, 8);
        let in_flight = AtomicU32::new(0);
        let peak = AtomicU32::new(0);

        fetch_in_order(&ranges, 3, |range| {
            let (in_flight, peak) = (&in_flight, &peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(Block {
                    data: Bytes::from(vec![0; range.len() as usize]),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn one_failure_fails_the_batch() {
        let ranges = ByteRange::split(0, 48, 16);
        let result = fetch_in_order(&ranges, 2, |range| async move {
            if range.start == 16 {
                Err(Error::OriginStatus(500))
            } else {
                Ok(Block::default())
            }
        })
        .await;
        assert!(matches!(result, Err(Error::OriginStatus(500))));
    }

    struct Flaky {
        failures: AtomicU32,
        status: u16,
    }

    #[async_trait]
    impl RangeFetcher for Flaky {
        async fn expected_length(&self) -> Result<u64> {
            Ok(4)
        }

        async fn fetch_ranges(&self, ranges: &[ByteRange], _fanout: usize) -> Result<Vec<Block>> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::OriginStatus(self.status));
            }
            Ok(ranges.iter().map(|_| Block::default()).collect())
        }
    }

    #[tokio::test]
    async fn retries_retryable_failures() {
        let fetcher = Retrying::new(
            Flaky {
                failures: AtomicU32::new(2),
                status: 503,
            },
            3,
        )
        .with_backoff(Duration::from_millis(1));
        let blocks = fetcher.fetch_ranges(&[ByteRange::new(0, 3)], 1).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(fetcher.inner().failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gives_up_after_max_retry() {
        let fetcher = Retrying::new(
            Flaky {
                failures: AtomicU32::new(5),
                status: 502,
            },
            2,
        )
        .with_backoff(Duration::from_millis(1));
        let result = fetcher.fetch_ranges(&[ByteRange::new(0, 3)], 1).await;
        assert!(matches!(result, Err(Error::OriginStatus(502))));
        assert_eq!(fetcher.inner().failures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let fetcher = Retrying::new(
            Flaky {
                failures: AtomicU32::new(1),
                status: 404,
            },
            3,
        );
        let result = fetcher.fetch_ranges(&[ByteRange::new(0, 3)], 1).await;
        assert!(matches!(result, Err(Error::OriginStatus(404))));
    }
}
