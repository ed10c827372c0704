/// 指数バックオフ付き再試行エグゼキュータ。
///
/// 失敗した非同期操作を、遅延を倍増させながら再試行します。
/// 遅延はジッターなしの純粋な指数列（上限あり）です。
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::warn;

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 初回実行を除いた最大再試行回数
    pub max_retries: usize,
    /// 初回の遅延時間
    pub initial_delay: Duration,
    /// 遅延時間の上限
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// 既定のHTTP向けポリシー: 5回再試行、1秒開始、30秒上限。
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: usize, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// 指定された再試行回数に対する遅延時間を計算する。
    ///
    /// # Arguments
    /// * `attempt` - 再試行回数（0から開始。0は初回失敗後の遅延）
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let multiplier = 1_u64.checked_shl(u32::try_from(attempt).unwrap_or(u32::MAX));
        let delay = multiplier
            .and_then(|m| {
                u64::try_from(self.initial_delay.as_millis())
                    .ok()
                    .and_then(|base| base.checked_mul(m))
            })
            .map_or(self.max_delay, Duration::from_millis);
        delay.min(self.max_delay)
    }
}

/// 再試行付きで非同期操作を実行する。
///
/// 操作が失敗した場合、`is_retryable` が true を返し、かつ再試行回数が
/// 残っている限り、指数バックオフで待機してから再実行します。
/// 再試行不可能なエラーは初回失敗で即座に伝播します。
///
/// # Errors
/// 最後に発生したエラーをそのまま返す。
pub async fn retry_with<T, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&anyhow::Error) -> bool,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: usize = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries || !is_retryable(&err) {
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying after delay"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;

    #[test]
    fn delay_sequence_doubles_from_initial() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(16));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retries_and_propagates_last_error() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let start = tokio::time::Instant::now();
        let result: Result<()> = retry_with(&policy, |_| true, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("upstream returned 500"))
            }
        })
        .await;

        let err = result.expect_err("operation never succeeds");
        assert_eq!(err.to_string(), "upstream returned 500");
        // max_retries + 1 total attempts
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        // 1s + 2s + 4s + 8s + 16s between attempts
        assert_eq!(start.elapsed().as_secs(), 31);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_propagates_immediately() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = retry_with(&policy, |_| false, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("bad request"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100));
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result = retry_with(&policy, |_| true, move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow!("flaky"))
                } else {
                    Ok(42_u32)
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
