/// 指数バックオフ+ジッター付き再試行ロジック。
///
/// Full Jitter戦略のバックオフに加えて、エラー種別ごとの待機ポリシー
/// （ネットワーク＝エスカレーション、レート制限＝長い固定待機、
/// 不正JSON＝短い固定待機）を一箇所で合成します。
use std::time::Duration;

use rand::Rng;

use super::error::ModelErrorClass;

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryConfig {
    /// 最大試行回数（初回を含む）
    pub(crate) max_attempts: usize,
    /// ベースとなる遅延時間（ミリ秒）
    pub(crate) base_delay_ms: u64,
    /// 最大遅延時間（ミリ秒）
    pub(crate) max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 10000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub(crate) const fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// 指定された試行回数に対する遅延時間を計算する（Full Jitter戦略）。
    ///
    /// # Arguments
    /// * `attempt` - 試行回数（0から開始）
    #[must_use]
    pub(crate) fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        // 指数バックオフ: base * 2^(attempt-1)
        let exponential_delay = self
            .base_delay_ms
            .saturating_mul(1_u64.checked_shl((attempt - 1) as u32).unwrap_or(u64::MAX));

        let capped_delay = exponential_delay.min(self.max_delay_ms);

        // Full Jitter: random(0, capped_delay)
        let jittered_delay = if capped_delay > 0 {
            let mut rng = rand::rng();
            rng.random_range(0..=capped_delay)
        } else {
            0
        };

        Duration::from_millis(jittered_delay)
    }

    /// この試行回数が再試行可能かどうかを判定する。
    #[must_use]
    pub(crate) const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

/// エラー種別ごとの待機ポリシー。
///
/// モデルゲートウェイ呼び出しの全サイトで同じインスタンスを再利用します。
#[derive(Debug, Clone, Copy)]
pub(crate) struct WaitPolicy {
    backoff: RetryConfig,
    rate_limit_wait: Duration,
    malformed_wait: Duration,
}

impl WaitPolicy {
    #[must_use]
    pub(crate) const fn new(
        backoff: RetryConfig,
        rate_limit_wait: Duration,
        malformed_wait: Duration,
    ) -> Self {
        Self {
            backoff,
            rate_limit_wait,
            malformed_wait,
        }
    }

    #[must_use]
    pub(crate) const fn max_attempts(&self) -> usize {
        self.backoff.max_attempts
    }

    #[must_use]
    pub(crate) const fn can_retry(&self, attempt: usize) -> bool {
        self.backoff.can_retry(attempt)
    }

    /// 分類済みエラーに対する待機時間を返す。
    ///
    /// ネットワーク系は試行回数に応じてエスカレーションし、
    /// レート制限は長い固定待機、不正JSONは短い固定待機とします。
    #[must_use]
    pub(crate) fn wait_for(&self, class: ModelErrorClass, attempt: usize) -> Duration {
        match class {
            ModelErrorClass::Network => self.backoff.delay_for_attempt(attempt.max(1)),
            ModelErrorClass::RateLimit => self.rate_limit_wait,
            ModelErrorClass::MalformedResponse => self.malformed_wait,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            backoff: RetryConfig::default(),
            rate_limit_wait: Duration::from_secs(60),
            malformed_wait: Duration::from_secs(3),
        }
    }
}
