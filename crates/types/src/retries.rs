// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Backoff policies for calls against the source, the sink and the metadata store.

use std::borrow::Cow;
use std::cmp;
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

use rand::Rng;
use serde_with::serde_as;

const DEFAULT_JITTER_MULTIPLIER: f32 = 0.3;

/// Policy describing how often and with which pauses a failed operation is retried.
///
/// ```rust
/// use std::time::Duration;
/// use shardsync_types::retries::RetryPolicy;
///
/// let policy = RetryPolicy::fixed_delay(Duration::from_millis(100), Some(3));
/// let pauses: Vec<_> = policy.into_iter().collect();
/// assert_eq!(pauses.len(), 3);
/// ```
#[serde_as]
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "kebab-case"
)]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,
    /// Retry after a constant pause.
    FixedDelay {
        /// Pause between attempts, in humantime format, e.g. `500ms`.
        #[serde_as(as = "serde_with::DisplayFromStr")]
        interval: humantime::Duration,
        /// Retries forever if unset.
        max_attempts: Option<NonZeroUsize>,
    },
    /// Retry with `min(last_pause * factor, max_interval)` pauses.
    Exponential {
        #[serde_as(as = "serde_with::DisplayFromStr")]
        initial_interval: humantime::Duration,
        factor: f32,
        /// Retries forever if unset.
        max_attempts: Option<NonZeroUsize>,
        #[serde_as(as = "Option<serde_with::DisplayFromStr>")]
        max_interval: Option<humantime::Duration>,
    },
}

impl RetryPolicy {
    pub fn fixed_delay(interval: Duration, max_attempts: Option<usize>) -> Self {
        Self::FixedDelay {
            interval: interval.into(),
            max_attempts: max_attempts.and_then(NonZeroUsize::new),
        }
    }

    pub fn exponential(
        initial_interval: Duration,
        factor: f32,
        max_attempts: Option<usize>,
        max_interval: Option<Duration>,
    ) -> Self {
        Self::Exponential {
            initial_interval: initial_interval.into(),
            factor,
            max_attempts: max_attempts.and_then(NonZeroUsize::new),
            max_interval: max_interval.map(Into::into),
        }
    }

    /// Retries only errors for which `condition` holds. Other errors are returned immediately.
    pub async fn retry_if<T, E, Fn, Fut, C>(
        self,
        mut operation: Fn,
        mut condition: C,
    ) -> Result<T, E>
    where
        Fn: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnMut(&E) -> bool,
    {
        let mut retry_iter = self.into_iter();
        loop {
            match operation().await {
                Ok(res) => return Ok(res),
                Err(err) if condition(&err) => match retry_iter.next() {
                    Some(pause) => tokio::time::sleep(pause).await,
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }

    pub fn iter(&self) -> RetryIter<'_> {
        RetryIter {
            policy: Cow::Borrowed(self),
            attempts: 0,
            last_retry: None,
        }
    }
}

impl IntoIterator for RetryPolicy {
    type Item = Duration;
    type IntoIter = RetryIter<'static>;

    fn into_iter(self) -> Self::IntoIter {
        RetryIter {
            policy: Cow::Owned(self),
            attempts: 0,
            last_retry: None,
        }
    }
}

#[derive(Debug)]
pub struct RetryIter<'a> {
    policy: Cow<'a, RetryPolicy>,
    attempts: usize,
    last_retry: Option<Duration>,
}

impl RetryIter<'_> {
    fn exhausted(&self, max_attempts: &Option<NonZeroUsize>) -> bool {
        max_attempts.is_some_and(|limit| self.attempts > limit.get())
    }
}

impl Iterator for RetryIter<'_> {
    type Item = Duration;

    /// adds up to 1/3 target duration as jitter
    fn next(&mut self) -> Option<Self::Item> {
        self.attempts += 1;
        match self.policy.as_ref() {
            RetryPolicy::None => None,
            RetryPolicy::FixedDelay {
                interval,
                max_attempts,
            } => {
                if self.exhausted(max_attempts) {
                    None
                } else {
                    Some(with_jitter(**interval, DEFAULT_JITTER_MULTIPLIER))
                }
            }
            RetryPolicy::Exponential {
                initial_interval,
                factor,
                max_attempts,
                max_interval,
            } => {
                if self.exhausted(max_attempts) {
                    return None;
                }
                let next = match self.last_retry {
                    Some(last) => cmp::min(
                        last.mul_f32(*factor),
                        max_interval.map(Into::into).unwrap_or(Duration::MAX),
                    ),
                    None => **initial_interval,
                };
                self.last_retry = Some(next);
                Some(with_jitter(next, DEFAULT_JITTER_MULTIPLIER))
            }
        }
    }
}

// Jitter ranges from 3ms to (max_multiplier * duration). The 3ms floor keeps pauses away from
// round values, which tend to synchronize retries of different nodes.
static MIN_JITTER: Duration = Duration::from_millis(3);

pub fn with_jitter(duration: Duration, max_multiplier: f32) -> Duration {
    let max_jitter = duration.mul_f32(max_multiplier);
    if max_jitter <= MIN_JITTER {
        duration + MIN_JITTER
    } else {
        let jitter = rand::thread_rng().gen_range(MIN_JITTER..max_jitter);
        duration + jitter
    }
}
