//! Public traffic verification
//!
//! A deploy only counts once the public hostname answers from the real app
//! several times in a row. A 200 that carries the error backend's marker
//! header is the ingress default backend speaking, so it counts as a miss.

use async_trait::async_trait;
use shipyard_cloud::{PollError, PollPolicy, poll};
use std::convert::Infallible;
use std::sync::Mutex;
use shipyard_core::naming::ERROR_HEADER;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct VerifyPolicy {
    pub max_attempts: u32,
    pub required_consecutive: u32,
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            required_consecutive: 3,
            interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// What one probe saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Response { status: u16, error_marker: bool },
    Unreachable(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ProbeOutcome::Response {
                status: 200,
                error_marker: false
            }
        )
    }

    fn describe(&self) -> String {
        match self {
            ProbeOutcome::Response {
                error_marker: true,
                status,
            } => format!("error backend responding (HTTP {}), app is down", status),
            ProbeOutcome::Response { status, .. } => format!("HTTP {} (expected 200)", status),
            ProbeOutcome::Unreachable(reason) => format!("unreachable: {}", reason),
        }
    }
}

#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// Probes over HTTPS with reqwest
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shipyard/", env!("CARGO_PKG_VERSION")))
            // the first response is the one that counts
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        match self.client.get(url).send().await {
            Ok(response) => ProbeOutcome::Response {
                status: response.status().as_u16(),
                error_marker: response.headers().contains_key(ERROR_HEADER),
            },
            Err(e) => ProbeOutcome::Unreachable(e.to_string()),
        }
    }
}

/// Where the verifier stands after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    Probing,
    Streaking(u32),
    Verified,
}

impl VerifyState {
    /// Any miss resets the streak, however long it was
    pub fn advance(self, success: bool, required: u32) -> Self {
        match (self, success) {
            (VerifyState::Verified, _) => VerifyState::Verified,
            (_, false) => VerifyState::Probing,
            (VerifyState::Probing, true) if required <= 1 => VerifyState::Verified,
            (VerifyState::Probing, true) => VerifyState::Streaking(1),
            (VerifyState::Streaking(n), true) if n + 1 >= required => VerifyState::Verified,
            (VerifyState::Streaking(n), true) => VerifyState::Streaking(n + 1),
        }
    }

    pub fn streak(&self) -> u32 {
        match self {
            VerifyState::Probing => 0,
            VerifyState::Streaking(n) => *n,
            VerifyState::Verified => u32::MAX,
        }
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("{url} not verified after {attempts} attempts: {last}")]
    Failed {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("traffic verification for {0} cancelled")]
    Cancelled(String),
}

impl crate::error::StepCause for VerifyError {
    fn is_cancellation(&self) -> bool {
        matches!(self, VerifyError::Cancelled(_))
    }
}

pub struct TrafficVerifier<'a> {
    probe: &'a dyn HttpProbe,
    policy: VerifyPolicy,
    cancel: CancellationToken,
}

impl<'a> TrafficVerifier<'a> {
    pub fn new(probe: &'a dyn HttpProbe, policy: VerifyPolicy, cancel: CancellationToken) -> Self {
        Self {
            probe,
            policy,
            cancel,
        }
    }

    /// Probe `url` until the streak reaches the threshold. Returns the
    /// attempt number it was reached on.
    pub async fn verify(&self, url: &str) -> Result<u32, VerifyError> {
        let required = self.policy.required_consecutive;
        let streak = Mutex::new(Streak {
            state: VerifyState::Probing,
            attempt: 0,
            last: String::from("no attempt made"),
        });
        let policy = PollPolicy::new(self.policy.max_attempts, self.policy.interval);

        info!(url = %url, "Verifying public traffic routing");
        let streak_ref = &streak;
        let probe = self.probe;
        let result = poll(policy, url, &self.cancel, || async move {
            let outcome = probe.probe(url).await;
            let mut streak = streak_ref.lock().unwrap_or_else(|e| e.into_inner());
            Ok::<_, Infallible>(streak.record(&outcome, required))
        })
        .await;

        match result {
            Ok(attempt) => {
                info!(url = %url, attempt, "Traffic verified");
                Ok(attempt)
            }
            Err(PollError::Cancelled { .. }) => Err(VerifyError::Cancelled(url.to_string())),
            Err(PollError::Exhausted { attempts, .. }) => Err(VerifyError::Failed {
                url: url.to_string(),
                attempts,
                last: streak.into_inner().unwrap_or_else(|e| e.into_inner()).last,
            }),
            Err(PollError::Probe(never)) => match never {},
        }
    }
}

/// Probe state carried between attempts
struct Streak {
    state: VerifyState,
    attempt: u32,
    last: String,
}

impl Streak {
    /// Returns the attempt number once verified
    fn record(&mut self, outcome: &ProbeOutcome, required: u32) -> Option<u32> {
        self.attempt += 1;
        let success = outcome.is_success();
        let previous = self.state;
        self.state = self.state.advance(success, required);

        if success {
            info!(
                attempt = self.attempt,
                streak = self.state.streak().min(required),
                required,
                "Public URL responding"
            );
        } else {
            self.last = outcome.describe();
            if previous.streak() > 0 {
                warn!(streak = previous.streak(), "Success streak broken, restarting count");
            }
            debug!(attempt = self.attempt, reason = %self.last, "Probe missed");
        }

        (self.state == VerifyState::Verified).then_some(self.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted(Mutex<VecDeque<ProbeOutcome>>);

    impl Scripted {
        fn new(seq: &[bool]) -> Self {
            Self(Mutex::new(
                seq.iter()
                    .map(|ok| ProbeOutcome::Response {
                        status: if *ok { 200 } else { 502 },
                        error_marker: false,
                    })
                    .collect(),
            ))
        }
    }

    #[async_trait]
    impl HttpProbe for Scripted {
        async fn probe(&self, _url: &str) -> ProbeOutcome {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ProbeOutcome::Unreachable("script exhausted".into()))
        }
    }

    async fn run(seq: &[bool]) -> Result<u32, VerifyError> {
        let probe = Scripted::new(seq);
        TrafficVerifier::new(&probe, VerifyPolicy::default(), CancellationToken::new())
            .verify("https://example.com/")
            .await
    }

    #[test]
    fn test_miss_resets_streak() {
        let state = VerifyState::Probing
            .advance(true, 3)
            .advance(true, 3);
        assert_eq!(state, VerifyState::Streaking(2));
        assert_eq!(state.advance(false, 3), VerifyState::Probing);
        assert_eq!(state.advance(true, 3), VerifyState::Verified);
    }

    #[test]
    fn test_error_marker_overrides_status() {
        let outcome = ProbeOutcome::Response {
            status: 200,
            error_marker: true,
        };
        assert!(!outcome.is_success());
        assert!(outcome.describe().contains("error backend"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_misses_then_streak() {
        assert_eq!(run(&[false, false, true, true, true]).await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_streak_rebuilds() {
        assert_eq!(run(&[true, false, true, true, true]).await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted() {
        let err = run(&[true, true, false, true, true, false, true, true, false, true])
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Failed { attempts: 10, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let probe = Scripted::new(&[true, true, true]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = TrafficVerifier::new(&probe, VerifyPolicy::default(), cancel)
            .verify("https://example.com/")
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Cancelled(_)));
    }
}
