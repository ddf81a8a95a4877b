//! Retry policy for API calls.
//!
//! A [`RetryPolicy`] maps each outcome class (429, 500, gateway statuses,
//! transport failures) to a [`Rule`]: how long to wait and whether the class
//! is bounded. [`execute`] drives a request closure under a policy, sleeping
//! through an injected [`Sleeper`] so tests never wait on a real clock.

use crate::error::{Result, S2agError};
use crate::provenance::DecisionLog;
use crate::transport::{HttpResponse, TransportError};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Characters of a response body kept in logs and error values
pub const BODY_LOG_LIMIT: usize = 1000;

/// How long to wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wait {
    Fixed(Duration),
    /// Honour a numeric `Retry-After` header, else use the fallback
    RetryAfterOr(Duration),
}

/// Whether an outcome class has an attempt cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Unbounded,
    /// Give up once this many attempts have been made
    Attempts(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub wait: Wait,
    pub bound: Bound,
}

/// What to do after one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Accept,
    Retry { wait: Duration, bounded: bool },
    /// Retry budget for this class is used up
    GiveUp { ceiling: bool },
    /// Status is not retriable
    Fatal,
}

/// Status-class to rule table.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 429
    pub rate_limited: Option<Rule>,
    /// 500
    pub server_error: Option<Rule>,
    /// Explicit gateway statuses (502/503/504)
    pub gateway: Vec<(u16, Rule)>,
    /// Request never produced a response
    pub network: Rule,
    /// Operator ceiling applied to the unbounded classes
    pub unbounded_ceiling: Option<u32>,
}

impl RetryPolicy {
    fn rule_for(&self, status: u16) -> Option<Rule> {
        match status {
            429 => self.rate_limited,
            500 => self.server_error,
            _ => self
                .gateway
                .iter()
                .find(|(code, _)| *code == status)
                .map(|(_, rule)| *rule),
        }
    }

    /// Decide after an attempt that returned `status`.
    ///
    /// `attempt` is the 1-based number of the attempt just made.
    pub fn decide_status(&self, status: u16, retry_after: Option<&str>, attempt: u32) -> Decision {
        if status == 200 {
            return Decision::Accept;
        }
        match self.rule_for(status) {
            Some(rule) => self.apply(rule, retry_after, attempt),
            None => Decision::Fatal,
        }
    }

    /// Decide after an attempt that failed before any response arrived.
    pub fn decide_network(&self, attempt: u32) -> Decision {
        self.apply(self.network, None, attempt)
    }

    fn apply(&self, rule: Rule, retry_after: Option<&str>, attempt: u32) -> Decision {
        let wait = match rule.wait {
            Wait::Fixed(d) => d,
            Wait::RetryAfterOr(fallback) => parse_retry_after(retry_after).unwrap_or(fallback),
        };
        match rule.bound {
            Bound::Attempts(max) if attempt >= max.max(1) => Decision::GiveUp { ceiling: false },
            Bound::Attempts(_) => Decision::Retry { wait, bounded: true },
            Bound::Unbounded => match self.unbounded_ceiling {
                Some(ceiling) if attempt >= ceiling.max(1) => Decision::GiveUp { ceiling: true },
                _ => Decision::Retry {
                    wait,
                    bounded: false,
                },
            },
        }
    }
}

/// Parse a `Retry-After` value given in seconds.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let secs: f64 = value?.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Blocking wait between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-clock sleeper.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    body.chars().take(BODY_LOG_LIMIT).collect()
}

/// Run `send` until the policy accepts the response or gives up.
///
/// Returns the accepted (200) response. Exhausted budgets become
/// [`S2agError::RetriesExhausted`], non-retriable statuses [`S2agError::Http`];
/// both carry the last body so callers can persist it.
pub async fn execute<F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    log: &DecisionLog,
    label: &str,
    mut send: F,
) -> Result<HttpResponse>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<HttpResponse, TransportError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match send().await {
            Ok(response) => {
                let status = response.status;
                match policy.decide_status(status, response.retry_after.as_deref(), attempt) {
                    Decision::Accept => return Ok(response),
                    Decision::Retry { wait, bounded } => {
                        let kind = if bounded { "bounded" } else { "unbounded" };
                        warn!(label, status, attempt, wait_secs = wait.as_secs_f64(), kind, "Retrying request");
                        log.record(&format!(
                            "{} -> {} (attempt {}); {} retry after {:.1}s",
                            label,
                            status,
                            attempt,
                            kind,
                            wait.as_secs_f64()
                        ));
                        sleeper.sleep(wait).await;
                    }
                    Decision::GiveUp { ceiling } => {
                        let why = if ceiling { "unbounded retry ceiling" } else { "max_retries" };
                        error!(label, status, attempt, "Retries exhausted");
                        log.record(&format!("{} exceeded {} for {}", label, why, status));
                        return Err(S2agError::RetriesExhausted {
                            status: Some(status),
                            attempts: attempt,
                            body: response.text(),
                        });
                    }
                    Decision::Fatal => {
                        let body = response.text();
                        error!(label, status, "Non-retriable response");
                        log.record(&format!(
                            "{} non-retriable {}: {}",
                            label,
                            status,
                            truncate_body(&body)
                        ));
                        return Err(S2agError::Http { status, body });
                    }
                }
            }
            Err(e) => match policy.decide_network(attempt) {
                Decision::Retry { wait, .. } => {
                    warn!(label, attempt, error = %e, "Transport failure, retrying");
                    log.record(&format!("{} exception on attempt {}: {}", label, attempt, e));
                    sleeper.sleep(wait).await;
                }
                _ => {
                    error!(label, attempt, error = %e, "Transport failure, giving up");
                    log.record(&format!("{} exceeded max_retries on exception: {}", label, e));
                    return Err(S2agError::RetriesExhausted {
                        status: None,
                        attempts: attempt,
                        body: e.to_string(),
                    });
                }
            },
        }
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::testing::RecordingSleeper;
    use super::*;
    use crate::config::HarvestRetryConfig;
    use crate::transport::testing::{respond, ScriptedExt, ScriptedTransport};
    use crate::transport::Transport;

    fn harvest_policy() -> RetryPolicy {
        HarvestRetryConfig::default().to_policy()
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some(" 3 ")), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(Some("0.5")), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(Some("-1")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_harvest_policy_table() {
        let policy = harvest_policy();
        assert_eq!(policy.decide_status(200, None, 1), Decision::Accept);
        assert_eq!(
            policy.decide_status(429, Some("7"), 1),
            Decision::Retry {
                wait: Duration::from_secs(7),
                bounded: false
            }
        );
        assert_eq!(
            policy.decide_status(429, None, 1000),
            Decision::Retry {
                wait: Duration::from_secs(2),
                bounded: false
            }
        );
        assert_eq!(
            policy.decide_status(500, None, 10_000),
            Decision::Retry {
                wait: Duration::from_secs(1),
                bounded: false
            }
        );
        assert!(matches!(policy.decide_status(504, None, 4), Decision::Retry { bounded: true, .. }));
        assert_eq!(policy.decide_status(504, None, 5), Decision::GiveUp { ceiling: false });
        assert_eq!(policy.decide_status(404, None, 1), Decision::Fatal);
        assert_eq!(policy.decide_status(201, None, 1), Decision::Fatal);
        assert_eq!(
            policy.decide_network(99),
            Decision::Retry {
                wait: Duration::from_millis(1500),
                bounded: false
            }
        );
    }

    #[test]
    fn test_unbounded_ceiling() {
        let mut policy = harvest_policy();
        policy.unbounded_ceiling = Some(3);
        assert!(matches!(policy.decide_status(429, None, 2), Decision::Retry { .. }));
        assert_eq!(policy.decide_status(429, None, 3), Decision::GiveUp { ceiling: true });
        assert_eq!(policy.decide_network(3), Decision::GiveUp { ceiling: true });
    }

    #[tokio::test]
    async fn test_execute_retries_until_success() {
        let transport = ScriptedTransport::new(vec![
            respond(429, r#"{"message":"slow down"}"#).with_retry_after("4"),
            Err(TransportError("connection reset".to_string())),
            respond(500, ""),
            respond(200, r#"{"data":[]}"#),
        ]);
        let sleeper = RecordingSleeper::default();
        let log = DecisionLog::disabled();

        let response = execute(&harvest_policy(), &sleeper, &log, "GET bulk", || {
            transport.get("https://example.test/bulk", &[], &[])
        })
        .await
        .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls().len(), 4);
        assert_eq!(
            sleeper.waits(),
            vec![
                Duration::from_secs(4),
                Duration::from_millis(1500),
                Duration::from_secs(1)
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_gives_up_on_bounded_gateway_errors() {
        let transport = ScriptedTransport::new((0..5).map(|_| respond(503, "unavailable")).collect());
        let sleeper = RecordingSleeper::default();
        let tmp = tempfile::TempDir::new().unwrap();
        let log = DecisionLog::to_file(tmp.path().join("client.log"));

        let err = execute(&harvest_policy(), &sleeper, &log, "GET bulk", || {
            transport.get("https://example.test/bulk", &[], &[])
        })
        .await
        .unwrap_err();

        match err {
            S2agError::RetriesExhausted { status, attempts, body } => {
                assert_eq!(status, Some(503));
                assert_eq!(attempts, 5);
                assert_eq!(body, "unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sleeper.waits().len(), 4);

        let lines = std::fs::read_to_string(tmp.path().join("client.log")).unwrap();
        assert_eq!(lines.lines().count(), 5);
        assert!(lines.lines().all(|l| l.contains(" | GET bulk")));
        assert!(lines.contains("exceeded max_retries for 503"));
    }

    #[tokio::test]
    async fn test_execute_fatal_status_returns_body() {
        let transport = ScriptedTransport::new(vec![respond(400, "bad query")]);
        let sleeper = RecordingSleeper::default();

        let err = execute(&harvest_policy(), &sleeper, &DecisionLog::disabled(), "GET", || {
            transport.get("https://example.test/bulk", &[], &[])
        })
        .await
        .unwrap_err();

        assert!(matches!(err, S2agError::Http { status: 400, ref body } if body == "bad query"));
        assert!(sleeper.waits().is_empty());
    }
}
