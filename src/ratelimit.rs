//! Sliding-window rate limiting keyed by session and client address
//!
//! Runs are gated before any pipeline work starts; a violation produces
//! a structured `RateLimited` error carrying the reset time, never a
//! pipeline call. The store is in-memory and process-wide; counters
//! outside every window are pruned on access.

use crate::config::LimitsConfig;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub struct RateLimiter {
    limits: LimitsConfig,
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check every applicable quota and record the request. All checks
    /// pass or none are recorded, so a rejected request does not consume
    /// quota.
    pub fn check_and_record(&self, session_id: &str, client_addr: Option<&str>) -> Result<()> {
        self.check_at(session_id, client_addr, Utc::now())
    }

    fn check_at(
        &self,
        session_id: &str,
        client_addr: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut quotas: Vec<(String, Duration, usize)> = vec![
            (
                format!("day:{}", session_id),
                Duration::hours(24),
                self.limits.daily,
            ),
            (
                format!("hour:{}", session_id),
                Duration::hours(1),
                self.limits.hourly,
            ),
        ];
        if let Some(addr) = client_addr {
            quotas.push((
                format!("minute:{}", addr),
                Duration::minutes(1),
                self.limits.per_minute_ip,
            ));
        }

        let mut windows = self
            .windows
            .lock()
            .map_err(|e| PipelineError::Internal(format!("rate limit store poisoned: {}", e)))?;

        // First pass: validate every quota without mutating counts.
        for (key, window, max) in &quotas {
            let entries = windows.entry(key.clone()).or_default();
            while entries.front().is_some_and(|t| now - *t >= *window) {
                entries.pop_front();
            }
            if entries.len() >= *max {
                let reset_time = entries.front().map_or(now, |oldest| *oldest + *window);
                return Err(PipelineError::RateLimited { reset_time });
            }
        }

        // Second pass: record.
        for (key, _, _) in &quotas {
            windows
                .entry(key.clone())
                .or_default()
                .push_back(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(daily: usize, hourly: usize, per_minute_ip: usize) -> RateLimiter {
        RateLimiter::new(LimitsConfig {
            daily,
            hourly,
            per_minute_ip,
        })
    }

    #[test]
    fn test_hourly_quota_enforced() {
        let limiter = limiter(50, 2, 20);
        let now = Utc::now();

        assert!(limiter.check_at("s1", None, now).is_ok());
        assert!(limiter.check_at("s1", None, now).is_ok());
        match limiter.check_at("s1", None, now) {
            Err(PipelineError::RateLimited { reset_time }) => {
                assert_eq!(reset_time, now + Duration::hours(1));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_sessions_are_isolated() {
        let limiter = limiter(50, 1, 20);
        let now = Utc::now();

        assert!(limiter.check_at("s1", None, now).is_ok());
        assert!(limiter.check_at("s2", None, now).is_ok());
        assert!(limiter.check_at("s1", None, now).is_err());
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(50, 1, 20);
        let start = Utc::now();

        assert!(limiter.check_at("s1", None, start).is_ok());
        assert!(limiter.check_at("s1", None, start).is_err());
        // After the hour passes the slot frees up.
        assert!(limiter
            .check_at("s1", None, start + Duration::minutes(61))
            .is_ok());
    }

    #[test]
    fn test_ip_quota_shared_across_sessions() {
        let limiter = limiter(50, 10, 2);
        let now = Utc::now();

        assert!(limiter.check_at("s1", Some("10.0.0.1"), now).is_ok());
        assert!(limiter.check_at("s2", Some("10.0.0.1"), now).is_ok());
        assert!(limiter.check_at("s3", Some("10.0.0.1"), now).is_err());
        // A different address is unaffected.
        assert!(limiter.check_at("s4", Some("10.0.0.2"), now).is_ok());
    }

    #[test]
    fn test_rejected_request_consumes_no_quota() {
        let limiter = limiter(50, 1, 1);
        let now = Utc::now();

        assert!(limiter.check_at("s1", Some("10.0.0.1"), now).is_ok());
        // Session quota is fine but the IP quota rejects; the session
        // counter must not grow.
        assert!(limiter.check_at("s2", Some("10.0.0.1"), now).is_err());
        assert!(limiter.check_at("s2", Some("10.0.0.9"), now).is_ok());
    }
}
