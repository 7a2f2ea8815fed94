//! Rate limit header parsing
//!
//! Backends advertise their remaining request quota in response headers.
//! Adapters turn those headers into a [`RateLimitSnapshot`] and hand it to
//! their health tracker.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Quota information reported by one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitSnapshot {
    /// Requests remaining in current window
    pub remaining: Option<u32>,

    /// When the current window resets
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitSnapshot {
    pub fn is_empty(&self) -> bool {
        self.remaining.is_none() && self.reset_at.is_none()
    }

    /// OpenAI-style headers: `x-ratelimit-remaining-requests` and a relative
    /// `x-ratelimit-reset-requests` such as `6m0s` or `250ms`
    pub fn from_openai_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Self {
        Self {
            remaining: header_u32(headers, "x-ratelimit-remaining-requests"),
            reset_at: header_str(headers, "x-ratelimit-reset-requests")
                .and_then(parse_relative_duration)
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| now + d),
        }
    }

    /// Anthropic-style headers with an RFC 3339 reset timestamp
    pub fn from_anthropic_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining: header_u32(headers, "anthropic-ratelimit-requests-remaining"),
            reset_at: header_str(headers, "anthropic-ratelimit-requests-reset")
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    header_str(headers, name).and_then(|v| v.trim().parse().ok())
}

/// Parse durations like `1s`, `6m0s`, `1h2m3.5s`, `20ms`
pub fn parse_relative_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let mut total = 0.0_f64;
    let mut number = String::new();
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }

        let amount: f64 = number.parse().ok()?;
        number.clear();
        let seconds = match c {
            'h' => amount * 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                amount / 1000.0
            }
            'm' => amount * 60.0,
            's' => amount,
            _ => return None,
        };
        total += seconds;
    }

    if !number.is_empty() {
        // bare number: seconds
        total += number.parse::<f64>().ok()?;
    }

    Some(Duration::from_secs_f64(total))
}
