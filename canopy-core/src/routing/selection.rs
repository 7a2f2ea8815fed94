//! Candidate filtering and ranking

use crate::protocol::ModelRequest;
use crate::providers::{Capabilities, HealthStatus, ProviderHealth};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Ranking policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMode {
    /// Lowest measured latency first
    Speed,
    /// Lowest estimated cost first
    Cost,
    /// Highest success rate first
    Quality,
    /// Weighted blend of success rate, latency, cost, and stability
    #[default]
    Balanced,
}

/// Caller constraints on which backend may serve a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    #[serde(default)]
    pub require_vision: bool,
    #[serde(default)]
    pub require_streaming: bool,
    #[serde(default)]
    pub require_json: bool,
    #[serde(default)]
    pub max_latency_ms: Option<u64>,
    /// Ceiling on the estimated cost of this request, in USD
    #[serde(default)]
    pub max_cost: Option<f64>,
    #[serde(default)]
    pub min_success_rate: Option<f64>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
    #[serde(default)]
    pub excluded_providers: Vec<String>,
    #[serde(default)]
    pub quality_mode: QualityMode,
}

impl SelectionCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: QualityMode) -> Self {
        self.quality_mode = mode;
        self
    }

    pub fn require_vision(mut self) -> Self {
        self.require_vision = true;
        self
    }

    pub fn require_streaming(mut self) -> Self {
        self.require_streaming = true;
        self
    }

    pub fn require_json(mut self) -> Self {
        self.require_json = true;
        self
    }

    pub fn with_max_latency_ms(mut self, ms: u64) -> Self {
        self.max_latency_ms = Some(ms);
        self
    }

    pub fn with_max_cost(mut self, cost: f64) -> Self {
        self.max_cost = Some(cost);
        self
    }

    pub fn with_min_success_rate(mut self, rate: f64) -> Self {
        self.min_success_rate = Some(rate);
        self
    }

    pub fn prefer(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    pub fn exclude(mut self, provider: impl Into<String>) -> Self {
        self.excluded_providers.push(provider.into());
        self
    }

    /// Merge in the requirements implied by the request itself
    pub fn merged_with(&self, request: &ModelRequest) -> Self {
        let mut merged = self.clone();
        merged.require_vision |= request.has_image();
        merged.require_streaming |= request.stream;
        merged.require_json |= request.wants_json();
        merged
    }

    fn is_excluded(&self, id: &str) -> bool {
        self.excluded_providers.iter().any(|excluded| excluded == id)
    }

    /// First hard requirement these capabilities fail, if any
    fn unmet_requirement(
        &self,
        capabilities: &Capabilities,
        request: &ModelRequest,
    ) -> Option<&'static str> {
        if self.require_vision && !capabilities.vision {
            return Some("vision");
        }
        if self.require_streaming && !capabilities.streaming {
            return Some("streaming");
        }
        if self.require_json && !capabilities.json_mode {
            return Some("json");
        }
        if request
            .max_tokens
            .is_some_and(|requested| requested > capabilities.max_tokens)
        {
            return Some("max_tokens");
        }
        None
    }
}

/// What the ranking needs to know about one registered adapter
#[derive(Debug, Clone)]
pub struct CandidateInfo {
    pub id: String,
    pub capabilities: Capabilities,
    pub health: ProviderHealth,
    /// The breaker would admit an attempt right now
    pub breaker_admits: bool,
    /// The breaker is waiting for its half-open trial
    pub trial_eligible: bool,
    pub estimated_cost: f64,
}

/// Ranked candidate indices into the input slice
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub order: Vec<usize>,
    /// Soft limits eliminated every candidate and were ignored
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionError {
    /// No registered adapter offers what the request needs
    CapabilityMismatch { requirement: String },
    /// Capable adapters exist but none can take an attempt
    NoHealthyProviders,
}

/// Filter and order candidates for one request
pub fn select(
    candidates: &[CandidateInfo],
    request: &ModelRequest,
    criteria: &SelectionCriteria,
) -> Result<Selection, SelectionError> {
    let mut capable = Vec::new();
    let mut first_unmet = None;
    for (index, candidate) in candidates.iter().enumerate() {
        match criteria.unmet_requirement(&candidate.capabilities, request) {
            None => capable.push(index),
            Some(requirement) => {
                first_unmet.get_or_insert(requirement);
            }
        }
    }
    if capable.is_empty() {
        return Err(SelectionError::CapabilityMismatch {
            requirement: first_unmet.unwrap_or("any provider").to_string(),
        });
    }

    let available: Vec<usize> = capable
        .into_iter()
        .filter(|&i| {
            let candidate = &candidates[i];
            let healthy = candidate.health.status != HealthStatus::Unhealthy
                || candidate.trial_eligible;
            healthy && candidate.breaker_admits && !criteria.is_excluded(&candidate.id)
        })
        .collect();
    if available.is_empty() {
        return Err(SelectionError::NoHealthyProviders);
    }

    let within_limits: Vec<usize> = available
        .iter()
        .copied()
        .filter(|&i| within_soft_limits(&candidates[i], criteria))
        .collect();
    let degraded = within_limits.is_empty();
    let mut order = if degraded {
        debug!("Soft limits eliminated every candidate, ignoring them");
        available
    } else {
        within_limits
    };

    rank(&mut order, candidates, criteria.quality_mode);

    if let Some(preferred) = &criteria.preferred_provider {
        if let Some(pos) = order.iter().position(|&i| &candidates[i].id == preferred) {
            let index = order.remove(pos);
            order.insert(0, index);
        }
    }

    debug!(
        order = ?order.iter().map(|&i| candidates[i].id.as_str()).collect::<Vec<_>>(),
        mode = ?criteria.quality_mode,
        "Ranked candidates"
    );
    Ok(Selection { order, degraded })
}

fn within_soft_limits(candidate: &CandidateInfo, criteria: &SelectionCriteria) -> bool {
    let latency_ok = match (criteria.max_latency_ms, candidate.health.last_latency_ms) {
        (Some(max), Some(latency)) => latency <= max,
        _ => true,
    };
    let cost_ok = criteria
        .max_cost
        .is_none_or(|max| candidate.estimated_cost <= max);
    let success_ok = criteria
        .min_success_rate
        .is_none_or(|min| candidate.health.success_rate >= min);
    latency_ok && cost_ok && success_ok
}

/// Stable sort, so ties keep registration order
fn rank(order: &mut [usize], candidates: &[CandidateInfo], mode: QualityMode) {
    match mode {
        QualityMode::Speed => order.sort_by(|&a, &b| {
            match (
                candidates[a].health.last_latency_ms,
                candidates[b].health.last_latency_ms,
            ) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        }),
        QualityMode::Cost => order.sort_by(|&a, &b| {
            candidates[a]
                .estimated_cost
                .total_cmp(&candidates[b].estimated_cost)
        }),
        QualityMode::Quality => order.sort_by(|&a, &b| {
            candidates[b]
                .health
                .success_rate
                .total_cmp(&candidates[a].health.success_rate)
        }),
        QualityMode::Balanced => {
            let scores = balanced_scores(order, candidates);
            let score_of = |index: usize| {
                order
                    .iter()
                    .position(|&i| i == index)
                    .map_or(0.0, |pos| scores[pos])
            };
            let mut ranked = order.to_vec();
            ranked.sort_by(|&a, &b| score_of(b).total_cmp(&score_of(a)));
            order.copy_from_slice(&ranked);
        }
    }
}

/// Scores aligned with `order`
fn balanced_scores(order: &[usize], candidates: &[CandidateInfo]) -> Vec<f64> {
    let latencies: Vec<f64> = order
        .iter()
        .filter_map(|&i| candidates[i].health.last_latency_ms)
        .map(|ms| ms as f64)
        .collect();
    let costs: Vec<f64> = order.iter().map(|&i| candidates[i].estimated_cost).collect();

    order
        .iter()
        .map(|&i| {
            let candidate = &candidates[i];
            let latency_score = match candidate.health.last_latency_ms {
                Some(ms) => inverted_min_max(ms as f64, &latencies),
                None => 0.5,
            };
            let cost_score = inverted_min_max(candidate.estimated_cost, &costs);
            let stability = 1.0 / (1.0 + f64::from(candidate.health.consecutive_failures));

            0.4 * candidate.health.success_rate.clamp(0.0, 1.0)
                + 0.3 * latency_score
                + 0.2 * cost_score
                + 0.1 * stability
        })
        .collect()
}

/// 1.0 for the lowest value in the set, 0.0 for the highest
fn inverted_min_max(value: f64, set: &[f64]) -> f64 {
    let min = set.iter().copied().fold(f64::INFINITY, f64::min);
    let max = set.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > min) {
        return 1.0;
    }
    (max - value) / (max - min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ImageAttachment, Message};

    fn candidate(id: &str) -> CandidateInfo {
        CandidateInfo {
            id: id.to_string(),
            capabilities: Capabilities::default(),
            health: ProviderHealth::default(),
            breaker_admits: true,
            trial_eligible: false,
            estimated_cost: 0.0,
        }
    }

    fn with_latency(mut c: CandidateInfo, ms: u64) -> CandidateInfo {
        c.health.last_latency_ms = Some(ms);
        c
    }

    fn ids(candidates: &[CandidateInfo], selection: &Selection) -> Vec<String> {
        selection
            .order
            .iter()
            .map(|&i| candidates[i].id.clone())
            .collect()
    }

    fn text_request() -> ModelRequest {
        ModelRequest::new(vec![Message::user("How often should I water?")])
    }

    #[test]
    fn test_vision_never_selects_non_vision_adapter() {
        let mut fast_text_only = with_latency(candidate("fast"), 10);
        fast_text_only.health.success_rate = 1.0;
        let mut slow_vision = with_latency(candidate("vision"), 900);
        slow_vision.capabilities.vision = true;
        slow_vision.health.success_rate = 0.5;
        let candidates = vec![fast_text_only, slow_vision];

        let request = ModelRequest::new(vec![
            Message::user("What's wrong with this leaf?")
                .with_image(ImageAttachment::new("image/jpeg", "AAAA")),
        ]);
        let criteria = SelectionCriteria::new().merged_with(&request);
        for mode in [
            QualityMode::Speed,
            QualityMode::Cost,
            QualityMode::Quality,
            QualityMode::Balanced,
        ] {
            let selection = select(&candidates, &request, &criteria.clone().with_mode(mode)).unwrap();
            assert_eq!(ids(&candidates, &selection), vec!["vision"]);
        }
    }

    #[test]
    fn test_capability_mismatch_versus_unhealthy() {
        let mut only = candidate("a");
        let request = text_request();

        let err = select(&[only.clone()], &request, &SelectionCriteria::new().require_vision())
            .unwrap_err();
        assert_eq!(
            err,
            SelectionError::CapabilityMismatch {
                requirement: "vision".to_string()
            }
        );

        only.health.status = HealthStatus::Unhealthy;
        let err = select(&[only], &request, &SelectionCriteria::new()).unwrap_err();
        assert_eq!(err, SelectionError::NoHealthyProviders);
    }

    #[test]
    fn test_token_ceiling_is_hard_requirement() {
        let mut small = candidate("small");
        small.capabilities.max_tokens = 256;
        let request = text_request().with_max_tokens(1024);
        let err = select(&[small], &request, &SelectionCriteria::new()).unwrap_err();
        assert!(matches!(err, SelectionError::CapabilityMismatch { .. }));
    }

    #[test]
    fn test_unhealthy_admitted_when_trial_eligible() {
        let mut recovering = candidate("recovering");
        recovering.health.status = HealthStatus::Unhealthy;
        recovering.trial_eligible = true;
        let mut open = candidate("open");
        open.breaker_admits = false;

        let candidates = vec![open, recovering];
        let selection = select(&candidates, &text_request(), &SelectionCriteria::new()).unwrap();
        assert_eq!(ids(&candidates, &selection), vec!["recovering"]);
    }

    #[test]
    fn test_speed_puts_unmeasured_last() {
        let candidates = vec![
            candidate("new"),
            with_latency(candidate("slow"), 800),
            with_latency(candidate("fast"), 40),
        ];
        let criteria = SelectionCriteria::new().with_mode(QualityMode::Speed);
        let selection = select(&candidates, &text_request(), &criteria).unwrap();
        assert_eq!(ids(&candidates, &selection), vec!["fast", "slow", "new"]);
    }

    #[test]
    fn test_cost_and_quality_ordering() {
        let mut cheap = candidate("cheap");
        cheap.estimated_cost = 0.001;
        cheap.health.success_rate = 0.7;
        let mut pricey = candidate("pricey");
        pricey.estimated_cost = 0.2;
        pricey.health.success_rate = 0.99;
        let candidates = vec![pricey, cheap];

        let by_cost = select(
            &candidates,
            &text_request(),
            &SelectionCriteria::new().with_mode(QualityMode::Cost),
        )
        .unwrap();
        assert_eq!(ids(&candidates, &by_cost), vec!["cheap", "pricey"]);

        let by_quality = select(
            &candidates,
            &text_request(),
            &SelectionCriteria::new().with_mode(QualityMode::Quality),
        )
        .unwrap();
        assert_eq!(ids(&candidates, &by_quality), vec!["pricey", "cheap"]);
    }

    #[test]
    fn test_balanced_ties_keep_registration_order() {
        let candidates = vec![candidate("first"), candidate("second"), candidate("third")];
        let selection = select(&candidates, &text_request(), &SelectionCriteria::new()).unwrap();
        assert_eq!(ids(&candidates, &selection), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_balanced_prefers_stable_fast_backend() {
        let mut flaky = with_latency(candidate("flaky"), 2000);
        flaky.health.consecutive_failures = 3;
        flaky.health.success_rate = 0.4;
        let steady = with_latency(candidate("steady"), 50);
        let candidates = vec![flaky, steady];

        let selection = select(&candidates, &text_request(), &SelectionCriteria::new()).unwrap();
        assert_eq!(ids(&candidates, &selection), vec!["steady", "flaky"]);
    }

    #[test]
    fn test_preferred_moves_to_front_and_excluded_drops() {
        let candidates = vec![
            with_latency(candidate("a"), 10),
            with_latency(candidate("b"), 20),
            with_latency(candidate("c"), 30),
        ];
        let criteria = SelectionCriteria::new()
            .with_mode(QualityMode::Speed)
            .prefer("c")
            .exclude("a");
        let selection = select(&candidates, &text_request(), &criteria).unwrap();
        assert_eq!(ids(&candidates, &selection), vec!["c", "b"]);
    }

    #[test]
    fn test_soft_limits_relax_when_nothing_fits() {
        let candidates = vec![
            with_latency(candidate("a"), 500),
            with_latency(candidate("b"), 100),
        ];
        let tight = SelectionCriteria::new().with_max_latency_ms(200);
        let selection = select(&candidates, &text_request(), &tight).unwrap();
        assert_eq!(ids(&candidates, &selection), vec!["b"]);
        assert!(!selection.degraded);

        let impossible = SelectionCriteria::new().with_max_latency_ms(10);
        let selection = select(&candidates, &text_request(), &impossible).unwrap();
        assert_eq!(selection.order.len(), 2);
        assert!(selection.degraded);
    }
}
