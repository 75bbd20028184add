//! Candidate selection: enablement, whitelist match, breaker exclusion,
//! priority order, and round-robin rotation among equal-priority peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;

use cswitch_common::{ErrorKind, Family, ProviderRecord, RelayError};

use crate::breaker::BreakerManager;
use crate::registry::RegistrySnapshot;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: Arc<ProviderRecord>,
    pub matched_pattern: String,
    pub upstream_model: String,
}

pub struct Selector {
    /// Process-wide rotation cursor per (family, requested model).
    cursors: Mutex<HashMap<(Family, String), u64>>,
    round_robin: AtomicBool,
}

impl Selector {
    pub fn new(round_robin: bool) -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
            round_robin: AtomicBool::new(round_robin),
        }
    }

    pub fn set_round_robin(&self, enabled: bool) {
        self.round_robin.store(enabled, Ordering::Relaxed);
    }

    pub fn round_robin(&self) -> bool {
        self.round_robin.load(Ordering::Relaxed)
    }

    /// Ordered candidate list for one request. The caller walks it,
    /// asking each provider's breaker for admission.
    pub fn candidates(
        &self,
        snapshot: &RegistrySnapshot,
        family: Family,
        model: &str,
        breakers: &BreakerManager,
    ) -> Result<Vec<Candidate>, RelayError> {
        let family_providers: Vec<&Arc<ProviderRecord>> = snapshot.family(family).collect();
        if family_providers.is_empty() {
            return Err(RelayError::new(
                ErrorKind::NoProviderConfigured,
                format!("no providers configured for {family}"),
            ));
        }

        let enabled: Vec<&Arc<ProviderRecord>> = family_providers
            .into_iter()
            .filter(|record| record.enabled)
            .collect();
        if enabled.is_empty() {
            return Err(RelayError::new(
                ErrorKind::NoProviderConfigured,
                format!("all providers disabled for {family}"),
            ));
        }

        let matching: Vec<Candidate> = enabled
            .into_iter()
            .filter_map(|record| {
                let matched = record.whitelist_match(model)?.to_string();
                let upstream_model = record.effective_model(model)?;
                Some(Candidate {
                    provider: record.clone(),
                    matched_pattern: matched,
                    upstream_model,
                })
            })
            .collect();
        if matching.is_empty() {
            return Err(RelayError::new(
                ErrorKind::ModelUnsupported,
                format!("no provider whitelists model {model:?} for {family}"),
            ));
        }

        let mut healthy: Vec<Candidate> = matching
            .into_iter()
            .filter(|candidate| !breakers.get(candidate.provider.id).is_blocking())
            .collect();
        if healthy.is_empty() {
            return Err(RelayError::new(
                ErrorKind::NoHealthyProvider,
                format!("all providers open for model {model:?}"),
            ));
        }

        healthy.sort_by_key(|candidate| (candidate.provider.priority_level, candidate.provider.id));
        if self.round_robin() {
            let cursor = self.advance_cursor(family, model);
            rotate_ties(&mut healthy, cursor);
        }
        Ok(healthy)
    }

    fn advance_cursor(&self, family: Family, model: &str) -> u64 {
        let mut cursors = self.cursors.lock().expect("selector cursor lock");
        let slot = cursors.entry((family, model.to_string())).or_insert(0);
        let current = *slot;
        *slot = slot.wrapping_add(1);
        current
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Rotate each equal-priority run. Uniform weights rotate by cursor;
/// differing weights draw the rotation start weight-proportionally.
fn rotate_ties(candidates: &mut [Candidate], cursor: u64) {
    let mut start = 0;
    while start < candidates.len() {
        let priority = candidates[start].provider.priority_level;
        let mut end = start + 1;
        while end < candidates.len() && candidates[end].provider.priority_level == priority {
            end += 1;
        }
        let group = &mut candidates[start..end];
        if group.len() > 1 {
            let offset = if uniform_weights(group) {
                (cursor % group.len() as u64) as usize
            } else {
                weighted_start(group)
            };
            group.rotate_left(offset);
        }
        start = end;
    }
}

fn uniform_weights(group: &[Candidate]) -> bool {
    group
        .windows(2)
        .all(|pair| pair[0].provider.weight == pair[1].provider.weight)
}

fn weighted_start(group: &[Candidate]) -> usize {
    let total: i64 = group
        .iter()
        .map(|candidate| i64::from(candidate.provider.weight.max(1)))
        .sum();
    let mut pick = rand::rng().random_range(0..total);
    for (index, candidate) in group.iter().enumerate() {
        pick -= i64::from(candidate.provider.weight.max(1));
        if pick < 0 {
            return index;
        }
    }
    0
}
