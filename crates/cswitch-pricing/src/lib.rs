//! Static per-model unit prices and cost computation.
//!
//! Prices are USD per million tokens. Lookup resolves a model id against
//! literal entries first, then the longest matching `prefix*` pattern.
//! Resolutions are memoized; misses are memoized too so repeated unknown
//! models stay cheap.

mod table;

use dashmap::DashMap;

use cswitch_protocol::UsageReport;
pub use table::default_entries;

/// The six unit prices for one model, USD per 1M tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceCard {
    pub input: f64,
    pub output: f64,
    pub cache_create: f64,
    pub cache_read: f64,
    pub cache_5m: f64,
    pub cache_1h: f64,
}

/// Six cost components plus their sum, computed at telemetry-insertion
/// time from the pricing snapshot then in effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_create_cost: f64,
    pub cache_read_cost: f64,
    pub cache_5m_cost: f64,
    pub cache_1h_cost: f64,
    pub total_cost: f64,
}

pub struct PricingTable {
    entries: Vec<(String, PriceCard)>,
    hits: DashMap<String, PriceCard>,
    misses: DashMap<String, ()>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::from_entries(table::default_entries())
    }

    pub fn from_entries(entries: Vec<(String, PriceCard)>) -> Self {
        Self {
            entries,
            hits: DashMap::new(),
            misses: DashMap::new(),
        }
    }

    /// Resolve a model id to its price card.
    pub fn resolve(&self, model: &str) -> Option<PriceCard> {
        if let Some(card) = self.hits.get(model) {
            return Some(*card);
        }
        if self.misses.contains_key(model) {
            return None;
        }
        match self.resolve_uncached(model) {
            Some(card) => {
                self.hits.insert(model.to_string(), card);
                Some(card)
            }
            None => {
                self.misses.insert(model.to_string(), ());
                None
            }
        }
    }

    fn resolve_uncached(&self, model: &str) -> Option<PriceCard> {
        let mut best: Option<(usize, PriceCard)> = None;
        for (pattern, card) in &self.entries {
            if let Some(prefix) = pattern.strip_suffix('*') {
                if model.starts_with(prefix) {
                    // Longest wildcard prefix wins among wildcards.
                    if best.is_none_or(|(len, _)| prefix.len() > len) {
                        best = Some((prefix.len(), *card));
                    }
                }
            } else if pattern == model {
                // A literal always beats any wildcard.
                return Some(*card);
            }
        }
        best.map(|(_, card)| card)
    }

    /// Compute the six cost components for one request. An unknown model
    /// costs zero on every component.
    pub fn cost(&self, model: &str, usage: &UsageReport) -> CostBreakdown {
        let Some(card) = self.resolve(model) else {
            return CostBreakdown::default();
        };
        // The ephemeral split is part of cache_create_tokens; price the
        // split at its own rates and the remainder at the base rate.
        let split = usage.cache_5m_tokens + usage.cache_1h_tokens;
        let base_create = (usage.cache_create_tokens - split).max(0);

        let input_cost = per_million(usage.input_tokens, card.input);
        let output_cost = per_million(usage.output_tokens, card.output);
        let cache_create_cost = per_million(base_create, card.cache_create);
        let cache_read_cost = per_million(usage.cache_read_tokens, card.cache_read);
        let cache_5m_cost = per_million(usage.cache_5m_tokens, card.cache_5m);
        let cache_1h_cost = per_million(usage.cache_1h_tokens, card.cache_1h);
        CostBreakdown {
            input_cost,
            output_cost,
            cache_create_cost,
            cache_read_cost,
            cache_5m_cost,
            cache_1h_cost,
            total_cost: input_cost
                + output_cost
                + cache_create_cost
                + cache_read_cost
                + cache_5m_cost
                + cache_1h_cost,
        }
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
    }
}

fn per_million(tokens: i64, unit_price: f64) -> f64 {
    tokens as f64 * unit_price / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(input: f64, output: f64) -> PriceCard {
        PriceCard {
            input,
            output,
            cache_create: input * 1.25,
            cache_read: input * 0.1,
            cache_5m: input * 1.25,
            cache_1h: input * 2.0,
        }
    }

    fn table() -> PricingTable {
        PricingTable::from_entries(vec![
            ("claude-sonnet-4".to_string(), card(3.0, 15.0)),
            ("claude-*".to_string(), card(5.0, 25.0)),
            ("claude-haiku-*".to_string(), card(1.0, 5.0)),
        ])
    }

    #[test]
    fn literal_beats_wildcard() {
        let prices = table();
        assert_eq!(prices.resolve("claude-sonnet-4").unwrap().input, 3.0);
    }

    #[test]
    fn longest_wildcard_prefix_wins() {
        let prices = table();
        assert_eq!(prices.resolve("claude-haiku-4").unwrap().input, 1.0);
        assert_eq!(prices.resolve("claude-opus-4").unwrap().input, 5.0);
    }

    #[test]
    fn misses_are_memoized() {
        let prices = table();
        assert!(prices.resolve("gpt-4o").is_none());
        assert!(prices.misses.contains_key("gpt-4o"));
        assert!(prices.resolve("gpt-4o").is_none());
    }

    #[test]
    fn cost_components_sum_to_total() {
        let prices = table();
        let usage = UsageReport {
            input_tokens: 100,
            output_tokens: 50,
            cache_create_tokens: 30,
            cache_read_tokens: 10,
            cache_5m_tokens: 20,
            cache_1h_tokens: 10,
            ..Default::default()
        };
        let cost = prices.cost("claude-sonnet-4", &usage);
        let sum = cost.input_cost
            + cost.output_cost
            + cost.cache_create_cost
            + cost.cache_read_cost
            + cost.cache_5m_cost
            + cost.cache_1h_cost;
        assert!((cost.total_cost - sum).abs() < 1e-9);
        // Ephemeral tokens fully account for the create count here.
        assert_eq!(cost.cache_create_cost, 0.0);
    }

    #[test]
    fn happy_path_cost_matches_hand_computation() {
        let prices = table();
        let usage = UsageReport {
            input_tokens: 100,
            output_tokens: 50,
            ..Default::default()
        };
        let cost = prices.cost("claude-sonnet-4", &usage);
        let expected = 100.0 * 3.0 / 1e6 + 50.0 * 15.0 / 1e6;
        assert!((cost.total_cost - expected).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let prices = table();
        let usage = UsageReport {
            input_tokens: 1_000_000,
            ..Default::default()
        };
        assert_eq!(prices.cost("mystery", &usage), CostBreakdown::default());
    }

    #[test]
    fn default_table_covers_the_four_families() {
        let prices = PricingTable::new();
        assert!(prices.resolve("claude-sonnet-4").is_some());
        assert!(prices.resolve("gpt-5-codex").is_some());
        assert!(prices.resolve("gemini-2.5-flash").is_some());
        assert!(prices.resolve("deepseek-chat").is_some());
    }
}
