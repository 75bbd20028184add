//! Built-in price list, USD per 1M tokens. Order does not matter for
//! resolution; literals beat wildcards and longer prefixes beat shorter.

use crate::PriceCard;

const fn card(
    input: f64,
    output: f64,
    cache_create: f64,
    cache_read: f64,
    cache_5m: f64,
    cache_1h: f64,
) -> PriceCard {
    PriceCard {
        input,
        output,
        cache_create,
        cache_read,
        cache_5m,
        cache_1h,
    }
}

static DEFAULTS: &[(&str, PriceCard)] = &[
    // Anthropic
    ("claude-opus-4*", card(15.0, 75.0, 18.75, 1.5, 18.75, 30.0)),
    ("claude-sonnet-4*", card(3.0, 15.0, 3.75, 0.3, 3.75, 6.0)),
    ("claude-haiku-4*", card(1.0, 5.0, 1.25, 0.1, 1.25, 2.0)),
    ("claude-3-5-haiku*", card(0.8, 4.0, 1.0, 0.08, 1.0, 1.6)),
    ("claude-*", card(3.0, 15.0, 3.75, 0.3, 3.75, 6.0)),
    // OpenAI
    ("gpt-5-mini*", card(0.25, 2.0, 0.0, 0.025, 0.0, 0.0)),
    ("gpt-5-nano*", card(0.05, 0.4, 0.0, 0.005, 0.0, 0.0)),
    ("gpt-5*", card(1.25, 10.0, 0.0, 0.125, 0.0, 0.0)),
    ("gpt-4.1-mini*", card(0.4, 1.6, 0.0, 0.1, 0.0, 0.0)),
    ("gpt-4.1*", card(2.0, 8.0, 0.0, 0.5, 0.0, 0.0)),
    ("gpt-4o-mini*", card(0.15, 0.6, 0.0, 0.075, 0.0, 0.0)),
    ("gpt-4o*", card(2.5, 10.0, 0.0, 1.25, 0.0, 0.0)),
    ("o3*", card(2.0, 8.0, 0.0, 0.5, 0.0, 0.0)),
    ("o4-mini*", card(1.1, 4.4, 0.0, 0.275, 0.0, 0.0)),
    ("gpt-*", card(2.0, 8.0, 0.0, 0.5, 0.0, 0.0)),
    // Google
    ("gemini-2.5-pro*", card(1.25, 10.0, 0.0, 0.31, 0.0, 0.0)),
    ("gemini-2.5-flash-lite*", card(0.1, 0.4, 0.0, 0.025, 0.0, 0.0)),
    ("gemini-2.5-flash*", card(0.3, 2.5, 0.0, 0.075, 0.0, 0.0)),
    ("gemini-*", card(0.3, 2.5, 0.0, 0.075, 0.0, 0.0)),
    // Others commonly mapped behind generic providers
    ("deepseek-chat*", card(0.27, 1.1, 0.0, 0.07, 0.0, 0.0)),
    ("deepseek-reasoner*", card(0.55, 2.19, 0.0, 0.14, 0.0, 0.0)),
    ("deepseek-*", card(0.27, 1.1, 0.0, 0.07, 0.0, 0.0)),
    ("glm-*", card(0.6, 2.2, 0.0, 0.11, 0.0, 0.0)),
    ("qwen*", card(0.4, 1.2, 0.0, 0.1, 0.0, 0.0)),
    ("kimi-*", card(0.6, 2.5, 0.0, 0.15, 0.0, 0.0)),
];

pub fn default_entries() -> Vec<(String, PriceCard)> {
    DEFAULTS
        .iter()
        .map(|(pattern, prices)| (pattern.to_string(), *prices))
        .collect()
}
