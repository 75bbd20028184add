use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{pattern, Family, RelayError};

/// A configured upstream provider. `(platform, name)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: i64,
    pub platform: Family,
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub official_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub enabled: bool,
    /// 1..=10, lower is preferred.
    pub priority_level: i32,
    /// Weighted round-robin weight, default 100.
    pub weight: i32,
    /// Whitelist: pattern → allowed.
    pub supported_models: BTreeMap<String, bool>,
    /// Rewrite: pattern → replacement pattern.
    pub model_mapping: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Mutation input; the registry assigns id and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDraft {
    pub platform: Family,
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    #[serde(default)]
    pub official_url: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority_level: i32,
    #[serde(default = "default_weight")]
    pub weight: i32,
    #[serde(default)]
    pub supported_models: BTreeMap<String, bool>,
    #[serde(default)]
    pub model_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub tint: Option<String>,
    #[serde(default)]
    pub accent: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i32 {
    5
}

fn default_weight() -> i32 {
    100
}

impl ProviderDraft {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.name.trim().is_empty() {
            return Err(RelayError::config_invalid("provider name is empty"));
        }
        let url = url::Url::parse(&self.api_url)
            .map_err(|err| RelayError::config_invalid(format!("invalid api_url: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::config_invalid(format!(
                "api_url scheme must be http or https, got {}",
                url.scheme()
            )));
        }
        if !(1..=10).contains(&self.priority_level) {
            return Err(RelayError::config_invalid(format!(
                "priority_level must be in 1..=10, got {}",
                self.priority_level
            )));
        }
        if self.weight < 1 {
            return Err(RelayError::config_invalid("weight must be positive"));
        }
        for key in self.supported_models.keys() {
            if !pattern::is_valid(key) {
                return Err(RelayError::config_invalid(format!(
                    "invalid whitelist pattern: {key:?}"
                )));
            }
        }
        for (key, value) in &self.model_mapping {
            if !self.supported_models.contains_key(key) {
                return Err(RelayError::config_invalid(format!(
                    "model_mapping key {key:?} is not in the whitelist"
                )));
            }
            if !pattern::mapping_compatible(key, value) {
                return Err(RelayError::config_invalid(format!(
                    "model_mapping {key:?} -> {value:?} mixes literal and wildcard"
                )));
            }
        }
        Ok(())
    }

    pub fn into_record(self, id: i64, created_at: OffsetDateTime) -> ProviderRecord {
        ProviderRecord {
            id,
            platform: self.platform,
            name: self.name,
            api_url: self.api_url,
            api_key: self.api_key,
            official_url: self.official_url,
            icon: self.icon,
            enabled: self.enabled,
            priority_level: self.priority_level,
            weight: self.weight,
            supported_models: self.supported_models,
            model_mapping: self.model_mapping,
            tint: self.tint,
            accent: self.accent,
            created_at,
            updated_at: created_at,
        }
    }
}

impl ProviderRecord {
    /// The most specific whitelist pattern admitting `model`, if any.
    /// Patterns mapped to `false` are present-but-disabled.
    pub fn whitelist_match(&self, model: &str) -> Option<&str> {
        let allowed = self
            .supported_models
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(key, _)| key.as_str());
        pattern::best_match(allowed, model)
    }

    /// The upstream-visible model name, after the mapping rule attached to
    /// the matched whitelist entry. `None` means no match at all.
    pub fn effective_model(&self, model: &str) -> Option<String> {
        let matched = self.whitelist_match(model)?;
        match self.model_mapping.get(matched) {
            Some(replacement) if !replacement.is_empty() => {
                pattern::rewrite(matched, replacement, model)
            }
            _ => Some(model.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ProviderDraft {
        ProviderDraft {
            platform: Family::Claude,
            name: "main".to_string(),
            api_url: "https://api.example.com".to_string(),
            api_key: "sk-test".to_string(),
            official_url: None,
            icon: None,
            enabled: true,
            priority_level: 1,
            weight: 100,
            supported_models: BTreeMap::from([("claude-*".to_string(), true)]),
            model_mapping: BTreeMap::new(),
            tint: None,
            accent: None,
        }
    }

    #[test]
    fn valid_draft_passes() {
        assert!(draft().validate().is_ok());
    }

    #[test]
    fn rejects_bad_scheme_and_empty_name() {
        let mut d = draft();
        d.api_url = "ftp://api.example.com".to_string();
        assert!(d.validate().is_err());

        let mut d = draft();
        d.name = "  ".to_string();
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_malformed_whitelist_pattern() {
        let mut d = draft();
        d.supported_models.insert("a*b".to_string(), true);
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_incompatible_mapping() {
        let mut d = draft();
        d.model_mapping
            .insert("claude-*".to_string(), "glm-4".to_string());
        assert!(d.validate().is_err());

        let mut d = draft();
        d.model_mapping
            .insert("claude-*".to_string(), "glm-*".to_string());
        assert!(d.validate().is_ok());
    }

    #[test]
    fn rejects_mapping_key_outside_whitelist() {
        let mut d = draft();
        d.model_mapping
            .insert("gpt-*".to_string(), "glm-*".to_string());
        assert!(d.validate().is_err());
    }

    #[test]
    fn effective_model_applies_mapping() {
        let mut d = draft();
        d.model_mapping
            .insert("claude-*".to_string(), "glm-*".to_string());
        let record = d.into_record(1, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(
            record.effective_model("claude-sonnet-4").as_deref(),
            Some("glm-sonnet-4")
        );
    }

    #[test]
    fn disabled_whitelist_entry_does_not_match() {
        let mut d = draft();
        d.supported_models.insert("claude-*".to_string(), false);
        let record = d.into_record(1, OffsetDateTime::UNIX_EPOCH);
        assert!(record.whitelist_match("claude-sonnet-4").is_none());
    }

    #[test]
    fn record_serde_round_trip_preserves_fields() {
        let record = draft().into_record(7, OffsetDateTime::UNIX_EPOCH);
        let json = serde_json::to_string(&record).unwrap();
        let back: ProviderRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
