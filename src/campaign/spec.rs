use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// What to create: one campaign, its ad sets, and one ad per creative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub ad_account_id: String,
    pub name: String,
    pub objective: String,
    pub daily_budget: Option<f64>,
    pub ad_sets: Vec<AdSetSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdSetSpec {
    pub name: String,
    pub daily_budget: Option<f64>,
    #[serde(default)]
    pub targeting: serde_json::Value,
    /// May be empty; the missing ad is then reported as a soft failure.
    #[serde(default)]
    pub creatives: Vec<CreativeSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeSpec {
    pub creative_id: Option<String>,
    pub ad_name: Option<String>,
}

fn check_budget(label: &str, budget: Option<f64>) -> Result<(), ValidationError> {
    match budget {
        Some(b) if !b.is_finite() || b <= 0.0 => Err(ValidationError::InvalidSpec(format!(
            "{label} budget must be positive, got {b}"
        ))),
        _ => Ok(()),
    }
}

impl CampaignSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ad_account_id.trim().is_empty() {
            return Err(ValidationError::InvalidSpec("ad account is required".into()));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidSpec("campaign name is required".into()));
        }
        if self.ad_sets.is_empty() {
            return Err(ValidationError::InvalidSpec("at least one ad set is required".into()));
        }
        check_budget("campaign", self.daily_budget)?;
        for (i, ad_set) in self.ad_sets.iter().enumerate() {
            if ad_set.name.trim().is_empty() {
                return Err(ValidationError::InvalidSpec(format!("ad set {} has no name", i + 1)));
            }
            check_budget(&ad_set.name, ad_set.daily_budget)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn creative(id: &str) -> CreativeSpec {
        CreativeSpec {
            creative_id: Some(id.to_string()),
            ad_name: None,
        }
    }

    pub fn ad_set(name: &str, creatives: Vec<CreativeSpec>) -> AdSetSpec {
        AdSetSpec {
            name: name.to_string(),
            daily_budget: Some(50.0),
            targeting: serde_json::Value::Null,
            creatives,
        }
    }

    pub fn spec(ad_sets: Vec<AdSetSpec>) -> CampaignSpec {
        CampaignSpec {
            ad_account_id: "act_1".into(),
            name: "Spring leads".into(),
            objective: "OUTCOME_LEADS".into(),
            daily_budget: None,
            ad_sets,
        }
    }
}
