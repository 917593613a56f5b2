//! Pipeline tunables and severity arithmetic.

use serde::{Deserialize, Serialize};

/// Tunables for one triage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Weight of the text-oracle severity when evidence was scored
    pub text_weight: f64,
    /// Weight of the evidence aggregate
    pub evidence_weight: f64,
    /// Evidence captured longer ago than this is penalized
    pub staleness_days: i64,
    /// Points subtracted from a stale item's confidence
    pub staleness_penalty: f64,
    /// Neighbors requested from the similarity index
    pub similarity_limit: usize,
    /// Cosine distance below which a neighbor counts as similar
    pub distance_threshold: f32,
    /// Upper bound on the density boost
    pub density_boost_cap: f64,
    /// Minimum score for urgent complaints, before rounding
    pub urgency_floor: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            text_weight: 0.6,
            evidence_weight: 0.4,
            staleness_days: 30,
            staleness_penalty: 3.0,
            similarity_limit: 5,
            distance_threshold: 0.45,
            density_boost_cap: 3.0,
            urgency_floor: 8.5,
        }
    }
}

impl PipelineConfig {
    /// Load config from YAML. Missing keys take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Reject inconsistent tunables.
    pub fn validate(&self) -> Result<(), String> {
        if self.text_weight < 0.0 || self.evidence_weight < 0.0 {
            return Err("weights must be non-negative".to_string());
        }
        if (self.text_weight + self.evidence_weight - 1.0).abs() > 1e-6 {
            return Err(format!(
                "text_weight + evidence_weight must be 1.0, got {}",
                self.text_weight + self.evidence_weight
            ));
        }
        if !(self.distance_threshold > 0.0 && self.distance_threshold <= 2.0) {
            return Err(format!(
                "distance_threshold must be in (0, 2], got {}",
                self.distance_threshold
            ));
        }
        if self.similarity_limit < 2 {
            return Err("similarity_limit must be at least 2".to_string());
        }
        if self.staleness_days < 0 || self.staleness_penalty < 0.0 || self.density_boost_cap < 0.0 {
            return Err("staleness and boost settings must be non-negative".to_string());
        }
        Ok(())
    }

    /// Weighted score; without scored evidence the text severity stands alone.
    pub fn combine(&self, text_severity: f64, evidence_aggregate: Option<f64>) -> f64 {
        match evidence_aggregate {
            Some(evidence) => text_severity * self.text_weight + evidence * self.evidence_weight,
            None => text_severity,
        }
    }

    /// Floor urgent complaints at the configured minimum.
    pub fn apply_urgency(&self, score: f64, is_urgent: bool) -> f64 {
        if is_urgent {
            score.max(self.urgency_floor)
        } else {
            score
        }
    }
}

/// Clamp to [1, 10] and round half away from zero.
pub fn finalize_score(score: f64) -> u8 {
    if score.is_nan() {
        return 1;
    }
    score.clamp(1.0, 10.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.similarity_limit, 5);
        assert_eq!(config.urgency_floor, 8.5);
    }

    #[test]
    fn test_yaml_partial_override() {
        let config = PipelineConfig::from_yaml("distance_threshold: 0.3\nstaleness_days: 14\n").unwrap();
        assert_eq!(config.distance_threshold, 0.3);
        assert_eq!(config.staleness_days, 14);
        assert_eq!(config.text_weight, 0.6);

        let yaml = config.to_yaml().unwrap();
        assert_eq!(PipelineConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_weights_and_threshold() {
        let mut config = PipelineConfig {
            text_weight: 0.7,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.text_weight = 0.6;
        config.distance_threshold = 0.0;
        assert!(config.validate().is_err());
        config.distance_threshold = 2.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_weighting_example() {
        let config = PipelineConfig::default();
        let score = config.combine(4.0, Some(8.0));
        assert!((score - 5.6).abs() < 1e-9);
        assert_eq!(finalize_score(score), 6);
    }

    #[test]
    fn test_text_only_when_no_evidence() {
        assert_eq!(PipelineConfig::default().combine(7.0, None), 7.0);
    }

    #[test]
    fn test_urgency_floor_rounds_to_nine() {
        let config = PipelineConfig::default();
        assert_eq!(finalize_score(config.apply_urgency(1.0, true)), 9);
        assert_eq!(finalize_score(config.apply_urgency(1.0, false)), 1);
        assert_eq!(finalize_score(config.apply_urgency(9.6, true)), 10);
    }

    #[test]
    fn test_finalize_bounds() {
        assert_eq!(finalize_score(-4.2), 1);
        assert_eq!(finalize_score(0.0), 1);
        assert_eq!(finalize_score(13.0), 10);
        assert_eq!(finalize_score(f64::INFINITY), 10);
        assert_eq!(finalize_score(f64::NAN), 1);
        assert_eq!(finalize_score(4.49), 4);
        assert_eq!(finalize_score(4.5), 5);
    }
}
