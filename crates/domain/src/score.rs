//! Scoring types (§3, §4.7, §4.8, §9).

use crate::record::BatchId;

/// Tagged-union feature value fed to the score engine's expression evaluator
/// (§9: replaces the source's dynamically-typed feature map).
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Str(String),
    Bool(bool),
}

impl FeatureValue {
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Str(_) => None,
        }
    }
}

/// Which score bucket a rule contributes to (`models/score.py: ScoreType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScoreType {
    Fixed,
    Dynamic,
    Feature,
}

/// One configured scoring rule (`score_rule` index, §6.3).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRule {
    pub rule_name: String,
    pub score_type: ScoreType,
    pub condition: String,
    pub formula: String,
    pub description: Option<String>,
    pub enabled: bool,
}

/// One triggered rule's contribution, attached to a `ScoreRecord`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreDetail {
    pub score_rule_name: String,
    pub score: f64,
    pub description: Option<String>,
}

/// Per-`(batch_id, ip)` score record persisted to `score_record_<date>` (§3, §4.7).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    pub batch_id: BatchId,
    pub ip: String,
    pub score_fixed: f64,
    pub score_dynamic: f64,
    pub score_feature: f64,
    pub score_details: Vec<ScoreDetail>,
    pub ip_enrich: crate::aggregate::IpEnrich,
}

impl ScoreRecord {
    /// Invariant 6 (§8): `score_fixed + score_dynamic + score_feature == sum(detail.score)`.
    #[must_use]
    pub fn score_total(&self) -> f64 {
        self.score_fixed + self.score_dynamic + self.score_feature
    }
}

/// Rolling per-IP summary, upserted by the summarizer (§3, §4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct IpSummary {
    pub ip: String,
    pub score_fixed: f64,
    pub score_dynamic: f64,
    pub score_feature: f64,
    pub feature_tags: Vec<String>,
    pub ip_enrich: crate::aggregate::IpEnrich,
    pub last_update: chrono::DateTime<chrono::Utc>,
}

impl IpSummary {
    /// Derived, not stored: `models/score.py`'s `ScoreAggregate.auto_fix`
    /// validator re-expressed as an accessor (§3 ambient addition).
    #[must_use]
    pub fn score_total(&self) -> f64 {
        self.score_fixed + self.score_dynamic + self.score_feature
    }
}
