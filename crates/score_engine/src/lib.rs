// Rust guideline compliant 2026-02-16

//! Score engine (C7): evaluate every enabled `ScoreRule` against each
//! batch's per-IP aggregates and persist the resulting `ScoreRecord`s,
//! grounded on `core/detector/score_engine.py` and the `SCORING` stage
//! driver in `core/scheduler/tasks/score_task.py`.

mod expr;

use std::collections::HashMap;

use batch_registry::{BatchRegistry, BatchRegistryError};
use domain::{
    AccessIpAggregation, BatchEntry, BatchId, BatchStatus, BehaviorVector, DocQuery, DocumentStore,
    DocumentStoreError, FeatureValue, ScoreDetail, ScoreRecord, ScoreRule, ScoreType,
};

pub use expr::{Expr, ExprError, Value};

#[derive(Debug, thiserror::Error)]
pub enum ScoreEngineError {
    #[error("no score rules configured")]
    NoRules,
    #[error("rule {rule_name}: invalid {field} expression {expr:?}: {source}")]
    InvalidRule { rule_name: String, field: &'static str, expr: String, source: ExprError },
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
    #[error(transparent)]
    Registry(#[from] BatchRegistryError),
}

struct CompiledRule {
    rule: ScoreRule,
    condition: Expr,
    formula: Expr,
}

/// Holds parsed, reusable `Expr`s for every enabled rule (§4.7).
#[derive(Debug)]
pub struct ScoreEngine {
    rules: Vec<CompiledRule>,
}

impl ScoreEngine {
    /// Parse and retain every `enabled` rule. Disabled rules are dropped at
    /// load time, matching `ScoreEngine.load_rules`'s `if rule.enabled` guard.
    ///
    /// # Errors
    ///
    /// Returns [`ScoreEngineError::NoRules`] if no rule is enabled, or
    /// [`ScoreEngineError::InvalidRule`] if a rule's `condition`/`formula`
    /// fails to parse.
    pub fn new(rules: Vec<ScoreRule>) -> Result<Self, ScoreEngineError> {
        let mut compiled = Vec::new();
        for rule in rules.into_iter().filter(|r| r.enabled) {
            let condition = Expr::parse(&rule.condition).map_err(|source| ScoreEngineError::InvalidRule {
                rule_name: rule.rule_name.clone(),
                field: "condition",
                expr: rule.condition.clone(),
                source,
            })?;
            let formula = Expr::parse(&rule.formula).map_err(|source| ScoreEngineError::InvalidRule {
                rule_name: rule.rule_name.clone(),
                field: "formula",
                expr: rule.formula.clone(),
                source,
            })?;
            tracing::info!(rule_name = %rule.rule_name, "loaded score rule");
            compiled.push(CompiledRule { rule, condition, formula });
        }
        if compiled.is_empty() {
            return Err(ScoreEngineError::NoRules);
        }
        Ok(Self { rules: compiled })
    }

    /// Score one aggregate against every loaded rule. A rule whose
    /// `condition` fails to evaluate is treated as not-triggered (not
    /// fatal); a rule whose `formula` fails to evaluate contributes `0.0`
    /// — both mirror the `try/except` + `logger.warning` pairs in
    /// `core/detector/score_engine.py: ScoreEngine.score`.
    #[must_use]
    pub fn score(&self, aggregation: &AccessIpAggregation) -> ScoreRecord {
        let features = build_features(aggregation);
        let mut score_fixed = 0.0;
        let mut score_dynamic = 0.0;
        let mut score_feature = 0.0;
        let mut score_details = Vec::new();

        for compiled in &self.rules {
            let triggered = match compiled.condition.eval(&features) {
                Ok(value) => value.truthy(),
                Err(error) => {
                    tracing::warn!(
                        rule_name = %compiled.rule.rule_name,
                        condition = %compiled.rule.condition,
                        %error,
                        "condition eval failed"
                    );
                    false
                }
            };
            if !triggered {
                continue;
            }
            let score = match compiled.formula.eval(&features) {
                Ok(value) => value.as_number(),
                Err(error) => {
                    tracing::warn!(
                        rule_name = %compiled.rule.rule_name,
                        formula = %compiled.rule.formula,
                        %error,
                        "formula eval failed"
                    );
                    0.0
                }
            };
            match compiled.rule.score_type {
                ScoreType::Fixed => score_fixed += score,
                ScoreType::Dynamic => score_dynamic += score,
                ScoreType::Feature => score_feature += score,
            }
            score_details.push(ScoreDetail {
                score_rule_name: compiled.rule.rule_name.clone(),
                score,
                description: compiled.rule.description.clone(),
            });
        }

        ScoreRecord {
            batch_id: aggregation.batch_id.clone(),
            ip: aggregation.ip.clone(),
            score_fixed,
            score_dynamic,
            score_feature,
            score_details,
            ip_enrich: aggregation.ip_enrich.clone(),
        }
    }

    /// Run C7 over every batch currently `AGGREGATED`, ascending:
    /// `AGGREGATED` -> `SCORING` -> compute -> persist -> `SCORED`
    /// (`core/scheduler/tasks/score_task.py: ScoreTask.run`).
    ///
    /// # Errors
    ///
    /// Propagates the first [`ScoreEngineError`] encountered.
    pub async fn run_once<B, S>(
        &self,
        registry: &BatchRegistry<B>,
        agg_store: &impl DocumentStore<AccessIpAggregation>,
        score_store: &S,
    ) -> Result<usize, ScoreEngineError>
    where
        B: DocumentStore<BatchEntry>,
        S: DocumentStore<ScoreRecord>,
    {
        let batches = registry.get_all_by_status(BatchStatus::Aggregated).await?;
        let mut processed = 0;
        for entry in batches {
            registry.advance(&entry.batch_id, BatchStatus::Scoring).await?;
            self.score_batch(&entry.batch_id, agg_store, score_store).await?;
            registry.advance(&entry.batch_id, BatchStatus::Scored).await?;
            processed += 1;
        }
        Ok(processed)
    }

    async fn score_batch(
        &self,
        batch_id: &BatchId,
        agg_store: &impl DocumentStore<AccessIpAggregation>,
        score_store: &impl DocumentStore<ScoreRecord>,
    ) -> Result<(), ScoreEngineError> {
        let query = DocQuery::term("batch_id", batch_id.as_str());
        let aggregations = agg_store.get_all(&query).await?;
        let records: Vec<(String, ScoreRecord)> = aggregations
            .iter()
            .map(|agg| {
                let record = self.score(agg);
                (format!("{batch_id}_{}", agg.ip), record)
            })
            .collect();
        score_store.batch_insert(records).await?;
        Ok(())
    }
}

/// Flatten an aggregate's named behavior-vector dimensions plus a handful
/// of raw fields into the rule-language's feature namespace (§4.7, §9 —
/// this repo's own replacement for the source's dynamically-typed
/// `AccessIpScoreFeatures.features` dict, not retrieved in full).
fn build_features(aggregation: &AccessIpAggregation) -> HashMap<String, FeatureValue> {
    let v = &aggregation.behavior_vector;
    let mut features = HashMap::new();
    features.insert("count".to_owned(), FeatureValue::Number(aggregation.count as f64));
    features.insert("ip_norm".to_owned(), FeatureValue::Number(v.get(BehaviorVector::IP_NORM)));
    features.insert("prefix16".to_owned(), FeatureValue::Number(v.get(BehaviorVector::PREFIX16)));
    features.insert("page_ratio".to_owned(), FeatureValue::Number(v.get(BehaviorVector::PAGE_RATIO)));
    features.insert("distinct_paths".to_owned(), FeatureValue::Number(v.get(BehaviorVector::DISTINCT_PATHS)));
    features.insert("top_path_ratio".to_owned(), FeatureValue::Number(v.get(BehaviorVector::TOP_PATH_RATIO)));
    features.insert("path_entropy".to_owned(), FeatureValue::Number(v.get(BehaviorVector::PATH_ENTROPY)));
    features.insert("normal_ratio".to_owned(), FeatureValue::Number(v.get(BehaviorVector::NORMAL_RATIO)));
    features.insert("static_ratio".to_owned(), FeatureValue::Number(v.get(BehaviorVector::STATIC_RATIO)));
    features.insert("status_200".to_owned(), FeatureValue::Number(v.get(BehaviorVector::STATUS_200)));
    features.insert("status_403".to_owned(), FeatureValue::Number(v.get(BehaviorVector::STATUS_403)));
    features.insert("status_404".to_owned(), FeatureValue::Number(v.get(BehaviorVector::STATUS_404)));
    features.insert("status_429".to_owned(), FeatureValue::Number(v.get(BehaviorVector::STATUS_429)));
    features.insert("status_499".to_owned(), FeatureValue::Number(v.get(BehaviorVector::STATUS_499)));
    features.insert("status_redirect".to_owned(), FeatureValue::Number(v.get(BehaviorVector::STATUS_REDIRECT)));
    features.insert("status_5xx".to_owned(), FeatureValue::Number(v.get(BehaviorVector::STATUS_5XX)));
    features.insert("status_other".to_owned(), FeatureValue::Number(v.get(BehaviorVector::STATUS_OTHER)));
    features.insert(
        "status_4xx_ratio".to_owned(),
        FeatureValue::Number(
            v.get(BehaviorVector::STATUS_403)
                + v.get(BehaviorVector::STATUS_404)
                + v.get(BehaviorVector::STATUS_429)
                + v.get(BehaviorVector::STATUS_499),
        ),
    );
    features.insert("ref_empty".to_owned(), FeatureValue::Number(v.get(BehaviorVector::REF_EMPTY)));
    features.insert("ref_non_empty".to_owned(), FeatureValue::Number(v.get(BehaviorVector::REF_NON_EMPTY)));
    features.insert(
        "request_length_avg".to_owned(),
        FeatureValue::Number(v.get(BehaviorVector::REQUEST_LENGTH_AVG)),
    );
    features.insert(
        "request_length_stddev".to_owned(),
        FeatureValue::Number(v.get(BehaviorVector::REQUEST_LENGTH_STDDEV)),
    );
    features
        .insert("body_bytes_avg".to_owned(), FeatureValue::Number(v.get(BehaviorVector::BODY_BYTES_AVG)));
    features.insert(
        "body_bytes_stddev".to_owned(),
        FeatureValue::Number(v.get(BehaviorVector::BODY_BYTES_STDDEV)),
    );
    features
        .insert("request_time_avg".to_owned(), FeatureValue::Number(v.get(BehaviorVector::REQUEST_TIME_AVG)));
    features.insert(
        "request_time_stddev".to_owned(),
        FeatureValue::Number(v.get(BehaviorVector::REQUEST_TIME_STDDEV)),
    );
    features.insert("distinct_ua".to_owned(), FeatureValue::Number(v.get(BehaviorVector::DISTINCT_UA)));
    features.insert("ua_entropy".to_owned(), FeatureValue::Number(v.get(BehaviorVector::UA_ENTROPY)));
    features.insert(
        "suspicious_flag".to_owned(),
        FeatureValue::Bool(v.get(BehaviorVector::SUSPICIOUS_FLAG) != 0.0),
    );
    features.insert("max_ua_ratio".to_owned(), FeatureValue::Number(v.get(BehaviorVector::MAX_UA_RATIO)));
    features.insert(
        "allowed".to_owned(),
        FeatureValue::Bool(aggregation.ip_enrich.allowed.unwrap_or(false)),
    );
    features.insert(
        "country_code".to_owned(),
        FeatureValue::Str(aggregation.ip_enrich.country_code.clone().unwrap_or_default()),
    );
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use domain::{AccessIpAggregation, IpEnrich, KeyValue};

    fn sample_aggregation(ip: &str, batch: &str) -> AccessIpAggregation {
        let mut v = BehaviorVector::zero();
        v.set(BehaviorVector::SUSPICIOUS_FLAG, 1.0);
        AccessIpAggregation {
            batch_id: BatchId::new(batch),
            ip: ip.to_owned(),
            ip_enrich: IpEnrich::default(),
            count: 42,
            path: vec![KeyValue { key: "/a".into(), value: 42 }],
            path_categories: vec![KeyValue { key: "PAGE".into(), value: 42 }],
            status: vec![KeyValue { key: "200".into(), value: 42 }],
            http_user_agent: vec![KeyValue { key: "curl/8.0".into(), value: 42 }],
            referer_empty_count: 42,
            referer_non_empty_count: 0,
            request_length: domain::ExtendedStats::from_samples(&[1.0]),
            body_bytes_sent: domain::ExtendedStats::from_samples(&[1.0]),
            request_time: domain::ExtendedStats::from_samples(&[1.0]),
            behavior_vector: v,
        }
    }

    fn sample_rule(name: &str, score_type: ScoreType, condition: &str, formula: &str) -> ScoreRule {
        ScoreRule {
            rule_name: name.to_owned(),
            score_type,
            condition: condition.to_owned(),
            formula: formula.to_owned(),
            description: None,
            enabled: true,
        }
    }

    #[test]
    fn empty_rule_set_is_rejected() {
        assert!(matches!(ScoreEngine::new(vec![]), Err(ScoreEngineError::NoRules)));
    }

    #[test]
    fn disabled_rules_are_dropped_at_load() {
        let mut rule = sample_rule("r1", ScoreType::Fixed, "count > 0", "10");
        rule.enabled = false;
        assert!(matches!(ScoreEngine::new(vec![rule]), Err(ScoreEngineError::NoRules)));
    }

    // Invariant 6 (§8): score_total equals the sum of score_details.
    #[test]
    fn score_total_matches_detail_sum() {
        let engine = ScoreEngine::new(vec![
            sample_rule("high_volume", ScoreType::Fixed, "count > 10", "20"),
            sample_rule("suspicious", ScoreType::Dynamic, "suspicious_flag", "count * 0.5"),
        ])
        .unwrap();
        let record = engine.score(&sample_aggregation("1.2.3.4", "b1"));
        let detail_sum: f64 = record.score_details.iter().map(|d| d.score).sum();
        assert!((record.score_total() - detail_sum).abs() < 1e-9);
        assert!((record.score_fixed - 20.0).abs() < 1e-9);
        assert!((record.score_dynamic - 21.0).abs() < 1e-9);
    }

    #[test]
    fn rule_condition_not_triggered_contributes_nothing() {
        let engine = ScoreEngine::new(vec![sample_rule("never", ScoreType::Fixed, "count > 1000", "99")]).unwrap();
        let record = engine.score(&sample_aggregation("1.2.3.4", "b1"));
        assert_eq!(record.score_total(), 0.0);
        assert!(record.score_details.is_empty());
    }

    #[test]
    fn invalid_rule_expression_is_rejected_at_load() {
        let rule = sample_rule("broken", ScoreType::Fixed, "count >>> 1", "0");
        assert!(matches!(ScoreEngine::new(vec![rule]), Err(ScoreEngineError::InvalidRule { .. })));
    }

    #[test]
    fn score_record_carries_the_aggregations_enrichment() {
        let engine = ScoreEngine::new(vec![sample_rule("noop", ScoreType::Fixed, "count > 1000", "0")]).unwrap();
        let mut aggregation = sample_aggregation("1.2.3.4", "b1");
        aggregation.ip_enrich.country_code = Some("FR".to_owned());
        let record = engine.score(&aggregation);
        assert_eq!(record.ip_enrich.country_code.as_deref(), Some("FR"));
    }

    #[test]
    fn status_4xx_ratio_sums_the_tracked_4xx_buckets() {
        let mut aggregation = sample_aggregation("1.2.3.4", "b1");
        aggregation.behavior_vector.set(BehaviorVector::STATUS_403, 0.1);
        aggregation.behavior_vector.set(BehaviorVector::STATUS_404, 0.2);
        aggregation.behavior_vector.set(BehaviorVector::STATUS_429, 0.05);
        aggregation.behavior_vector.set(BehaviorVector::STATUS_499, 0.0);
        let features = build_features(&aggregation);
        let ratio = features.get("status_4xx_ratio").unwrap().as_number().unwrap();
        assert!((ratio - 0.35).abs() < 1e-9);
    }

    #[derive(Default)]
    struct MockAggStore {
        data: Vec<AccessIpAggregation>,
    }

    impl DocumentStore<AccessIpAggregation> for MockAggStore {
        async fn get_all(&self, query: &DocQuery) -> Result<Vec<AccessIpAggregation>, DocumentStoreError> {
            let Some((_, value)) = &query.term_eq else { return Ok(self.data.clone()) };
            Ok(self.data.iter().filter(|a| a.batch_id.as_str() == value).cloned().collect())
        }
        async fn query_list(&self, query: &DocQuery) -> Result<Vec<AccessIpAggregation>, DocumentStoreError> {
            self.get_all(query).await
        }
        async fn get_by_id(&self, _id: &str) -> Result<Option<AccessIpAggregation>, DocumentStoreError> {
            Ok(None)
        }
        async fn delete_by_id(&self, _id: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn merge(&self, _id: &str, _doc: AccessIpAggregation) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn upsert_with<F>(
            &self,
            _id: &str,
            seed: AccessIpAggregation,
            _update: F,
        ) -> Result<(), DocumentStoreError>
        where
            F: FnOnce(AccessIpAggregation) -> AccessIpAggregation + Send,
        {
            let _ = seed;
            Ok(())
        }
        async fn batch_insert(&self, _docs: Vec<(String, AccessIpAggregation)>) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn batch_merge(&self, _docs: Vec<(String, AccessIpAggregation)>) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn create_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn list_indices(&self, _prefix: &str) -> Result<Vec<String>, DocumentStoreError> {
            Ok(Vec::new())
        }
        async fn drop_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockScoreStore {
        data: Mutex<HashMap<String, ScoreRecord>>,
    }

    impl DocumentStore<ScoreRecord> for MockScoreStore {
        async fn get_all(&self, _query: &DocQuery) -> Result<Vec<ScoreRecord>, DocumentStoreError> {
            Ok(self.data.lock().unwrap().values().cloned().collect())
        }
        async fn query_list(&self, query: &DocQuery) -> Result<Vec<ScoreRecord>, DocumentStoreError> {
            self.get_all(query).await
        }
        async fn get_by_id(&self, id: &str) -> Result<Option<ScoreRecord>, DocumentStoreError> {
            Ok(self.data.lock().unwrap().get(id).cloned())
        }
        async fn delete_by_id(&self, id: &str) -> Result<(), DocumentStoreError> {
            self.data.lock().unwrap().remove(id);
            Ok(())
        }
        async fn merge(&self, id: &str, doc: ScoreRecord) -> Result<(), DocumentStoreError> {
            self.data.lock().unwrap().insert(id.to_owned(), doc);
            Ok(())
        }
        async fn upsert_with<F>(&self, id: &str, seed: ScoreRecord, update: F) -> Result<(), DocumentStoreError>
        where
            F: FnOnce(ScoreRecord) -> ScoreRecord + Send,
        {
            let mut data = self.data.lock().unwrap();
            let existing = data.get(id).cloned();
            let next = existing.map_or(seed, update);
            data.insert(id.to_owned(), next);
            Ok(())
        }
        async fn batch_insert(&self, docs: Vec<(String, ScoreRecord)>) -> Result<(), DocumentStoreError> {
            let mut data = self.data.lock().unwrap();
            for (id, doc) in docs {
                data.insert(id, doc);
            }
            Ok(())
        }
        async fn batch_merge(&self, docs: Vec<(String, ScoreRecord)>) -> Result<(), DocumentStoreError> {
            self.batch_insert(docs).await
        }
        async fn create_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn list_indices(&self, _prefix: &str) -> Result<Vec<String>, DocumentStoreError> {
            Ok(Vec::new())
        }
        async fn drop_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockBatchStore {
        data: Mutex<HashMap<String, BatchEntry>>,
    }

    impl DocumentStore<BatchEntry> for MockBatchStore {
        async fn get_all(&self, _query: &DocQuery) -> Result<Vec<BatchEntry>, DocumentStoreError> {
            Ok(self.data.lock().unwrap().values().cloned().collect())
        }
        async fn query_list(&self, query: &DocQuery) -> Result<Vec<BatchEntry>, DocumentStoreError> {
            self.get_all(query).await
        }
        async fn get_by_id(&self, id: &str) -> Result<Option<BatchEntry>, DocumentStoreError> {
            Ok(self.data.lock().unwrap().get(id).cloned())
        }
        async fn delete_by_id(&self, id: &str) -> Result<(), DocumentStoreError> {
            self.data.lock().unwrap().remove(id);
            Ok(())
        }
        async fn merge(&self, id: &str, doc: BatchEntry) -> Result<(), DocumentStoreError> {
            self.data.lock().unwrap().insert(id.to_owned(), doc);
            Ok(())
        }
        async fn upsert_with<F>(&self, id: &str, seed: BatchEntry, update: F) -> Result<(), DocumentStoreError>
        where
            F: FnOnce(BatchEntry) -> BatchEntry + Send,
        {
            let mut data = self.data.lock().unwrap();
            let existing = data.get(id).cloned();
            let next = existing.map_or(seed, update);
            data.insert(id.to_owned(), next);
            Ok(())
        }
        async fn batch_insert(&self, docs: Vec<(String, BatchEntry)>) -> Result<(), DocumentStoreError> {
            let mut data = self.data.lock().unwrap();
            for (id, doc) in docs {
                data.insert(id, doc);
            }
            Ok(())
        }
        async fn batch_merge(&self, docs: Vec<(String, BatchEntry)>) -> Result<(), DocumentStoreError> {
            self.batch_insert(docs).await
        }
        async fn create_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn list_indices(&self, _prefix: &str) -> Result<Vec<String>, DocumentStoreError> {
            Ok(Vec::new())
        }
        async fn drop_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_once_advances_aggregated_batches_to_scored() {
        let engine = ScoreEngine::new(vec![sample_rule("base", ScoreType::Fixed, "count >= 0", "1")]).unwrap();
        let batch_store = MockBatchStore::default();
        let registry = BatchRegistry::new(batch_store);
        registry.advance(&BatchId::new("b1"), BatchStatus::Aggregated).await.unwrap();
        let agg_store = MockAggStore { data: vec![sample_aggregation("1.2.3.4", "b1")] };
        let score_store = MockScoreStore::default();

        let processed = engine.run_once(&registry, &agg_store, &score_store).await.unwrap();
        assert_eq!(processed, 1);
        let entries = registry.get_all_by_status(BatchStatus::Scored).await.unwrap();
        assert_eq!(entries.len(), 1);
        let records = score_store.get_all(&DocQuery::all()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].score_fixed - 1.0).abs() < 1e-9);
    }
}
