//! Weighted multi-factor reranking
//!
//! The combined score replaces each candidate's source score:
//!
//! ```text
//! w_rel * base + w_rec * exp(-age_days / window)
//!   + w_ctx * (0.5 * language + 0.5 * framework)
//!   + w_exp * agent keyword overlap
//!   + w_xm * (non-text pattern and images wanted)
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RerankConfig;
use crate::domain::knowledge::{EntityExtractor, PatternRecord, canonicalize, contains_bounded};
use crate::domain::similarity::{token_overlap, tokenize};

use super::candidate::SearchCandidate;

/// What the caller is working on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    /// Project language (e.g., "typescript")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Project framework (e.g., "express")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Agent making the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Whether image or diagram patterns are welcome
    #[serde(default)]
    pub wants_images: bool,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_images(mut self, wants_images: bool) -> Self {
        self.wants_images = wants_images;
        self
    }
}

/// Unweighted factor values behind a combined score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub relevance: f32,
    pub recency: f32,
    pub context: f32,
    pub expertise: f32,
    pub cross_modal: f32,
}

/// A reranked result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub pattern_id: String,
    pub pattern: PatternRecord,
    /// Combined score
    pub score: f32,
    pub breakdown: ScoreBreakdown,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    pub explanation: String,
    pub sources: BTreeSet<String>,
}

/// Multi-factor result reranker
#[derive(Debug, Clone)]
pub struct ResultReranker {
    config: RerankConfig,
    extractor: EntityExtractor,
}

impl Default for ResultReranker {
    fn default() -> Self {
        Self::new(RerankConfig::default())
    }
}

impl ResultReranker {
    pub fn new(config: RerankConfig) -> Self {
        Self {
            config,
            extractor: EntityExtractor::new(),
        }
    }

    /// Use a custom vocabulary for language and framework matching
    pub fn with_extractor(mut self, extractor: EntityExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    /// Rerank candidates, best first
    pub fn rerank(&self, candidates: Vec<SearchCandidate>, context: &QueryContext) -> Vec<RankedResult> {
        self.rerank_at(candidates, context, Utc::now())
    }

    /// Rerank with recency measured from `now`
    pub fn rerank_at(
        &self,
        candidates: Vec<SearchCandidate>,
        context: &QueryContext,
        now: DateTime<Utc>,
    ) -> Vec<RankedResult> {
        let mut ranked: Vec<RankedResult> = candidates
            .into_iter()
            .map(|candidate| {
                let breakdown = self.breakdown(&candidate, context, now);
                RankedResult {
                    score: self.combine(&breakdown),
                    breakdown,
                    pattern_id: candidate.pattern_id,
                    pattern: candidate.pattern,
                    path: candidate.path,
                    explanation: candidate.explanation,
                    sources: candidate.sources,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.breakdown.relevance.total_cmp(&a.breakdown.relevance))
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        ranked
    }

    /// Factor values for one candidate
    pub fn breakdown(&self, candidate: &SearchCandidate, context: &QueryContext, now: DateTime<Utc>) -> ScoreBreakdown {
        let pattern = &candidate.pattern;
        let language = context
            .language
            .as_deref()
            .map_or(0.0, |lang| self.mentions(pattern, lang));
        let framework = context
            .framework
            .as_deref()
            .map_or(0.0, |fw| self.mentions(pattern, fw));

        ScoreBreakdown {
            relevance: candidate.score.max(0.0),
            recency: self.recency(pattern, now),
            context: 0.5 * language + 0.5 * framework,
            expertise: context
                .agent_id
                .as_deref()
                .map_or(0.0, |agent| self.expertise(pattern, agent)),
            cross_modal: if !pattern.modality.is_text() && context.wants_images {
                1.0
            } else {
                0.0
            },
        }
    }

    fn combine(&self, b: &ScoreBreakdown) -> f32 {
        let c = &self.config;
        c.relevance_weight * b.relevance
            + c.recency_weight * b.recency
            + c.context_weight * b.context
            + c.expertise_weight * b.expertise
            + c.cross_modal_weight * b.cross_modal
    }

    /// exp(-age / window), where age counts from the last use or creation
    fn recency(&self, pattern: &PatternRecord, now: DateTime<Utc>) -> f32 {
        let age_days = (now - pattern.last_activity()).num_seconds().max(0) as f64 / 86_400.0;
        let window = self.config.recency_window_days.max(f64::EPSILON);
        (-age_days / window).exp() as f32
    }

    /// 1.0 when the pattern is about `term`, else 0.0
    ///
    /// Known technologies compare by canonical name so aliases match
    /// ("ts" and "typescript"); other terms need a tag or a word-bounded
    /// mention in the pattern text.
    fn mentions(&self, pattern: &PatternRecord, term: &str) -> f32 {
        let canonical = canonicalize(term);
        if canonical.is_empty() {
            return 0.0;
        }
        if pattern.tags.iter().any(|t| canonicalize(t) == canonical) {
            return 1.0;
        }

        let wanted: BTreeSet<String> = self
            .extractor
            .extract_technologies(term)
            .into_iter()
            .map(|e| e.label)
            .collect();
        let text = pattern.searchable_text();

        let found = if wanted.is_empty() {
            contains_bounded(&text.to_lowercase(), &term.trim().to_lowercase())
        } else {
            self.extractor
                .extract_technologies(&text)
                .iter()
                .any(|e| wanted.contains(&e.label))
        };
        if found { 1.0 } else { 0.0 }
    }

    /// Share of the agent's expertise keywords found in the pattern
    ///
    /// Agents without configured keywords use the words of their id.
    fn expertise(&self, pattern: &PatternRecord, agent_id: &str) -> f32 {
        let keywords = match self.config.agent_expertise.get(agent_id) {
            Some(keywords) => tokenize(&keywords.join(" ")),
            None => tokenize(agent_id),
        };

        let mut available = tokenize(&pattern.searchable_text());
        for tag in &pattern.tags {
            available.extend(tokenize(tag));
        }
        if let Some(category) = &pattern.category {
            available.extend(tokenize(category));
        }

        token_overlap(&keywords, &available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::Modality;
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn candidate(id: &str, record: PatternRecord, score: f32) -> SearchCandidate {
        SearchCandidate::new(id, record, score, "graph")
    }

    #[test]
    fn test_newer_pattern_ranks_higher() {
        let old = PatternRecord::new("Cache sessions in Redis").with_created_at(now() - Duration::days(90));
        let new = PatternRecord::new("Cache sessions in Redis").with_created_at(now() - Duration::days(1));

        let ranked = ResultReranker::default().rerank_at(
            vec![candidate("old", old, 0.6), candidate("new", new, 0.6)],
            &QueryContext::default(),
            now(),
        );

        assert_eq!(ranked[0].pattern_id, "new");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_last_use_counts_as_activity() {
        let record = PatternRecord::new("x")
            .with_created_at(now() - Duration::days(300))
            .with_usage(4, Some(now()));
        let b = ResultReranker::default().breakdown(&candidate("p", record, 0.5), &QueryContext::default(), now());
        assert!((b.recency - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_replaces_source_score() {
        let record = PatternRecord::new("Plain text").with_created_at(now());
        let ranked = ResultReranker::default().rerank_at(
            vec![candidate("p", record, 1.0)],
            &QueryContext::default(),
            now(),
        );
        // 0.4 * 1.0 + 0.15 * 1.0
        assert!((ranked[0].score - 0.55).abs() < 1e-5);
    }

    #[test]
    fn test_context_match_uses_aliases() {
        let record = PatternRecord::new("Typed Express middleware in TS")
            .with_created_at(now());
        let context = QueryContext::new().with_language("typescript").with_framework("express");
        let b = ResultReranker::default().breakdown(&candidate("p", record, 0.5), &context, now());
        assert!((b.context - 1.0).abs() < 1e-6);

        let other = PatternRecord::new("Django views").with_created_at(now());
        let b = ResultReranker::default().breakdown(&candidate("p", other, 0.5), &context, now());
        assert_eq!(b.context, 0.0);
    }

    #[test]
    fn test_context_match_on_tags_and_unknown_terms() {
        let record = PatternRecord::new("Retry with jitter").with_tags(["elixir"]);
        let context = QueryContext::new().with_language("Elixir").with_framework("phoenix");
        let b = ResultReranker::default().breakdown(&candidate("p", record, 0.5), &context, now());
        assert!((b.context - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_expertise_from_config_or_agent_id() {
        let mut config = RerankConfig::default();
        config.agent_expertise = BTreeMap::from([(
            "sara-frontend".to_string(),
            vec!["react".to_string(), "css".to_string()],
        )]);
        let reranker = ResultReranker::new(config);
        let record = PatternRecord::new("React hooks for forms").with_category("backend");

        let configured = QueryContext::new().with_agent("sara-frontend");
        let b = reranker.breakdown(&candidate("p", record.clone(), 0.5), &configured, now());
        assert!((b.expertise - 0.5).abs() < 1e-6);

        let derived = QueryContext::new().with_agent("marcus-backend");
        let b = reranker.breakdown(&candidate("p", record, 0.5), &derived, now());
        assert!((b.expertise - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_cross_modal_requires_both() {
        let diagram = PatternRecord::new("Auth flow").with_modality(Modality::Diagram);
        let reranker = ResultReranker::default();

        let with_images = QueryContext::new().with_images(true);
        let b = reranker.breakdown(&candidate("p", diagram.clone(), 0.5), &with_images, now());
        assert_eq!(b.cross_modal, 1.0);

        let b = reranker.breakdown(&candidate("p", diagram, 0.5), &QueryContext::new(), now());
        assert_eq!(b.cross_modal, 0.0);

        let text = PatternRecord::new("Auth flow");
        let b = reranker.breakdown(&candidate("p", text, 0.5), &with_images, now());
        assert_eq!(b.cross_modal, 0.0);
    }

    #[test]
    fn test_ties_break_by_id() {
        let record = PatternRecord::new("same").with_created_at(now());
        let ranked = ResultReranker::default().rerank_at(
            vec![candidate("b", record.clone(), 0.5), candidate("a", record, 0.5)],
            &QueryContext::default(),
            now(),
        );
        assert_eq!(ranked[0].pattern_id, "a");
    }
}
