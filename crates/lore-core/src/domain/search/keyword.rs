//! Keyword source over stored pattern text

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::knowledge::{KnowledgeGraphStore, PatternRecord};
use crate::domain::similarity::{token_overlap, tokenize};
use crate::error::Result;

use super::candidate::{RetrievalSource, SearchCandidate, SourceRequest};

pub const KEYWORD_SOURCE: &str = "keyword";

/// Scores patterns by the share of query words found in their text,
/// description and tags
pub struct PatternKeywordSource {
    graph: Arc<KnowledgeGraphStore>,
}

impl PatternKeywordSource {
    pub fn new(graph: Arc<KnowledgeGraphStore>) -> Self {
        Self { graph }
    }
}

fn pattern_tokens(record: &PatternRecord) -> BTreeSet<String> {
    let mut tokens = tokenize(&record.searchable_text());
    for tag in &record.tags {
        tokens.extend(tokenize(tag));
    }
    tokens
}

#[async_trait]
impl RetrievalSource for PatternKeywordSource {
    fn name(&self) -> &str {
        KEYWORD_SOURCE
    }

    async fn search(&self, request: &SourceRequest, _embedding: Option<&[f32]>) -> Result<Vec<SearchCandidate>> {
        let wanted = tokenize(&request.text);
        if wanted.is_empty() || request.limit == 0 {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<SearchCandidate> = self
            .graph
            .all_patterns()
            .await
            .into_iter()
            .filter_map(|(id, record)| {
                let available = pattern_tokens(&record);
                let overlap = token_overlap(&wanted, &available);
                if overlap <= 0.0 {
                    return None;
                }
                let matched: Vec<&str> = wanted
                    .intersection(&available)
                    .map(String::as_str)
                    .collect();
                Some(
                    SearchCandidate::new(id, record, overlap, KEYWORD_SOURCE)
                        .with_explanation(format!("keyword match: {}", matched.join(", "))),
                )
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        candidates.truncate(request.limit);
        Ok(candidates)
    }
}
