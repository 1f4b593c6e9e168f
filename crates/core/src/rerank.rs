//! Generative reranking of retrieved candidates with a similarity fallback.
//!
//! Every invocation ends on one of two branches: the model's ranking when it
//! returned a usable JSON array, or the deterministic similarity ranking.
//! Only retrieval failures escape as errors.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CredentialState;
use crate::error::SearchError;
use crate::identity::{display_identifier, display_name, download_url, sanitize_identifier};
use crate::models::{RankedCandidate, RankingSource, RerankResponse, SearchResult};
use crate::retrieval::RetrievalService;
use crate::traits::{CompletionClient, VectorIndex};

pub const MAX_CANDIDATES: usize = 7;
pub const RETRIEVE_K: usize = 10;
pub const UNKNOWN_CANDIDATE: &str = "Unknown Candidate";

const EXCERPT_CHARS: usize = 1_500;
const NO_CANDIDATES_MESSAGE: &str = "No candidates found. Upload resumes first.";

const SYSTEM_PROMPT: &str = "You are an expert technical recruiter. You rank candidates for a \
job using only the resume excerpts you are given, and you reply with JSON only.";

#[derive(Debug, Clone, Copy)]
pub struct RerankOptions {
    pub retrieve_k: usize,
    pub max_candidates: usize,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            retrieve_k: RETRIEVE_K,
            max_candidates: MAX_CANDIDATES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    MissingCredential,
    PlaceholderCredential,
    CompletionFailed(String),
    MalformedResponse(String),
}

impl FallbackReason {
    pub fn message(&self) -> String {
        match self {
            FallbackReason::MissingCredential => {
                "AI ranking unavailable: no generative model credential configured. Ranked by similarity only.".to_string()
            }
            FallbackReason::PlaceholderCredential => {
                "AI ranking unavailable: generative model credential is a placeholder. Ranked by similarity only.".to_string()
            }
            FallbackReason::CompletionFailed(details) => {
                format!("AI ranking failed ({details}). Ranked by similarity only.")
            }
            FallbackReason::MalformedResponse(details) => {
                format!("AI ranking returned an unusable response ({details}). Ranked by similarity only.")
            }
        }
    }
}

pub enum ModelAccess<C> {
    Available(C),
    Unavailable(FallbackReason),
}

impl<C> ModelAccess<C> {
    /// Builds a client only for a real credential.
    pub fn from_credential(state: &CredentialState, build: impl FnOnce(&str) -> C) -> Self {
        match state {
            CredentialState::Present(key) => ModelAccess::Available(build(key.as_str())),
            CredentialState::Placeholder => {
                ModelAccess::Unavailable(FallbackReason::PlaceholderCredential)
            }
            CredentialState::Missing => ModelAccess::Unavailable(FallbackReason::MissingCredential),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiRanking {
    pub filename: String,
    pub name: String,
    pub score: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RerankParse {
    Parsed(Vec<AiRanking>),
    ParseFailed { raw: String, reason: String },
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\n?(.*?)\s*```\s*$")
            .unwrap_or_else(|error| unreachable!("fence pattern is valid: {error}"))
    })
}

pub fn strip_code_fence(raw: &str) -> &str {
    match fence_pattern().captures(raw).and_then(|captures| captures.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => raw.trim(),
    }
}

fn parse_json_array(body: &str) -> Option<Vec<Value>> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body) {
        return Some(items);
    }

    // Tolerate prose around the array.
    let start = body.find('[')?;
    let end = body.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&body[start..=end]) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

fn score_of(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    raw.filter(|score| score.is_finite())
        .map(|score| score.clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

pub fn parse_rerank_response(raw: &str) -> RerankParse {
    let failed = |reason: &str| RerankParse::ParseFailed {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let body = strip_code_fence(raw);
    if body.is_empty() {
        return failed("empty response");
    }

    let Some(items) = parse_json_array(body) else {
        return failed("response is not a JSON array");
    };

    let rankings = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            let filename = item
                .get("filename")
                .and_then(Value::as_str)
                .and_then(sanitize_identifier)?;
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(UNKNOWN_CANDIDATE)
                .to_string();
            let reasoning = item
                .get("reasoning")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            Some(AiRanking {
                filename,
                name,
                score: score_of(item.get("score")),
                reasoning,
            })
        })
        .collect::<Vec<_>>();

    if rankings.is_empty() {
        return failed("no entries carried a filename");
    }

    RerankParse::Parsed(rankings)
}

/// Retrieved chunks of one resume, keyed by display identifier.
#[derive(Debug, Clone)]
struct CandidateGroup {
    filename: String,
    best: SearchResult,
    excerpts: Vec<String>,
}

/// Groups by identifier and orders by best similarity, ties in retrieval order.
fn group_candidates(results: Vec<SearchResult>) -> Vec<CandidateGroup> {
    let mut groups: Vec<CandidateGroup> = Vec::new();

    for result in results {
        let filename = display_identifier(&result.metadata);
        match groups.iter_mut().find(|group| group.filename == filename) {
            Some(group) => {
                group.excerpts.push(result.text.clone());
                if result.score > group.best.score {
                    group.best = result;
                }
            }
            None => groups.push(CandidateGroup {
                filename,
                excerpts: vec![result.text.clone()],
                best: result,
            }),
        }
    }

    groups.sort_by(|left, right| right.best.score.total_cmp(&left.best.score));
    groups
}

fn excerpt_of(group: &CandidateGroup) -> String {
    group
        .excerpts
        .join("\n...\n")
        .chars()
        .take(EXCERPT_CHARS)
        .collect()
}

fn candidate(group: &CandidateGroup, rank: usize, name: String, score: f64, reasoning: String) -> RankedCandidate {
    RankedCandidate {
        rank,
        download_url: download_url(&group.filename),
        filename: group.filename.clone(),
        name,
        score,
        reasoning,
        similarity: group.best.score,
        distance: group.best.distance,
        excerpt: group.best.text.clone(),
        metadata: group.best.metadata.clone(),
    }
}

fn fallback_ranking(groups: &[CandidateGroup], max: usize) -> Vec<RankedCandidate> {
    groups
        .iter()
        .take(max)
        .enumerate()
        .map(|(position, group)| {
            let percent = group.best.score * 100.0;
            let name = match display_name(&group.filename) {
                name if name.is_empty() => UNKNOWN_CANDIDATE.to_string(),
                name => name,
            };
            candidate(
                group,
                position + 1,
                name,
                (percent * 10.0).round() / 10.0,
                format!(
                    "AI ranking unavailable; ranked by semantic similarity ({percent:.1}% match)."
                ),
            )
        })
        .collect()
}

/// Keeps model entries naming a retrieved candidate, first mention wins.
fn ai_ranking(groups: &[CandidateGroup], rankings: Vec<AiRanking>, max: usize) -> Vec<RankedCandidate> {
    let mut used = vec![false; groups.len()];
    let mut ranked = Vec::new();

    for ranking in rankings {
        if ranked.len() == max {
            break;
        }
        let position = groups
            .iter()
            .position(|group| group.filename == ranking.filename)
            .or_else(|| {
                groups
                    .iter()
                    .position(|group| group.filename.eq_ignore_ascii_case(&ranking.filename))
            });
        let Some(position) = position else {
            debug!(filename = %ranking.filename, "model ranked an unknown candidate");
            continue;
        };
        if used[position] {
            continue;
        }
        used[position] = true;
        ranked.push(candidate(
            &groups[position],
            ranked.len() + 1,
            ranking.name,
            ranking.score,
            ranking.reasoning,
        ));
    }

    ranked
}

pub fn build_user_prompt(query: &str, candidates: &[(String, String)], max: usize) -> String {
    let listed = candidates
        .iter()
        .enumerate()
        .map(|(position, (filename, excerpt))| {
            format!("[Candidate {}] filename: {filename}\n{excerpt}", position + 1)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "JOB DESCRIPTION:\n{query}\n\nCANDIDATES:\n{listed}\n\n\
         Rank the best matching candidates for this job, best first, at most {max}.\n\
         Return ONLY a JSON array, no prose, where every element is an object with:\n\
         - \"filename\": the candidate's filename exactly as listed above\n\
         - \"name\": the candidate's full name as written in the resume; if no name is \
         discernible use \"{UNKNOWN_CANDIDATE}\" and never invent one\n\
         - \"score\": an integer from 0 to 100\n\
         - \"reasoning\": one or two sentences explaining the score"
    )
}

pub struct RerankPipeline<V: ?Sized, C> {
    retrieval: Arc<RetrievalService<V>>,
    model: ModelAccess<C>,
    options: RerankOptions,
}

impl<V, C> RerankPipeline<V, C>
where
    V: VectorIndex + ?Sized,
    C: CompletionClient,
{
    pub fn new(retrieval: Arc<RetrievalService<V>>, model: ModelAccess<C>, options: RerankOptions) -> Self {
        Self {
            retrieval,
            model,
            options,
        }
    }

    pub async fn rerank_candidates(&self, query: &str) -> Result<RerankResponse, SearchError> {
        if query.trim().is_empty() {
            return Ok(empty_response(query, "Job description is empty."));
        }

        let results = self.retrieval.query(query, self.options.retrieve_k).await?;
        let groups = group_candidates(results);
        if groups.is_empty() {
            return Ok(empty_response(query, NO_CANDIDATES_MESSAGE));
        }

        let max = self.options.max_candidates;
        let outcome = match &self.model {
            ModelAccess::Unavailable(reason) => Err(reason.clone()),
            ModelAccess::Available(client) => self.ai_rerank(client, query, &groups, max).await,
        };

        let response = match outcome {
            Ok(candidates) => {
                info!(count = candidates.len(), "candidates ranked by model");
                RerankResponse {
                    query: query.to_string(),
                    count: candidates.len(),
                    ranked_by: RankingSource::Ai,
                    candidates,
                    message: None,
                }
            }
            Err(reason) => {
                match &reason {
                    FallbackReason::CompletionFailed(_) | FallbackReason::MalformedResponse(_) => {
                        warn!(reason = ?reason, "AI reranking failed, using similarity ranking");
                    }
                    _ => debug!(reason = ?reason, "AI reranking skipped"),
                }
                let candidates = fallback_ranking(&groups, max);
                RerankResponse {
                    query: query.to_string(),
                    count: candidates.len(),
                    ranked_by: RankingSource::Similarity,
                    candidates,
                    message: Some(reason.message()),
                }
            }
        };

        Ok(response)
    }

    async fn ai_rerank(
        &self,
        client: &C,
        query: &str,
        groups: &[CandidateGroup],
        max: usize,
    ) -> Result<Vec<RankedCandidate>, FallbackReason> {
        let listed = groups
            .iter()
            .map(|group| (group.filename.clone(), excerpt_of(group)))
            .collect::<Vec<_>>();
        let prompt = build_user_prompt(query, &listed, max);

        let raw = client
            .complete(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|error| FallbackReason::CompletionFailed(error.to_string()))?;

        match parse_rerank_response(&raw) {
            RerankParse::Parsed(rankings) => {
                let ranked = ai_ranking(groups, rankings, max);
                if ranked.is_empty() {
                    Err(FallbackReason::MalformedResponse(
                        "no ranked filename matched a retrieved candidate".to_string(),
                    ))
                } else {
                    Ok(ranked)
                }
            }
            RerankParse::ParseFailed { raw, reason } => {
                debug!(model = client.model(), raw = %raw, "unparseable rerank response");
                Err(FallbackReason::MalformedResponse(reason))
            }
        }
    }
}

fn empty_response(query: &str, message: &str) -> RerankResponse {
    RerankResponse {
        query: query.to_string(),
        count: 0,
        ranked_by: RankingSource::Similarity,
        candidates: Vec::new(),
        message: Some(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::error::CompletionError;
    use crate::models::{IndexStats, Metadata, MetadataFilter};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeIndex {
        hits: Vec<SearchResult>,
        fail: bool,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn add_documents(&self, _texts: &[String], _metadatas: &[Metadata]) -> Result<(), SearchError> {
            Ok(())
        }

        async fn search(&self, _query: &str, k: usize) -> Result<Vec<SearchResult>, SearchError> {
            if self.fail {
                return Err(SearchError::BackendUnavailable {
                    backend: "fake".to_string(),
                    details: "down".to_string(),
                });
            }
            Ok(self.hits.iter().take(k).cloned().collect())
        }

        async fn delete_by_filter(&self, _filter: &MetadataFilter) -> Result<u64, SearchError> {
            Ok(0)
        }

        async fn stats(&self) -> Result<IndexStats, SearchError> {
            Ok(IndexStats {
                backend: "fake".to_string(),
                total_count: self.hits.len() as u64,
                dimensions: 3,
                model: "fake".to_string(),
            })
        }
    }

    struct FakeClient {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeClient {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for FakeClient {
        fn model(&self) -> &str {
            "fake-model"
        }

        async fn complete(&self, _system: &str, user: &str) -> Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.reply.clone().map_err(|_| CompletionError::EmptyResponse)
        }
    }

    fn hit(id: &str, source: &str, score: f64) -> SearchResult {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), json!(source));
        SearchResult::from_similarity(id.into(), format!("resume chunk {id}"), metadata, score)
    }

    fn pipeline(hits: Vec<SearchResult>, model: ModelAccess<FakeClient>) -> RerankPipeline<FakeIndex, FakeClient> {
        let index = Arc::new(FakeIndex { hits, fail: false });
        let retrieval = RetrievalService::new(index, ChunkingConfig::default()).unwrap();
        RerankPipeline::new(Arc::new(retrieval), model, RerankOptions::default())
    }

    fn no_credential() -> ModelAccess<FakeClient> {
        ModelAccess::from_credential(&CredentialState::Missing, |_| FakeClient::failing())
    }

    #[tokio::test]
    async fn fallback_ranks_by_descending_similarity() {
        let hits = vec![
            hit("1", "alice.pdf", 0.9),
            hit("2", "bob.pdf", 0.5),
            hit("3", "carol.pdf", 0.7),
        ];
        let response = pipeline(hits, no_credential())
            .rerank_candidates("backend engineer")
            .await
            .unwrap();

        assert_eq!(response.ranked_by, RankingSource::Similarity);
        let order = response
            .candidates
            .iter()
            .map(|c| (c.filename.as_str(), c.rank))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![("alice.pdf", 1), ("carol.pdf", 2), ("bob.pdf", 3)]);
        assert_eq!(response.candidates[0].name, "Alice");
        assert_eq!(response.candidates[0].score, 90.0);
        assert!(response.message.unwrap().contains("no generative model credential"));
    }

    #[tokio::test]
    async fn fallback_is_deterministic_and_capped() {
        let hits = (0..10)
            .map(|n| hit(&n.to_string(), &format!("cv_{n}.pdf"), 0.5 + n as f64 / 100.0))
            .collect::<Vec<_>>();
        let pipeline = pipeline(hits, no_credential());

        let first = pipeline.rerank_candidates("query").await.unwrap();
        let second = pipeline.rerank_candidates("query").await.unwrap();

        assert_eq!(first.count, MAX_CANDIDATES);
        let ranks = first.candidates.iter().map(|c| c.rank).collect::<Vec<_>>();
        assert_eq!(ranks, (1..=MAX_CANDIDATES).collect::<Vec<_>>());
        let names = |r: &RerankResponse| r.candidates.iter().map(|c| c.filename.clone()).collect::<Vec<_>>();
        assert_eq!(names(&first), names(&second));
        assert!(first
            .candidates
            .windows(2)
            .all(|pair| pair[0].similarity >= pair[1].similarity));
    }

    #[tokio::test]
    async fn chunks_of_one_resume_are_merged() {
        let hits = vec![
            hit("1", "uploads/alice.pdf", 0.6),
            hit("2", "bob.pdf", 0.7),
            hit("3", "alice.pdf", 0.8),
        ];
        let response = pipeline(hits, no_credential())
            .rerank_candidates("query")
            .await
            .unwrap();

        assert_eq!(response.count, 2);
        assert_eq!(response.candidates[0].filename, "alice.pdf");
        assert!((response.candidates[0].similarity - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn traversal_in_metadata_never_reaches_the_response() {
        let hits = vec![hit("1", "../../etc/passwd", 0.9)];
        let response = pipeline(hits, no_credential())
            .rerank_candidates("query")
            .await
            .unwrap();

        let candidate = &response.candidates[0];
        assert_eq!(candidate.filename, "passwd");
        assert_eq!(candidate.download_url, "/resumes/passwd");
    }

    #[tokio::test]
    async fn model_ranking_is_used_when_parseable() {
        let reply = "```json\n[\
            {\"filename\": \"bob.pdf\", \"name\": \"Bob Stone\", \"score\": 88, \"reasoning\": \"Strong Go.\"},\
            {\"filename\": \"invented.pdf\", \"name\": \"Ghost\", \"score\": 99, \"reasoning\": \"?\"},\
            {\"filename\": \"alice.pdf\", \"score\": \"71\"}\
        ]\n```";
        let hits = vec![hit("1", "alice.pdf", 0.9), hit("2", "bob.pdf", 0.5)];
        let response = pipeline(hits, ModelAccess::Available(FakeClient::replying(reply)))
            .rerank_candidates("Go engineer")
            .await
            .unwrap();

        assert_eq!(response.ranked_by, RankingSource::Ai);
        assert!(response.message.is_none());
        assert_eq!(response.count, 2);
        assert_eq!(response.candidates[0].filename, "bob.pdf");
        assert_eq!(response.candidates[0].rank, 1);
        assert_eq!(response.candidates[0].name, "Bob Stone");
        assert_eq!(response.candidates[1].name, UNKNOWN_CANDIDATE);
        assert_eq!(response.candidates[1].score, 71.0);
        assert_eq!(response.candidates[1].rank, 2);
    }

    #[tokio::test]
    async fn prompt_lists_sanitized_identifiers() {
        let client = FakeClient::replying("[]");
        let hits = vec![hit("1", "/srv/uploads/alice.pdf", 0.9)];
        let pipeline = pipeline(hits, ModelAccess::Available(client));
        let response = pipeline.rerank_candidates("Go engineer").await.unwrap();
        assert_eq!(response.ranked_by, RankingSource::Similarity);

        let ModelAccess::Available(client) = &pipeline.model else {
            panic!("client should be available");
        };
        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("filename: alice.pdf"));
        assert!(!prompts[0].contains("/srv/uploads"));
        assert!(prompts[0].contains(UNKNOWN_CANDIDATE));
    }

    #[tokio::test]
    async fn malformed_and_failed_completions_fall_back() {
        let hits = vec![hit("1", "alice.pdf", 0.4), hit("2", "bob.pdf", 0.8)];

        let malformed = pipeline(
            hits.clone(),
            ModelAccess::Available(FakeClient::replying("Sure! Here is my ranking: Bob first.")),
        )
        .rerank_candidates("query")
        .await
        .unwrap();
        assert_eq!(malformed.ranked_by, RankingSource::Similarity);
        assert_eq!(malformed.candidates[0].filename, "bob.pdf");
        assert!(malformed.message.unwrap().contains("unusable response"));

        let failed = pipeline(hits, ModelAccess::Available(FakeClient::failing()))
            .rerank_candidates("query")
            .await
            .unwrap();
        assert_eq!(failed.ranked_by, RankingSource::Similarity);
        assert!(failed.message.unwrap().contains("AI ranking failed"));
    }

    #[tokio::test]
    async fn empty_retrieval_is_not_an_error() {
        let response = pipeline(Vec::new(), no_credential())
            .rerank_candidates("query")
            .await
            .unwrap();
        assert_eq!(response.count, 0);
        assert_eq!(response.message.as_deref(), Some(NO_CANDIDATES_MESSAGE));
    }

    #[tokio::test]
    async fn retrieval_failures_propagate() {
        let index = Arc::new(FakeIndex {
            hits: Vec::new(),
            fail: true,
        });
        let retrieval = RetrievalService::new(index, ChunkingConfig::default()).unwrap();
        let pipeline = RerankPipeline::new(Arc::new(retrieval), no_credential(), RerankOptions::default());
        assert!(pipeline.rerank_candidates("query").await.is_err());
    }

    #[test]
    fn placeholder_credential_selects_fallback() {
        let access = ModelAccess::from_credential(
            &CredentialState::from_env_value(Some("your_openai_api_key_here")),
            |_| FakeClient::failing(),
        );
        assert!(matches!(
            access,
            ModelAccess::Unavailable(FallbackReason::PlaceholderCredential)
        ));
    }

    #[test]
    fn parse_strips_fences_and_defaults_fields() {
        let parsed = parse_rerank_response("```\n[{\"filename\": \"../x/a.pdf\", \"score\": 140}]\n```");
        assert_eq!(
            parsed,
            RerankParse::Parsed(vec![AiRanking {
                filename: "a.pdf".to_string(),
                name: UNKNOWN_CANDIDATE.to_string(),
                score: 100.0,
                reasoning: String::new(),
            }])
        );
    }

    #[test]
    fn parse_reports_failures_with_the_raw_text() {
        match parse_rerank_response("{\"filename\": \"a.pdf\"}") {
            RerankParse::ParseFailed { raw, .. } => assert!(raw.contains("a.pdf")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(matches!(
            parse_rerank_response("[{\"name\": \"No File\"}]"),
            RerankParse::ParseFailed { .. }
        ));
        assert!(matches!(parse_rerank_response("   "), RerankParse::ParseFailed { .. }));
    }

    #[test]
    fn parse_tolerates_prose_around_the_array() {
        let parsed = parse_rerank_response("Here you go:\n[{\"filename\": \"a.pdf\", \"score\": 50}]\nThanks");
        assert!(matches!(parsed, RerankParse::Parsed(ref items) if items.len() == 1));
    }
}
