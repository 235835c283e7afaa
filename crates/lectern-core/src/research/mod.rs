//! Iterative research loop.
//!
//! A deterministic graph over [`ResearchState`]:
//!
//! ```text
//! init → check_query → gen_query → search → synthesize → judge
//!                         ▲                                │
//!                         └────────── insufficient ────────┤
//!                                                          ▼
//!                                                      finalize → END
//! ```
//!
//! Each node updates the state and names its successor; the driver is a
//! plain loop. The one suspension point is `check_query`, surfaced as
//! [`RunOutcome::NeedsUserQuery`]: the host fills in `user_query` and calls
//! [`ResearchLoop::run`] again. Cancellation is checked between nodes and
//! produces a report from whatever rounds have accumulated, with no further
//! model or index calls.

mod prompts;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chat::{self, ChatModel};
use crate::retriever::Retriever;

pub use state::{ResearchState, SEED_ASSESSMENT, SEED_KNOWLEDGE, SEED_QUERY};

/// Prompt shown to the user when `user_query` is empty.
pub const USER_QUERY_PROMPT: &str =
    "Please provide a research question to search your reference library.";

/// Chat retry budget per node.
const CHAT_ATTEMPTS: u32 = 3;
const CHAT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Structured reply of the query-generation node.
#[derive(Debug, Deserialize)]
struct GeneratedQuery {
    query: String,
}

/// One source attribution inside a synthesis.
#[derive(Debug, Serialize, Deserialize)]
pub struct SourceNote {
    pub key: String,
    pub info: String,
}

/// Structured reply of the synthesize node.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoundSynthesis {
    #[serde(default)]
    pub relevant_sources: Vec<SourceNote>,
    pub synthesis_text: String,
}

/// Structured reply of the judge node.
#[derive(Debug, Deserialize)]
struct Judgement {
    stop: bool,
    reasoning: String,
}

/// Structured reply of the finalize node.
#[derive(Debug, Deserialize)]
pub struct FinalReport {
    pub final_answer: String,
    #[serde(default)]
    pub answer_evaluation: String,
    #[serde(default)]
    pub suggestions: String,
    #[serde(default)]
    pub title: String,
}

/// How a [`ResearchLoop::run`] call ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The loop needs a user query; fill `state.user_query` and run again.
    NeedsUserQuery {
        prompt: String,
        state: ResearchState,
    },
    /// The loop finished; `state.final_response` holds the report.
    Finished(ResearchState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Init,
    CheckQuery,
    GenQuery,
    Search,
    Synthesize,
    Judge,
    Finalize,
}

/// Driver for the research graph.
pub struct ResearchLoop {
    chat: Arc<dyn ChatModel>,
    retriever: Retriever,
    cancel: CancellationToken,
}

impl ResearchLoop {
    pub fn new(chat: Arc<dyn ChatModel>, retriever: Retriever) -> Self {
        Self {
            chat,
            retriever,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the loop between nodes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the graph to an outcome.
    pub async fn run(&self, mut state: ResearchState) -> Result<RunOutcome> {
        let mut node = Node::Init;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Research loop cancelled");
                state.final_response = cancelled_response(&state);
                return Ok(RunOutcome::Finished(state));
            }

            tracing::debug!(node = ?node, round = state.rounds(), "Entering node");

            node = match node {
                Node::Init => {
                    self.init(&mut state);
                    Node::CheckQuery
                }
                Node::CheckQuery => {
                    if state.user_query.trim().is_empty() {
                        return Ok(RunOutcome::NeedsUserQuery {
                            prompt: USER_QUERY_PROMPT.to_string(),
                            state,
                        });
                    }
                    Node::GenQuery
                }
                Node::GenQuery => match self.gen_query(&mut state).await {
                    Ok(()) => Node::Search,
                    Err(e) => self.bail_to_finalize(&mut state, "query generation", e),
                },
                Node::Search => {
                    self.search(&mut state).await;
                    Node::Synthesize
                }
                Node::Synthesize => match self.synthesize(&mut state).await {
                    Ok(()) => Node::Judge,
                    Err(e) => self.bail_to_finalize(&mut state, "synthesis", e),
                },
                Node::Judge => match self.judge(&mut state).await {
                    Ok(true) => Node::Finalize,
                    Ok(false) => Node::GenQuery,
                    Err(e) => {
                        state.search_loop_count += 1;
                        self.bail_to_finalize(&mut state, "judgement", e)
                    }
                },
                Node::Finalize => {
                    self.finalize(&mut state).await;
                    return Ok(RunOutcome::Finished(state));
                }
            };
        }
    }

    /// Record a node failure and route to finalization. The loop never
    /// deadlocks on a misbehaving model.
    fn bail_to_finalize(&self, state: &mut ResearchState, node: &str, error: anyhow::Error) -> Node {
        tracing::error!(node, error = %error, "Node failed, finalizing early");
        state
            .assessment_strings
            .push(format!("{node} failed: {error}"));
        Node::Finalize
    }

    fn init(&self, state: &mut ResearchState) {
        match self.retriever.list_indexed() {
            Ok(stats) => {
                tracing::info!(item_count = stats.items.len(), "Loaded index snapshot");
                state.indexed_items = stats.items;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load index snapshot");
            }
        }
    }

    async fn gen_query(&self, state: &mut ResearchState) -> Result<()> {
        let generated: GeneratedQuery = self
            .chat_structured(&prompts::gen_query(state), prompts::GENERATED_QUERY_SCHEMA)
            .await?;
        tracing::info!(query = %generated.query, "Generated search query");
        state.search_queries.push(generated.query);
        Ok(())
    }

    /// Retrieve for the newest query. An index failure yields an empty
    /// round (still appended, keeping the sequences aligned); the judge
    /// then typically decides to stop.
    async fn search(&self, state: &mut ResearchState) {
        let query = state
            .search_queries
            .last()
            .cloned()
            .unwrap_or_default();

        let mut hits = match self
            .retriever
            .semantic(&query, 2 * state.max_docs_per_search)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!(error = %e, "Retrieval failed, recording empty round");
                Vec::new()
            }
        };

        if state.exclude_references {
            hits.retain(|hit| {
                !hit.chunk
                    .deepest_level()
                    .map(|heading| heading.to_lowercase().contains("reference"))
                    .unwrap_or(false)
            });
        }

        let seen = state.seen_keys();
        hits.retain(|hit| !seen.contains(&(hit.chunk.item_id.clone(), hit.chunk.split_id)));
        hits.truncate(state.max_docs_per_search);

        tracing::info!(query = %query, new_chunks = hits.len(), "Search round complete");
        state.retrieved_documents.push(hits);
    }

    async fn synthesize(&self, state: &mut ResearchState) -> Result<()> {
        let synthesis: RoundSynthesis = self
            .chat_structured(&prompts::synthesize(state), prompts::SYNTHESIS_SCHEMA)
            .await?;
        state
            .knowledge_strings
            .push(prompts::render_synthesis(&synthesis));
        Ok(())
    }

    /// Returns `true` when the loop should finalize.
    async fn judge(&self, state: &mut ResearchState) -> Result<bool> {
        let judgement: Judgement = self
            .chat_structured(&prompts::judge(state), prompts::JUDGEMENT_SCHEMA)
            .await?;

        state.assessment_strings.push(judgement.reasoning);
        state.search_loop_count += 1;

        let depth_reached = state.search_loop_count >= state.max_search_depth;
        tracing::info!(
            stop = judgement.stop,
            loop_count = state.search_loop_count,
            depth_reached,
            "Judge decision"
        );
        Ok(judgement.stop || depth_reached)
    }

    async fn finalize(&self, state: &mut ResearchState) {
        let report: Result<FinalReport> = self
            .chat_structured(&prompts::finalize(state), prompts::REPORT_SCHEMA)
            .await;

        state.final_response = match report {
            Ok(mut report) => {
                if report.title.is_empty() {
                    report.title = "Research report".to_string();
                }
                prompts::render_final_response(&report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Finalization failed, degrading");
                degraded_response(state, &e.to_string())
            }
        };
    }

    /// Chat call with bounded retry and exponential back-off.
    async fn chat_structured<T: DeserializeOwned>(&self, user: &str, schema: &str) -> Result<T> {
        let mut delay = CHAT_BASE_DELAY;
        let mut last_error = None;

        for attempt in 1..=CHAT_ATTEMPTS {
            match chat::complete_structured::<T>(
                self.chat.as_ref(),
                prompts::SYSTEM_PROMPT,
                user,
                schema,
            )
            .await
            {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Chat call failed");
                    last_error = Some(e);
                    if attempt < CHAT_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("chat call failed")))
    }
}

/// Report assembled locally when the model is unavailable.
fn degraded_response(state: &ResearchState, reason: &str) -> String {
    format!(
        "# Research incomplete\n\n## Answer\nInsufficient information: the \
         report could not be generated ({reason}).\n\n## Gathered knowledge\n{}",
        prompts::research_report(state)
    )
}

/// Report assembled locally after cancellation.
fn cancelled_response(state: &ResearchState) -> String {
    format!(
        "# Research cancelled\n\nThe loop was cancelled after {} round(s). \
         Accumulated findings:\n\n{}",
        state.rounds(),
        prompts::research_report(state)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::chat::ScriptedChat;
    use crate::chunker::{chunk_text, ChunkMeta, ChunkerConfig};
    use crate::config::ResearchConfig;
    use crate::embed::Embedder;
    use crate::index::VectorIndex;

    const GEN_QUERY: &str = r#"{"query": "criticality in cortical networks"}"#;
    const SYNTH: &str = r#"{"relevant_sources": [{"key": "doe_2021", "info": "core evidence"}], "synthesis_text": "Networks operate near criticality."}"#;
    const JUDGE_STOP: &str = r#"{"stop": true, "reasoning": "The question is answered."}"#;
    const JUDGE_GO: &str = r#"{"stop": false, "reasoning": "Coverage is still thin."}"#;
    const REPORT: &str = r#"{"final_answer": "Cortical networks sit near criticality [doe_2021].", "answer_evaluation": "Well supported.", "suggestions": "Look at avalanche exponents.", "title": "Criticality"}"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        index: Arc<VectorIndex>,
    }

    async fn fixture_with_markdown(markdown: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let index =
            Arc::new(VectorIndex::open(dir.path(), "test", Embedder::mock(4)).unwrap());
        if !markdown.is_empty() {
            let meta = ChunkMeta {
                item_id: "I1".to_string(),
                citation_key: "doe_2021".to_string(),
                title: "Criticality paper".to_string(),
                ..ChunkMeta::default()
            };
            let chunks = chunk_text(markdown, &ChunkerConfig::default(), &meta).unwrap();
            index.add(chunks).await.unwrap();
        }
        Fixture { _dir: dir, index }
    }

    fn research_loop(fx: &Fixture, chat: Arc<ScriptedChat>) -> ResearchLoop {
        ResearchLoop::new(chat, Retriever::new(fx.index.clone(), 1.5))
    }

    fn config() -> ResearchConfig {
        ResearchConfig::default()
    }

    fn finished(outcome: RunOutcome) -> ResearchState {
        match outcome {
            RunOutcome::Finished(state) => state,
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_round_convergence() {
        let fx = fixture_with_markdown("# Intro\ncriticality in the cortex\navalanche statistics\n").await;
        let chat = Arc::new(ScriptedChat::new(vec![GEN_QUERY, SYNTH, JUDGE_STOP, REPORT]));
        let research = research_loop(&fx, chat.clone());

        let state = finished(
            research
                .run(ResearchState::with_query(&config(), "What is criticality?"))
                .await
                .unwrap(),
        );

        assert_eq!(state.search_loop_count, 1);
        assert!(state.final_response.contains("# Criticality"));
        assert!(state.final_response.contains("## Answer"));
        assert!(state.final_response.contains("## Evaluation"));

        // One completed round: every parallel sequence grew by exactly one
        assert_eq!(state.search_queries.len(), 2);
        assert_eq!(state.retrieved_documents.len(), 2);
        assert_eq!(state.knowledge_strings.len(), 2);
        assert_eq!(state.assessment_strings.len(), 2);

        // Retrieval actually happened
        assert!(!state.retrieved_documents[1].is_empty());
        // Snapshot of indexed items was loaded
        assert!(state.indexed_items.contains_key("I1"));
        // Cited key is among retrieved chunks
        assert!(state.cited_keys().contains("doe_2021"));

        assert_eq!(chat.call_count(), 4);
    }

    #[tokio::test]
    async fn interrupt_for_missing_query_then_resume() {
        let fx = fixture_with_markdown("body text\n").await;
        let chat = Arc::new(ScriptedChat::new(vec![GEN_QUERY, SYNTH, JUDGE_STOP, REPORT]));
        let research = research_loop(&fx, chat.clone());

        let outcome = research.run(ResearchState::new(&config())).await.unwrap();
        let mut state = match outcome {
            RunOutcome::NeedsUserQuery { prompt, state } => {
                assert_eq!(prompt, USER_QUERY_PROMPT);
                state
            }
            other => panic!("expected NeedsUserQuery, got {other:?}"),
        };
        // No model calls before the query arrives
        assert_eq!(chat.call_count(), 0);

        state.user_query = "What is criticality?".to_string();
        let state = finished(research.run(state).await.unwrap());
        assert!(!state.final_response.is_empty());
    }

    #[tokio::test]
    async fn depth_cap_forces_finalization() {
        let fx = fixture_with_markdown("alpha\nbeta\ngamma\n").await;
        let chat = Arc::new(ScriptedChat::new(vec![
            GEN_QUERY, SYNTH, JUDGE_GO, GEN_QUERY, SYNTH, JUDGE_GO, REPORT,
        ]));
        let research = research_loop(&fx, chat.clone());

        let mut initial = ResearchState::with_query(&config(), "question");
        initial.max_search_depth = 2;

        let state = finished(research.run(initial).await.unwrap());
        assert_eq!(state.search_loop_count, 2);
        assert_eq!(state.rounds(), 2);
        // assessments (excluding seed) match the loop count
        assert_eq!(
            state.assessment_strings.len() - 1,
            state.search_loop_count as usize
        );
        assert_eq!(chat.call_count(), 7);
    }

    #[tokio::test]
    async fn depth_zero_finalizes_after_first_round() {
        let fx = fixture_with_markdown("alpha\n").await;
        let chat = Arc::new(ScriptedChat::new(vec![GEN_QUERY, SYNTH, JUDGE_GO, REPORT]));
        let research = research_loop(&fx, chat.clone());

        let mut initial = ResearchState::with_query(&config(), "question");
        initial.max_search_depth = 0;

        let state = finished(research.run(initial).await.unwrap());
        assert_eq!(state.rounds(), 1);
        assert_eq!(chat.call_count(), 4);
    }

    #[tokio::test]
    async fn empty_index_still_finalizes() {
        let fx = fixture_with_markdown("").await;
        let chat = Arc::new(ScriptedChat::new(vec![GEN_QUERY, SYNTH, JUDGE_STOP, REPORT]));
        let research = research_loop(&fx, chat.clone());

        let state = finished(
            research
                .run(ResearchState::with_query(
                    &config(),
                    "What is criticality in EEG?",
                ))
                .await
                .unwrap(),
        );

        assert!(state.search_loop_count <= state.max_search_depth);
        assert!(state.retrieved_documents[1].is_empty());
        assert!(!state.final_response.is_empty());
    }

    #[tokio::test]
    async fn repeated_rounds_deduplicate_across_rounds() {
        let fx = fixture_with_markdown("only one line of content\n").await;
        let chat = Arc::new(ScriptedChat::new(vec![
            GEN_QUERY, SYNTH, JUDGE_GO, GEN_QUERY, SYNTH, JUDGE_STOP, REPORT,
        ]));
        let research = research_loop(&fx, chat.clone());

        let state = finished(
            research
                .run(ResearchState::with_query(&config(), "question"))
                .await
                .unwrap(),
        );

        // Round 1 takes the only chunk; round 2 retrieves the same chunk
        // and drops it as already seen
        assert_eq!(state.retrieved_documents[1].len(), 1);
        assert!(state.retrieved_documents[2].is_empty());
    }

    #[tokio::test]
    async fn exclude_references_drops_reference_sections() {
        let markdown = "\
# Results
avalanche statistics follow a power law
# References
Smith J, Some cited work, 2019
";
        let fx = fixture_with_markdown(markdown).await;
        let chat = Arc::new(ScriptedChat::new(vec![GEN_QUERY, SYNTH, JUDGE_STOP, REPORT]));
        let research = research_loop(&fx, chat.clone());

        let mut initial = ResearchState::with_query(&config(), "question");
        initial.exclude_references = true;

        let state = finished(research.run(initial).await.unwrap());
        let round = &state.retrieved_documents[1];
        assert!(!round.is_empty());
        for hit in round {
            assert_ne!(hit.chunk.deepest_level(), Some("References"));
        }
    }

    #[tokio::test]
    async fn cancellation_skips_all_calls_and_reports() {
        let fx = fixture_with_markdown("content\n").await;
        let chat = Arc::new(ScriptedChat::new(vec![]));
        let research = research_loop(&fx, chat.clone());
        research.cancel_token().cancel();

        let state = finished(
            research
                .run(ResearchState::with_query(&config(), "question"))
                .await
                .unwrap(),
        );

        assert!(state.final_response.contains("cancelled"));
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_failure_degrades_to_insufficient_information() {
        let fx = fixture_with_markdown("content\n").await;
        // Script is empty: every chat call fails
        let chat = Arc::new(ScriptedChat::new(vec![]));
        let research = research_loop(&fx, chat.clone());

        let state = finished(
            research
                .run(ResearchState::with_query(&config(), "question"))
                .await
                .unwrap(),
        );

        assert!(state.final_response.contains("Insufficient information"));
        // The failure reason was recorded in the assessments
        assert!(state
            .assessment_strings
            .iter()
            .any(|a| a.contains("query generation failed")));
        // gen_query retried 3 times, finalize retried 3 times
        assert_eq!(chat.call_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn synthesize_failure_records_reason() {
        let fx = fixture_with_markdown("content\n").await;
        // gen_query succeeds, then synthesis replies with prose twice per
        // attempt until the budget is gone
        let chat = Arc::new(ScriptedChat::new(vec![
            GEN_QUERY, "not json", "still not json", "nope", "nope", "no", "no", REPORT,
        ]));
        let research = research_loop(&fx, chat.clone());

        let state = finished(
            research
                .run(ResearchState::with_query(&config(), "question"))
                .await
                .unwrap(),
        );

        assert!(state
            .assessment_strings
            .iter()
            .any(|a| a.contains("synthesis failed")));
        // Final report still produced from the scripted REPORT reply
        assert!(state.final_response.contains("## Answer"));
    }
}
