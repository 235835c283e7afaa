//! Prompt construction for the research loop nodes.

use std::fmt::Write as _;

use crate::index::RetrievedChunk;

use super::state::ResearchState;
use super::{FinalReport, RoundSynthesis};

pub(crate) const SYSTEM_PROMPT: &str = "\
You are a research assistant answering questions from a personal reference \
library of scientific papers. Ground every statement in the retrieved \
passages, cite sources by their citation_key, and say explicitly when the \
retrieved material does not answer the question.";

pub(crate) const GENERATED_QUERY_SCHEMA: &str = r#"{"query": "<new search query string>"}"#;

pub(crate) const SYNTHESIS_SCHEMA: &str = r#"{"relevant_sources": [{"key": "<citation_key>", "info": "<what this source contributes>"}], "synthesis_text": "<markdown synthesis>"}"#;

pub(crate) const JUDGEMENT_SCHEMA: &str =
    r#"{"stop": <true if the knowledge answers the question>, "reasoning": "<one paragraph>"}"#;

pub(crate) const REPORT_SCHEMA: &str = r#"{"final_answer": "<markdown answer with citations>", "answer_evaluation": "<confidence and limitations>", "suggestions": "<follow-up directions>", "title": "<short report title>"}"#;

/// Prompt for the query-generation node: one new query whose expected
/// retrieval is complementary to past queries.
pub(crate) fn gen_query(state: &ResearchState) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Research question: {}\n", state.user_query);

    let _ = writeln!(prompt, "Search queries already issued:");
    for query in &state.search_queries {
        let _ = writeln!(prompt, "- {query}");
    }

    if let Some(assessment) = state.assessment_strings.last() {
        let _ = writeln!(prompt, "\nLatest assessment of the gathered knowledge:");
        let _ = writeln!(prompt, "{assessment}");
    }

    let _ = writeln!(
        prompt,
        "\nPropose ONE new search query for the vector index. It should cover \
         ground the previous queries did not, guided by what the assessment \
         says is still missing. Keep it concise and specific."
    );
    prompt
}

/// Prompt for the synthesize node over the freshly retrieved chunks.
pub(crate) fn synthesize(state: &ResearchState) -> String {
    let empty = Vec::new();
    let chunks = state.retrieved_documents.last().unwrap_or(&empty);
    let previous = state
        .knowledge_strings
        .last()
        .map(String::as_str)
        .unwrap_or_default();

    let mut prompt = String::new();
    let _ = writeln!(prompt, "Research question: {}\n", state.user_query);
    let _ = writeln!(prompt, "Previously synthesized knowledge:\n{previous}\n");

    if chunks.is_empty() {
        let _ = writeln!(prompt, "No new documents were retrieved this round.");
    } else {
        let _ = writeln!(prompt, "Newly retrieved passages:");
        for chunk in chunks {
            let _ = writeln!(prompt, "{}", format_chunk(chunk));
        }
    }

    let _ = writeln!(
        prompt,
        "Fold the new passages into the knowledge. Keep everything that is \
         still relevant, attribute claims to their citation_key, and note \
         which sources contributed what. If nothing new is relevant, say so."
    );
    prompt
}

/// Prompt for the judge node: is the knowledge sufficient to answer?
pub(crate) fn judge(state: &ResearchState) -> String {
    let knowledge = state
        .knowledge_strings
        .last()
        .map(String::as_str)
        .unwrap_or_default();
    let assessment = state
        .assessment_strings
        .last()
        .map(String::as_str)
        .unwrap_or_default();

    let mut prompt = String::new();
    let _ = writeln!(prompt, "Research question: {}\n", state.user_query);
    let _ = writeln!(prompt, "Queries issued so far:");
    for query in &state.search_queries {
        let _ = writeln!(prompt, "- {query}");
    }
    let _ = writeln!(prompt, "\nCurrent knowledge:\n{knowledge}\n");
    let _ = writeln!(prompt, "Previous assessment:\n{assessment}\n");
    let _ = writeln!(
        prompt,
        "Decide whether this knowledge is sufficient to answer the research \
         question. Stop when the question is answered, when the library \
         clearly lacks the material, or when further queries would only \
         repeat old ground."
    );
    prompt
}

/// Prompt for the finalize node over the assembled report.
pub(crate) fn finalize(state: &ResearchState) -> String {
    format!(
        "Research question: {}\n\nResearch log:\n{}\nWrite the final research \
         report. Cite only citation_keys that appear in the retrieved \
         passages. Evaluate how well the answer is supported and suggest \
         follow-up directions.",
        state.user_query,
        research_report(state)
    )
}

/// One retrieved chunk, formatted for a prompt.
pub(crate) fn format_chunk(hit: &RetrievedChunk) -> String {
    let chunk = &hit.chunk;
    let section = chunk.deepest_level().unwrap_or("-");
    format!(
        "### {}\n{}\n- citation_key: {}\n- authors: {}\n- date: {}\n- section: {}\n- distance: {:.3}\n",
        if chunk.title.is_empty() { "Untitled" } else { &chunk.title },
        chunk.content,
        chunk.citation_key,
        chunk.authors,
        chunk.date,
        section,
        hit.distance,
    )
}

/// A synthesis result rendered as the Markdown block stored in
/// `knowledge_strings`.
pub(crate) fn render_synthesis(synthesis: &RoundSynthesis) -> String {
    let mut block = String::new();
    if !synthesis.relevant_sources.is_empty() {
        let _ = writeln!(block, "**Sources:**");
        for source in &synthesis.relevant_sources {
            let _ = writeln!(block, "- `{}`: {}", source.key, source.info);
        }
        let _ = writeln!(block);
    }
    block.push_str(&synthesis.synthesis_text);
    block
}

/// Concatenate the completed rounds (seed entries skipped) into the
/// research log handed to the finalize prompt.
pub(crate) fn research_report(state: &ResearchState) -> String {
    let mut report = String::new();
    for round in 1..state.search_queries.len() {
        let _ = writeln!(report, "## Round {round}");
        let _ = writeln!(report, "**Query:** {}", state.search_queries[round]);
        if let Some(docs) = state.retrieved_documents.get(round) {
            let _ = writeln!(report, "**Retrieved:** {} passages", docs.len());
        }
        if let Some(knowledge) = state.knowledge_strings.get(round) {
            let _ = writeln!(report, "**Knowledge:**\n{knowledge}");
        }
        if let Some(assessment) = state.assessment_strings.get(round) {
            let _ = writeln!(report, "**Assessment:** {assessment}");
        }
        let _ = writeln!(report);
    }
    report
}

/// The user-facing report.
pub(crate) fn render_final_response(report: &FinalReport) -> String {
    format!(
        "# {}\n\n## Answer\n{}\n\n## Evaluation\n{}\n\n## Suggestions\n{}\n",
        report.title, report.final_answer, report.answer_evaluation, report.suggestions
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResearchConfig;
    use crate::research::SourceNote;

    #[test]
    fn report_skips_seed_entries() {
        let mut state = ResearchState::new(&ResearchConfig::default());
        state.user_query = "q".to_string();
        state.search_queries.push("real query".to_string());
        state.retrieved_documents.push(Vec::new());
        state.knowledge_strings.push("learned things".to_string());
        state.assessment_strings.push("looks good".to_string());

        let report = research_report(&state);
        assert!(report.contains("real query"));
        assert!(report.contains("learned things"));
        assert!(!report.contains(super::super::state::SEED_QUERY));
        assert!(!report.contains(super::super::state::SEED_KNOWLEDGE));
    }

    #[test]
    fn synthesis_renders_sources_block() {
        let synthesis = RoundSynthesis {
            relevant_sources: vec![SourceNote {
                key: "doe_2021".to_string(),
                info: "defines the measure".to_string(),
            }],
            synthesis_text: "The measure is defined as ...".to_string(),
        };
        let block = render_synthesis(&synthesis);
        assert!(block.contains("`doe_2021`"));
        assert!(block.contains("The measure is defined"));
    }
}
