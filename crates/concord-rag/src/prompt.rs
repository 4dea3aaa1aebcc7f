//! Prompt assembly for the RAG Orchestrator (§4.4): system preface,
//! question, formatted history, and a length-capped context block.

use concord_core::{ChatHistoryEntry, ChatRole, ChatTurn};
use tracing::warn;

const SYSTEM_PREFACE: &str = "You are the support assistant for a peer-to-peer cryptocurrency exchange. \
Answer from the provided context only. State the protocol version a procedure applies to when it matters, \
and say so plainly when you are not certain rather than guessing.";

/// Keep only the most recent `max_turns` turns, dropping entries that carry
/// neither a recognized role/content pair nor a legacy user/assistant pair
/// (§4.4 History normalization).
pub fn normalize_history(entries: &[ChatHistoryEntry], max_turns: usize) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            ChatHistoryEntry::Turn(turn) => turns.push(turn.clone()),
            ChatHistoryEntry::Pair(pair) => {
                if pair.user.is_none() && pair.assistant.is_none() {
                    warn!("chat history entry has no recognizable role, dropping");
                    continue;
                }
                if let Some(user) = &pair.user {
                    turns.push(ChatTurn { role: ChatRole::User, content: user.clone() });
                }
                if let Some(assistant) = &pair.assistant {
                    turns.push(ChatTurn { role: ChatRole::Assistant, content: assistant.clone() });
                }
            }
        }
    }
    let len = turns.len();
    if len > max_turns {
        turns.split_off(len - max_turns)
    } else {
        turns
    }
}

fn format_history(turns: &[ChatTurn]) -> String {
    turns.iter().map(|t| format!("{}: {}", t.role, t.content)).collect::<Vec<_>>().join("\n")
}

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
const TRUNCATION_MARKER: &str = "\n\n[... context truncated, lower-ranked passages omitted ...]";

/// Assemble the context block within `max_chars`, keeping whole passages in
/// retrieval-rank order for as long as the budget allows. Passages are
/// already ranked by relevance, so unlike truncating a single arbitrary
/// document there is no tail worth preserving: once a passage no longer
/// fits, it (and everything ranked below it) is dropped rather than
/// sandwiched around a marker. If even the first, highest-ranked passage
/// overruns the budget, its leading portion is kept on a line boundary and
/// the remainder is marked as cut.
fn build_context_block(passages: &[String], max_chars: usize) -> String {
    let mut out = String::new();
    for passage in passages {
        let separator_len = if out.is_empty() { 0 } else { CONTEXT_SEPARATOR.len() };
        if out.len() + separator_len + passage.len() <= max_chars {
            if !out.is_empty() {
                out.push_str(CONTEXT_SEPARATOR);
            }
            out.push_str(passage);
            continue;
        }

        let budget = max_chars.saturating_sub(out.len() + separator_len + TRUNCATION_MARKER.len());
        if budget == 0 {
            break;
        }
        if !out.is_empty() {
            out.push_str(CONTEXT_SEPARATOR);
        }
        let cut = passage[..budget.min(passage.len())].rfind('\n').map(|i| i + 1).unwrap_or(budget.min(passage.len()));
        out.push_str(&passage[..cut]);
        out.push_str(TRUNCATION_MARKER);
        break;
    }
    out
}

/// Full prompt: system preface, history, context, optional feedback
/// guidance, then the question.
pub fn build_prompt(
    question: &str,
    history: &[ChatTurn],
    context_passages: &[String],
    max_context_chars: usize,
    feedback_guidance: &[String],
) -> String {
    let mut sections = vec![SYSTEM_PREFACE.to_string()];

    if !history.is_empty() {
        sections.push(format!("## Conversation so far\n{}", format_history(history)));
    }

    if !context_passages.is_empty() {
        sections.push(format!("## Context\n{}", build_context_block(context_passages, max_context_chars)));
    }

    if !feedback_guidance.is_empty() {
        let bullets = feedback_guidance.iter().map(|g| format!("- {g}")).collect::<Vec<_>>().join("\n");
        sections.push(format!("## Guidance from prior feedback\n{bullets}"));
    }

    sections.push(format!("## Question\n{question}"));
    sections.join("\n\n")
}

/// Prompt used when retrieval found nothing but there is prior history —
/// answer from conversation only, or admit there is no information (§4.4
/// Context-only fallback).
pub fn build_context_only_prompt(question: &str, history: &[ChatTurn]) -> String {
    format!(
        "{}\n\nAnswer using only the conversation below. If the question raises a new topic \
         not covered by it, reply in 2-3 sentences that you don't have information on that yet \
         and suggest asking a more specific question.\n\n## Conversation so far\n{}\n\n## Question\n{}",
        SYSTEM_PREFACE,
        format_history(history),
        question
    )
}
