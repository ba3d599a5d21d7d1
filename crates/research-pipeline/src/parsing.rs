//! Model-output parsing contracts. LLMs are asked for structured output but
//! don't always give it back cleanly, so every parser here has a fallback
//! chain that degrades gracefully instead of failing the task outright.

use research_providers::{CompletionResponse, ToolCall};
use serde_json::Value;

/// Parse a list of search queries out of a completion, trying progressively
/// looser formats: a tool call, a JSON object with a known key, a bare JSON
/// array, newline-separated lines, then a semicolon/pipe split. Always
/// returns at most `max_queries`, deduplicated case-insensitively.
pub fn parse_query_list(response: &CompletionResponse, max_queries: usize) -> Vec<String> {
    let raw_queries = if let Some(tool_call) = &response.tool_call {
        queries_from_tool_call(tool_call)
    } else if let Some(content) = &response.content {
        queries_from_text(content)
    } else {
        Vec::new()
    };

    dedup_and_clamp(raw_queries, max_queries)
}

fn queries_from_tool_call(tool_call: &ToolCall) -> Vec<String> {
    extract_query_array(&tool_call.arguments).unwrap_or_default()
}

fn queries_from_text(content: &str) -> Vec<String> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(queries) = extract_query_array(&value) {
            return queries;
        }
    }
    if let Some(fenced) = strip_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&fenced) {
            if let Some(queries) = extract_query_array(&value) {
                return queries;
            }
        }
    }

    if trimmed.contains('\n') {
        return trimmed
            .lines()
            .map(clean_query_line)
            .filter(|l| !l.is_empty())
            .collect();
    }

    let splitter = if trimmed.contains(';') { ';' } else { '|' };
    trimmed
        .split(splitter)
        .map(clean_query_line)
        .filter(|l| !l.is_empty())
        .collect()
}

fn extract_query_array(value: &Value) -> Option<Vec<String>> {
    let array = match value {
        Value::Array(_) => value,
        Value::Object(map) => map
            .get("queries")
            .or_else(|| map.get("search_queries"))
            .or_else(|| map.get("query"))?,
        _ => return None,
    };
    match array {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(clean_query_line))
                .filter(|l| !l.is_empty())
                .collect(),
        ),
        Value::String(s) => Some(vec![clean_query_line(s)]),
        _ => None,
    }
}

fn clean_query_line(line: &str) -> String {
    let trimmed = line.trim();
    let without_bullet = trimmed.trim_start_matches(['-', '*', '•']).trim();
    let without_number = strip_leading_ordinal(without_bullet);
    without_number.trim_matches(['"', '\'']).trim().to_string()
}

fn strip_leading_ordinal(s: &str) -> &str {
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(0);
    if digits_end > 0 {
        let rest = &s[digits_end..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim_start();
        }
    }
    s
}

fn dedup_and_clamp(queries: Vec<String>, max_queries: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for query in queries {
        let key = query.to_ascii_lowercase();
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        out.push(query);
        if out.len() >= max_queries {
            break;
        }
    }
    out
}

/// Deterministic queries to fall back to (or top up with) when a model call
/// produces too few: the topic alone, the topic plus a short slice of the
/// description, then a handful of fixed angle suffixes. Each candidate is
/// capped at 12 words and deduplicated case-insensitively against `existing`.
pub fn build_fallback_queries(topic: &str, description: &str, existing: &[String], count: usize) -> Vec<String> {
    let mut seen: std::collections::HashSet<String> =
        existing.iter().map(|q| q.to_ascii_lowercase()).collect();
    let mut candidates = vec![topic.to_string()];
    let desc_short = first_n_words(description, 12);
    if !desc_short.is_empty() {
        candidates.push(format!("{topic} {desc_short}"));
    }
    for suffix in ["overview", "key themes analysis", "recent evidence studies", "case studies"] {
        candidates.push(format!("{topic} {suffix}"));
    }

    let mut out = Vec::new();
    for candidate in candidates {
        let capped = first_n_words(&candidate, 12);
        let key = capped.to_ascii_lowercase();
        if capped.is_empty() || !seen.insert(key) {
            continue;
        }
        out.push(capped);
        if out.len() >= count {
            break;
        }
    }
    if out.is_empty() {
        out.push(first_n_words(topic, 12));
    }
    out
}

fn first_n_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

/// Parse a per-section research-task plan out of a completion: a JSON object
/// with a "tasks" key, each item carrying "topic", "description" and
/// "priority". Falls back to an empty vec on any parse failure so the caller
/// can substitute its own single-task fallback.
pub fn parse_task_list(content: &str) -> Vec<(String, String, i64)> {
    let trimmed = content.trim();
    let candidate = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        strip_fenced_block(trimmed).unwrap_or_else(|| trimmed.to_string())
    };
    let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
        return Vec::new();
    };
    let Some(items) = value.get("tasks").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let topic = item.get("topic").and_then(Value::as_str)?.to_string();
            let description = item.get("description").and_then(Value::as_str).unwrap_or(&topic).to_string();
            let priority = item.get("priority").and_then(Value::as_i64).unwrap_or(5);
            Some((topic, description, priority))
        })
        .collect()
}

/// Parse a gap-identification response: `{"has_gaps": bool, "queries": [...]}`.
/// Returns an empty vec whenever `has_gaps` is false or missing, or on any
/// parse failure — gap-fill is opt-in, never forced by a malformed response.
pub fn parse_gap_queries(content: &str, max_queries: usize) -> Vec<String> {
    let trimmed = content.trim();
    let candidate = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        strip_fenced_block(trimmed).unwrap_or_else(|| trimmed.to_string())
    };
    let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
        return Vec::new();
    };
    if !value.get("has_gaps").and_then(Value::as_bool).unwrap_or(false) {
        return Vec::new();
    }
    let queries = value
        .get("queries")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(clean_query_line))
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    dedup_and_clamp(queries, max_queries)
}

/// Best-effort parse of a JSON object out of a completion's raw text: try it
/// straight, then unwrap a fenced code block. Returns `None` rather than a
/// default so callers can tell "nothing usable" apart from "parsed to an
/// empty object".
pub fn parse_json_object(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    let fenced = strip_fenced_block(trimmed)?;
    serde_json::from_str(&fenced).ok()
}

pub fn strip_fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_marker = &text[start + 3..];
    let after_marker = after_marker
        .strip_prefix("json")
        .or_else(|| after_marker.strip_prefix("JSON"))
        .unwrap_or(after_marker);
    let after_marker = after_marker.trim_start_matches('\n');
    let end = after_marker.find("```")?;
    Some(after_marker[..end].trim().to_string())
}

/// Trailing metadata a research note may carry: new follow-up tasks the
/// model wants to spawn and glossary terms it coined while writing the note.
#[derive(Debug, Clone, Default)]
pub struct NoteMetadata {
    pub new_tasks: Vec<NoteTask>,
    pub glossary_terms: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct NoteTask {
    pub topic: String,
    pub description: String,
}

/// Split a research note into its prose body and trailing JSON metadata
/// block, if one is present. Tries, in order: the last fenced code block
/// that parses and has a recognized key, then a backward scan for a
/// brace-balanced trailing JSON object, then a safety-net strip of any
/// trailing fenced block or `{`-starting line even if it didn't parse —
/// better to drop unparseable trailing junk than leave it in the prose.
pub fn extract_note_metadata(note: &str) -> (String, NoteMetadata) {
    if let Some((body, value)) = last_fenced_block_with_metadata(note) {
        return (body, metadata_from_value(&value));
    }
    if let Some((body, value)) = backward_brace_scan(note) {
        return (body, metadata_from_value(&value));
    }
    (strip_trailing_junk(note), NoteMetadata::default())
}

fn last_fenced_block_with_metadata(note: &str) -> Option<(String, Value)> {
    let mut search_from = 0usize;
    let mut best: Option<(usize, Value)> = None;
    while let Some(rel_open) = note[search_from..].find("```") {
        let fence_start = search_from + rel_open;
        let after_fence = fence_start + 3;
        let body_start = {
            let rest = &note[after_fence..];
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            after_fence + (note[after_fence..].len() - rest.len())
        };
        let body_start = body_start + note[body_start..].len()
            - note[body_start..].trim_start_matches('\n').len();
        let Some(rel_close) = note[body_start..].find("```") else {
            break;
        };
        let block_text = note[body_start..body_start + rel_close].trim();
        let close_end = body_start + rel_close + 3;

        if let Ok(value) = serde_json::from_str::<Value>(block_text) {
            if has_metadata_key(&value) {
                best = Some((fence_start, value));
            }
        }
        search_from = close_end;
    }
    best.map(|(start, value)| {
        let body = note[..start].trim_end().to_string();
        (body, value)
    })
}

fn backward_brace_scan(note: &str) -> Option<(String, Value)> {
    let trimmed = note.trim_end();
    let bytes = trimmed.as_bytes();
    if bytes.last() != Some(&b'}') {
        return None;
    }
    let mut depth = 0i32;
    let mut i = bytes.len();
    while i > 0 {
        i -= 1;
        match bytes[i] {
            b'}' => depth += 1,
            b'{' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &trimmed[i..];
                    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                        if has_metadata_key(&value) {
                            return Some((trimmed[..i].trim_end().to_string(), value));
                        }
                    }
                    return None;
                }
            }
            _ => {}
        }
    }
    None
}

fn has_metadata_key(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.contains_key("new_tasks") || map.contains_key("glossary_terms"))
}

/// Drop any trailing fenced block, or a trailing line starting with `{`,
/// that didn't parse as usable metadata — keeps unparseable junk out of the
/// prose body even when we can't extract anything structured from it.
fn strip_trailing_junk(note: &str) -> String {
    let trimmed = note.trim_end();
    if let Some(start) = trimmed.rfind("```") {
        if let Some(open) = trimmed[..start].rfind("```") {
            return trimmed[..open].trim_end().to_string();
        }
    }
    if let Some(last_line_start) = trimmed.rfind('\n') {
        if trimmed[last_line_start + 1..].trim_start().starts_with('{') {
            return trimmed[..last_line_start].trim_end().to_string();
        }
    } else if trimmed.trim_start().starts_with('{') {
        return String::new();
    }
    trimmed.to_string()
}

fn metadata_from_value(value: &Value) -> NoteMetadata {
    let new_tasks = value
        .get("new_tasks")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let topic = item.get("topic").and_then(Value::as_str)?.to_string();
                    let description = item
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or(&topic)
                        .to_string();
                    Some(NoteTask { topic, description })
                })
                .collect()
        })
        .unwrap_or_default();

    let glossary_terms = value
        .get("glossary_terms")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let term = item.get("term").and_then(Value::as_str)?.to_string();
                    let definition = item.get("definition").and_then(Value::as_str)?.to_string();
                    Some((term, definition))
                })
                .collect()
        })
        .unwrap_or_default();

    NoteMetadata { new_tasks, glossary_terms }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_text(content: &str) -> CompletionResponse {
        CompletionResponse {
            content: Some(content.to_string()),
            tool_call: None,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    #[test]
    fn parses_json_array_queries() {
        let response = response_text(r#"["first query", "second query"]"#);
        let queries = parse_query_list(&response, 5);
        assert_eq!(queries, vec!["first query", "second query"]);
    }

    #[test]
    fn parses_json_object_with_queries_key() {
        let response = response_text(r#"{"queries": ["a", "b", "a"]}"#);
        let queries = parse_query_list(&response, 5);
        assert_eq!(queries, vec!["a", "b"]);
    }

    #[test]
    fn falls_back_to_numbered_lines() {
        let response = response_text("1. climate policy trends\n2. carbon pricing models\n");
        let queries = parse_query_list(&response, 5);
        assert_eq!(queries, vec!["climate policy trends", "carbon pricing models"]);
    }

    #[test]
    fn clamps_to_max_queries() {
        let response = response_text("a\nb\nc\nd\n");
        let queries = parse_query_list(&response, 2);
        assert_eq!(queries.len(), 2);
    }

    #[test]
    fn extracts_trailing_fenced_metadata_block() {
        let note = "Some prose about the topic.\n\n```json\n{\"new_tasks\": [{\"topic\": \"deeper dive\", \"description\": \"go further\"}], \"glossary_terms\": [{\"term\": \"RAG\", \"definition\": \"retrieval augmented generation\"}]}\n```";
        let (body, metadata) = extract_note_metadata(note);
        assert_eq!(body, "Some prose about the topic.");
        assert_eq!(metadata.new_tasks.len(), 1);
        assert_eq!(metadata.new_tasks[0].topic, "deeper dive");
        assert_eq!(metadata.glossary_terms, vec![("RAG".to_string(), "retrieval augmented generation".to_string())]);
    }

    #[test]
    fn extracts_bare_trailing_json_object_via_brace_scan() {
        let note = "More prose here.\n{\"new_tasks\": [], \"glossary_terms\": [{\"term\": \"x\", \"definition\": \"y\"}]}";
        let (body, metadata) = extract_note_metadata(note);
        assert_eq!(body, "More prose here.");
        assert_eq!(metadata.glossary_terms.len(), 1);
    }

    #[test]
    fn drops_unparseable_trailing_json_as_safety_net() {
        let note = "Prose.\n{not valid json at all";
        let (body, metadata) = extract_note_metadata(note);
        assert_eq!(body, "Prose.");
        assert!(metadata.new_tasks.is_empty());
    }

    #[test]
    fn note_without_metadata_is_returned_unchanged() {
        let note = "Just plain prose with no trailing block.";
        let (body, metadata) = extract_note_metadata(note);
        assert_eq!(body, note);
        assert!(metadata.new_tasks.is_empty());
        assert!(metadata.glossary_terms.is_empty());
    }

    #[test]
    fn fallback_queries_cap_words_and_dedup_against_existing() {
        let existing = vec!["carbon pricing overview".to_string()];
        let queries = build_fallback_queries("carbon pricing", "a policy lever for emissions", &existing, 3);
        assert!(!queries.iter().any(|q| q.eq_ignore_ascii_case("carbon pricing overview")));
        assert!(queries.len() <= 3);
        assert!(queries.iter().all(|q| q.split_whitespace().count() <= 12));
    }

    #[test]
    fn fallback_queries_never_empty() {
        let queries = build_fallback_queries("x", "", &[], 1);
        assert!(!queries.is_empty());
    }

    #[test]
    fn parses_task_list_with_tasks_key() {
        let content = r#"{"tasks": [{"topic": "a", "description": "d", "priority": 7}]}"#;
        let tasks = parse_task_list(content);
        assert_eq!(tasks, vec![("a".to_string(), "d".to_string(), 7)]);
    }

    #[test]
    fn parse_task_list_empty_on_missing_key() {
        assert!(parse_task_list(r#"{"other": []}"#).is_empty());
    }

    #[test]
    fn gap_queries_empty_when_has_gaps_false() {
        let content = r#"{"has_gaps": false, "queries": ["x"]}"#;
        assert!(parse_gap_queries(content, 5).is_empty());
    }

    #[test]
    fn gap_queries_returned_when_has_gaps_true() {
        let content = r#"{"has_gaps": true, "queries": ["deeper angle", "deeper angle"]}"#;
        assert_eq!(parse_gap_queries(content, 5), vec!["deeper angle".to_string()]);
    }

    #[test]
    fn parse_json_object_unwraps_fenced_block() {
        let content = "```json\n{\"entities\": [\"a\"]}\n```";
        let value = parse_json_object(content).unwrap();
        assert_eq!(value["entities"][0], "a");
    }

    #[test]
    fn parse_json_object_none_on_garbage() {
        assert!(parse_json_object("not json at all").is_none());
    }
}
