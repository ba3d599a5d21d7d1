use std::collections::HashMap;

use research_types::Source;

/// Find `[N]` citation markers in `text`, excluding ones preceded by `]`
/// (double-bracket reference syntax) or followed by `(` (a markdown link).
/// `regex` has no lookaround support, so this scans manually rather than
/// porting the original lookaround pattern directly.
fn find_markers(text: &str) -> Vec<(usize, usize, u32)> {
    let bytes = text.as_bytes();
    let mut markers = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            let preceded_by_bracket = i > 0 && bytes[i - 1] == b']';
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b']' {
                let followed_by_paren = j + 1 < bytes.len() && bytes[j + 1] == b'(';
                if !preceded_by_bracket && !followed_by_paren {
                    if let Ok(n) = text[i + 1..j].parse::<u32>() {
                        markers.push((i, j + 1, n));
                    }
                }
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
    markers
}

/// Drop citation markers that don't resolve to any local source — a model
/// sometimes cites a number past the end of the source list it was given.
pub fn strip_phantom_citations(text: &str, local_source_count: usize) -> String {
    let markers = find_markers(text);
    if markers.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, n) in markers {
        out.push_str(&text[cursor..start]);
        if (n as usize) >= 1 && (n as usize) <= local_source_count {
            out.push_str(&text[start..end]);
        }
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Rewrites per-section local `[N]` markers into globally first-appearance-
/// ordered citation numbers while accumulating the final reference list.
/// Section A's `[1]` and section B's `[1]` end up pointing at different
/// global numbers unless they're literally the same source.
pub struct CitationRemapper {
    assigned: HashMap<i64, usize>,
    pub ordered_sources: Vec<Source>,
}

impl CitationRemapper {
    pub fn new() -> Self {
        Self {
            assigned: HashMap::new(),
            ordered_sources: Vec::new(),
        }
    }

    /// `local_sources` is this section's own source list, in the same order
    /// the section's author was given it (so `[1]` means `local_sources[0]`).
    pub fn remap_section(&mut self, content: &str, local_sources: &[Source]) -> String {
        let cleaned = strip_phantom_citations(content, local_sources.len());
        let markers = find_markers(&cleaned);
        if markers.is_empty() {
            return cleaned;
        }

        let mut out = String::with_capacity(cleaned.len());
        let mut cursor = 0;
        for (start, end, n) in markers {
            out.push_str(&cleaned[cursor..start]);
            let Some(source) = local_sources.get(n as usize - 1) else {
                cursor = end;
                continue;
            };
            let global = *self.assigned.entry(source.id).or_insert_with(|| {
                self.ordered_sources.push(source.clone());
                self.ordered_sources.len()
            });
            out.push('[');
            out.push_str(&global.to_string());
            out.push(']');
            cursor = end;
        }
        out.push_str(&cleaned[cursor..]);
        out
    }
}

impl Default for CitationRemapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn source(id: i64) -> Source {
        Source {
            id,
            url: format!("https://s{id}.example.com"),
            title: format!("source {id}"),
            domain: "example.com".into(),
            snippet: String::new(),
            full_content: None,
            quality_score: 1.0,
            is_academic: false,
            accessed_at: Utc::now(),
            extracted_content: None,
            task_ids: Vec::new(),
        }
    }

    #[test]
    fn strips_out_of_range_citations() {
        let text = "As shown [1] and also [9].";
        let cleaned = strip_phantom_citations(text, 1);
        assert_eq!(cleaned, "As shown [1] and also .");
    }

    #[test]
    fn remaps_repeated_source_to_same_global_number_across_sections() {
        let mut remapper = CitationRemapper::new();
        let shared = source(42);
        let a_only = source(7);

        let section_a = remapper.remap_section("alpha [1] beta [2]", &[shared.clone(), a_only]);
        assert_eq!(section_a, "alpha [1] beta [2]");

        let section_b = remapper.remap_section("gamma [1]", &[shared]);
        // Same underlying source id must reuse global citation 1, not mint a new one.
        assert_eq!(section_b, "gamma [1]");
        assert_eq!(remapper.ordered_sources.len(), 2);
    }

    #[test]
    fn ignores_markdown_links_and_double_brackets() {
        let text = "See [1](https://x.com) and note][2] here.";
        let cleaned = strip_phantom_citations(text, 5);
        assert_eq!(cleaned, text);
    }
}
