use research_types::{ResearchError, Result};

pub struct ReportDraft {
    pub title: String,
    pub executive_summary: Option<String>,
    pub sections: Vec<(String, String)>,
    pub conclusion: Option<String>,
    pub glossary: Vec<(String, String)>,
    pub references: Vec<String>,
}

/// Render the compiled report as Markdown. This is the engine's own output
/// format, not a conversion through a third-party Markdown engine, so it's
/// just string assembly.
pub fn render_markdown(draft: &ReportDraft) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", draft.title));

    if let Some(summary) = &draft.executive_summary {
        out.push_str("## Executive Summary\n\n");
        out.push_str(summary);
        out.push_str("\n\n");
    }

    for (title, content) in &draft.sections {
        out.push_str(&format!("## {title}\n\n"));
        out.push_str(content);
        out.push_str("\n\n");
    }

    if let Some(conclusion) = &draft.conclusion {
        out.push_str("## Conclusion\n\n");
        out.push_str(conclusion);
        out.push_str("\n\n");
    }

    if !draft.glossary.is_empty() {
        out.push_str("## Glossary\n\n");
        for (term, definition) in &draft.glossary {
            out.push_str(&format!("- **{term}**: {definition}\n"));
        }
        out.push('\n');
    }

    if !draft.references.is_empty() {
        out.push_str("## References\n\n");
        for (i, reference) in draft.references.iter().enumerate() {
            out.push_str(&format!("{}. {reference}\n", i + 1));
        }
    }

    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Markdown-to-HTML conversion is out of scope (the engine leaves that to a
/// rendering engine it doesn't own); this produces a minimal, valid HTML
/// document that preserves the Markdown body verbatim inside a `<pre>` block
/// rather than attempting to parse it.
pub fn render_html(draft: &ReportDraft) -> String {
    let markdown = render_markdown(draft);
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head>\n\
         <body><pre>{}</pre></body></html>\n",
        escape_html(&draft.title),
        escape_html(&markdown)
    )
}

/// PDF export is not yet supported.
pub fn render_pdf(_draft: &ReportDraft) -> Result<Vec<u8>> {
    Err(ResearchError::Compile("PDF export is not yet supported".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ReportDraft {
        ReportDraft {
            title: "Report".into(),
            executive_summary: Some("Summary.".into()),
            sections: vec![("Background".into(), "Body [1].".into())],
            conclusion: Some("Done.".into()),
            glossary: vec![("Term".into(), "Definition".into())],
            references: vec!["https://example.com".into()],
        }
    }

    #[test]
    fn markdown_includes_every_section() {
        let md = render_markdown(&sample());
        assert!(md.contains("# Report"));
        assert!(md.contains("## Background"));
        assert!(md.contains("## References"));
        assert!(md.contains("1. https://example.com"));
    }

    #[test]
    fn pdf_export_is_unsupported() {
        assert!(render_pdf(&sample()).is_err());
    }
}
