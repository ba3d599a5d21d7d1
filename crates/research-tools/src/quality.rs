const ACADEMIC_DOMAINS: &[&str] = &[".edu", ".gov", ".ac.uk", "arxiv.org", "ncbi.nlm.nih.gov", "doi.org"];
const LOW_TRUST_EXTENSIONS: &[&str] = &[".pdf.html", ".tk", ".top"];

pub struct ScoreInputs<'a> {
    pub search_relevance: f64,
    pub domain: &'a str,
    pub content_length: usize,
}

/// Blend the search API's relevance score with cheap local signals: academic
/// and government domains get a boost, suspiciously short pages are
/// penalized. Returned score is clamped to `[0.0, 1.0]`.
pub fn score_source(inputs: ScoreInputs<'_>) -> f64 {
    let domain_lower = inputs.domain.to_ascii_lowercase();
    let mut score = inputs.search_relevance.clamp(0.0, 1.0) * 0.7;

    if is_academic_domain(&domain_lower) {
        score += 0.2;
    }
    if LOW_TRUST_EXTENSIONS.iter().any(|ext| domain_lower.ends_with(ext)) {
        score -= 0.3;
    }

    let length_factor = (inputs.content_length as f64 / 2000.0).min(1.0) * 0.1;
    score += length_factor;

    score.clamp(0.0, 1.0)
}

pub fn is_academic_domain(domain: &str) -> bool {
    ACADEMIC_DOMAINS.iter().any(|suffix| domain.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn academic_domains_score_higher_than_equivalent_others() {
        let academic = score_source(ScoreInputs {
            search_relevance: 0.5,
            domain: "arxiv.org",
            content_length: 2000,
        });
        let ordinary = score_source(ScoreInputs {
            search_relevance: 0.5,
            domain: "example.com",
            content_length: 2000,
        });
        assert!(academic > ordinary);
    }

    #[test]
    fn score_stays_within_unit_range() {
        let score = score_source(ScoreInputs {
            search_relevance: 1.5,
            domain: "arxiv.org",
            content_length: 100_000,
        });
        assert!(score <= 1.0);
    }
}
