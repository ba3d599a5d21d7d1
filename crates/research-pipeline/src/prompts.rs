//! Prompt sets as data. Wording lives in `prompts/*.yaml`, embedded into the
//! binary at compile time; only the named slots (stage + call name, a
//! system message and one or more user variants) are load-bearing here.

use std::collections::HashMap;

use research_types::{ResearchError, Result};
use serde::Deserialize;

const EMBEDDED: &[(&str, &str)] = &[
    ("pre_plan_queries", include_str!("../prompts/pre_plan_queries.yaml")),
    ("pre_plan_analysis", include_str!("../prompts/pre_plan_analysis.yaml")),
    ("pre_plan_landscape", include_str!("../prompts/pre_plan_landscape.yaml")),
    ("outline_design", include_str!("../prompts/outline_design.yaml")),
    ("task_planning", include_str!("../prompts/task_planning.yaml")),
    ("query_generation", include_str!("../prompts/query_generation.yaml")),
    ("gap_identification", include_str!("../prompts/gap_identification.yaml")),
    ("note_synthesis", include_str!("../prompts/note_synthesis.yaml")),
    ("section_synthesis", include_str!("../prompts/section_synthesis.yaml")),
    ("executive_summary", include_str!("../prompts/executive_summary.yaml")),
    ("conclusion", include_str!("../prompts/conclusion.yaml")),
];

const REQUIRED: &[&str] = &[
    "pre_plan_queries",
    "pre_plan_analysis",
    "pre_plan_landscape",
    "outline_design",
    "task_planning",
    "query_generation",
    "gap_identification",
    "note_synthesis",
    "section_synthesis",
    "executive_summary",
    "conclusion",
];

#[derive(Debug, Clone, Deserialize)]
struct UserVariants {
    #[serde(default)]
    plain: Option<String>,
    #[serde(default)]
    json: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPromptSet {
    #[allow(dead_code)]
    stage: String,
    name: String,
    system: String,
    user: UserVariants,
}

#[derive(Debug, Clone)]
pub struct PromptSet {
    pub system: String,
}

/// Named prompt sets, validated once at startup. Wording is out of scope;
/// this only guarantees every call site the pipeline makes has a system
/// message to send.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    sets: HashMap<String, PromptSet>,
}

impl PromptLibrary {
    pub fn load() -> Result<Self> {
        let mut sets = HashMap::new();
        for (key, raw) in EMBEDDED {
            let parsed: RawPromptSet = serde_yaml::from_str(raw)
                .map_err(|e| ResearchError::Config(format!("prompt set {key} is invalid yaml: {e}")))?;
            if parsed.system.trim().is_empty() {
                return Err(ResearchError::Config(format!("prompt set {key} has an empty system message")));
            }
            if parsed.user.plain.is_none() && parsed.user.json.is_none() {
                return Err(ResearchError::Config(format!("prompt set {key} has no user variant")));
            }
            sets.insert(parsed.name.clone(), PromptSet { system: parsed.system });
        }
        for name in REQUIRED {
            if !sets.contains_key(*name) {
                return Err(ResearchError::Config(format!("missing required prompt set {name}")));
            }
        }
        Ok(Self { sets })
    }

    pub fn system(&self, name: &str) -> &str {
        self.sets
            .get(name)
            .map(|s| s.system.as_str())
            .unwrap_or("You are a careful research assistant.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_all_required_prompt_sets() {
        let library = PromptLibrary::load().unwrap();
        for name in REQUIRED {
            assert!(!library.system(name).is_empty());
        }
    }
}
