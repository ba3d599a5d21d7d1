use research_types::{ResearchError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./research.sqlite3".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSectionConfig {
    pub min_initial_tasks: u32,
    pub tasks_per_section: u32,
    pub max_total_tasks: i64,
    pub max_concurrent_tasks: usize,
    pub max_retries: i64,
    pub max_loops: u32,
    pub max_runtime_hours: f64,
    pub enable_recursion: bool,
    pub max_recursion_depth: i64,
}

impl Default for ResearchSectionConfig {
    fn default() -> Self {
        Self {
            min_initial_tasks: 4,
            tasks_per_section: 3,
            max_total_tasks: 40,
            max_concurrent_tasks: 1,
            max_retries: 2,
            max_loops: 200,
            max_runtime_hours: 3.0,
            enable_recursion: true,
            max_recursion_depth: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model_researcher: String,
    pub model_analyzer: String,
    pub model_writer: String,
    pub model_editor: String,
    pub max_tokens_researcher: u32,
    pub max_tokens_analyzer: u32,
    pub max_tokens_writer: u32,
    pub max_tokens_editor: u32,
    pub temperature_writer: f32,
    pub temperature_editor: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model_researcher: "gpt-4o-mini".into(),
            model_analyzer: "gpt-4o-mini".into(),
            model_writer: "gpt-4o".into(),
            model_editor: "gpt-4o".into(),
            max_tokens_researcher: 2000,
            max_tokens_analyzer: 1200,
            max_tokens_writer: 4000,
            max_tokens_editor: 1500,
            temperature_writer: 0.4,
            temperature_editor: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub queries_per_task: u32,
    pub results_per_query: u32,
    pub min_tavily_score: f64,
    pub searches_per_minute: f64,
    /// Query count for pre-planning's landscape search, distinct from
    /// `queries_per_task`'s per-task budget.
    pub pre_plan_queries: u32,
    pub pre_plan_max_results: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            queries_per_task: 3,
            results_per_query: 3,
            min_tavily_score: 0.2,
            searches_per_minute: 60.0,
            pre_plan_queries: 5,
            pre_plan_max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    pub max_content_length: usize,
    pub scrapes_per_minute: f64,
    pub timeout_seconds: u64,
    pub blocked_domains: Vec<String>,
    pub blocked_extensions: Vec<String>,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            max_content_length: 20_000,
            scrapes_per_minute: 60.0,
            timeout_seconds: 20,
            blocked_domains: vec!["pinterest.com".into(), "quora.com".into()],
            blocked_extensions: vec![".pdf".into(), ".zip".into(), ".exe".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub min_words_per_section: u32,
    pub max_words_per_section: u32,
    pub min_citations_per_section: u32,
    pub style: String,
    pub include_summary: bool,
    pub synthesis_pool_size: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            min_words_per_section: 400,
            max_words_per_section: 1200,
            min_citations_per_section: 2,
            style: "balanced".into(),
            include_summary: true,
            synthesis_pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GapAnalysisConfig {
    pub enabled: bool,
    pub max_gap_fill_tasks: u32,
    pub max_new_sections: u32,
    pub gap_fill_queries: u32,
    pub gap_fill_max_results: u32,
}

impl Default for GapAnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_gap_fill_tasks: 10,
            max_new_sections: 2,
            gap_fill_queries: 2,
            gap_fill_max_results: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_source_quality: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_source_quality: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: String,
    pub formats: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "./output".into(),
            formats: vec!["markdown".into(), "html".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRefinementConfig {
    pub enabled: bool,
    pub max_questions: u32,
}

impl Default for QueryRefinementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_questions: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub database: DatabaseConfig,
    pub research: ResearchSectionConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub scraping: ScrapingConfig,
    pub synthesis: SynthesisConfig,
    pub gap_analysis: GapAnalysisConfig,
    pub quality: QualityConfig,
    pub output: OutputConfig,
    pub query_refinement: QueryRefinementConfig,
    pub logging: LoggingConfig,
}

impl ResearchConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| ResearchError::Config(format!("invalid config YAML: {e}")))
    }

    pub fn load_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Apply a `section.field=value` dotted override, coercing `value` to
    /// the type the default field already has. Unknown sections/fields are
    /// a fatal config error, never a silent no-op.
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<()> {
        let mut value_json = serde_json::to_value(&*self)
            .map_err(|e| ResearchError::Config(format!("internal config serialization error: {e}")))?;
        set_dotted(&mut value_json, key, value)?;
        *self = serde_json::from_value(value_json)
            .map_err(|e| ResearchError::Config(format!("invalid override {key}={value}: {e}")))?;
        Ok(())
    }

    pub fn apply_preset(&mut self, preset: &str) -> Result<()> {
        let overrides = preset_overrides(preset)
            .ok_or_else(|| ResearchError::Config(format!("unknown preset {preset:?}")))?;
        for (key, value) in overrides {
            self.apply_override(key, value)?;
        }
        Ok(())
    }
}

fn set_dotted(root: &mut serde_json::Value, key: &str, value: &str) -> Result<()> {
    let (section, field) = key
        .split_once('.')
        .ok_or_else(|| ResearchError::Config(format!("override key {key:?} must be section.field")))?;
    let section_value = root
        .get_mut(section)
        .ok_or_else(|| ResearchError::Config(format!("unknown config section {section:?}")))?;
    let target = section_value
        .get_mut(field)
        .ok_or_else(|| ResearchError::Config(format!("unknown field {field:?} in section {section:?}")))?;

    *target = coerce_like(target, value)
        .ok_or_else(|| ResearchError::Config(format!("could not coerce {value:?} to match {key}'s type")))?;
    Ok(())
}

fn coerce_like(existing: &serde_json::Value, raw: &str) -> Option<serde_json::Value> {
    use serde_json::Value;
    match existing {
        Value::Bool(_) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Number(n) if n.is_i64() || n.is_u64() => raw.parse::<i64>().ok().map(|v| Value::from(v)),
        Value::Number(_) => raw.parse::<f64>().ok().map(|v| serde_json::json!(v)),
        Value::String(_) => Some(Value::String(raw.to_string())),
        Value::Array(_) => Some(Value::Array(
            raw.split(',').map(|s| Value::String(s.trim().to_string())).collect(),
        )),
        _ => None,
    }
}

/// Preset override bundles, checked in as data per the configuration
/// design. `deep`/`exhaustive` widen the research scope; `quick` narrows it.
fn preset_overrides(preset: &str) -> Option<Vec<(&'static str, &'static str)>> {
    Some(match preset {
        "quick" => vec![
            ("research.min_initial_tasks", "2"),
            ("research.tasks_per_section", "1"),
            ("research.max_total_tasks", "8"),
            ("gap_analysis.enabled", "false"),
        ],
        "standard" => vec![],
        "deep" => vec![
            ("research.min_initial_tasks", "6"),
            ("research.tasks_per_section", "4"),
            ("research.max_total_tasks", "60"),
            ("gap_analysis.max_gap_fill_tasks", "15"),
        ],
        "exhaustive" => vec![
            ("research.min_initial_tasks", "10"),
            ("research.tasks_per_section", "6"),
            ("research.max_total_tasks", "120"),
            ("research.max_concurrent_tasks", "8"),
            ("gap_analysis.max_gap_fill_tasks", "30"),
            ("gap_analysis.max_new_sections", "4"),
        ],
        _ => return None,
    })
}

pub fn list_presets() -> Vec<&'static str> {
    vec!["quick", "standard", "deep", "exhaustive"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes_and_round_trips_through_yaml() {
        let config = ResearchConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = ResearchConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.research.max_total_tasks, config.research.max_total_tasks);
    }

    #[test]
    fn override_coerces_int_and_bool() {
        let mut config = ResearchConfig::default();
        config.apply_override("research.max_total_tasks", "50").unwrap();
        assert_eq!(config.research.max_total_tasks, 50);
        config.apply_override("gap_analysis.enabled", "false").unwrap();
        assert!(!config.gap_analysis.enabled);
    }

    #[test]
    fn override_on_unknown_path_errors() {
        let mut config = ResearchConfig::default();
        assert!(config.apply_override("research.not_a_field", "1").is_err());
        assert!(config.apply_override("not_a_section.x", "1").is_err());
    }

    #[test]
    fn preset_quick_disables_gap_analysis() {
        let mut config = ResearchConfig::default();
        config.apply_preset("quick").unwrap();
        assert!(!config.gap_analysis.enabled);
        assert_eq!(config.research.max_total_tasks, 8);
    }
}
