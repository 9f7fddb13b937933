use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tpa_config::ImplicitConfig;
use tpa_core::{AppError, ConfidenceLabel, Judgment};
use tpa_feedback::FeedbackExample;

/// A free-text task proposed by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplicitSuggestion {
    #[serde(alias = "task")]
    pub text: String,
    #[serde(default, alias = "reason")]
    pub rationale: Option<String>,
    /// The detector's own high/medium/low label; anything else is dropped.
    #[serde(default, deserialize_with = "lenient_label")]
    pub confidence: Option<ConfidenceLabel>,
}

impl ImplicitSuggestion {
    /// Starting score handed to the confidence model.
    pub fn prior(&self) -> f64 {
        self.confidence.unwrap_or(ConfidenceLabel::Medium).prior()
    }
}

fn lenient_label<'de, D>(deserializer: D) -> Result<Option<ConfidenceLabel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|label| label.parse().ok()))
}

/// External collaborator proposing tasks beyond explicit markers.
#[async_trait]
pub trait ImplicitDetector: Send + Sync {
    /// Suggest implicit tasks in `text`, guided by labelled `examples`.
    async fn detect(
        &self,
        text: &str,
        examples: &[FeedbackExample],
    ) -> Result<Vec<ImplicitSuggestion>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDetector;

#[async_trait]
impl ImplicitDetector for NoopDetector {
    async fn detect(
        &self,
        _text: &str,
        _examples: &[FeedbackExample],
    ) -> Result<Vec<ImplicitSuggestion>> {
        Ok(Vec::new())
    }
}

const SYSTEM_PROMPT: &str = "You find implicit tasks in notes: sentences that imply work to be done \
but are not marked with '- [ ]', '- [x]', 'TODO:', 'FIXME:' or 'XXX:'. \
Look for deferred checks, open decisions, needs and obligations, \
and follow-ups tied to a time (tomorrow, next week). Skip anything already marked. \
Also list sections that are empty or marked TBD/WIP/Draft, and questions left unanswered. \
Respond with strict JSON: {\"implicit_tasks\": [{\"text\": \"short imperative task\", \
\"rationale\": \"why\", \"confidence\": \"high|medium|low\"}], \
\"incomplete_sections\": [\"section title\"], \"unanswered_questions\": [\"question\"]}. \
Use empty arrays when there is nothing.";

const INCOMPLETE_SECTION_PREFIX: &str = "Complete section: ";
const UNANSWERED_QUESTION_PREFIX: &str = "Answer: ";

/// OpenAI-compatible chat completions client.
#[derive(Debug)]
pub struct ApiDetector {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ApiDetector {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            bail!("a model is required for ApiDetector");
        }
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model,
            client: reqwest::Client::new(),
        })
    }

    pub fn from_config(config: &ImplicitConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            AppError::Detector("no API key: set implicit.api_key or TPA_API_KEY".to_string())
        })?;
        Self::new(&config.base_url, api_key, &config.model)
    }

    async fn run_chat_completion(&self, user_prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": user_prompt}
                ],
                "temperature": 0.1
            }))
            .send()
            .await
            .with_context(|| format!("implicit detector request failed for model {}", self.model))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read implicit detector response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "implicit detector request failed: status {status}, body {}",
                truncate(&body, 200)
            ));
        }
        parse_completion_content(&body)
    }
}

#[async_trait]
impl ImplicitDetector for ApiDetector {
    async fn detect(
        &self,
        text: &str,
        examples: &[FeedbackExample],
    ) -> Result<Vec<ImplicitSuggestion>> {
        let prompt = build_user_prompt(text, examples);
        let content = self.run_chat_completion(&prompt).await?;
        parse_suggestions(&content).ok_or_else(|| {
            AppError::Detector(format!(
                "malformed detector response: {}",
                truncate(&content, 120)
            ))
            .into()
        })
    }
}

/// Document text preceded by labelled feedback examples.
pub fn build_user_prompt(text: &str, examples: &[FeedbackExample]) -> String {
    let mut prompt = format_examples(examples);
    prompt.push_str("Document:\n");
    prompt.push_str(text);
    prompt
}

/// Few-shot examples grouped by judgment, one labelled block per group.
/// Empty when there are no examples.
pub fn format_examples(examples: &[FeedbackExample]) -> String {
    let mut out = String::new();
    for (judgment, heading) in [
        (
            Judgment::Missed,
            "Tasks that were MISSED before (detect similar ones):",
        ),
        (
            Judgment::FalsePositive,
            "FALSE POSITIVES the user rejected (do not suggest similar):",
        ),
        (Judgment::Confirmed, "Suggestions the user confirmed:"),
    ] {
        let group: Vec<&FeedbackExample> =
            examples.iter().filter(|e| e.judgment == judgment).collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(heading);
        out.push('\n');
        for example in group {
            out.push_str(&format!("- \"{}\"", example.text));
            if let Some(corrected) = &example.corrected_text {
                out.push_str(&format!(" (user's version: \"{corrected}\")"));
            }
            if let Some(reason) = &example.reason {
                out.push_str(&format!(" - {reason}"));
            }
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// Parse a detector reply.
///
/// Accepts a JSON array, or an object carrying the array under `tasks` or
/// `implicit_tasks`, optionally wrapped in a Markdown code fence. An object
/// may also list `incomplete_sections` and `unanswered_questions`, which
/// become "Complete section: ..." and "Answer: ..." tasks. Returns `None`
/// when none of these shapes is present.
pub fn parse_suggestions(content: &str) -> Option<Vec<ImplicitSuggestion>> {
    let body = strip_code_fence(content.trim());
    let value: Value = serde_json::from_str(body).ok()?;
    let (items, sections, questions) = match value {
        Value::Array(items) => (items, Vec::new(), Vec::new()),
        Value::Object(mut map) => {
            let tasks = map.remove("tasks").or_else(|| map.remove("implicit_tasks"));
            let sections = map.remove("incomplete_sections");
            let questions = map.remove("unanswered_questions");
            if tasks.is_none() && sections.is_none() && questions.is_none() {
                return None;
            }
            let items = match tasks {
                Some(Value::Array(items)) => items,
                None | Some(Value::Null) => Vec::new(),
                Some(_) => return None,
            };
            (items, string_items(sections), string_items(questions))
        }
        _ => return None,
    };

    let mut suggestions: Vec<ImplicitSuggestion> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ImplicitSuggestion>(item).ok())
        .filter(|s| !s.text.trim().is_empty())
        .collect();
    suggestions.extend(sections.into_iter().map(|title| ImplicitSuggestion {
        text: format!("{INCOMPLETE_SECTION_PREFIX}{title}"),
        rationale: Some("section is empty or unfinished".to_string()),
        confidence: None,
    }));
    suggestions.extend(questions.into_iter().map(|question| ImplicitSuggestion {
        text: format!("{UNANSWERED_QUESTION_PREFIX}{question}"),
        rationale: Some("question has no answer yet".to_string()),
        confidence: None,
    }));
    Some(suggestions)
}

/// Non-empty strings of a JSON array; anything else yields nothing.
fn string_items(value: Option<Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_completion_content(body: &str) -> Result<String> {
    let value: Value =
        serde_json::from_str(body).context("failed to parse completion response JSON")?;
    value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing choices[0].message.content in completion response"))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}
