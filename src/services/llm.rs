//! Chat-completions client and the prompts the platform sends to it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;

use crate::config::LlmConfig;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn system(content: &str) -> Self {
        Self { role: "system".to_string(), content: content.to_string() }
    }

    fn user(content: &str) -> Self {
        Self { role: "user".to_string(), content: content.to_string() }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model API not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: reqwest::StatusCode, body: String },
    #[error("invalid JSON from model: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model returned no choices")]
    Empty,
}

/// Options of one completion call.
#[derive(Debug, Default, Clone, Copy)]
pub struct Completion {
    pub max_tokens: Option<u32>,
    pub json: bool,
}

#[derive(Clone)]
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    pub fn is_available(&self) -> bool {
        self.config.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        options: Completion,
    ) -> Result<String, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LlmError::NotConfigured("LLM_API_KEY"))?;

        let url = format!("{}/chat/completions", self.config.api_endpoint.trim_end_matches('/'));
        let mut payload = serde_json::json!({
            "model": self.config.model,
            "messages": [ChatMessage::system(system), ChatMessage::user(user)],
        });
        if let Some(max_tokens) = options.max_tokens {
            payload["max_tokens"] = max_tokens.into();
        }
        if options.json {
            payload["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let response = self.post_with_retry(&url, api_key, &payload).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or(LlmError::Empty)
    }

    async fn post_with_retry(
        &self,
        url: &str,
        api_key: &str,
        payload: &serde_json::Value,
    ) -> Result<ChatResponse, LlmError> {
        let mut attempt = 0;
        loop {
            let err = match self.http.post(url).bearer_auth(api_key).json(payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let bytes = resp.bytes().await?;
                    return serde_json::from_slice(&bytes).map_err(|e| {
                        tracing::error!("Unparseable model response: {}", e);
                        LlmError::Json(e)
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if !is_retryable(status) {
                        return Err(LlmError::HttpStatus { status, body });
                    }
                    LlmError::HttpStatus { status, body }
                }
                Err(e) => LlmError::Request(e),
            };

            if attempt >= MAX_RETRIES {
                return Err(err);
            }
            let backoff = Duration::from_millis(BASE_BACKOFF_MS << attempt);
            tracing::warn!(attempt, "Model request failed, retrying in {:?}: {}", backoff, err);
            sleep(backoff).await;
            attempt += 1;
        }
    }

    /// Tutor explanation of a wrong answer.
    pub async fn explain_answer(
        &self,
        question: &str,
        user_answer: &str,
        correct_answer: &str,
    ) -> Result<String, LlmError> {
        let prompt = format!(
            "You are an expert tutor. A student answered a multiple-choice question incorrectly.\n\n\
             Question: {question}\nStudent's Answer: {user_answer}\nCorrect Answer: {correct_answer}\n\n\
             Please provide a brief, encouraging, and clear explanation of:\n\
             1. Why the student's answer is incorrect.\n\
             2. Why the correct answer is right.\n\
             Keep it strictly under 100 words. Be friendly and helpful."
        );
        self.complete("You are a helpful AI tutor.", &prompt, Completion::default()).await
    }

    pub async fn lifeline_hint(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete(
            "You are a helpful quiz companion.",
            prompt,
            Completion { max_tokens: Some(60), json: false },
        )
        .await
    }

    pub async fn analyze_progress(&self, history: &str) -> Result<String, LlmError> {
        let prompt = format!(
            "You are an expert academic mentor. Analyze this student's recent quiz history:\n\n\
             {history}\n\
             Provide a short, motivating analysis (max 3 sentences).\n\
             1. Identify their strongest TOPIC (not just category).\n\
             2. Name a specific weak area based on the quiz titles where they scored low.\n\
             3. End with an encouraging remark.\n\
             Talk directly to the student (\"You...\")."
        );
        self.complete("You are a helpful academic mentor.", &prompt, Completion::default()).await
    }

    pub async fn generate_quiz(
        &self,
        topic: &str,
        limit: u32,
        difficulty: &str,
    ) -> Result<GeneratedQuizReply, LlmError> {
        let prompt = quiz_generation_prompt(topic, limit, difficulty);
        let raw = self
            .complete(
                "You are a helpful and ethical AI tutor. You strictly enforce educational guidelines.",
                &prompt,
                Completion { max_tokens: None, json: true },
            )
            .await?;
        parse_generated_quiz(&raw)
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn quiz_generation_prompt(topic: &str, limit: u32, difficulty: &str) -> String {
    format!(
        r#"Analyze the topic: "{topic}".
Difficulty Level: {difficulty}.

STRICT CONTENT GUIDELINES:
This platform is for study and educational purposes only.
1. REJECT topics involving: profanity, sexual content, violence, hate speech, illegal acts, or inappropriate adult themes.
2. REJECT topics that are purely for inappropriate entertainment.

If the topic violates these rules, return ONLY this JSON:
{{ "error": "This platform is designed mainly for study purposes. Please choose a polite and educational topic." }}

Otherwise create a multiple-choice quiz about "{topic}".
Number of questions: {limit}.
Complexity: {difficulty}.

Return ONLY raw JSON with exactly one correct choice per question:
{{
  "title": "Short Topic Title (Max 5 words)",
  "questions": [
    {{ "text": "Question?", "choices": [ {{"text": "A", "is_correct": false}}, {{"text": "B", "is_correct": true}} ] }}
  ]
}}"#
    )
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GeneratedChoice {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GeneratedQuestion {
    pub text: String,
    #[serde(default)]
    pub choices: Vec<GeneratedChoice>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GeneratedQuiz {
    pub title: Option<String>,
    #[serde(default)]
    pub questions: Vec<GeneratedQuestion>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedQuizReply {
    Quiz(GeneratedQuiz),
    /// The model declined the topic.
    Refused(String),
}

#[derive(Deserialize)]
struct Refusal {
    error: String,
}

/// Accepts the bare object or one wrapped in a markdown code fence.
pub fn parse_generated_quiz(raw: &str) -> Result<GeneratedQuizReply, LlmError> {
    let body = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Ok(refusal) = serde_json::from_str::<Refusal>(body) {
        return Ok(GeneratedQuizReply::Refused(refusal.error));
    }
    let quiz: GeneratedQuiz = serde_json::from_str(body)?;
    Ok(GeneratedQuizReply::Quiz(quiz))
}
