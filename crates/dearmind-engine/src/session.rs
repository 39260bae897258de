//! Chat session context: prior turns and today's diary from the remote
//! history/diary service, folded into a system instruction plus history.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use dearmind_contracts::error::{error_chain_text, truncate_text};
use dearmind_contracts::{
    ConversationTurn, GenerationConfig, PipelineError, PipelineResult, Role,
};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::invoker::{RetryPolicy, RetryingInvoker};
use crate::prompts::chat_system_instruction;
use crate::services::{ChatModel, DiaryService, HistoryService};

const HISTORY_SERVICE: &str = "history";
const DIARY_SERVICE: &str = "diary";

#[derive(Debug, Deserialize)]
struct HistoryRow {
    role: String,
    #[serde(default)]
    content: String,
}

/// Parses `[{role, content}, ...]`, keeping the service's order.
pub fn parse_history(payload: Value) -> Result<Vec<ConversationTurn>, serde_json::Error> {
    let rows: Vec<HistoryRow> = serde_json::from_value(payload)?;
    Ok(rows
        .into_iter()
        .map(|row| ConversationTurn {
            role: Role::from_wire(&row.role),
            content: row.content,
        })
        .collect())
}

fn entry_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(obj) => match obj.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}

/// Flattens the diary service's loosely shaped responses into entry strings.
///
/// - array: each item (strings as-is, `{text}` objects by text, others as JSON)
/// - object with an `entries` array: those items
/// - object with `entry`: that single entry, or its items when it is an array
/// - any other object: its string values in key order
/// - anything else: no entries
pub fn normalize_diary_payload(payload: &Value) -> Vec<String> {
    match payload {
        Value::Array(items) => items.iter().map(entry_text).collect(),
        Value::Object(obj) => {
            if let Some(entries) = obj.get("entries").and_then(Value::as_array) {
                return entries.iter().map(entry_text).collect();
            }
            if let Some(entry) = obj.get("entry") {
                return match entry {
                    Value::Array(items) => items.iter().map(entry_text).collect(),
                    Value::Null => Vec::new(),
                    other => vec![entry_text(other)],
                };
            }
            obj.values()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        }
        _ => Vec::new(),
    }
}

/// HTTP client for the companion service that stores chat history and diaries.
#[derive(Debug, Clone)]
pub struct HttpSessionStore {
    http: HttpClient,
    history_url: String,
    diary_url: String,
    timeout: Duration,
}

impl HttpSessionStore {
    pub fn new(
        history_url: impl Into<String>,
        diary_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: HttpClient::new(),
            history_url: history_url.into(),
            diary_url: diary_url.into(),
            timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.history_url, &config.diary_url, config.fetch_timeout)
    }

    fn get(&self, service: &str, url: Url, credential: &str) -> PipelineResult<HttpResponse> {
        tracing::debug!(target: "dearmind::session", service, url = %url, "GET");
        self.http
            .get(url)
            .bearer_auth(credential)
            .timeout(self.timeout)
            .send()
            .map_err(|err| {
                PipelineError::upstream(
                    service,
                    None,
                    error_chain_text(&anyhow::Error::new(err), 512),
                )
            })
    }

    fn diary_url_for(&self, date: NaiveDate) -> PipelineResult<Url> {
        let mut url = Url::parse(&self.diary_url).map_err(|err| {
            PipelineError::Configuration(format!("invalid diary url '{}': {err}", self.diary_url))
        })?;
        url.query_pairs_mut()
            .append_pair("date", &date.format("%Y-%m-%d").to_string());
        Ok(url)
    }
}

fn json_or_upstream(service: &str, response: HttpResponse) -> PipelineResult<Value> {
    let status = response.status();
    let body = response.text().map_err(|err| {
        PipelineError::upstream(
            service,
            Some(status.as_u16()),
            format!("failed to read body: {err}"),
        )
    })?;
    if !status.is_success() {
        return Err(PipelineError::upstream(
            service,
            Some(status.as_u16()),
            truncate_text(body.trim(), 256),
        ));
    }
    serde_json::from_str(&body).map_err(|err| {
        PipelineError::upstream(
            service,
            Some(status.as_u16()),
            format!("invalid JSON body: {err}"),
        )
    })
}

impl HistoryService for HttpSessionStore {
    fn fetch_history(&self, credential: &str) -> PipelineResult<Vec<ConversationTurn>> {
        let url = Url::parse(&self.history_url).map_err(|err| {
            PipelineError::Configuration(format!(
                "invalid history url '{}': {err}",
                self.history_url
            ))
        })?;
        let response = self.get(HISTORY_SERVICE, url, credential)?;
        let status = response.status().as_u16();
        let payload = json_or_upstream(HISTORY_SERVICE, response)?;
        parse_history(payload).map_err(|err| {
            PipelineError::upstream(
                HISTORY_SERVICE,
                Some(status),
                format!("unexpected history shape: {err}"),
            )
        })
    }
}

impl DiaryService for HttpSessionStore {
    fn fetch_entries_for_date(
        &self,
        credential: &str,
        date: Option<NaiveDate>,
    ) -> PipelineResult<Vec<String>> {
        let date = date.unwrap_or_else(|| Local::now().date_naive());
        let response = self.get(DIARY_SERVICE, self.diary_url_for(date)?, credential)?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(target: "dearmind::session", %date, "no diary for date");
            return Ok(Vec::new());
        }
        let payload = json_or_upstream(DIARY_SERVICE, response)?;
        Ok(normalize_diary_payload(&payload))
    }
}

/// Everything a chat session is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub system_instruction: String,
    pub history: Vec<ConversationTurn>,
    pub diary_entries: Vec<String>,
}

pub struct SessionContextBuilder {
    history: Arc<dyn HistoryService>,
    diary: Arc<dyn DiaryService>,
    include_diary: bool,
}

impl SessionContextBuilder {
    pub fn new(history: Arc<dyn HistoryService>, diary: Arc<dyn DiaryService>) -> Self {
        Self {
            history,
            diary,
            include_diary: true,
        }
    }

    /// When disabled the diary service is not called at all.
    pub fn include_diary(mut self, include: bool) -> Self {
        self.include_diary = include;
        self
    }

    /// History first, then today's diary. Either fetch failing fails the build.
    pub fn build(&self, credential: &str) -> PipelineResult<SessionContext> {
        let history = self.history.fetch_history(credential)?;
        let diary_entries = if self.include_diary {
            self.diary.fetch_entries_for_date(credential, None)?
        } else {
            Vec::new()
        };
        Ok(SessionContext {
            system_instruction: chat_system_instruction(&diary_entries),
            history,
            diary_entries,
        })
    }
}

/// One chat session: the system instruction and prior turns are fixed at
/// creation and each sent message appends a user/model pair.
#[derive(Debug, Clone)]
pub struct ChatSession {
    model: String,
    system_instruction: String,
    history: Vec<ConversationTurn>,
    config: GenerationConfig,
}

impl ChatSession {
    pub fn create(model: impl Into<String>, context: SessionContext) -> Self {
        Self {
            model: model.into(),
            system_instruction: context.system_instruction,
            history: context.history,
            config: GenerationConfig::chat(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Single attempt. History is only extended when the model answers.
    pub fn send_message(&mut self, chat: &dyn ChatModel, message: &str) -> PipelineResult<String> {
        let reply = RetryingInvoker::new("chat", RetryPolicy::single_attempt())
            .invoke(
                |_| {
                    chat.reply(
                        &self.model,
                        &self.system_instruction,
                        &self.history,
                        message,
                        &self.config,
                    )
                },
                |_, _| {},
            )
            .into_invocation_result()?;
        self.history.push(ConversationTurn::user(message));
        self.history.push(ConversationTurn::model(reply.clone()));
        Ok(reply)
    }
}
