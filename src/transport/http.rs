//! HTTP long-polling transport
//!
//! Talks to the backend over two endpoints: a delta channel polled with
//! the last seen revision, and an action endpoint for mutations. Wire
//! payloads are passed through as raw JSON values; the session parses
//! them tolerantly.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::{Error, Result};

use super::{
    HistoryPage, RateOperatorError, SendFileError, SessionHandshake, SessionTransport,
    SessionUpdate,
};

/// Long-poll timeout requested from the server, seconds
const POLL_TIMEOUT_SECS: u64 = 30;

struct HttpState {
    page_id: Option<String>,
    since: i64,
    buffered: VecDeque<SessionUpdate>,
    location: String,
    visitor_name: Option<String>,
}

/// [`SessionTransport`] over HTTP long-polling
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    state: Mutex<HttpState>,
}

impl HttpTransport {
    /// Create a transport against the given backend base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            state: Mutex::new(HttpState {
                page_id: None,
                since: 0,
                buffered: VecDeque::new(),
                location: String::new(),
                visitor_name: None,
            }),
        }
    }

    fn delta_url(&self) -> String {
        format!("{}/l/v/m/delta", self.base_url)
    }

    fn action_url(&self) -> String {
        format!("{}/l/v/m/action", self.base_url)
    }

    async fn init_request(
        &self,
        location: &str,
        visitor_name: Option<&str>,
        since: i64,
    ) -> Result<SessionHandshake> {
        let mut query: Vec<(&str, String)> = vec![
            ("event", "init".to_string()),
            ("since", since.to_string()),
            ("location", location.to_string()),
        ];
        if let Some(name) = visitor_name {
            query.push(("visitor-name", name.to_string()));
        }

        let response: Value = self
            .client
            .get(self.delta_url())
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let full_update = response.get("fullUpdate").cloned().unwrap_or(Value::Null);
        {
            let mut state = self.state.lock().await;
            if let Some(page_id) = full_update.get("pageId").and_then(Value::as_str) {
                state.page_id = Some(page_id.to_string());
            }
            if let Some(revision) = response.get("revision").and_then(Value::as_i64) {
                state.since = revision;
            }
        }

        let chat = full_update
            .get("chat")
            .filter(|c| !c.is_null())
            .cloned();
        let server_time_micros = full_update
            .get("currentTime")
            .and_then(Value::as_f64)
            .map(|seconds| (seconds * 1_000_000.0) as i64);

        Ok(SessionHandshake {
            chat,
            server_time_micros,
        })
    }

    async fn action(&self, fields: Vec<(&str, String)>) -> Result<Value> {
        let page_id = self.state.lock().await.page_id.clone();
        let mut form = fields;
        if let Some(page_id) = page_id {
            form.push(("page-id", page_id));
        }
        let response: Value = self
            .client
            .post(self.action_url())
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }
}

/// Turn one raw delta list entry into a typed update
fn parse_delta(delta: &Value) -> Option<SessionUpdate> {
    let object_type = delta.get("objectType").and_then(Value::as_str)?;
    let event = delta.get("event").and_then(Value::as_str)?;
    let data = delta.get("data").cloned().unwrap_or(Value::Null);

    match (object_type, event) {
        ("CHAT", "add") | ("CHAT", "upd") => Some(SessionUpdate::FullChat(data)),
        ("CHAT", "del") => Some(SessionUpdate::ChatCleared),
        ("CHAT_MESSAGE", "add") => Some(SessionUpdate::MessageAdded {
            message: data,
            after_id: delta
                .get("afterId")
                .and_then(Value::as_str)
                .map(str::to_owned),
        }),
        ("CHAT_MESSAGE", "upd") => Some(SessionUpdate::MessageChanged { message: data }),
        ("CHAT_MESSAGE", "del") => {
            let id = delta
                .get("id")
                .and_then(Value::as_str)
                .or_else(|| data.get("id").and_then(Value::as_str))?;
            Some(SessionUpdate::MessageRemoved { id: id.to_string() })
        }
        ("CHAT_STATE", "upd") => Some(SessionUpdate::ChatStateChanged {
            state: data.as_str().unwrap_or("unknown").to_string(),
        }),
        ("CHAT_OPERATOR", "upd") => Some(SessionUpdate::OperatorChanged { operator: data }),
        ("CHAT_OPERATOR_TYPING", "upd") => Some(SessionUpdate::OperatorTypingChanged {
            typing: data.as_bool().unwrap_or(false),
        }),
        ("CHAT_READ_BY_VISITOR", "upd") => Some(SessionUpdate::ReadByVisitorChanged {
            read: data.as_bool().unwrap_or(false),
        }),
        ("OPERATOR_RATE", "upd") => Some(SessionUpdate::OperatorRateChanged { rating: data }),
        _ => {
            debug!("unrecognized delta {}/{} ignored", object_type, event);
            None
        }
    }
}

#[async_trait]
impl SessionTransport for HttpTransport {
    async fn open_session(&self, config: &SessionConfig) -> Result<SessionHandshake> {
        info!("opening session at {} ({})", self.base_url, config.location);
        {
            let mut state = self.state.lock().await;
            state.location = config.location.clone();
            state.visitor_name = config.visitor_name.clone();
            state.since = 0;
        }
        let (location, visitor_name) = {
            let state = self.state.lock().await;
            (state.location.clone(), state.visitor_name.clone())
        };
        self.init_request(&location, visitor_name.as_deref(), 0).await
    }

    async fn next_update(&self) -> Result<Option<SessionUpdate>> {
        loop {
            let (since, page_id) = {
                let mut state = self.state.lock().await;
                if let Some(update) = state.buffered.pop_front() {
                    return Ok(Some(update));
                }
                (state.since, state.page_id.clone())
            };

            let mut query: Vec<(&str, String)> = vec![
                ("since", since.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
            ];
            if let Some(page_id) = page_id {
                query.push(("page-id", page_id));
            }

            let response: Value = self
                .client
                .get(self.delta_url())
                .query(&query)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let mut state = self.state.lock().await;
            if let Some(revision) = response.get("revision").and_then(Value::as_i64) {
                state.since = revision;
            }
            if let Some(list) = response.get("deltaList").and_then(Value::as_array) {
                for delta in list {
                    if let Some(update) = parse_delta(delta) {
                        state.buffered.push_back(update);
                    }
                }
            }
            // An empty poll result loops into the next long poll.
        }
    }

    async fn resume_session(&self) -> Result<SessionHandshake> {
        let (location, visitor_name, since) = {
            let state = self.state.lock().await;
            (
                state.location.clone(),
                state.visitor_name.clone(),
                state.since,
            )
        };
        info!("resuming session at revision {}", since);
        self.init_request(&location, visitor_name.as_deref(), since)
            .await
    }

    async fn send_message(&self, client_side_id: &str, text: &str) -> Result<()> {
        let response = self
            .action(vec![
                ("action", "chat.message".to_string()),
                ("client-side-id", client_side_id.to_string()),
                ("message", text.to_string()),
            ])
            .await?;
        match response.get("error").and_then(Value::as_str) {
            None => Ok(()),
            Some(code) => Err(Error::Transport(format!("send rejected: {code}"))),
        }
    }

    async fn send_file(
        &self,
        client_side_id: &str,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> std::result::Result<(), SendFileError> {
        let page_id = self.state.lock().await.page_id.clone().unwrap_or_default();
        let url = format!("{}/l/v/m/upload", self.base_url);
        let response = self
            .client
            .post(url)
            .query(&[
                ("client-side-id", client_side_id),
                ("filename", file_name),
                ("page-id", page_id.as_str()),
            ])
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(data)
            .send()
            .await
            .map_err(|e| {
                warn!("file upload failed: {}", e);
                SendFileError::Transport
            })?;

        let body: Value = response.json().await.map_err(|_| SendFileError::Transport)?;
        match body.get("error").and_then(Value::as_str) {
            None => Ok(()),
            Some("max_file_size_exceeded") => Err(SendFileError::FileSizeExceeded),
            Some("not_allowed_file_type") => Err(SendFileError::FileTypeNotAllowed),
            Some(other) => {
                warn!("file upload rejected: {}", other);
                Err(SendFileError::Transport)
            }
        }
    }

    async fn rate_operator(
        &self,
        operator_id: &str,
        rating: i32,
    ) -> std::result::Result<(), RateOperatorError> {
        let response = self
            .action(vec![
                ("action", "chat.operator_rate_select".to_string()),
                ("operator-id", operator_id.to_string()),
                ("rate", rating.to_string()),
            ])
            .await
            .map_err(|e| {
                warn!("rate request failed: {}", e);
                RateOperatorError::Transport
            })?;
        match response.get("error").and_then(Value::as_str) {
            None => Ok(()),
            Some("no-chat") => Err(RateOperatorError::NoChat),
            Some("operator-not-in-chat") => Err(RateOperatorError::OperatorNotInChat),
            Some(other) => {
                warn!("rate request rejected: {}", other);
                Err(RateOperatorError::Transport)
            }
        }
    }

    async fn set_visitor_typing(&self, draft: Option<String>) -> Result<()> {
        let mut fields = vec![
            ("action", "chat.visitor_typing".to_string()),
            (
                "typing",
                draft.is_some().to_string(),
            ),
        ];
        if let Some(draft) = draft {
            fields.push(("message-draft", draft));
        }
        self.action(fields).await?;
        Ok(())
    }

    async fn close_chat(&self) -> Result<()> {
        self.action(vec![("action", "chat.close".to_string())]).await?;
        Ok(())
    }

    async fn mark_chat_read(&self) -> Result<()> {
        self.action(vec![("action", "chat.read_by_visitor".to_string())])
            .await?;
        Ok(())
    }

    async fn request_history_before(&self, anchor_id: &str, limit: usize) -> Result<HistoryPage> {
        let page_id = self.state.lock().await.page_id.clone().unwrap_or_default();
        let url = format!("{}/l/v/history", self.base_url);
        let limit = limit.to_string();
        let response: Value = self
            .client
            .get(url)
            .query(&[
                ("before", anchor_id),
                ("limit", limit.as_str()),
                ("page-id", page_id.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let messages = response
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let has_more = response
            .get("hasMore")
            .and_then(Value::as_bool)
            .unwrap_or(!messages.is_empty());
        Ok(HistoryPage { messages, has_more })
    }
}
