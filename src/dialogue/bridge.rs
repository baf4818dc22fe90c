use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::DialogueConfig;
use crate::error::{CallError, CallResult};

/// Reply type asking for dial-pad input next
pub const TYPE_DIAL_PAD_NEXT: i64 = 5;
/// Reply type closing the conversation
pub const TYPE_END_CALL: i64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub speaker: Speaker,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// A system reply, interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeReply {
    pub content: String,
    pub dial_pad_next: bool,
    pub end_call: bool,
    pub input_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct KeyResponse {
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    #[serde(rename = "type", default)]
    kind: Option<i64>,
    #[serde(default)]
    spoken_response: String,
    input_id: Option<u64>,
}

/// HTTP client for the chat backend. Cheap to clone; clones share the key,
/// the pending dial-pad slot and the transcript.
#[derive(Clone)]
pub struct DialogueBridge {
    client: reqwest::Client,
    base_url: String,
    key_header: String,
    greeting: String,
    state: Arc<Mutex<BridgeState>>,
}

#[derive(Default)]
struct BridgeState {
    key: Option<String>,
    pending_input: Option<u64>,
    transcript: Vec<DialogueTurn>,
}

impl DialogueBridge {
    pub fn new(config: &DialogueConfig, greeting: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            key_header: config.key_header.clone(),
            greeting: greeting.to_string(),
            state: Arc::new(Mutex::new(BridgeState::default())),
        }
    }

    /// Obtain a key from `GET /chat/new`. Returns whether the bridge is ready.
    pub async fn register(&self) -> bool {
        let url = format!("{}/chat/new", self.base_url);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Dialogue registration failed: {}", e);
                return false;
            }
        };

        if !response.status().is_success() {
            error!("Dialogue registration returned status {}", response.status());
            return false;
        }

        let key = match response.json::<KeyResponse>().await {
            Ok(body) => body.key.filter(|k| !k.is_empty()),
            Err(e) => {
                error!("Dialogue registration body unreadable: {}", e);
                return false;
            }
        };

        match key {
            Some(key) => {
                self.lock().key = Some(key);
                info!("Dialogue bridge registered");
                true
            }
            None => {
                error!("Dialogue registration returned no key");
                false
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.lock().key.is_some()
    }

    /// Append and return the greeting turn
    pub fn start(&self) -> DialogueTurn {
        let turn = DialogueTurn {
            speaker: Speaker::System,
            content: self.greeting.clone(),
            at: Utc::now(),
        };
        self.lock().transcript.push(turn.clone());
        turn
    }

    /// Send a caller utterance and interpret the reply
    pub async fn chat(&self, text: &str) -> CallResult<BridgeReply> {
        let Some(key) = self.key() else {
            warn!("chat called before the bridge registered; ignoring {:?}", text);
            return Err(CallError::NotRegistered);
        };

        let url = format!("{}/chat", self.base_url);
        let body = self.post(&url, &key, text).await?;
        let reply = interpret(body)?;

        self.record_exchange(text, &reply);
        Ok(reply)
    }

    /// Submit collected dial-pad digits to the pending input slot. The slot is
    /// consumed before the request, so a second call fails with `NoPendingInput`.
    pub async fn supply_input(&self, digits: &str) -> CallResult<BridgeReply> {
        let Some(key) = self.key() else {
            warn!("supply_input called before the bridge registered");
            return Err(CallError::NotRegistered);
        };
        let Some(input_id) = self.lock().pending_input.take() else {
            warn!("supply_input called with no pending input slot");
            return Err(CallError::NoPendingInput);
        };

        info!("Supplying dial-pad input to slot {}", input_id);
        let url = format!("{}/chat/supply/{}", self.base_url, input_id);
        let body = self.post(&url, &key, digits).await?;
        let reply = interpret(body)?;

        self.record_exchange(digits, &reply);
        Ok(reply)
    }

    pub fn has_pending_input(&self) -> bool {
        self.lock().pending_input.is_some()
    }

    pub fn transcript(&self) -> Vec<DialogueTurn> {
        self.lock().transcript.clone()
    }

    async fn post(&self, url: &str, key: &str, body: &str) -> CallResult<ChatResponse> {
        let response = self
            .client
            .post(url)
            .header(self.key_header.as_str(), key)
            .header("Content-Type", "text/plain")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                error!("Dialogue request to {} failed: {}", url, e);
                CallError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Dialogue backend returned {} for {}", status, url);
            return Err(CallError::BackendStatus(status.as_u16()));
        }

        let parsed: ChatResponse = response.json().await?;
        debug!("Dialogue response: {:?}", parsed);
        Ok(parsed)
    }

    fn record_exchange(&self, user_text: &str, reply: &BridgeReply) {
        let now = Utc::now();
        let mut state = self.lock();
        state.transcript.push(DialogueTurn {
            speaker: Speaker::User,
            content: user_text.to_string(),
            at: now,
        });
        state.transcript.push(DialogueTurn {
            speaker: Speaker::System,
            content: reply.content.clone(),
            at: now,
        });
        if reply.dial_pad_next {
            state.pending_input = reply.input_id;
        }
    }

    fn key(&self) -> Option<String> {
        self.lock().key.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn interpret(response: ChatResponse) -> CallResult<BridgeReply> {
    let kind = response.kind.unwrap_or_default();
    let dial_pad_next = kind == TYPE_DIAL_PAD_NEXT;

    if dial_pad_next && response.input_id.is_none() {
        error!("Dial-pad reply without an input id: {:?}", response);
        return Err(CallError::MissingInputId);
    }

    Ok(BridgeReply {
        content: response.spoken_response,
        dial_pad_next,
        end_call: kind == TYPE_END_CALL,
        input_id: response.input_id,
    })
}
