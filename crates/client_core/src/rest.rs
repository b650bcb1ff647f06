//! Request/response access to the chat backend for everything the push
//! channel cannot replay: conversation lists, history and statistics.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{AdminId, BranchId, ConversationId, ConversationStatus},
    error::{ApiError, ErrorCode},
    protocol::{
        ApiEnvelope, AssignBody, BranchPayload, ChatStats, ConversationPayload, MessagePayload,
        Pagination, SendMessageBody, DEFAULT_MESSAGE_TYPE,
    },
};
use tracing::{debug, warn};
use url::Url;

use crate::{error::GatewayError, transport::Credential};

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Option<Pagination>,
}

/// The subset of the backend the conversation store drives.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(
        &self,
        branch: &BranchId,
        status: ConversationStatus,
        page: u32,
        limit: u32,
    ) -> Result<Page<ConversationPayload>, GatewayError>;

    /// Chronological history, oldest first.
    async fn fetch_messages(
        &self,
        chat: &ConversationId,
        page: u32,
        limit: u32,
    ) -> Result<Page<MessagePayload>, GatewayError>;

    async fn mark_read(&self, chat: &ConversationId) -> Result<(), GatewayError>;

    async fn close_conversation(&self, chat: &ConversationId) -> Result<(), GatewayError>;
}

/// Branch picker row: directory entry joined with its chat statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchOverview {
    pub id: BranchId,
    pub name: String,
    pub address: Option<String>,
    pub active_chats: u32,
    pub total_unread: u32,
}

pub struct RestGateway {
    http: reqwest::Client,
    base: Url,
    credential: Credential,
}

impl RestGateway {
    pub fn new(
        api_base_url: &str,
        credential: Credential,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let mut base = Url::parse(api_base_url.trim())?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base,
            credential,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<ApiEnvelope<T>, GatewayError> {
        let body = self.execute_raw(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn execute_raw(&self, request: RequestBuilder) -> Result<String, GatewayError> {
        let response = request.bearer_auth(self.credential.expose()).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::UNAUTHORIZED {
            warn!("rest: credential rejected");
            return Err(GatewayError::Unauthorized);
        }
        if !status.is_success() {
            let decoded = serde_json::from_str::<ApiError>(&body).ok().map(|mut error| {
                error.code = ErrorCode::from_status(status.as_u16());
                error
            });
            let message = decoded
                .as_ref()
                .map(|error| error.message.clone())
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
                body: decoded,
            });
        }
        Ok(body)
    }

    /// Posts a message over HTTP. Not used automatically: a late socket
    /// delivery of the same text would duplicate it.
    pub async fn send_message(
        &self,
        chat: &ConversationId,
        content: &str,
    ) -> Result<MessagePayload, GatewayError> {
        let url = self.endpoint(&format!("api/chat/{chat}/messages"))?;
        let body = SendMessageBody {
            content: content.to_string(),
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
        };
        let envelope = self.execute(self.http.post(url).json(&body)).await?;
        Ok(envelope.data)
    }

    pub async fn assign_conversation(
        &self,
        chat: &ConversationId,
        admin: &AdminId,
    ) -> Result<(), GatewayError> {
        let url = self.endpoint(&format!("api/chat/admin/{chat}/assign"))?;
        let body = AssignBody {
            admin_id: admin.clone(),
        };
        self.execute_raw(self.http.put(url).json(&body)).await?;
        Ok(())
    }

    pub async fn chat_stats(&self, branch: Option<&BranchId>) -> Result<ChatStats, GatewayError> {
        let url = self.endpoint("api/chat/admin/stats")?;
        let mut request = self.http.get(url);
        if let Some(branch) = branch {
            request = request.query(&[("branchId", branch.as_str())]);
        }
        Ok(self.execute::<ChatStats>(request).await?.data)
    }

    pub async fn list_branches(&self) -> Result<Vec<BranchPayload>, GatewayError> {
        let url = self.endpoint("api/branches")?;
        Ok(self.execute::<Vec<BranchPayload>>(self.http.get(url)).await?.data)
    }

    /// Active branches with their open conversation and unread totals.
    /// Branches missing from the statistics report zero.
    pub async fn branch_overview(&self) -> Result<Vec<BranchOverview>, GatewayError> {
        let branches = self.list_branches().await?;
        let stats = match self.chat_stats(None).await {
            Ok(stats) => stats,
            Err(err) if err.is_unauthorized() => return Err(err),
            Err(err) => {
                warn!("rest: chat statistics unavailable: {err}");
                ChatStats::default()
            }
        };
        Ok(branches
            .into_iter()
            .filter(|branch| branch.is_active)
            .map(|branch| {
                let counts = stats
                    .by_branch
                    .iter()
                    .find(|entry| entry.branch_id == branch.id);
                BranchOverview {
                    active_chats: counts.map_or(0, |entry| entry.active_chats),
                    total_unread: counts.map_or(0, |entry| entry.total_unread),
                    address: branch.address.and_then(|address| address.line1),
                    id: branch.id,
                    name: branch.name,
                }
            })
            .collect())
    }
}

#[async_trait]
impl ChatBackend for RestGateway {
    async fn list_conversations(
        &self,
        branch: &BranchId,
        status: ConversationStatus,
        page: u32,
        limit: u32,
    ) -> Result<Page<ConversationPayload>, GatewayError> {
        let url = self.endpoint(&format!("api/chat/admin/branch/{branch}"))?;
        let request = self.http.get(url).query(&[
            ("status", status.as_query().to_string()),
            ("page", page.to_string()),
            ("limit", limit.to_string()),
        ]);
        let envelope = self.execute::<Vec<ConversationPayload>>(request).await?;
        debug!(branch_id = %branch, count = envelope.data.len(), "rest: conversations fetched");
        Ok(Page {
            items: envelope.data,
            pagination: envelope.pagination,
        })
    }

    async fn fetch_messages(
        &self,
        chat: &ConversationId,
        page: u32,
        limit: u32,
    ) -> Result<Page<MessagePayload>, GatewayError> {
        let url = self.endpoint(&format!("api/chat/{chat}/messages"))?;
        let request = self
            .http
            .get(url)
            .query(&[("page", page.to_string()), ("limit", limit.to_string())]);
        let envelope = self.execute::<Vec<MessagePayload>>(request).await?;
        debug!(conversation_id = %chat, count = envelope.data.len(), "rest: history fetched");
        Ok(Page {
            items: envelope.data,
            pagination: envelope.pagination,
        })
    }

    async fn mark_read(&self, chat: &ConversationId) -> Result<(), GatewayError> {
        let url = self.endpoint(&format!("api/chat/admin/{chat}/read"))?;
        self.execute_raw(self.http.put(url)).await?;
        Ok(())
    }

    async fn close_conversation(&self, chat: &ConversationId) -> Result<(), GatewayError> {
        let url = self.endpoint(&format!("api/chat/admin/{chat}/close"))?;
        self.execute_raw(self.http.put(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
