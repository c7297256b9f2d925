//! Durable message API (REST).

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

use parley_shared::models::{ConversationSummary, Message, MessagePage, PageRequest};
use parley_shared::protocol::{MarkReadResponse, SendMessageRequest};
use parley_shared::types::UserId;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Header the server uses to hand back the next history cursor.
pub const NEXT_CURSOR_HEADER: &str = "x-next-cursor";

/// Everything the adapter needs from the durable side, always on behalf
/// of the signed-in identity.
#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn send_message(&self, receiver: &UserId, text: &str) -> Result<Message>;

    async fn list_conversation(&self, counterpart: &UserId, page: PageRequest)
        -> Result<MessagePage>;

    async fn list_for_user(&self) -> Result<Vec<ConversationSummary>>;

    async fn mark_read(&self, counterpart: &UserId) -> Result<usize>;
}

/// Walk every history page for `counterpart`, oldest first.
pub async fn full_history<A: MessageApi + ?Sized>(
    api: &A,
    counterpart: &UserId,
) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    let mut page = PageRequest::all();
    loop {
        let chunk = api.list_conversation(counterpart, page).await?;
        messages.extend(chunk.messages);
        match chunk.next {
            Some(after) => page.after = Some(after),
            None => return Ok(messages),
        }
    }
}

pub struct HttpMessageApi {
    http: reqwest::Client,
    base_url: String,
    identity: UserId,
    identity_header: String,
    with_credentials: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpMessageApi {
    pub fn new(config: &ClientConfig, identity: UserId) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("parley-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            identity,
            identity_header: config.identity_header.clone(),
            with_credentials: config.with_credentials,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.request(method, url);
        if self.with_credentials {
            builder.header(self.identity_header.as_str(), self.identity.as_str())
        } else {
            builder
        }
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        Err(ClientError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn send_message(&self, receiver: &UserId, text: &str) -> Result<Message> {
        let body = SendMessageRequest {
            receiver_id: receiver.clone(),
            message: text.to_string(),
        };
        let response = self
            .request(Method::POST, "/messages/send")
            .json(&body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn list_conversation(
        &self,
        counterpart: &UserId,
        page: PageRequest,
    ) -> Result<MessagePage> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(after) = page.after {
            query.push(("after", after.to_string()));
        }
        if let Some(limit) = page.limit {
            query.push(("limit", limit.to_string()));
        }

        let path = format!("/messages/conversation/{}", counterpart.as_str());
        let response = self.request(Method::GET, &path).query(&query).send().await?;
        let response = Self::check(response).await?;

        let next = response
            .headers()
            .get(NEXT_CURSOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let messages: Vec<Message> = response.json().await?;
        debug!(counterpart = %counterpart.short(), count = messages.len(), "Fetched history page");

        Ok(MessagePage { messages, next })
    }

    async fn list_for_user(&self) -> Result<Vec<ConversationSummary>> {
        let response = self
            .request(Method::GET, "/messages/conversations")
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn mark_read(&self, counterpart: &UserId) -> Result<usize> {
        let path = format!("/messages/conversation/{}/read", counterpart.as_str());
        let response = self.request(Method::PATCH, &path).send().await?;
        let body: MarkReadResponse = Self::check(response).await?.json().await?;
        Ok(body.updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(with_credentials: bool) -> HttpMessageApi {
        let mut config = ClientConfig::new("http://chat.test/");
        config.with_credentials = with_credentials;
        HttpMessageApi::new(&config, UserId::parse("alice").unwrap()).unwrap()
    }

    #[test]
    fn test_identity_header_attached() {
        let request = api(true)
            .request(Method::GET, "/messages/conversations")
            .build()
            .unwrap();
        assert_eq!(request.url().as_str(), "http://chat.test/messages/conversations");
        assert_eq!(request.headers()["x-user-id"], "alice");
    }

    #[test]
    fn test_credentials_can_be_disabled() {
        let request = api(false)
            .request(Method::PATCH, "/messages/conversation/bob/read")
            .build()
            .unwrap();
        assert_eq!(request.method(), Method::PATCH);
        assert!(request.headers().get("x-user-id").is_none());
    }
}
