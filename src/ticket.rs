use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::ImportError;

pub trait TicketClient: Send + Sync {
    fn comments(&self, ticket: &str) -> Result<Vec<String>, ImportError>;
    fn add_comment(&self, ticket: &str, body: &str) -> Result<(), ImportError>;
}

#[derive(Clone)]
pub struct TicketHttpClient {
    client: Client,
    base_url: String,
}

impl TicketHttpClient {
    pub fn new(base_url: &str) -> Result<Self, ImportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("fqimport/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ImportError::TicketHttp(err.to_string()))?,
        );
        if let Ok(token) = std::env::var("TICKET_API_TOKEN") {
            if !token.trim().is_empty() {
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                        .map_err(|err| ImportError::TicketHttp(err.to_string()))?,
                );
            }
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| ImportError::TicketHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl TicketClient for TicketHttpClient {
    fn comments(&self, ticket: &str) -> Result<Vec<String>, ImportError> {
        let url = format!("{}/issue/{ticket}/comment", self.base_url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ImportError::TicketHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "ticket request failed".to_string());
            return Err(ImportError::TicketStatus { status, message });
        }
        let payload: serde_json::Value = response
            .json()
            .map_err(|err| ImportError::TicketHttp(err.to_string()))?;
        let comments = payload
            .get("comments")
            .and_then(|value| value.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("body").and_then(|body| body.as_str()))
                    .map(|body| body.to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(comments)
    }

    fn add_comment(&self, ticket: &str, body: &str) -> Result<(), ImportError> {
        let url = format!("{}/issue/{ticket}/comment", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .map_err(|err| ImportError::TicketHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "ticket request failed".to_string());
            return Err(ImportError::TicketStatus { status, message });
        }
        Ok(())
    }
}
