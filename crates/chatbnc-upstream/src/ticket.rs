//! Login tickets for the upstream connection.
//!
//! The chat service doesn't take a password on the socket. The bouncer
//! first trades the account credentials for a short-lived ticket over
//! HTTP, then presents that ticket in its `IDN`. A fresh ticket is
//! fetched for every connection attempt.

use std::future::Future;

use serde::Deserialize;

use crate::UpstreamError;

/// Default ticket endpoint of the chat service.
pub const DEFAULT_TICKET_URL: &str = "https://www.f-list.net/json/getApiTicket.php";

/// What a successful ticket request yields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ticket {
    pub ticket: String,
    /// Bookmarked characters. The service doesn't send these over the
    /// socket, so they're merged into the snapshot's friend list.
    pub bookmarks: Vec<String>,
}

/// Source of login tickets.
pub trait TicketProvider: Send + Sync + 'static {
    /// Requests a new ticket.
    ///
    /// # Errors
    /// Returns `UpstreamError::Ticket` if the credentials are rejected or
    /// the endpoint can't be reached.
    fn ticket(&self) -> impl Future<Output = Result<Ticket, UpstreamError>> + Send;
}

#[derive(Debug, Deserialize)]
struct Bookmark {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TicketReply {
    #[serde(default)]
    ticket: String,
    #[serde(default)]
    bookmarks: Vec<Bookmark>,
    #[serde(default)]
    error: String,
}

impl TicketReply {
    fn into_ticket(self) -> Result<Ticket, UpstreamError> {
        if !self.error.is_empty() {
            return Err(UpstreamError::Ticket(self.error));
        }
        if self.ticket.is_empty() {
            return Err(UpstreamError::Ticket("reply carried no ticket".into()));
        }
        Ok(Ticket {
            ticket: self.ticket,
            bookmarks: self.bookmarks.into_iter().map(|b| b.name).collect(),
        })
    }
}

/// [`TicketProvider`] backed by the chat service's HTTP API.
#[derive(Debug, Clone)]
pub struct ApiTicketProvider {
    client: reqwest::Client,
    url: String,
    account: String,
    password: String,
}

impl ApiTicketProvider {
    pub fn new(
        url: impl Into<String>,
        account: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            account: account.into(),
            password: password.into(),
        }
    }
}

impl TicketProvider for ApiTicketProvider {
    async fn ticket(&self) -> Result<Ticket, UpstreamError> {
        let reply: TicketReply = self
            .client
            .post(&self.url)
            .form(&[
                ("account", self.account.as_str()),
                ("password", self.password.as_str()),
                ("no_characters", "true"),
                ("no_friends", "true"),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| UpstreamError::Ticket(e.to_string()))?
            .json()
            .await
            .map_err(|e| UpstreamError::Ticket(e.to_string()))?;

        reply.into_ticket()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Ticket, UpstreamError> {
        serde_json::from_str::<TicketReply>(json).unwrap().into_ticket()
    }

    #[test]
    fn test_reply_with_ticket_and_bookmarks() {
        let ticket =
            parse(r#"{"ticket":"abc","bookmarks":[{"name":"Bob"},{"name":"Carol"}],"error":""}"#)
                .unwrap();
        assert_eq!(ticket.ticket, "abc");
        assert_eq!(ticket.bookmarks, ["Bob", "Carol"]);
    }

    #[test]
    fn test_reply_with_error_is_rejected() {
        let result = parse(r#"{"error":"Login failed."}"#);
        assert!(matches!(result, Err(UpstreamError::Ticket(e)) if e == "Login failed."));
    }

    #[test]
    fn test_reply_without_ticket_is_rejected() {
        assert!(parse("{}").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_ticket_error() {
        let provider = ApiTicketProvider::new("http://127.0.0.1:9/ticket", "acc", "pw");
        assert!(matches!(provider.ticket().await, Err(UpstreamError::Ticket(_))));
    }
}
