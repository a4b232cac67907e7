//! Authentication hook for validating a client's ticket.
//!
//! chatbnc doesn't decide on its own whether a ticket is good. Tickets are
//! issued by the chat service's web API, so the bouncer asks that same API.
//! The [`Authenticator`] trait is the seam: one async method taking the
//! account and ticket. [`TicketAuthenticator`] is the production
//! implementation; tests plug in their own.

use std::future::Future;

use serde::Deserialize;

use crate::SessionError;

/// Default ticket-validation endpoint of the chat service.
pub const DEFAULT_AUTH_URL: &str = "https://www.f-list.net/json/api/auth.php";

/// Validates a client's single-use ticket for an account.
///
/// # Example
///
/// ```rust
/// use chatbnc_session::{Authenticator, SessionError};
///
/// /// Accepts one hard-coded ticket. Only for local experiments.
/// struct FixedTicket(&'static str);
///
/// impl Authenticator for FixedTicket {
///     async fn authenticate(
///         &self,
///         _account: &str,
///         ticket: &str,
///     ) -> Result<(), SessionError> {
///         if ticket == self.0 {
///             Ok(())
///         } else {
///             Err(SessionError::AuthFailed("wrong ticket".into()))
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns `Ok(())` if `ticket` is currently valid for `account`.
    ///
    /// # Errors
    /// - `SessionError::AuthFailed` — the ticket was rejected
    /// - `SessionError::Unavailable` — the check couldn't be performed
    fn authenticate(
        &self,
        account: &str,
        ticket: &str,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Shape of the auth endpoint's reply. An empty `error` means success.
#[derive(Debug, Deserialize)]
struct AuthReply {
    #[serde(default)]
    error: String,
}

/// An empty body is success. Anything that isn't a JSON reply is passed
/// through as the rejection reason.
fn parse_reply(body: &str) -> AuthReply {
    let body = body.trim();
    if body.is_empty() {
        return AuthReply {
            error: String::new(),
        };
    }
    serde_json::from_str(body).unwrap_or_else(|_| AuthReply {
        error: body.to_string(),
    })
}

/// [`Authenticator`] backed by the chat service's HTTP auth endpoint.
#[derive(Debug, Clone)]
pub struct TicketAuthenticator {
    client: reqwest::Client,
    url: String,
}

impl TicketAuthenticator {
    /// Creates an authenticator that posts to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl Default for TicketAuthenticator {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_URL)
    }
}

impl Authenticator for TicketAuthenticator {
    async fn authenticate(
        &self,
        account: &str,
        ticket: &str,
    ) -> Result<(), SessionError> {
        let body = self
            .client
            .post(&self.url)
            .form(&[("account", account), ("ticket", ticket)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SessionError::Unavailable(e.to_string()))?
            .text()
            .await
            .map_err(|e| SessionError::Unavailable(e.to_string()))?;

        let reply = parse_reply(&body);
        if reply.error.is_empty() {
            Ok(())
        } else {
            tracing::debug!(account, error = %reply.error, "ticket rejected");
            Err(SessionError::AuthFailed(reply.error))
        }
    }
}
