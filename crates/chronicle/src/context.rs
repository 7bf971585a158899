//! Request context: who is acting, and within which request.

use serde::{Deserialize, Serialize};

use chronicle_core::{ChainKey, EventType};

/// The contextual half of an audit event, supplied by the caller's request
/// pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub organization_id: String,

    /// Acting user; `None` for system-initiated work.
    pub user_id: Option<String>,

    pub request_id: String,

    /// Groups related events into one chain. Defaults to the request id.
    pub correlation_id: Option<String>,

    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Context for a user acting within a request.
    pub fn new(
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: Some(user_id.into()),
            request_id: request_id.into(),
            correlation_id: None,
            session_id: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Context for work the platform performs on its own behalf.
    pub fn system(organization_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            user_id: None,
            ..Self::new(organization_id, String::new(), request_id)
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_client(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    /// The chain an event of `event_type` raised in this context belongs to.
    pub fn chain_key(&self, event_type: EventType) -> ChainKey {
        ChainKey::for_request(
            &self.organization_id,
            self.correlation_id.as_deref(),
            &self.request_id,
            event_type,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_key_defaults_to_request() {
        let ctx = RequestContext::new("org", "alice", "req-1");
        assert_eq!(ctx.chain_key(EventType::RoleChange).correlation_id, "req-1");

        let ctx = ctx.with_correlation("onboarding-7");
        assert_eq!(
            ctx.chain_key(EventType::RoleChange),
            ChainKey::new("org", "onboarding-7", EventType::RoleChange)
        );
    }

    #[test]
    fn test_system_context_has_no_user() {
        let ctx = RequestContext::system("org", "job-1");
        assert_eq!(ctx.user_id, None);
        assert_eq!(ctx.request_id, "job-1");
    }
}
