//! Audit stream for token issuance and authorization decisions.
//!
//! Every event is emitted via `tracing::info!` with the serialized event in
//! the `audit` field, queryable by any log aggregator. In multi-tenant mode
//! the same events are also written to the registry's audit table; a failing
//! sink is logged and never fails the request.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::token::{Permissions, TokenClaims, TokenRequest};
use crate::xapi::Actor;

/// One audit record per token issuance or authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event type (`token.issued`, `statements.write`, …).
    pub operation: &'static str,
    /// Tenant the request resolved to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Actor from the token claims or request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    /// Registration from the claims.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    /// Activity from the claims.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    /// Scopes in play.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    /// Whether the operation was admitted.
    pub success: bool,
    /// Denial or failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Client IP (from `X-Forwarded-For` / `X-Real-IP` when present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Client User-Agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    fn base(operation: &'static str, success: bool) -> Self {
        Self {
            operation,
            tenant_id: None,
            actor: None,
            registration: None,
            activity_id: None,
            permissions: None,
            success,
            error: None,
            client_ip: None,
            user_agent: None,
            timestamp: Utc::now(),
        }
    }

    /// A `token.issued` event for a successful issuance.
    #[must_use]
    pub fn token_issued(tenant_id: &str, request: &TokenRequest) -> Self {
        Self {
            tenant_id: Some(tenant_id.to_string()),
            actor: Some(request.actor.clone()),
            registration: Some(request.registration.clone()),
            activity_id: Some(request.activity_id.clone()),
            permissions: Some(request.permissions.clone()),
            ..Self::base("token.issued", true)
        }
    }

    /// A `token.rejected` event for a refused issuance.
    #[must_use]
    pub fn token_rejected(tenant_id: &str, reason: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.to_string()),
            error: Some(reason.into()),
            ..Self::base("token.rejected", false)
        }
    }

    /// An admitted authorization decision on the content path.
    #[must_use]
    pub fn authorized(operation: &'static str, claims: &TokenClaims) -> Self {
        Self {
            tenant_id: Some(claims.tenant_id.clone()),
            actor: Some(claims.actor.clone()),
            registration: Some(claims.registration.clone()),
            activity_id: Some(claims.activity_id.clone()),
            permissions: Some(claims.permissions.clone()),
            ..Self::base(operation, true)
        }
    }

    /// A denied authorization decision on the content path.
    #[must_use]
    pub fn denied(
        operation: &'static str,
        claims: &TokenClaims,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(reason.into()),
            success: false,
            ..Self::authorized(operation, claims)
        }
    }

    /// Attach client metadata extracted at the HTTP boundary.
    #[must_use]
    pub fn with_client(mut self, ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        self.client_ip = ip;
        self.user_agent = user_agent;
        self
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Scope;

    fn request() -> TokenRequest {
        TokenRequest {
            actor: Actor {
                mbox: Some("mailto:a@x".into()),
                ..Actor::default()
            },
            registration: "R1".into(),
            activity_id: "https://ex/a".into(),
            course_id: None,
            permissions: Permissions {
                write: Scope::ActorActivityRegistration,
                read: Scope::ActorActivityRegistration,
            },
            group: None,
            metadata: None,
        }
    }

    fn claims() -> TokenClaims {
        TokenClaims {
            tenant_id: "acme".into(),
            actor: request().actor,
            registration: "R1".into(),
            activity_id: "https://ex/a".into(),
            course_id: None,
            permissions: request().permissions,
            group: None,
            metadata: None,
            iat: 0,
            exp: 1,
            iss: crate::token::TOKEN_ISSUER.into(),
            sub: "mailto:a@x".into(),
        }
    }

    #[test]
    fn issued_event_carries_request_fields() {
        let event = AuditEvent::token_issued("acme", &request());
        assert_eq!(event.operation, "token.issued");
        assert!(event.success);
        assert_eq!(event.tenant_id.as_deref(), Some("acme"));
        assert_eq!(event.registration.as_deref(), Some("R1"));
        assert!(event.permissions.is_some());
        assert!(event.error.is_none());
    }

    #[test]
    fn denied_event_carries_reason() {
        let event = AuditEvent::denied("statements.write", &claims(), "actor mismatch");
        assert_eq!(event.operation, "statements.write");
        assert!(!event.success);
        assert_eq!(event.error.as_deref(), Some("actor mismatch"));
    }

    #[test]
    fn events_serialize_to_json() {
        let events = vec![
            AuditEvent::token_issued("acme", &request()),
            AuditEvent::token_rejected("acme", "unknown scope"),
            AuditEvent::authorized("statements.read", &claims()),
            AuditEvent::denied("state.access", &claims(), "agent mismatch"),
        ];
        for event in events {
            assert!(serde_json::to_string(&event).is_ok());
        }
    }

    #[test]
    fn with_client_attaches_ip_and_user_agent() {
        let event = AuditEvent::authorized("statements.write", &claims())
            .with_client("10.1.2.3".parse().ok(), Some("cmi5-player/2.1".into()));
        assert_eq!(event.client_ip.unwrap().to_string(), "10.1.2.3");
        assert_eq!(event.user_agent.as_deref(), Some("cmi5-player/2.1"));
    }

    #[test]
    fn emit_does_not_panic() {
        emit(&AuditEvent::token_rejected("acme", "test"));
    }
}
