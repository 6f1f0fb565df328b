//! Token issuance — validates an LMS token request and mints a signed
//! session token under the tenant's key.

use chrono::{DateTime, TimeZone, Utc};

use super::{TOKEN_ISSUER, TokenClaims, TokenRequest};
use crate::tenant::TenantConfig;
use crate::{Error, Result};

/// A freshly minted token and its absolute expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact JWT string.
    pub token: String,
    /// Absolute expiry timestamp.
    pub expires_at: DateTime<Utc>,
}

/// Validate `request` and mint a token for `tenant`, expiring
/// `tenant.token_ttl_seconds` from now.
pub fn issue(tenant: &TenantConfig, request: &TokenRequest) -> Result<IssuedToken> {
    issue_at(tenant, request, Utc::now())
}

/// [`issue`] with a pinned clock. Issuance is deterministic given `now`.
pub fn issue_at(
    tenant: &TenantConfig,
    request: &TokenRequest,
    now: DateTime<Utc>,
) -> Result<IssuedToken> {
    validate_request(request)?;

    if tenant.token_ttl_seconds == 0 {
        return Err(Error::Internal("tenant token ttl must be positive".to_string()));
    }

    let iat = now.timestamp();
    let exp = iat + i64::try_from(tenant.token_ttl_seconds).unwrap_or(i64::MAX);

    let claims = TokenClaims {
        tenant_id: tenant.tenant_id.clone(),
        actor: request.actor.clone(),
        registration: request.registration.clone(),
        activity_id: request.activity_id.clone(),
        course_id: request.course_id.clone(),
        permissions: request.permissions.clone(),
        group: request.group.clone(),
        metadata: request.metadata.clone(),
        iat,
        exp,
        iss: TOKEN_ISSUER.to_string(),
        sub: request.actor.mbox.clone().unwrap_or_default(),
    };

    let token = super::sign(&claims, tenant.signing_key.as_bytes())
        .map_err(|e| Error::Internal(format!("token signing failed: {e}")))?;

    let expires_at = Utc
        .timestamp_opt(exp, 0)
        .single()
        .ok_or_else(|| Error::Internal("expiry out of range".to_string()))?;

    Ok(IssuedToken { token, expires_at })
}

/// Reject token requests that fail the issuance constraints.
fn validate_request(request: &TokenRequest) -> Result<()> {
    if !request.permissions.write.is_issuable() {
        return Err(Error::UnknownScope(
            request.permissions.write.as_str().to_string(),
        ));
    }
    if !request.permissions.read.is_issuable() {
        return Err(Error::UnknownScope(
            request.permissions.read.as_str().to_string(),
        ));
    }
    if !request.permissions.write.is_write_capable() {
        return Err(Error::Malformed(format!(
            "scope '{}' is read-only and cannot be requested for write",
            request.permissions.write.as_str()
        )));
    }
    if !request.actor.has_identifier() {
        return Err(Error::Malformed(
            "actor requires an identifying field".to_string(),
        ));
    }
    if request.registration.is_empty() {
        return Err(Error::Malformed("registration must be non-empty".to_string()));
    }
    if request.activity_id.is_empty() {
        return Err(Error::Malformed("activity_id must be non-empty".to_string()));
    }
    if let Some(group) = &request.group {
        if group.object_type.as_deref() != Some("Group") {
            return Err(Error::Malformed(
                "group must have objectType \"Group\"".to_string(),
            ));
        }
        if group.member.is_empty() {
            return Err(Error::Malformed(
                "group must have at least one member".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::{ScopePolicy, TenantConfig};
    use crate::token::{Permissions, Scope};
    use crate::xapi::{Actor, Group};
    use pretty_assertions::assert_eq;

    fn tenant() -> TenantConfig {
        TenantConfig {
            tenant_id: "acme".into(),
            hosts: vec!["acme.example".into()],
            upstream_endpoint: "https://lrs.example/xapi".into(),
            upstream_username: "proxy".into(),
            upstream_password: "secret".into(),
            signing_key: "0123456789abcdef0123456789abcdef".into(),
            token_ttl_seconds: 3600,
            lms_keys: vec!["lms-key-1".into()],
            lms_keys_hashed: false,
            policy: ScopePolicy::Strict,
        }
    }

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

    fn pinned_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 17, 14, 30, 0).unwrap()
    }

    // ── Claim construction ─────────────────────────────────────────────

    #[test]
    fn issued_token_carries_ttl_expiry_and_issuer() {
        // GIVEN: the literal clock 2026-01-17T14:30:00Z and ttl 3600
        let issued = issue_at(&tenant(), &request(), pinned_now()).unwrap();

        // THEN: expiry is exactly one hour later
        assert_eq!(issued.expires_at.to_rfc3339(), "2026-01-17T15:30:00+00:00");

        let claims =
            crate::token::verify(&issued.token, tenant().signing_key.as_bytes()).unwrap();
        assert_eq!(claims.iss, TOKEN_ISSUER);
        assert_eq!(claims.sub, "mailto:a@x");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn subject_is_empty_for_account_actors() {
        let mut req = request();
        req.actor = Actor {
            account: Some(crate::xapi::Account {
                home_page: "https://lms.example".into(),
                name: "alice".into(),
            }),
            ..Actor::default()
        };

        let issued = issue_at(&tenant(), &req, pinned_now()).unwrap();
        let claims =
            crate::token::verify(&issued.token, tenant().signing_key.as_bytes()).unwrap();
        assert_eq!(claims.sub, "");
    }

    #[test]
    fn issuance_is_deterministic_with_pinned_clock() {
        let a = issue_at(&tenant(), &request(), pinned_now()).unwrap();
        let b = issue_at(&tenant(), &request(), pinned_now()).unwrap();
        assert_eq!(a.token, b.token);
    }

    // ── Request validation ─────────────────────────────────────────────

    #[test]
    fn unknown_scope_is_rejected() {
        let mut req = request();
        req.permissions.read = Scope::Unknown("made-up".into());

        let err = issue_at(&tenant(), &req, pinned_now()).unwrap_err();
        assert!(matches!(err, Error::UnknownScope(name) if name == "made-up"));
    }

    #[test]
    fn read_only_scope_rejected_for_write() {
        let mut req = request();
        req.permissions.write = Scope::ActorCourseRegistration;

        let err = issue_at(&tenant(), &req, pinned_now()).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn reserved_scopes_are_accepted_at_issuance() {
        // course-aggregate-only / course-peer-shared have no evaluator
        // branch but are valid to mint
        let mut req = request();
        req.permissions.read = Scope::CourseAggregateOnly;
        req.permissions.write = Scope::CoursePeerShared;

        assert!(issue_at(&tenant(), &req, pinned_now()).is_ok());
    }

    #[test]
    fn anonymous_actor_is_rejected() {
        let mut req = request();
        req.actor = Actor {
            name: Some("Alice".into()),
            ..Actor::default()
        };

        assert!(matches!(
            issue_at(&tenant(), &req, pinned_now()).unwrap_err(),
            Error::Malformed(_)
        ));
    }

    #[test]
    fn empty_registration_or_activity_is_rejected() {
        let mut req = request();
        req.registration = String::new();
        assert!(issue_at(&tenant(), &req, pinned_now()).is_err());

        let mut req = request();
        req.activity_id = String::new();
        assert!(issue_at(&tenant(), &req, pinned_now()).is_err());
    }

    #[test]
    fn malformed_group_is_rejected() {
        // Missing objectType
        let mut req = request();
        req.group = Some(Group {
            object_type: None,
            name: Some("team".into()),
            member: vec![request().actor],
        });
        assert!(issue_at(&tenant(), &req, pinned_now()).is_err());

        // Empty member list
        let mut req = request();
        req.group = Some(Group {
            object_type: Some("Group".into()),
            name: Some("team".into()),
            member: Vec::new(),
        });
        assert!(issue_at(&tenant(), &req, pinned_now()).is_err());
    }
}
