//! Permission evaluator — pure predicates over token claims.
//!
//! Every decision is a function of `(claims, tenant policy, payload)`; there
//! is no I/O, no retry, and no state. A denial names the field that
//! mismatched so a misconfigured client can be debugged from the 403 body.
//!
//! Scope semantics: each scope is a conjunction of predicates. For reads an
//! absent query parameter is unconstrained. Scopes without an evaluator
//! branch (reserved or unrecognized names) are decided by the tenant's
//! policy: strict denies, permissive admits.

use crate::tenant::ScopePolicy;
use crate::token::{Scope, TokenClaims};
use crate::xapi::{Actor, Statement};

/// Outcome of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The operation is allowed.
    Admit,
    /// The operation is refused; the reason names the mismatched field.
    Deny(String),
}

impl Decision {
    /// `true` when the operation was admitted.
    #[must_use]
    pub fn is_admit(&self) -> bool {
        matches!(self, Self::Admit)
    }

    /// The denial reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Admit => None,
            Self::Deny(reason) => Some(reason),
        }
    }
}

fn deny(reason: impl Into<String>) -> Decision {
    Decision::Deny(reason.into())
}

/// Statement-read query parameters the evaluator constrains.
#[derive(Debug, Clone, Default)]
pub struct ReadQuery {
    /// Serialized xAPI `agent` parameter.
    pub agent: Option<String>,
    /// Activity IRI filter.
    pub activity: Option<String>,
    /// Registration filter.
    pub registration: Option<String>,
}

impl ReadQuery {
    /// Extract the constrained parameters from a raw query string. Unknown
    /// parameters are ignored (they pass through to the LRS verbatim).
    #[must_use]
    pub fn from_query_str(query: &str) -> Self {
        let mut out = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "agent" => out.agent = Some(value.into_owned()),
                "activity" => out.activity = Some(value.into_owned()),
                "registration" => out.registration = Some(value.into_owned()),
                _ => {}
            }
        }
        out
    }
}

/// Decide whether a single statement may be written under the claims.
#[must_use]
pub fn validate_write(claims: &TokenClaims, policy: ScopePolicy, statement: &Statement) -> Decision {
    match &claims.permissions.write {
        Scope::False => deny("write scope forbids all statements"),

        Scope::ActorActivityRegistration => {
            if !statement.actor.matches(&claims.actor) {
                return deny("statement actor does not match token actor");
            }
            if statement.object.id != claims.activity_id {
                return deny("statement activity does not match token activity");
            }
            if statement.registration() != Some(claims.registration.as_str()) {
                return deny("statement registration does not match token registration");
            }
            Decision::Admit
        }

        Scope::GroupActivityRegistration => {
            // Fail closed when the token carries no authorized group
            let Some(group) = &claims.group else {
                return deny("token carries no authorized group");
            };
            if !statement.actor.is_group() {
                return deny("statement actor is not a Group");
            }
            if statement.actor.name != group.name {
                return deny("statement group name does not match authorized group");
            }
            if !group.contains(&claims.actor) {
                return deny("token actor is not a member of the authorized group");
            }
            if statement.object.id != claims.activity_id {
                return deny("statement activity does not match token activity");
            }
            if statement.registration() != Some(claims.registration.as_str()) {
                return deny("statement registration does not match token registration");
            }
            Decision::Admit
        }

        // Read-only scopes are rejected at issuance; a token carrying one
        // for write is treated as unwritable rather than trusted.
        Scope::ActorCourseRegistration
        | Scope::ActorActivityAllRegistrations
        | Scope::ActorCrossCourseCertification => {
            deny(format!(
                "scope '{}' does not permit writes",
                claims.permissions.write.as_str()
            ))
        }

        scope @ (Scope::CourseAggregateOnly | Scope::CoursePeerShared | Scope::Unknown(_)) => {
            unknown_scope(policy, "write", scope)
        }
    }
}

/// Decide a statement batch: all-or-nothing, evaluated in received order.
/// The first denial is reported with the zero-based statement index.
#[must_use]
pub fn validate_batch(
    claims: &TokenClaims,
    policy: ScopePolicy,
    statements: &[Statement],
) -> Decision {
    for (index, statement) in statements.iter().enumerate() {
        if let Decision::Deny(reason) = validate_write(claims, policy, statement) {
            return deny(format!("statement {index}: {reason}"));
        }
    }
    Decision::Admit
}

/// Decide whether a statements query may be forwarded under the claims.
#[must_use]
pub fn validate_read(claims: &TokenClaims, policy: ScopePolicy, query: &ReadQuery) -> Decision {
    match &claims.permissions.read {
        Scope::False => deny("read scope forbids all queries"),

        Scope::ActorActivityRegistration => {
            if let Decision::Deny(reason) = check_agent_param(query.agent.as_deref(), &claims.actor)
            {
                return deny(reason);
            }
            if let Some(activity) = &query.activity {
                if activity != &claims.activity_id {
                    return deny("activity filter does not match token activity");
                }
            }
            check_registration_param(query.registration.as_deref(), claims)
        }

        Scope::ActorCourseRegistration => {
            if let Decision::Deny(reason) = check_agent_param(query.agent.as_deref(), &claims.actor)
            {
                return deny(reason);
            }
            // Any activity within the course is readable
            check_registration_param(query.registration.as_deref(), claims)
        }

        Scope::ActorActivityAllRegistrations => {
            if let Decision::Deny(reason) = check_agent_param(query.agent.as_deref(), &claims.actor)
            {
                return deny(reason);
            }
            if let Some(activity) = &query.activity {
                if activity != &claims.activity_id {
                    return deny("activity filter does not match token activity");
                }
            }
            // Any registration of the activity is readable
            Decision::Admit
        }

        Scope::GroupActivityRegistration => {
            if let Some(activity) = &query.activity {
                if activity != &claims.activity_id {
                    return deny("activity filter does not match token activity");
                }
            }
            check_registration_param(query.registration.as_deref(), claims)
        }

        // Activity and registration are unrestricted for certification
        // lookups; only the agent is pinned.
        Scope::ActorCrossCourseCertification => {
            check_agent_param(query.agent.as_deref(), &claims.actor)
        }

        scope @ (Scope::CourseAggregateOnly | Scope::CoursePeerShared | Scope::Unknown(_)) => {
            unknown_scope(policy, "read", scope)
        }
    }
}

/// Decide a state (or document) resource access.
///
/// The agent parameter must identify the token actor. Under the
/// registration-scoped read scope the activity and registration parameters
/// are additionally pinned to the token's.
#[must_use]
pub fn validate_state_access(
    claims: &TokenClaims,
    policy: ScopePolicy,
    activity_id: Option<&str>,
    agent: Option<&str>,
    registration: Option<&str>,
) -> Decision {
    let Some(agent) = agent else {
        return deny("agent parameter is required");
    };
    if !agent_identifies(agent, &claims.actor) {
        return deny("agent parameter does not identify token actor");
    }

    match &claims.permissions.read {
        Scope::False => deny("read scope forbids all queries"),
        Scope::ActorActivityRegistration => {
            if let Some(activity) = activity_id {
                if activity != claims.activity_id {
                    return deny("activityId does not match token activity");
                }
            }
            if let Some(registration) = registration {
                if registration != claims.registration {
                    return deny("registration does not match token registration");
                }
            }
            Decision::Admit
        }
        Scope::ActorCourseRegistration
        | Scope::ActorActivityAllRegistrations
        | Scope::GroupActivityRegistration
        | Scope::ActorCrossCourseCertification => Decision::Admit,
        scope @ (Scope::CourseAggregateOnly | Scope::CoursePeerShared | Scope::Unknown(_)) => {
            unknown_scope(policy, "read", scope)
        }
    }
}

/// Decide an activity-profile document access.
///
/// Activity profiles carry no actor binding, so no agent check applies;
/// under the registration-scoped read scope the `activityId` parameter is
/// pinned to the token's activity.
#[must_use]
pub fn validate_activity_access(
    claims: &TokenClaims,
    policy: ScopePolicy,
    activity_id: Option<&str>,
) -> Decision {
    match &claims.permissions.read {
        Scope::False => deny("read scope forbids all queries"),
        Scope::ActorActivityRegistration => {
            if let Some(activity) = activity_id {
                if activity != claims.activity_id {
                    return deny("activityId does not match token activity");
                }
            }
            Decision::Admit
        }
        Scope::ActorCourseRegistration
        | Scope::ActorActivityAllRegistrations
        | Scope::GroupActivityRegistration
        | Scope::ActorCrossCourseCertification => Decision::Admit,
        scope @ (Scope::CourseAggregateOnly | Scope::CoursePeerShared | Scope::Unknown(_)) => {
            unknown_scope(policy, "read", scope)
        }
    }
}

/// Tenant-policy decision for scopes without an evaluator branch.
fn unknown_scope(policy: ScopePolicy, kind: &str, scope: &Scope) -> Decision {
    match policy {
        ScopePolicy::Permissive => Decision::Admit,
        ScopePolicy::Strict => deny(format!(
            "no {kind} rule for scope '{}'",
            scope.as_str()
        )),
    }
}

/// Agent query parameter check: absent is unconstrained, present must
/// identify the token actor.
fn check_agent_param(agent: Option<&str>, actor: &Actor) -> Decision {
    match agent {
        None => Decision::Admit,
        Some(param) if agent_identifies(param, actor) => Decision::Admit,
        Some(_) => deny("agent filter does not identify token actor"),
    }
}

/// Registration query parameter check: absent is unconstrained, present
/// must equal the token registration.
fn check_registration_param(registration: Option<&str>, claims: &TokenClaims) -> Decision {
    match registration {
        Some(r) if r != claims.registration => {
            deny("registration filter does not match token registration")
        }
        _ => Decision::Admit,
    }
}

/// Whether a serialized `agent` parameter identifies `actor`.
///
/// The parameter is parsed as an xAPI actor and compared under actor
/// equality when it is valid JSON; opaque values fall back to a substring
/// check on the actor's `mbox`/`openid`.
fn agent_identifies(param: &str, actor: &Actor) -> bool {
    if let Ok(parsed) = serde_json::from_str::<Actor>(param) {
        if parsed.has_identifier() {
            return parsed.matches(actor);
        }
    }

    let mbox_hit = actor.mbox.as_deref().is_some_and(|m| param.contains(m));
    let openid_hit = actor.openid.as_deref().is_some_and(|o| param.contains(o));
    mbox_hit || openid_hit
}
