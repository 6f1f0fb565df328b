//! Session token schema and wire format.
//!
//! Tokens are compact JWTs (`header.payload.signature`, base64url, no
//! padding) signed with HMAC-SHA256 under the owning tenant's key. The
//! payload carries the authorization context the permission evaluator works
//! from: actor, registration, activity, scopes, and the optional authorized
//! group.

pub mod issuer;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::xapi::{Actor, Group};

/// Issuer string stamped into every token (`iss` claim).
pub const TOKEN_ISSUER: &str = "xapi-lrs-auth-proxy";

/// A cmi5-derived permission scope name.
///
/// The set is closed at issuance time; names outside it deserialize as
/// [`Scope::Unknown`] so the evaluator can apply the tenant's policy rather
/// than failing the whole token parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Never admits anything.
    False,
    /// Own statements about the launched activity within the registration.
    ActorActivityRegistration,
    /// Own statements anywhere in the course within the registration.
    ActorCourseRegistration,
    /// Own statements about the launched activity across registrations.
    ActorActivityAllRegistrations,
    /// Group statements about the launched activity within the registration.
    GroupActivityRegistration,
    /// Own statements across courses (certification lookups).
    ActorCrossCourseCertification,
    /// Reserved: aggregate course data. No evaluator branch exists.
    CourseAggregateOnly,
    /// Reserved: peer-shared course data. No evaluator branch exists.
    CoursePeerShared,
    /// Any name outside the closed set, preserved verbatim.
    Unknown(String),
}

impl Scope {
    /// Canonical wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::False => "false",
            Self::ActorActivityRegistration => "actor-activity-registration-scoped",
            Self::ActorCourseRegistration => "actor-course-registration-scoped",
            Self::ActorActivityAllRegistrations => "actor-activity-all-registrations",
            Self::GroupActivityRegistration => "group-activity-registration-scoped",
            Self::ActorCrossCourseCertification => "actor-cross-course-certification",
            Self::CourseAggregateOnly => "course-aggregate-only",
            Self::CoursePeerShared => "course-peer-shared",
            Self::Unknown(name) => name,
        }
    }

    /// Parse a wire name; anything outside the closed set becomes `Unknown`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "false" => Self::False,
            "actor-activity-registration-scoped" => Self::ActorActivityRegistration,
            "actor-course-registration-scoped" => Self::ActorCourseRegistration,
            "actor-activity-all-registrations" => Self::ActorActivityAllRegistrations,
            "group-activity-registration-scoped" => Self::GroupActivityRegistration,
            "actor-cross-course-certification" => Self::ActorCrossCourseCertification,
            "course-aggregate-only" => Self::CourseAggregateOnly,
            "course-peer-shared" => Self::CoursePeerShared,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether the scope may appear in a token request at all.
    #[must_use]
    pub fn is_issuable(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Whether the scope may be requested as a *write* scope. The read-only
    /// scopes are rejected at issuance rather than silently never admitting.
    #[must_use]
    pub fn is_write_capable(&self) -> bool {
        !matches!(
            self,
            Self::ActorCourseRegistration
                | Self::ActorActivityAllRegistrations
                | Self::ActorCrossCourseCertification
        )
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// The write/read scope pair carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Scope governing statement writes.
    pub write: Scope,
    /// Scope governing statement/state reads.
    pub read: Scope,
}

/// Payload of the signed session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Tenant the token was minted for. Must equal the resolved tenant at
    /// verification time.
    pub tenant_id: String,
    /// The launched learner (or group leader).
    pub actor: Actor,
    /// LMS-assigned registration for this attempt.
    pub registration: String,
    /// Activity IRI the session was launched against.
    pub activity_id: String,
    /// Course identifier, when the LMS tracks one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    /// Authorization scopes.
    pub permissions: Permissions,
    /// Authorized group for group-scoped sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<Group>,
    /// Opaque LMS metadata, passed through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// Issued-at (Unix epoch seconds).
    pub iat: i64,
    /// Expires-at (Unix epoch seconds). Always greater than `iat`.
    pub exp: i64,
    /// Issuer, always [`TOKEN_ISSUER`].
    pub iss: String,
    /// Subject: the actor's mbox, empty when absent.
    pub sub: String,
}

/// A token request: the claims minus the registered fields, as posted by
/// the LMS to `/auth/token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    /// The learner to authorize.
    pub actor: Actor,
    /// Registration for this attempt.
    pub registration: String,
    /// Launched activity IRI.
    pub activity_id: String,
    /// Optional course identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    /// Requested scopes.
    pub permissions: Permissions,
    /// Optional authorized group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Group>,
    /// Opaque metadata to embed in the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Sign claims into a compact JWT under `key` (HS256).
pub fn sign(claims: &TokenClaims, key: &[u8]) -> Result<String, jsonwebtoken::errors::Error> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(key),
    )
}

/// Verify a compact JWT under `key` and return its claims.
///
/// Rejects any algorithm other than HS256, bad signatures, and expired
/// tokens (zero leeway — `exp <= now` fails). Tenant binding is the
/// caller's responsibility; this function has no notion of the resolved
/// tenant.
pub fn verify(token: &str, key: &[u8]) -> Result<TokenClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    let data = jsonwebtoken::decode::<TokenClaims>(token, &DecodingKey::from_secret(key), &validation)?;
    Ok(data.claims)
}
