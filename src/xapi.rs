//! xAPI data model — the subset of xAPI 1.0.3 the authorization layer
//! inspects.
//!
//! Statements are forwarded byte-faithfully; these types exist only so the
//! permission evaluator can look at actors, objects, and registrations.
//! Every field the proxy does not inspect is captured verbatim in `extra`
//! maps and never re-serialized onto the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An xAPI account identifier (`{ homePage, name }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The canonical home page of the account system.
    #[serde(rename = "homePage")]
    pub home_page: String,
    /// The account name unique within the home page.
    pub name: String,
}

/// An xAPI Agent or Group identity.
///
/// All identifying fields are optional on the wire; equality follows the
/// xAPI inverse functional identifier (IFI) rules, see [`Actor::matches`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Actor {
    /// `"Agent"` or `"Group"`; absent means Agent.
    #[serde(rename = "objectType", skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Display name. Not an identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `mailto:` IRI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mbox: Option<String>,
    /// SHA1 hex digest of the mbox IRI.
    #[serde(rename = "mbox_sha1sum", skip_serializing_if = "Option::is_none")]
    pub mbox_sha1sum: Option<String>,
    /// OpenID URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openid: Option<String>,
    /// Account on some system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
}

impl Actor {
    /// Returns `true` if this actor declares itself a Group.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.object_type.as_deref() == Some("Group")
    }

    /// Returns `true` if at least one identifying field is present.
    #[must_use]
    pub fn has_identifier(&self) -> bool {
        self.mbox.is_some()
            || self.mbox_sha1sum.is_some()
            || self.openid.is_some()
            || self.account.is_some()
    }

    /// xAPI actor equality.
    ///
    /// The first IFI populated on *both* sides decides, in order: `mbox`,
    /// `mbox_sha1sum`, `openid`, `account`. If no IFI is shared, the actors
    /// are unequal. Later IFIs are never consulted once an earlier pair
    /// exists on both sides.
    #[must_use]
    pub fn matches(&self, other: &Actor) -> bool {
        if let (Some(a), Some(b)) = (&self.mbox, &other.mbox) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.mbox_sha1sum, &other.mbox_sha1sum) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.openid, &other.openid) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.account, &other.account) {
            return a.home_page == b.home_page && a.name == b.name;
        }
        false
    }
}

/// An xAPI Group: an actor with `objectType = "Group"` and an ordered
/// member list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
    /// Always `"Group"` on well-formed input.
    #[serde(rename = "objectType", skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Group display name. Group-scoped tokens match on this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Enumerated members.
    #[serde(default)]
    pub member: Vec<Actor>,
}

impl Group {
    /// Membership test under actor equality.
    #[must_use]
    pub fn contains(&self, actor: &Actor) -> bool {
        self.member.iter().any(|m| m.matches(actor))
    }
}

/// Statement verb. Only the id is inspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verb {
    /// Verb IRI.
    pub id: String,
    /// Uninspected verb fields (display, …).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Statement object. The proxy only authorizes against activity objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementObject {
    /// Activity IRI (or agent/statement-ref identifier).
    pub id: String,
    /// `"Activity"`, `"Agent"`, `"StatementRef"`, …; absent means Activity.
    #[serde(rename = "objectType", skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Uninspected object fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Statement context. Registration and team are the authorized fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatementContext {
    /// Registration (session) identifier assigned by the LMS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    /// Team group, when the statement is made on behalf of a team.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<Group>,
    /// Uninspected context fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// An xAPI statement, parsed only as far as authorization requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    /// Who.
    pub actor: Actor,
    /// What happened.
    pub verb: Verb,
    /// To what.
    pub object: StatementObject,
    /// Session context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<StatementContext>,
    /// Outcome. Never inspected, passed through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Everything else (id, timestamp, attachments, …).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Statement {
    /// The statement's registration, if its context carries one.
    #[must_use]
    pub fn registration(&self) -> Option<&str> {
        self.context.as_ref()?.registration.as_deref()
    }
}

/// Parse a statements request body: either a single statement object or an
/// array of statements. Returns statements in received order.
pub fn parse_statement_batch(body: &[u8]) -> Result<Vec<Statement>, serde_json::Error> {
    let value: Value = serde_json::from_slice(body)?;
    match value {
        Value::Array(_) => serde_json::from_value(value),
        _ => Ok(vec![serde_json::from_value(value)?]),
    }
}
