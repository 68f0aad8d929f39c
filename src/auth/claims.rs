use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    /// Maps a wire role string to a known `Role`, or `None` for anything this
    /// build doesn't recognize. Callers drop the `None`s rather than failing
    /// the whole token: an unknown role must be ignored, not rejected.
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "viewer" => Some(Role::Viewer),
            "operator" => Some(Role::Operator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Read,
    Control,
    AdminOps,
}

impl Scope {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "read" => Some(Scope::Read),
            "control" => Some(Scope::Control),
            "admin_ops" => Some(Scope::AdminOps),
            _ => None,
        }
    }
}

impl Role {
    /// Canonical role-to-scope mapping (see design notes): roles imply a baseline
    /// set of scopes; a token may carry additional scopes beyond those implied.
    pub fn implied_scopes(self) -> &'static [Scope] {
        match self {
            Role::Viewer => &[Scope::Read],
            Role::Operator => &[Scope::Read, Scope::Control],
            Role::Admin => &[Scope::Read, Scope::Control, Scope::AdminOps],
        }
    }
}

/// Decoded and validated token claims.
#[derive(Debug, Clone)]
pub struct Claims {
    pub subject: String,
    pub roles: Vec<Role>,
    pub scopes: HashSet<Scope>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    /// Merge explicit scopes with the scopes implied by each role. Unknown roles
    /// present in a token are ignored rather than silently granted access.
    pub fn from_raw(subject: String, roles: Vec<Role>, extra_scopes: Vec<Scope>, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        let mut scopes: HashSet<Scope> = extra_scopes.into_iter().collect();
        for role in &roles {
            scopes.extend(role.implied_scopes().iter().copied());
        }
        Self {
            subject,
            roles,
            scopes,
            issued_at,
            expires_at,
        }
    }
}

/// Wire shape of the JWT's custom claim set (on top of `sub`/`iat`/`exp`).
///
/// `roles`/`scopes` are decoded as plain strings rather than `Vec<Role>`/
/// `Vec<Scope>` directly: a token carrying a role or scope this build doesn't
/// recognize yet must not fail deserialization of the whole claim set.
/// [`RawClaims::known_roles`]/[`RawClaims::known_scopes`] do the filtering.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct RawClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl RawClaims {
    pub fn known_roles(&self) -> Vec<Role> {
        self.roles.iter().filter_map(|r| Role::parse(r)).collect()
    }

    pub fn known_scopes(&self) -> Vec<Scope> {
        self.scopes.iter().filter_map(|s| Scope::parse(s)).collect()
    }
}
