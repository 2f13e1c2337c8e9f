/// Access Token Claims
///
/// Typed identity claims carried by access tokens, the JWT payload that
/// wraps them with the standard registered claims (RFC 7519), and the
/// assembly of identity claims from the identity provider's data.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::session::ClientOrigin;
use crate::identity::Account;

/// A single (type, value) claim as stored by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    pub kind: String,
    pub value: String,
}

impl Claim {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Who the token holder is and what they may do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    #[serde(rename = "sub")]
    pub subject: Uuid,
    pub email: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    /// Provider-supplied user claims, first value per claim type
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, rename = "ua", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl IdentityClaims {
    pub fn new(subject: Uuid, email: impl Into<String>) -> Self {
        Self {
            subject,
            email: email.into(),
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            extra: BTreeMap::new(),
            ip: None,
            user_agent: None,
        }
    }
}

/// JWT payload for access tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    #[serde(flatten)]
    pub identity: IdentityClaims,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    /// Bind identity claims to a validity window
    pub fn new(
        identity: IdentityClaims,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        issuer: Option<String>,
        audience: Option<String>,
    ) -> Self {
        Self {
            identity,
            iat: issued_at.timestamp(),
            nbf: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: issuer,
            aud: audience,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.identity.subject
    }
}

/// Merge the four claim groups into one identity claim set:
/// base identity, provider user claims, role names, and role permissions.
///
/// Roles missing from `role_claims` contribute their name but no
/// permissions.
pub fn assemble_claims(
    account: &Account,
    user_claims: &[Claim],
    roles: &[String],
    role_claims: &HashMap<String, Vec<Claim>>,
    origin: &ClientOrigin,
) -> IdentityClaims {
    let mut identity = IdentityClaims::new(account.id, account.email.clone());

    for claim in user_claims {
        identity
            .extra
            .entry(claim.kind.clone())
            .or_insert_with(|| claim.value.clone());
    }

    identity.roles.extend(roles.iter().cloned());

    identity.permissions.extend(
        roles
            .iter()
            .filter_map(|role| role_claims.get(role))
            .flatten()
            .map(|claim| claim.value.clone()),
    );

    identity.ip = origin.ip().map(str::to_string);
    identity.user_agent = origin.user_agent().map(str::to_string);

    identity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
        }
    }

    #[test]
    fn test_assemble_merges_all_groups() {
        let account = account();
        let user_claims = vec![
            Claim::new("department", "sales"),
            Claim::new("department", "ignored"),
        ];
        let roles = vec!["admin".to_string(), "viewer".to_string()];
        let mut role_claims = HashMap::new();
        role_claims.insert(
            "admin".to_string(),
            vec![Claim::new("permission", "users.write"), Claim::new("permission", "users.read")],
        );
        role_claims.insert("viewer".to_string(), vec![Claim::new("permission", "users.read")]);
        let origin = ClientOrigin::new(Some("10.0.0.1".to_string()), Some("curl/8".to_string()));

        let claims = assemble_claims(&account, &user_claims, &roles, &role_claims, &origin);

        assert_eq!(claims.subject, account.id);
        assert_eq!(claims.email, "user@example.com");
        assert_eq!(claims.extra.get("department").map(String::as_str), Some("sales"));
        assert_eq!(claims.roles.len(), 2);
        assert_eq!(
            claims.permissions.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["users.read", "users.write"]
        );
        assert_eq!(claims.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(claims.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn test_unknown_role_contributes_name_only() {
        let account = account();
        let roles = vec!["ghost".to_string()];

        let claims = assemble_claims(&account, &[], &roles, &HashMap::new(), &ClientOrigin::default());

        assert!(claims.roles.contains("ghost"));
        assert!(claims.permissions.is_empty());
        assert!(claims.ip.is_none());
    }

    #[test]
    fn test_payload_serializes_subject_as_sub() {
        let identity = IdentityClaims::new(Uuid::new_v4(), "user@example.com");
        let now = Utc::now();
        let claims = Claims::new(identity, now, now + chrono::Duration::minutes(5), None, None);

        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("sub").is_some());
        assert!(json.get("iss").is_none());
        assert!(json.get("ua").is_none());
    }
}
