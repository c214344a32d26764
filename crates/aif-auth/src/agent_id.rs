//! Structured Agent Identifiers
//!
//! Agent Tokens carry the acting agent in `sub` as
//! `aif://<issuer-authority>/<model-id>/<user-id>/<instance-id>`. The user on
//! whose behalf the agent acts is derived from the third component.

use std::fmt;

use url::Url;

/// URI scheme of agent identifiers.
pub const AGENT_ID_SCHEME: &str = "aif";

/// A parsed agent identifier
///
/// # Example
///
/// ```rust
/// use aif_auth::AgentId;
///
/// let aid = AgentId::parse("aif://issuer.example/gpt-4/user-123/inst-9").unwrap();
/// assert_eq!(aid.authority(), "issuer.example");
/// assert_eq!(aid.user_id(), "user-123");
/// assert_eq!(aid.to_string(), "aif://issuer.example/gpt-4/user-123/inst-9");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentId {
    raw: String,
    authority: String,
    model_id: String,
    user_id: String,
    instance_id: String,
}

impl AgentId {
    /// Parse an agent identifier, returning `None` unless it has exactly the
    /// `aif://<authority>/<model>/<user>/<instance>` shape
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        if url.scheme() != AGENT_ID_SCHEME || url.query().is_some() || url.fragment().is_some() {
            return None;
        }
        let authority = url.host_str().filter(|h| !h.is_empty())?.to_string();

        let segments: Vec<&str> = url.path_segments()?.collect();
        let [model_id, user_id, instance_id] = segments.as_slice() else {
            return None;
        };
        if [model_id, user_id, instance_id].iter().any(|s| s.is_empty()) {
            return None;
        }

        Some(Self {
            raw: raw.to_string(),
            authority,
            model_id: (*model_id).to_string(),
            user_id: (*user_id).to_string(),
            instance_id: (*instance_id).to_string(),
        })
    }

    /// Issuer authority component
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Model identifier component
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Derived user identifier
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Agent instance component
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The identifier exactly as it appeared in the token
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
