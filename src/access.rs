//! Inbound access policy
//!
//! Decides whether a chat/user pair may talk to the bot at all. Checked by the
//! HTTP layer before the orchestrator sees the message.

use std::collections::HashSet;
use std::sync::Arc;

pub trait AccessPolicy: Send + Sync {
    fn allows(&self, chat_id: i64, user_id: i64) -> bool;
}

/// Trusts every inbound identifier
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn allows(&self, _chat_id: i64, _user_id: i64) -> bool {
        true
    }
}

/// Only known chats and users. A `None` set does not restrict.
#[derive(Debug, Default)]
pub struct AllowList {
    pub chats: Option<HashSet<i64>>,
    pub users: Option<HashSet<i64>>,
}

impl AccessPolicy for AllowList {
    fn allows(&self, chat_id: i64, user_id: i64) -> bool {
        let chat_ok = self.chats.as_ref().map_or(true, |c| c.contains(&chat_id));
        let user_ok = self.users.as_ref().map_or(true, |u| u.contains(&user_id));
        chat_ok && user_ok
    }
}

/// Parse a comma-separated ID list, skipping entries that are not integers
fn parse_ids(var: &str, raw: &str) -> HashSet<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(var, entry = s, "Ignoring invalid ID in allowlist");
                None
            }
        })
        .collect()
}

/// Build the policy from `SMB_ALLOWED_CHATS` / `SMB_ALLOWED_USERS`
pub fn policy_from_env() -> Arc<dyn AccessPolicy> {
    policy_from_values(
        std::env::var("SMB_ALLOWED_CHATS").ok().as_deref(),
        std::env::var("SMB_ALLOWED_USERS").ok().as_deref(),
    )
}

fn policy_from_values(chats: Option<&str>, users: Option<&str>) -> Arc<dyn AccessPolicy> {
    if chats.is_none() && users.is_none() {
        return Arc::new(AllowAll);
    }
    let policy = AllowList {
        chats: chats.map(|raw| parse_ids("SMB_ALLOWED_CHATS", raw)),
        users: users.map(|raw| parse_ids("SMB_ALLOWED_USERS", raw)),
    };
    tracing::info!(
        chats = ?policy.chats.as_ref().map(HashSet::len),
        users = ?policy.users.as_ref().map(HashSet::len),
        "Access allowlist enabled"
    );
    Arc::new(policy)
}
