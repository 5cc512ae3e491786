//! Group membership gate.

use std::sync::LazyLock;

use regex_lite::Regex;

use super::connection::Directory;
use super::error::AuthError;
use super::sanitize;
use super::settings::GroupSettings;

/// Leading `uid=<value>` token of a member DN.
static MEMBER_UID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^uid=[a-z0-9_.-][^,]*").expect("member uid pattern is valid")
});

/// How member values are compared to the resolved user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership<'a> {
    /// Member values are full DNs, compared to the user DN as-is.
    Dn(&'a str),
    /// Member values start with `uid=<value>`, compared to the username.
    Uid(&'a str),
}

impl Membership<'_> {
    /// Whether a single member value designates the user.
    ///
    /// A value without a leading `uid=` token never matches in UID mode.
    pub fn matches(&self, member: &str) -> bool {
        match *self {
            Membership::Dn(dn) => member == dn,
            Membership::Uid(username) => MEMBER_UID
                .find(member)
                .and_then(|token| token.as_str().strip_prefix("uid="))
                .is_some_and(|uid| uid == username),
        }
    }
}

/// Search the configured groups and require the user to be listed in one.
pub(super) async fn check<D: Directory>(
    session: &mut D,
    group: &GroupSettings,
    membership: Membership<'_>,
) -> Result<(), AuthError> {
    let filter = sanitize::group_filter(&group.filter)?;
    let base = sanitize::group_dn(&group.dn)?;

    tracing::trace!(
        member_attribute = group.member_uid,
        filter,
        base,
        "fetching groups"
    );

    let groups = session
        .search(base, filter, &[group.member_uid.as_str()])
        .await
        .map_err(|err| AuthError::GroupSearchFailed(Some(err)))?;

    if groups.is_empty() {
        return Err(AuthError::GroupSearchFailed(None));
    }

    let is_member = groups
        .iter()
        .filter_map(|entry| entry.attrs.get(&group.member_uid))
        .flatten()
        .any(|member| {
            tracing::trace!(member, ?membership, "comparing group member");
            membership.matches(member)
        });

    if is_member {
        Ok(())
    } else {
        let username = match membership {
            Membership::Dn(dn) => dn,
            Membership::Uid(username) => username,
        };
        Err(AuthError::NotAMember {
            username: username.to_owned(),
        })
    }
}
