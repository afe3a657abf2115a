//! Role naming conventions.
//!
//! Cloud-role directory groups are named `AWS#<roleName>#<accountNumber>`
//! and map to `arn:aws:iam::<accountNumber>:role/<roleName>`. A role whose
//! name contains the restricted marker (`PCI` by default) belongs to the
//! restricted class; all others are standard.

use std::sync::LazyLock;

use regex::Regex;

use crate::class::EnvironmentClass;

/// Prefix identifying directory groups that grant a cloud role.
pub const ROLE_GROUP_PREFIX: &str = "AWS#";

/// Default substring marking a role name as restricted.
pub const DEFAULT_RESTRICTED_MARKER: &str = "PCI";

/// Maximum length of an STS role session name.
pub const MAX_SESSION_NAME_LEN: usize = 64;

static ROLE_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws:iam::\d{12}:role/?[a-zA-Z_0-9+=,.@\-/]+$").expect("valid role ARN pattern")
});

/// A cloud-role group resolved to its role ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGroup {
    /// Role name segment of the group.
    pub role_name: String,
    /// Twelve digit account number segment.
    pub account: String,
    /// `arn:aws:iam::<account>:role/<role_name>`
    pub arn: String,
}

/// Map a cloud-role group name to its role ARN.
///
/// Returns `None` when the group does not have exactly three non-empty
/// `#`-separated segments.
#[must_use]
pub fn group_to_role(group: &str) -> Option<RoleGroup> {
    let mut parts = group.split('#');
    let (_, role_name, account) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || role_name.is_empty() || account.is_empty() {
        return None;
    }
    Some(RoleGroup {
        role_name: role_name.to_string(),
        account: account.to_string(),
        arn: format!("arn:aws:iam::{account}:role/{role_name}"),
    })
}

/// Whether a directory group grants a cloud role.
#[must_use]
pub fn is_role_group(group: &str) -> bool {
    group.starts_with(ROLE_GROUP_PREFIX)
}

/// Classify a role name by the restricted marker.
#[must_use]
pub fn classify_role_name(role_name: &str, restricted_marker: &str) -> EnvironmentClass {
    if role_name.contains(restricted_marker) {
        EnvironmentClass::Restricted
    } else {
        EnvironmentClass::Standard
    }
}

/// Permitted role ARNs of `class`, derived from raw directory groups.
///
/// Non-role groups and malformed role groups are ignored. The result is
/// sorted and free of duplicates.
#[must_use]
pub fn permitted_role_arns<S: AsRef<str>>(
    groups: &[S],
    class: EnvironmentClass,
    restricted_marker: &str,
) -> Vec<String> {
    let mut arns: Vec<String> = groups
        .iter()
        .map(AsRef::as_ref)
        .filter(|g| is_role_group(g))
        .filter_map(group_to_role)
        .filter(|r| classify_role_name(&r.role_name, restricted_marker) == class)
        .map(|r| r.arn)
        .collect();
    arns.sort();
    arns.dedup();
    arns
}

/// Whether `arn` is a syntactically valid IAM role ARN.
#[must_use]
pub fn is_valid_role_arn(arn: &str) -> bool {
    ROLE_ARN.is_match(arn)
}

/// The role name portion of a role ARN (`arn:aws:iam::123:role/path/Name` -> `path/Name`).
#[must_use]
pub fn role_name_of(arn: &str) -> Option<&str> {
    arn.split_once(":role/").map(|(_, name)| name)
}

/// The account id of an IAM ARN (`arn:aws:iam::123:role/Name` -> `123`).
#[must_use]
pub fn account_id_of(arn: &str) -> Option<&str> {
    arn.strip_prefix("arn:")?
        .split(':')
        .nth(3)
        .filter(|account| !account.is_empty())
}

/// Derive the STS role session name for a caller.
///
/// The email address is used when present, the subject otherwise. Characters
/// STS does not accept are replaced by `-`, and the result is truncated to
/// [`MAX_SESSION_NAME_LEN`] characters so it stays traceable to the person.
#[must_use]
pub fn role_session_name(email: &str, subject: &str) -> String {
    let source = if email.trim().is_empty() { subject } else { email };
    source
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .take(MAX_SESSION_NAME_LEN)
        .collect()
}
