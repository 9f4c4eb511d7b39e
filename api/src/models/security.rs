//! Users, groups, and the access control lists queues enforce

use std::collections::HashSet;

/// The user and groups an application was submitted with
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UserGroup {
    /// The name of the submitting user
    pub user: String,
    /// The groups the submitting user belongs to
    pub groups: Vec<String>,
}

impl UserGroup {
    /// Create a new user/group pair
    ///
    /// # Arguments
    ///
    /// * `user` - The name of the user
    /// * `groups` - The groups the user belongs to
    #[must_use]
    pub fn new<T: Into<String>>(user: T, groups: Vec<String>) -> Self {
        UserGroup {
            user: user.into(),
            groups,
        }
    }
}

/// An access control list in the two part `"users groups"` string form
///
/// The first space separated part is a comma separated user list, the second
/// a comma separated group list. A `*` in either part grants everyone
/// access. An empty ACL grants nobody access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    /// Whether this ACL grants everyone access
    all: bool,
    /// The users this ACL grants access to
    users: HashSet<String>,
    /// The groups this ACL grants access to
    groups: HashSet<String>,
}

impl Acl {
    /// Parse an ACL from its two part string form
    ///
    /// # Arguments
    ///
    /// * `raw` - The raw ACL string to parse
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut acl = Acl::default();
        let mut parts = raw.split(' ');
        // the first part is the user list
        if let Some(users) = parts.next() {
            if users == "*" {
                acl.all = true;
            } else {
                acl.users
                    .extend(users.split(',').filter(|user| !user.is_empty()).map(String::from));
            }
        }
        // the second part is the group list
        if let Some(groups) = parts.next() {
            if groups == "*" {
                acl.all = true;
            } else {
                acl.groups.extend(
                    groups
                        .split(',')
                        .filter(|group| !group.is_empty())
                        .map(String::from),
                );
            }
        }
        acl
    }

    /// An ACL granting everyone access
    #[must_use]
    pub fn allow_all() -> Self {
        Acl {
            all: true,
            users: HashSet::default(),
            groups: HashSet::default(),
        }
    }

    /// Check whether a user has access under this ACL
    ///
    /// # Arguments
    ///
    /// * `user_group` - The user and groups to check
    #[must_use]
    pub fn allow_access(&self, user_group: &UserGroup) -> bool {
        // the wildcard grants everyone access
        if self.all {
            return true;
        }
        // check the user before walking the groups
        if self.users.contains(&user_group.user) {
            return true;
        }
        user_group
            .groups
            .iter()
            .any(|group| self.groups.contains(group))
    }
}
