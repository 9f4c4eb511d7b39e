//! User and group usage tracking and quota enforcement
//!
//! Every confirmed allocation is tracked on the submitting user's tree and,
//! when group limits are configured, on the selected group's tree. Groups
//! are configuration derived and not fixed per user, so the chosen group is
//! remembered per application and unlinked when the application goes away.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use gantry::conf::QueueLimitsConfig;
use gantry::models::dao::{GroupResourceUsageDAOInfo, UserResourceUsageDAOInfo};
use gantry::models::{Resource, UserGroup};

mod tracker;

pub use tracker::{split_path, QueueTracker};

use super::events::UserGroupEvents;

/// The wildcard user or group entry in limit configuration
const WILDCARD: &str = "*";

/// One configured limit for a user or group
#[derive(Debug, Clone, Default)]
struct TrackerLimit {
    /// The maximum resources if set
    max_resources: Option<Resource>,
    /// The maximum running applications if set
    max_running_apps: Option<u64>,
}

/// The limits configured on one queue path
#[derive(Debug, Clone, Default)]
struct PathLimits {
    /// Per user limits on this path
    users: HashMap<String, TrackerLimit>,
    /// The wildcard user limit on this path if any
    wildcard_user: Option<TrackerLimit>,
    /// Per group limits on this path
    groups: HashMap<String, TrackerLimit>,
    /// The wildcard group limit on this path if any
    wildcard_group: Option<TrackerLimit>,
}

/// The limit configuration indexed by queue path
#[derive(Debug, Clone, Default)]
struct LimitsIndex {
    /// The limits per lowercase queue path
    paths: HashMap<String, PathLimits>,
}

impl LimitsIndex {
    /// Build an index from the wire limit configuration
    ///
    /// # Arguments
    ///
    /// * `configs` - The limits per queue path from the configuration
    fn build(configs: &[QueueLimitsConfig]) -> Self {
        let mut index = LimitsIndex::default();
        for config in configs {
            let entry = index
                .paths
                .entry(config.queue_path.to_lowercase())
                .or_default();
            for limit in &config.limits {
                let tracked = TrackerLimit {
                    max_resources: limit.max_resource(),
                    max_running_apps: limit.max_applications,
                };
                for user in &limit.users {
                    if user == WILDCARD {
                        entry.wildcard_user = Some(tracked.clone());
                    } else {
                        entry.users.insert(user.clone(), tracked.clone());
                    }
                }
                for group in &limit.groups {
                    if group == WILDCARD {
                        entry.wildcard_group = Some(tracked.clone());
                    } else {
                        entry.groups.insert(group.clone(), tracked.clone());
                    }
                }
            }
        }
        index
    }

    /// Find the limit for a user on a path, falling back to the wildcard
    ///
    /// # Arguments
    ///
    /// * `path` - The lowercase queue path to look at
    /// * `user` - The user to look for
    fn user_limit(&self, path: &str, user: &str) -> Option<(TrackerLimit, bool)> {
        let limits = self.paths.get(path)?;
        if let Some(limit) = limits.users.get(user) {
            return Some((limit.clone(), false));
        }
        limits
            .wildcard_user
            .as_ref()
            .map(|limit| (limit.clone(), true))
    }

    /// Find the limit for a group on a path, falling back to the wildcard
    ///
    /// # Arguments
    ///
    /// * `path` - The lowercase queue path to look at
    /// * `group` - The group to look for
    fn group_limit(&self, path: &str, group: &str) -> Option<(TrackerLimit, bool)> {
        let limits = self.paths.get(path)?;
        if let Some(limit) = limits.groups.get(group) {
            return Some((limit.clone(), false));
        }
        limits
            .wildcard_group
            .as_ref()
            .map(|limit| (limit.clone(), true))
    }

    /// Check whether a group has a limit anywhere along a queue path
    ///
    /// # Arguments
    ///
    /// * `queue_path` - The queue path the application runs in
    /// * `group` - The group to look for
    fn group_configured(&self, queue_path: &str, group: &str) -> bool {
        for prefix in path_prefixes(queue_path) {
            if let Some(limits) = self.paths.get(&prefix) {
                if limits.groups.contains_key(group) || limits.wildcard_group.is_some() {
                    return true;
                }
            }
        }
        false
    }
}

/// All dot separated prefixes of a queue path, shortest first
///
/// # Arguments
///
/// * `queue_path` - The queue path to expand
fn path_prefixes(queue_path: &str) -> Vec<String> {
    let lowered = queue_path.to_lowercase();
    let mut prefixes = Vec::new();
    let mut end = 0;
    for part in lowered.split('.') {
        end += part.len();
        prefixes.push(lowered[..end].to_owned());
        end += 1;
    }
    prefixes
}

/// The usage tree and group links for one user
struct UserTracker {
    /// The tracker tree for this user
    queue_tracker: QueueTracker,
    /// The group linked to each of the user's applications
    app_groups: HashMap<String, String>,
}

/// The usage tree and linked applications for one group
struct GroupTracker {
    /// The tracker tree for this group
    queue_tracker: QueueTracker,
    /// The applications linked to this group
    apps: HashSet<String>,
}

/// Tracks user and group usage and enforces their quotas for one partition
pub struct Manager {
    /// The tracked users by name
    users: Mutex<HashMap<String, UserTracker>>,
    /// The tracked groups by name
    groups: Mutex<HashMap<String, GroupTracker>>,
    /// The configured limits indexed by queue path
    limits: Mutex<LimitsIndex>,
    /// The event source for user and group records
    events: UserGroupEvents,
}

impl Manager {
    /// Create a new tracker manager
    ///
    /// # Arguments
    ///
    /// * `events` - The event source for user and group records
    #[must_use]
    pub fn new(events: UserGroupEvents) -> Self {
        Manager {
            users: Mutex::new(HashMap::default()),
            groups: Mutex::new(HashMap::default()),
            limits: Mutex::new(LimitsIndex::default()),
            events,
        }
    }

    /// Replace the limit configuration and reapply it to live trackers
    ///
    /// # Arguments
    ///
    /// * `configs` - The limits per queue path from the configuration
    pub fn update_config(&self, configs: &[QueueLimitsConfig]) {
        let next = LimitsIndex::build(configs);
        let mut limits = self.limits.lock();
        let previous = std::mem::replace(&mut *limits, next.clone());
        drop(limits);
        // the union of old and new paths needs a fresh look
        let mut paths: HashSet<String> = previous.paths.keys().cloned().collect();
        paths.extend(next.paths.keys().cloned());
        let mut users = self.users.lock();
        for (name, tracked) in users.iter_mut() {
            for path in &paths {
                let hierarchy = split_path(path);
                match next.user_limit(path, name) {
                    Some((limit, wildcard)) => {
                        tracked.queue_tracker.set_limit(
                            &hierarchy,
                            limit.max_resources,
                            limit.max_running_apps,
                            wildcard,
                        );
                        self.events.send_limit_set(name, path);
                    }
                    None => {
                        tracked.queue_tracker.set_limit(&hierarchy, None, None, false);
                        if previous.user_limit(path, name).is_some() {
                            self.events.send_limit_removed(name, path);
                        }
                    }
                }
            }
        }
        drop(users);
        let mut groups = self.groups.lock();
        for (name, tracked) in groups.iter_mut() {
            for path in &paths {
                let hierarchy = split_path(path);
                match next.group_limit(path, name) {
                    Some((limit, wildcard)) => {
                        tracked.queue_tracker.set_limit(
                            &hierarchy,
                            limit.max_resources,
                            limit.max_running_apps,
                            wildcard,
                        );
                        self.events.send_limit_set(name, path);
                    }
                    None => {
                        tracked.queue_tracker.set_limit(&hierarchy, None, None, false);
                        if previous.group_limit(path, name).is_some() {
                            self.events.send_limit_removed(name, path);
                        }
                    }
                }
            }
        }
    }

    /// Build a user tracker with every configured limit applied
    ///
    /// # Arguments
    ///
    /// * `user` - The user to build a tracker for
    fn build_user_tracker(&self, user: &str) -> UserTracker {
        let mut tracker = UserTracker {
            queue_tracker: QueueTracker::new_root(),
            app_groups: HashMap::default(),
        };
        let limits = self.limits.lock();
        for path in limits.paths.keys() {
            if let Some((limit, wildcard)) = limits.user_limit(path, user) {
                tracker.queue_tracker.set_limit(
                    &split_path(path),
                    limit.max_resources,
                    limit.max_running_apps,
                    wildcard,
                );
            }
        }
        tracker
    }

    /// Build a group tracker with every configured limit applied
    ///
    /// # Arguments
    ///
    /// * `group` - The group to build a tracker for
    fn build_group_tracker(&self, group: &str) -> GroupTracker {
        let mut tracker = GroupTracker {
            queue_tracker: QueueTracker::new_root(),
            apps: HashSet::default(),
        };
        let limits = self.limits.lock();
        for path in limits.paths.keys() {
            if let Some((limit, wildcard)) = limits.group_limit(path, group) {
                tracker.queue_tracker.set_limit(
                    &split_path(path),
                    limit.max_resources,
                    limit.max_running_apps,
                    wildcard,
                );
            }
        }
        tracker
    }

    /// Select the group to track an application under
    ///
    /// The first of the user's groups with a limit configured anywhere on
    /// the queue path wins. Groups without configuration are not tracked.
    ///
    /// # Arguments
    ///
    /// * `user` - The submitting user and groups
    /// * `queue_path` - The queue path the application runs in
    fn select_group(&self, user: &UserGroup, queue_path: &str) -> Option<String> {
        let limits = self.limits.lock();
        user.groups
            .iter()
            .find(|group| limits.group_configured(queue_path, group))
            .cloned()
    }

    /// Track a confirmed allocation for a user and their linked group
    ///
    /// # Arguments
    ///
    /// * `queue_path` - The queue path the allocation landed in
    /// * `application_id` - The application the allocation belongs to
    /// * `usage` - The allocated resources
    /// * `user` - The submitting user and groups
    pub fn increase_tracked_resource(
        &self,
        queue_path: &str,
        application_id: &str,
        usage: &Resource,
        user: &UserGroup,
    ) {
        let hierarchy = split_path(queue_path);
        let mut users = self.users.lock();
        let tracked = users
            .entry(user.user.clone())
            .or_insert_with(|| self.build_user_tracker(&user.user));
        self.events
            .send_usage_increased(&user.user, queue_path, usage);
        tracked
            .queue_tracker
            .increase(&hierarchy, application_id, usage);
        // groups are selected at first allocation and remembered per app
        let group = match tracked.app_groups.get(application_id) {
            Some(group) => Some(group.clone()),
            None => match self.select_group(user, queue_path) {
                Some(group) => {
                    tracked
                        .app_groups
                        .insert(application_id.to_owned(), group.clone());
                    self.events.send_app_linked(&group, application_id);
                    Some(group)
                }
                None => None,
            },
        };
        drop(users);
        if let Some(group) = group {
            let mut groups = self.groups.lock();
            let tracked = groups
                .entry(group.clone())
                .or_insert_with(|| self.build_group_tracker(&group));
            tracked.apps.insert(application_id.to_owned());
            self.events.send_usage_increased(&group, queue_path, usage);
            tracked
                .queue_tracker
                .increase(&hierarchy, application_id, usage);
        }
    }

    /// Release tracked usage for a user and their linked group
    ///
    /// # Arguments
    ///
    /// * `queue_path` - The queue path the allocation landed in
    /// * `application_id` - The application the allocation belonged to
    /// * `usage` - The released resources
    /// * `remove_app` - Whether the application is gone entirely
    /// * `user` - The submitting user and groups
    pub fn decrease_tracked_resource(
        &self,
        queue_path: &str,
        application_id: &str,
        usage: &Resource,
        remove_app: bool,
        user: &UserGroup,
    ) {
        let hierarchy = split_path(queue_path);
        let mut users = self.users.lock();
        let mut linked_group = None;
        let mut remove_user = false;
        if let Some(tracked) = users.get_mut(&user.user) {
            self.events
                .send_usage_decreased(&user.user, queue_path, usage);
            tracked
                .queue_tracker
                .decrease(&hierarchy, application_id, usage, remove_app);
            if remove_app {
                if let Some(group) = tracked.app_groups.remove(application_id) {
                    self.events.send_app_unlinked(&group, application_id);
                    linked_group = Some(group);
                }
            } else {
                linked_group = tracked.app_groups.get(application_id).cloned();
            }
            // drop trackers with nothing left to track
            remove_user = tracked.queue_tracker.can_be_removed() && tracked.app_groups.is_empty();
        }
        if remove_user {
            users.remove(&user.user);
        }
        drop(users);
        if let Some(group) = linked_group {
            let mut groups = self.groups.lock();
            let mut remove_group = false;
            if let Some(tracked) = groups.get_mut(&group) {
                self.events.send_usage_decreased(&group, queue_path, usage);
                tracked
                    .queue_tracker
                    .decrease(&hierarchy, application_id, usage, remove_app);
                if remove_app {
                    tracked.apps.remove(application_id);
                }
                remove_group = tracked.queue_tracker.can_be_removed() && tracked.apps.is_empty();
            }
            if remove_group {
                groups.remove(&group);
            }
        }
    }

    /// Check whether an application may run under the configured quotas
    ///
    /// # Arguments
    ///
    /// * `queue_path` - The queue path the application runs in
    /// * `application_id` - The application asking to run
    /// * `minimum` - The smallest resource request of the application
    /// * `user` - The submitting user and groups
    #[must_use]
    pub fn can_run_app(
        &self,
        queue_path: &str,
        application_id: &str,
        minimum: &Resource,
        user: &UserGroup,
    ) -> bool {
        let hierarchy = split_path(queue_path);
        let mut users = self.users.lock();
        let tracked = users
            .entry(user.user.clone())
            .or_insert_with(|| self.build_user_tracker(&user.user));
        if !tracked
            .queue_tracker
            .can_run_app(&hierarchy, application_id, minimum)
        {
            return false;
        }
        let group = tracked
            .app_groups
            .get(application_id)
            .cloned()
            .or_else(|| self.select_group(user, queue_path));
        drop(users);
        if let Some(group) = group {
            let mut groups = self.groups.lock();
            let tracked = groups
                .entry(group.clone())
                .or_insert_with(|| self.build_group_tracker(&group));
            if !tracked
                .queue_tracker
                .can_run_app(&hierarchy, application_id, minimum)
            {
                return false;
            }
        }
        true
    }

    /// The remaining quota headroom for a user on a queue path
    ///
    /// # Arguments
    ///
    /// * `queue_path` - The queue path to measure
    /// * `user` - The user to measure for
    #[must_use]
    pub fn headroom(&self, queue_path: &str, user: &UserGroup) -> Option<Resource> {
        let hierarchy = split_path(queue_path);
        let mut users = self.users.lock();
        let tracked = users
            .entry(user.user.clone())
            .or_insert_with(|| self.build_user_tracker(&user.user));
        tracked.queue_tracker.headroom(&hierarchy)
    }

    /// Build the DAO projection of one tracked user
    ///
    /// # Arguments
    ///
    /// * `user` - The user to project
    #[must_use]
    pub fn user_dao(&self, user: &str) -> Option<UserResourceUsageDAOInfo> {
        let users = self.users.lock();
        let tracked = users.get(user)?;
        Some(UserResourceUsageDAOInfo {
            user_name: user.to_owned(),
            groups: tracked.app_groups.clone(),
            queues: tracked.queue_tracker.dao(""),
        })
    }

    /// Build the DAO projection of one tracked group
    ///
    /// # Arguments
    ///
    /// * `group` - The group to project
    #[must_use]
    pub fn group_dao(&self, group: &str) -> Option<GroupResourceUsageDAOInfo> {
        let groups = self.groups.lock();
        let tracked = groups.get(group)?;
        let mut applications: Vec<_> = tracked.apps.iter().cloned().collect();
        applications.sort();
        Some(GroupResourceUsageDAOInfo {
            group_name: group.to_owned(),
            applications,
            queues: tracked.queue_tracker.dao(""),
        })
    }

    /// Check whether a user is currently tracked
    ///
    /// # Arguments
    ///
    /// * `user` - The user to look for
    #[must_use]
    pub fn is_user_tracked(&self, user: &str) -> bool {
        self.users.lock().contains_key(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::events::EventStore;
    use gantry::conf::LimitConfig;
    use std::sync::Arc;

    /// Build a tracker manager for tests
    fn generate_manager() -> Manager {
        let store = Arc::new(EventStore::new(100, false));
        Manager::new(UserGroupEvents::new(&store))
    }

    /// Build a limits config for one path and one user list
    fn generate_limits(path: &str, users: Vec<&str>, memory: u64, max_apps: Option<u64>) -> QueueLimitsConfig {
        let mut limit = LimitConfig {
            users: users.into_iter().map(String::from).collect(),
            max_applications: max_apps,
            ..Default::default()
        };
        if memory > 0 {
            limit.max_resources.insert("memory".to_owned(), memory);
        }
        QueueLimitsConfig {
            queue_path: path.to_owned(),
            limits: vec![limit],
        }
    }

    #[test]
    fn quota_scenario_through_the_manager() {
        let manager = generate_manager();
        manager.update_config(&[generate_limits("root.a", vec!["alice"], 4, None)]);
        let user = UserGroup::new("alice", Vec::default());
        let usage = Resource::from_pairs([("memory", 3)]);
        manager.increase_tracked_resource("root.a.b", "app-1", &usage, &user);
        // used 3 of max 4 at root.a blocks an app needing 2
        let minimum = Resource::from_pairs([("memory", 2)]);
        assert!(!manager.can_run_app("root.a.b", "app-2", &minimum, &user));
        // a release of 2 at root.a.b unblocks it
        manager.decrease_tracked_resource(
            "root.a.b",
            "app-1",
            &Resource::from_pairs([("memory", 2)]),
            false,
            &user,
        );
        assert!(manager.can_run_app("root.a.b", "app-2", &minimum, &user));
    }

    #[test]
    fn wildcard_user_limit_applies() {
        let manager = generate_manager();
        manager.update_config(&[generate_limits("root.a", vec!["*"], 0, Some(1))]);
        let user = UserGroup::new("anyone", Vec::default());
        manager.increase_tracked_resource("root.a", "app-1", &Resource::new(), &user);
        assert!(!manager.can_run_app("root.a", "app-2", &Resource::new(), &user));
    }

    #[test]
    fn matched_increase_decrease_gc_the_tracker() {
        let manager = generate_manager();
        let user = UserGroup::new("bob", Vec::default());
        let usage = Resource::from_pairs([("memory", 5)]);
        manager.increase_tracked_resource("root.a.b", "app-1", &usage, &user);
        assert!(manager.is_user_tracked("bob"));
        manager.decrease_tracked_resource("root.a.b", "app-1", &usage, true, &user);
        // the tracker vanished once nothing was tracked
        assert!(!manager.is_user_tracked("bob"));
    }

    #[test]
    fn group_is_selected_and_linked_per_app() {
        let manager = generate_manager();
        let mut config = generate_limits("root.a", vec![], 10, None);
        config.limits[0].groups = vec!["devs".to_owned()];
        manager.update_config(&[config]);
        let user = UserGroup::new("alice", vec!["sales".to_owned(), "devs".to_owned()]);
        let usage = Resource::from_pairs([("memory", 2)]);
        manager.increase_tracked_resource("root.a", "app-1", &usage, &user);
        // devs is the first group with configuration on the path
        let dao = manager.group_dao("devs").unwrap();
        assert_eq!(dao.applications, vec!["app-1"]);
        assert_eq!(dao.queues.resource_usage.get("memory"), 2);
        // sales has no configuration so it is not tracked
        assert!(manager.group_dao("sales").is_none());
        // removal unlinks the app and collects the group tracker usage
        manager.decrease_tracked_resource("root.a", "app-1", &usage, true, &user);
        let dao = manager.group_dao("devs");
        assert!(dao.is_none() || dao.unwrap().applications.is_empty());
    }

    #[test]
    fn group_quota_blocks_the_user() {
        let manager = generate_manager();
        let mut config = generate_limits("root.a", vec![], 4, None);
        config.limits[0].groups = vec!["devs".to_owned()];
        manager.update_config(&[config]);
        let alice = UserGroup::new("alice", vec!["devs".to_owned()]);
        let bob = UserGroup::new("bob", vec!["devs".to_owned()]);
        manager.increase_tracked_resource(
            "root.a",
            "app-1",
            &Resource::from_pairs([("memory", 3)]),
            &alice,
        );
        // bob has no usage himself but shares the devs group quota
        let minimum = Resource::from_pairs([("memory", 2)]);
        assert!(!manager.can_run_app("root.a", "app-2", &minimum, &bob));
    }

    #[test]
    fn headroom_reflects_configured_limits() {
        let manager = generate_manager();
        manager.update_config(&[generate_limits("root.a", vec!["alice"], 10, None)]);
        let user = UserGroup::new("alice", Vec::default());
        manager.increase_tracked_resource(
            "root.a",
            "app-1",
            &Resource::from_pairs([("memory", 4)]),
            &user,
        );
        assert_eq!(manager.headroom("root.a", &user).unwrap().get("memory"), 6);
        // unconfigured users have unlimited headroom
        let carol = UserGroup::new("carol", Vec::default());
        assert_eq!(manager.headroom("root.x", &carol), None);
    }
}
