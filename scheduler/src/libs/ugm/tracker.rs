//! The per path usage tracker trees behind user and group quotas
//!
//! A tracker tree mirrors the queue hierarchy. Every level records the
//! resources used below it, the applications running below it, and the
//! optional limits configured for it.

use std::collections::{HashMap, HashSet};

use gantry::models::dao::QueueTrackerDAOInfo;
use gantry::models::{component_wise_min, Resource};

/// Split a dot separated queue path into its hierarchy levels
///
/// # Arguments
///
/// * `queue_path` - The queue path to split
#[must_use]
pub fn split_path(queue_path: &str) -> Vec<String> {
    queue_path
        .to_lowercase()
        .split('.')
        .map(String::from)
        .collect()
}

/// One level of a user or group tracker tree
#[derive(Debug, Default)]
pub struct QueueTracker {
    /// The name of the queue level this tracker mirrors
    queue_name: String,
    /// The resources used below this level
    resource_usage: Resource,
    /// The applications running below this level
    running_apps: HashSet<String>,
    /// The maximum resources configured for this level if any
    max_resources: Option<Resource>,
    /// The maximum running applications configured for this level if any
    max_running_apps: Option<u64>,
    /// Whether the limits on this level came from the wildcard entry
    use_wildcard: bool,
    /// The children of this level by queue name
    children: HashMap<String, QueueTracker>,
}

impl QueueTracker {
    /// Create the root tracker of a tree
    #[must_use]
    pub fn new_root() -> Self {
        QueueTracker {
            queue_name: "root".to_owned(),
            ..Default::default()
        }
    }

    /// Get or create the child tracker for a queue name
    ///
    /// # Arguments
    ///
    /// * `name` - The queue name of the child level
    fn child(&mut self, name: &str) -> &mut QueueTracker {
        self.children
            .entry(name.to_owned())
            .or_insert_with(|| QueueTracker {
                queue_name: name.to_owned(),
                ..Default::default()
            })
    }

    /// Add usage for an application at every level of a hierarchy
    ///
    /// # Arguments
    ///
    /// * `hierarchy` - The remaining hierarchy levels including this one
    /// * `application_id` - The application the usage belongs to
    /// * `usage` - The resources to add
    pub fn increase(&mut self, hierarchy: &[String], application_id: &str, usage: &Resource) {
        self.resource_usage += usage;
        self.running_apps.insert(application_id.to_owned());
        if hierarchy.len() > 1 {
            self.child(&hierarchy[1]).increase(&hierarchy[1..], application_id, usage);
        }
    }

    /// Remove usage for an application at every level of a hierarchy
    ///
    /// # Arguments
    ///
    /// * `hierarchy` - The remaining hierarchy levels including this one
    /// * `application_id` - The application the usage belonged to
    /// * `usage` - The resources to remove
    /// * `remove_app` - Whether the application is gone entirely
    pub fn decrease(
        &mut self,
        hierarchy: &[String],
        application_id: &str,
        usage: &Resource,
        remove_app: bool,
    ) {
        self.resource_usage -= usage;
        if remove_app {
            self.running_apps.remove(application_id);
        }
        if hierarchy.len() > 1 {
            if let Some(child) = self.children.get_mut(&hierarchy[1]) {
                child.decrease(&hierarchy[1..], application_id, usage, remove_app);
                // drop child levels with nothing left to track
                if child.can_be_removed() {
                    self.children.remove(&hierarchy[1]);
                }
            }
        }
    }

    /// Set or clear the limits on one level of a hierarchy
    ///
    /// # Arguments
    ///
    /// * `hierarchy` - The remaining hierarchy levels including this one
    /// * `max_resources` - The maximum resources to set if any
    /// * `max_running_apps` - The maximum running applications to set if any
    /// * `use_wildcard` - Whether the limits came from the wildcard entry
    pub fn set_limit(
        &mut self,
        hierarchy: &[String],
        max_resources: Option<Resource>,
        max_running_apps: Option<u64>,
        use_wildcard: bool,
    ) {
        if hierarchy.len() <= 1 {
            self.max_resources = max_resources;
            self.max_running_apps = max_running_apps;
            self.use_wildcard = use_wildcard;
            return;
        }
        self.child(&hierarchy[1]).set_limit(
            &hierarchy[1..],
            max_resources,
            max_running_apps,
            use_wildcard,
        );
    }

    /// Check whether an application could run under every level's limits
    ///
    /// # Arguments
    ///
    /// * `hierarchy` - The remaining hierarchy levels including this one
    /// * `application_id` - The application asking to run
    /// * `minimum` - The smallest resource request of the application
    pub fn can_run_app(
        &mut self,
        hierarchy: &[String],
        application_id: &str,
        minimum: &Resource,
    ) -> bool {
        // usage plus the application minimum must fit under a max
        if let Some(max) = &self.max_resources {
            let projected = &self.resource_usage + minimum;
            if !projected.fits_in(max) {
                return false;
            }
        }
        // one more running application must fit under a max app count
        if let Some(max_apps) = self.max_running_apps {
            let mut projected = self.running_apps.len() as u64;
            if !self.running_apps.contains(application_id) {
                projected += 1;
            }
            if projected > max_apps {
                return false;
            }
        }
        if hierarchy.len() > 1 {
            return self
                .child(&hierarchy[1])
                .can_run_app(&hierarchy[1..], application_id, minimum);
        }
        true
    }

    /// The remaining quota headroom along a hierarchy
    ///
    /// The headroom is the componentwise minimum of max minus used at every
    /// configured level. No configured level means unlimited.
    ///
    /// # Arguments
    ///
    /// * `hierarchy` - The remaining hierarchy levels including this one
    pub fn headroom(&mut self, hierarchy: &[String]) -> Option<Resource> {
        let own = self
            .max_resources
            .as_ref()
            .map(|max| max.sub_only_existing(&self.resource_usage));
        let deeper = if hierarchy.len() > 1 {
            self.child(&hierarchy[1]).headroom(&hierarchy[1..])
        } else {
            None
        };
        component_wise_min(own.as_ref(), deeper.as_ref())
    }

    /// Check whether this tracker level holds nothing worth keeping
    #[must_use]
    pub fn can_be_removed(&self) -> bool {
        self.resource_usage.is_zero()
            && self.running_apps.is_empty()
            && self.max_resources.is_none()
            && self.max_running_apps.is_none()
            && self.children.values().all(QueueTracker::can_be_removed)
    }

    /// Get the resources used below this level
    #[must_use]
    pub fn resource_usage(&self) -> &Resource {
        &self.resource_usage
    }

    /// Build the DAO projection of this tracker level and its children
    ///
    /// # Arguments
    ///
    /// * `parent_path` - The path of the parent level, empty for root
    #[must_use]
    pub fn dao(&self, parent_path: &str) -> QueueTrackerDAOInfo {
        let queue_path = if parent_path.is_empty() {
            self.queue_name.clone()
        } else {
            format!("{parent_path}.{}", self.queue_name)
        };
        let mut running_applications: Vec<_> = self.running_apps.iter().cloned().collect();
        running_applications.sort();
        let mut children: Vec<_> = self
            .children
            .values()
            .map(|child| child.dao(&queue_path))
            .collect();
        children.sort_by(|a, b| a.queue_path.cmp(&b.queue_path));
        QueueTrackerDAOInfo {
            queue_path,
            resource_usage: self.resource_usage.clone(),
            running_applications,
            max_resources: self.max_resources.clone(),
            max_running_apps: self.max_running_apps,
            children,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increase_walks_every_level() {
        let mut tracker = QueueTracker::new_root();
        let hierarchy = split_path("root.a.b");
        let usage = Resource::from_pairs([("memory", 3)]);
        tracker.increase(&hierarchy, "app-1", &usage);
        assert_eq!(tracker.resource_usage().get("memory"), 3);
        let dao = tracker.dao("");
        assert_eq!(dao.children[0].resource_usage.get("memory"), 3);
        assert_eq!(dao.children[0].children[0].resource_usage.get("memory"), 3);
        assert_eq!(dao.children[0].children[0].queue_path, "root.a.b");
    }

    #[test]
    fn matched_increase_decrease_round_trip() {
        let mut tracker = QueueTracker::new_root();
        let hierarchy = split_path("root.a.b");
        let usage = Resource::from_pairs([("memory", 3)]);
        tracker.increase(&hierarchy, "app-1", &usage);
        tracker.increase(&hierarchy, "app-1", &usage);
        tracker.decrease(&hierarchy, "app-1", &usage, false);
        tracker.decrease(&hierarchy, "app-1", &usage, true);
        // usage is back where it started and the tree collapsed
        assert!(tracker.resource_usage().is_zero());
        assert!(tracker.can_be_removed());
    }

    #[test]
    fn quota_scenario_on_an_ancestor() {
        // max 4 memory at root.a with usage 3 blocks an app needing 2
        let mut tracker = QueueTracker::new_root();
        tracker.set_limit(
            &split_path("root.a"),
            Some(Resource::from_pairs([("memory", 4)])),
            None,
            false,
        );
        let hierarchy = split_path("root.a.b");
        tracker.increase(&hierarchy, "app-1", &Resource::from_pairs([("memory", 3)]));
        let minimum = Resource::from_pairs([("memory", 2)]);
        assert!(!tracker.can_run_app(&hierarchy, "app-2", &minimum));
        // a release of 2 at root.a.b unblocks the app
        tracker.decrease(&hierarchy, "app-1", &Resource::from_pairs([("memory", 2)]), false);
        assert!(tracker.can_run_app(&hierarchy, "app-2", &minimum));
    }

    #[test]
    fn max_apps_counts_new_apps_only() {
        let mut tracker = QueueTracker::new_root();
        tracker.set_limit(&split_path("root.a"), None, Some(1), false);
        let hierarchy = split_path("root.a");
        tracker.increase(&hierarchy, "app-1", &Resource::new());
        // the running app itself still fits
        assert!(tracker.can_run_app(&hierarchy, "app-1", &Resource::new()));
        // a second app does not
        assert!(!tracker.can_run_app(&hierarchy, "app-2", &Resource::new()));
    }

    #[test]
    fn headroom_is_min_over_configured_levels() {
        let mut tracker = QueueTracker::new_root();
        tracker.set_limit(
            &split_path("root"),
            Some(Resource::from_pairs([("memory", 10)])),
            None,
            false,
        );
        tracker.set_limit(
            &split_path("root.a"),
            Some(Resource::from_pairs([("memory", 4)])),
            None,
            false,
        );
        let hierarchy = split_path("root.a.b");
        tracker.increase(&hierarchy, "app-1", &Resource::from_pairs([("memory", 1)]));
        let headroom = tracker.headroom(&hierarchy).unwrap();
        assert_eq!(headroom.get("memory"), 3);
        // an unconfigured tree has unlimited headroom
        let mut bare = QueueTracker::new_root();
        assert_eq!(bare.headroom(&split_path("root.x")), None);
    }

    #[test]
    fn limits_keep_trackers_alive() {
        let mut tracker = QueueTracker::new_root();
        tracker.set_limit(&split_path("root.a"), None, Some(5), false);
        assert!(!tracker.can_be_removed());
        // clearing the limit makes the tree collectable again
        tracker.set_limit(&split_path("root.a"), None, None, false);
        assert!(tracker.can_be_removed());
    }
}
