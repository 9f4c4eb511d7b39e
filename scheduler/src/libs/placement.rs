//! The ordered placement rule pipeline mapping applications to queues
//!
//! Rules are evaluated in configuration order; the first rule returning a
//! queue path wins. The recovery rule is always appended last so a forced
//! application can never fail placement.

use std::sync::Arc;
use tracing::{event, Level};

use gantry::conf::PlacementRuleConfig;
use gantry::Error;

mod fixed;
mod group;
mod provided;
mod recovery;
mod tag;
mod user;

pub use fixed::FixedRule;
pub use group::GroupRule;
pub use provided::ProvidedRule;
pub use recovery::RecoveryRule;
pub use tag::TagRule;
pub use user::UserRule;

use super::objects::{Application, SchedulingQueue};

/// A resolver from a queue path to an existing queue
pub type QueueResolver<'a> = &'a dyn Fn(&str) -> Option<Arc<SchedulingQueue>>;

/// The outcome of a successful placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementResult {
    /// The fully qualified queue path the application landed on
    pub queue_path: String,
    /// Whether the winning rule may create the queue dynamically
    pub create: bool,
}

/// A single placement rule in the pipeline
pub trait PlacementRule: Send + Sync {
    /// The name of this rule
    fn name(&self) -> &str;

    /// Whether this rule may create dynamic queues
    fn can_create(&self) -> bool;

    /// Try to place an application into a queue
    ///
    /// Returning no path passes the application to the next rule.
    ///
    /// # Arguments
    ///
    /// * `app` - The application to place
    /// * `resolver` - A resolver for existing queues
    fn place_application(
        &self,
        app: &Application,
        resolver: QueueResolver,
    ) -> Result<Option<String>, Error>;
}

/// Qualify a queue name into a fully qualified lowercase path
///
/// Names already rooted pass through; anything else is hung under the
/// parent prefix or directly under root.
///
/// # Arguments
///
/// * `name` - The queue name a rule resolved
/// * `parent` - The parent prefix a nested rule supplied if any
#[must_use]
pub fn qualify_queue_path(name: &str, parent: Option<&str>) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    let name = name.to_lowercase();
    if name == "root" || name.starts_with("root.") {
        return Some(name);
    }
    match parent {
        Some(parent) => Some(format!("{}.{name}", parent.to_lowercase())),
        None => Some(format!("root.{name}")),
    }
}

/// Resolve the parent prefix for a rule with a nested parent rule
///
/// # Arguments
///
/// * `parent` - The nested parent rule if any
/// * `app` - The application being placed
/// * `resolver` - A resolver for existing queues
pub fn resolve_parent(
    parent: Option<&dyn PlacementRule>,
    app: &Application,
    resolver: QueueResolver,
) -> Result<Option<String>, Error> {
    match parent {
        Some(rule) => rule.place_application(app, resolver),
        None => Ok(None),
    }
}

/// Build a single placement rule from its configuration
///
/// # Arguments
///
/// * `config` - The rule configuration to build from
pub fn build_rule(config: &PlacementRuleConfig) -> Result<Box<dyn PlacementRule>, Error> {
    // nested parent rules are built recursively
    let parent = match &config.parent {
        Some(parent) => Some(build_rule(parent)?),
        None => None,
    };
    match config.name.to_lowercase().as_str() {
        "provided" => Ok(Box::new(ProvidedRule::new(config.create, parent))),
        "user" => Ok(Box::new(UserRule::new(config.create, parent))),
        "group" => Ok(Box::new(GroupRule::new(config.create, parent))),
        "tag" => match &config.value {
            Some(value) => Ok(Box::new(TagRule::new(value, config.create, parent))),
            None => Err(Error::new("tag placement rule requires a value")),
        },
        "fixed" => match &config.value {
            Some(value) => Ok(Box::new(FixedRule::new(value, config.create, parent))),
            None => Err(Error::new("fixed placement rule requires a value")),
        },
        "recovery" => Ok(Box::new(RecoveryRule::default())),
        name => Err(Error::new(format!("unknown placement rule: {name}"))),
    }
}

/// The ordered placement rule pipeline for one partition
pub struct PlacementManager {
    /// The rules evaluated in order
    rules: Vec<Box<dyn PlacementRule>>,
    /// Whether rules were built from configuration at least once
    initialised: bool,
}

impl PlacementManager {
    /// Create a new placement manager from rule configurations
    ///
    /// The recovery rule is always appended last, whether configured or not.
    ///
    /// # Arguments
    ///
    /// * `configs` - The rule configurations to build from
    pub fn new(configs: &[PlacementRuleConfig]) -> Result<Self, Error> {
        let mut manager = PlacementManager {
            rules: Vec::with_capacity(configs.len() + 1),
            initialised: false,
        };
        manager.update_rules(configs)?;
        Ok(manager)
    }

    /// Replace the rule list from new configuration
    ///
    /// # Arguments
    ///
    /// * `configs` - The rule configurations to build from
    pub fn update_rules(&mut self, configs: &[PlacementRuleConfig]) -> Result<(), Error> {
        let mut rules: Vec<Box<dyn PlacementRule>> = Vec::with_capacity(configs.len() + 1);
        for config in configs {
            rules.push(build_rule(config)?);
        }
        // with nothing configured applications go where they asked to go
        if rules.is_empty() {
            rules.push(Box::new(ProvidedRule::new(true, None)));
        }
        // the recovery rule is always present and always last
        if !rules.iter().any(|rule| rule.name() == "recovery") {
            rules.push(Box::<RecoveryRule>::default());
        }
        self.rules = rules;
        self.initialised = true;
        Ok(())
    }

    /// Check whether this manager was built from configuration
    #[must_use]
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Place an application into a queue
    ///
    /// The first rule returning a path wins. An application no rule places
    /// fails placement.
    ///
    /// # Arguments
    ///
    /// * `app` - The application to place
    /// * `resolver` - A resolver for existing queues
    pub fn place_application(
        &self,
        app: &Application,
        resolver: QueueResolver,
    ) -> Result<PlacementResult, Error> {
        for rule in &self.rules {
            if let Some(queue_path) = rule.place_application(app, resolver)? {
                event!(
                    Level::DEBUG,
                    application = %app.application_id,
                    rule = rule.name(),
                    queue = %queue_path,
                    msg = "application placed"
                );
                return Ok(PlacementResult {
                    queue_path,
                    create: rule.can_create(),
                });
            }
        }
        Err(Error::new(format!(
            "no placement rule matched application {}",
            app.application_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::events::{ApplicationEvents, EventStore};
    use gantry::models::{UserGroup, CREATION_FORCE_TAG, RECOVERY_QUEUE_FULL};
    use std::collections::HashMap;

    /// Build a throwaway application for tests
    fn generate_app(id: &str, queue: &str, forced: bool) -> Application {
        let store = Arc::new(EventStore::new(10, false));
        let mut tags = HashMap::default();
        if forced {
            tags.insert(CREATION_FORCE_TAG.to_owned(), "true".to_owned());
        }
        Application::new(
            id,
            "[test]rm.default",
            queue,
            UserGroup::new("alice", vec!["devs".to_owned()]),
            tags,
            ApplicationEvents::new(&store),
        )
    }

    /// A resolver that knows no queues
    fn empty_resolver(_: &str) -> Option<Arc<SchedulingQueue>> {
        None
    }

    #[test]
    fn qualification_rules() {
        assert_eq!(qualify_queue_path("", None), None);
        assert_eq!(qualify_queue_path("root", None), Some("root".to_owned()));
        assert_eq!(
            qualify_queue_path("Root.Batch", None),
            Some("root.batch".to_owned())
        );
        assert_eq!(
            qualify_queue_path("batch", None),
            Some("root.batch".to_owned())
        );
        assert_eq!(
            qualify_queue_path("batch", Some("root.teams")),
            Some("root.teams.batch".to_owned())
        );
    }

    #[test]
    fn first_non_empty_rule_wins() {
        let configs = vec![
            PlacementRuleConfig {
                name: "provided".to_owned(),
                ..Default::default()
            },
            PlacementRuleConfig {
                name: "user".to_owned(),
                create: true,
                ..Default::default()
            },
        ];
        let manager = PlacementManager::new(&configs).unwrap();
        // an app naming its queue wins through the provided rule
        let app = generate_app("app-1", "root.named", false);
        let placed = manager.place_application(&app, &empty_resolver).unwrap();
        assert_eq!(placed.queue_path, "root.named");
        assert!(!placed.create);
        // an app without a queue falls through to the user rule
        let app = generate_app("app-2", "", false);
        let placed = manager.place_application(&app, &empty_resolver).unwrap();
        assert_eq!(placed.queue_path, "root.alice");
        assert!(placed.create);
    }

    #[test]
    fn recovery_rule_is_always_last() {
        let manager = PlacementManager::new(&[]).unwrap();
        // non forced applications with no queue fail placement
        let app = generate_app("app-1", "", false);
        assert!(manager.place_application(&app, &empty_resolver).is_err());
        // forced applications land on the recovery queue
        let app = generate_app("app-2", "", true);
        let placed = manager.place_application(&app, &empty_resolver).unwrap();
        assert_eq!(placed.queue_path, RECOVERY_QUEUE_FULL);
        assert!(placed.create);
    }

    #[test]
    fn placement_terminates_in_rule_order() {
        // every rule passes so the error comes after O(rules) steps
        let configs = vec![
            PlacementRuleConfig {
                name: "tag".to_owned(),
                value: Some("queue".to_owned()),
                ..Default::default()
            },
            PlacementRuleConfig {
                name: "provided".to_owned(),
                ..Default::default()
            },
        ];
        let manager = PlacementManager::new(&configs).unwrap();
        let app = generate_app("app-1", "", false);
        assert!(manager.place_application(&app, &empty_resolver).is_err());
    }

    #[test]
    fn update_rules_replaces_the_chain() {
        let mut manager = PlacementManager::new(&[]).unwrap();
        assert!(manager.is_initialised());
        let configs = vec![PlacementRuleConfig {
            name: "fixed".to_owned(),
            value: Some("root.fallback".to_owned()),
            ..Default::default()
        }];
        manager.update_rules(&configs).unwrap();
        let app = generate_app("app-1", "", false);
        let placed = manager.place_application(&app, &empty_resolver).unwrap();
        assert_eq!(placed.queue_path, "root.fallback");
    }

    #[test]
    fn group_rule_with_a_parent_rule() {
        let configs = vec![PlacementRuleConfig {
            name: "group".to_owned(),
            create: true,
            parent: Some(Box::new(PlacementRuleConfig {
                name: "fixed".to_owned(),
                value: Some("root.teams".to_owned()),
                ..Default::default()
            })),
            ..Default::default()
        }];
        let manager = PlacementManager::new(&configs).unwrap();
        // the nested fixed rule supplies the parent prefix
        let app = generate_app("app-1", "", false);
        let placed = manager.place_application(&app, &empty_resolver).unwrap();
        assert_eq!(placed.queue_path, "root.teams.devs");
        assert!(placed.create);
    }
}
