//! Places force created applications into the reserved recovery queue
//!
//! This rule runs implicitly after all other rules so an application that
//! corresponds to an already executing workload is never rejected just
//! because placement failed.

use tracing::{event, Level};

use gantry::models::RECOVERY_QUEUE_FULL;
use gantry::Error;

use super::{PlacementRule, QueueResolver};
use crate::libs::objects::Application;

/// A rule catching force created applications no other rule placed
#[derive(Default)]
pub struct RecoveryRule {}

impl PlacementRule for RecoveryRule {
    /// The name of this rule
    fn name(&self) -> &str {
        "recovery"
    }

    /// The recovery queue is created on demand
    fn can_create(&self) -> bool {
        true
    }

    /// Only forced applications resolve to the recovery queue
    fn place_application(
        &self,
        app: &Application,
        _resolver: QueueResolver,
    ) -> Result<Option<String>, Error> {
        if !app.is_create_forced() {
            return Ok(None);
        }
        event!(
            Level::INFO,
            application = %app.application_id,
            queue = RECOVERY_QUEUE_FULL,
            msg = "recovery rule application placed"
        );
        Ok(Some(RECOVERY_QUEUE_FULL.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::events::{ApplicationEvents, EventStore};
    use crate::libs::objects::SchedulingQueue;
    use gantry::models::{UserGroup, CREATION_FORCE_TAG};
    use std::collections::HashMap;
    use std::sync::Arc;

    /// A resolver that knows no queues
    fn empty_resolver(_: &str) -> Option<Arc<SchedulingQueue>> {
        None
    }

    /// Build a throwaway application for tests
    fn generate_app(forced: bool) -> Application {
        let store = Arc::new(EventStore::new(10, false));
        let mut tags = HashMap::default();
        if forced {
            tags.insert(CREATION_FORCE_TAG.to_owned(), "true".to_owned());
        }
        Application::new(
            "app-1",
            "[test]rm.default",
            "",
            UserGroup::default(),
            tags,
            ApplicationEvents::new(&store),
        )
    }

    #[test]
    fn non_forced_application_passes() {
        let rule = RecoveryRule::default();
        let placed = rule
            .place_application(&generate_app(false), &empty_resolver)
            .unwrap();
        assert_eq!(placed, None);
    }

    #[test]
    fn forced_application_lands_on_recovery() {
        let rule = RecoveryRule::default();
        let placed = rule
            .place_application(&generate_app(true), &empty_resolver)
            .unwrap();
        assert_eq!(placed, Some(RECOVERY_QUEUE_FULL.to_owned()));
    }
}
