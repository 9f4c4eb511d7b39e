//! Places an application into a queue named after its submitter

use gantry::Error;

use super::{qualify_queue_path, resolve_parent, PlacementRule, QueueResolver};
use crate::libs::objects::Application;

/// A rule mapping the submitting user onto a queue name
pub struct UserRule {
    /// Whether this rule may create dynamic queues
    create: bool,
    /// The nested rule supplying the parent prefix if any
    parent: Option<Box<dyn PlacementRule>>,
}

impl UserRule {
    /// Create a new user rule
    ///
    /// # Arguments
    ///
    /// * `create` - Whether this rule may create dynamic queues
    /// * `parent` - The nested rule supplying the parent prefix if any
    #[must_use]
    pub fn new(create: bool, parent: Option<Box<dyn PlacementRule>>) -> Self {
        UserRule { create, parent }
    }
}

impl PlacementRule for UserRule {
    /// The name of this rule
    fn name(&self) -> &str {
        "user"
    }

    /// Whether this rule may create dynamic queues
    fn can_create(&self) -> bool {
        self.create
    }

    /// Use the submitting user as the queue name
    fn place_application(
        &self,
        app: &Application,
        resolver: QueueResolver,
    ) -> Result<Option<String>, Error> {
        if app.user.user.is_empty() {
            return Ok(None);
        }
        // queue names cannot carry the path separator
        let name = app.user.user.replace('.', "_dot_");
        let parent = resolve_parent(self.parent.as_deref(), app, resolver)?;
        Ok(qualify_queue_path(&name, parent.as_deref()))
    }
}
