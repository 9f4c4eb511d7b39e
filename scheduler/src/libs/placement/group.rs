//! Places an application into a queue named after its primary group

use gantry::Error;

use super::{qualify_queue_path, resolve_parent, PlacementRule, QueueResolver};
use crate::libs::objects::Application;

/// A rule mapping the submitter's primary group onto a queue name
pub struct GroupRule {
    /// Whether this rule may create dynamic queues
    create: bool,
    /// The nested rule supplying the parent prefix if any
    parent: Option<Box<dyn PlacementRule>>,
}

impl GroupRule {
    /// Create a new group rule
    ///
    /// # Arguments
    ///
    /// * `create` - Whether this rule may create dynamic queues
    /// * `parent` - The nested rule supplying the parent prefix if any
    #[must_use]
    pub fn new(create: bool, parent: Option<Box<dyn PlacementRule>>) -> Self {
        GroupRule { create, parent }
    }
}

impl PlacementRule for GroupRule {
    /// The name of this rule
    fn name(&self) -> &str {
        "group"
    }

    /// Whether this rule may create dynamic queues
    fn can_create(&self) -> bool {
        self.create
    }

    /// Use the first group of the submitting user as the queue name
    fn place_application(
        &self,
        app: &Application,
        resolver: QueueResolver,
    ) -> Result<Option<String>, Error> {
        let Some(group) = app.user.groups.first() else {
            return Ok(None);
        };
        if group.is_empty() {
            return Ok(None);
        }
        // queue names cannot carry the path separator
        let name = group.replace('.', "_dot_");
        let parent = resolve_parent(self.parent.as_deref(), app, resolver)?;
        Ok(qualify_queue_path(&name, parent.as_deref()))
    }
}
