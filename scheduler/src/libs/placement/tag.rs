//! Places an application into the queue named by one of its tags

use gantry::Error;

use super::{qualify_queue_path, resolve_parent, PlacementRule, QueueResolver};
use crate::libs::objects::Application;

/// A rule reading the queue name from an application tag
pub struct TagRule {
    /// The tag to read the queue name from
    tag_name: String,
    /// Whether this rule may create dynamic queues
    create: bool,
    /// The nested rule supplying the parent prefix if any
    parent: Option<Box<dyn PlacementRule>>,
}

impl TagRule {
    /// Create a new tag rule
    ///
    /// # Arguments
    ///
    /// * `tag_name` - The tag to read the queue name from
    /// * `create` - Whether this rule may create dynamic queues
    /// * `parent` - The nested rule supplying the parent prefix if any
    #[must_use]
    pub fn new<T: Into<String>>(
        tag_name: T,
        create: bool,
        parent: Option<Box<dyn PlacementRule>>,
    ) -> Self {
        TagRule {
            tag_name: tag_name.into(),
            create,
            parent,
        }
    }
}

impl PlacementRule for TagRule {
    /// The name of this rule
    fn name(&self) -> &str {
        "tag"
    }

    /// Whether this rule may create dynamic queues
    fn can_create(&self) -> bool {
        self.create
    }

    /// Use the configured tag value as the queue name
    fn place_application(
        &self,
        app: &Application,
        resolver: QueueResolver,
    ) -> Result<Option<String>, Error> {
        let Some(value) = app.tags.get(&self.tag_name) else {
            return Ok(None);
        };
        if value.is_empty() {
            return Ok(None);
        }
        let parent = resolve_parent(self.parent.as_deref(), app, resolver)?;
        Ok(qualify_queue_path(value, parent.as_deref()))
    }
}
