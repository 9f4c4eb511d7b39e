//! Places an application into the queue named on its submission

use gantry::Error;

use super::{qualify_queue_path, resolve_parent, PlacementRule, QueueResolver};
use crate::libs::objects::Application;

/// A rule using the queue the application was submitted with
pub struct ProvidedRule {
    /// Whether this rule may create dynamic queues
    create: bool,
    /// The nested rule supplying the parent prefix if any
    parent: Option<Box<dyn PlacementRule>>,
}

impl ProvidedRule {
    /// Create a new provided rule
    ///
    /// # Arguments
    ///
    /// * `create` - Whether this rule may create dynamic queues
    /// * `parent` - The nested rule supplying the parent prefix if any
    #[must_use]
    pub fn new(create: bool, parent: Option<Box<dyn PlacementRule>>) -> Self {
        ProvidedRule { create, parent }
    }
}

impl PlacementRule for ProvidedRule {
    /// The name of this rule
    fn name(&self) -> &str {
        "provided"
    }

    /// Whether this rule may create dynamic queues
    fn can_create(&self) -> bool {
        self.create
    }

    /// Use the queue named on the submission, qualified under the parent
    fn place_application(
        &self,
        app: &Application,
        resolver: QueueResolver,
    ) -> Result<Option<String>, Error> {
        let provided = app.queue_path();
        if provided.is_empty() {
            return Ok(None);
        }
        let parent = resolve_parent(self.parent.as_deref(), app, resolver)?;
        Ok(qualify_queue_path(&provided, parent.as_deref()))
    }
}
