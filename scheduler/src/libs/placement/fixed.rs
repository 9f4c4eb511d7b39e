//! Places every application into one configured queue

use gantry::Error;

use super::{qualify_queue_path, resolve_parent, PlacementRule, QueueResolver};
use crate::libs::objects::Application;

/// A rule sending every application to a fixed queue
pub struct FixedRule {
    /// The queue every application lands on
    value: String,
    /// Whether this rule may create dynamic queues
    create: bool,
    /// The nested rule supplying the parent prefix if any
    parent: Option<Box<dyn PlacementRule>>,
}

impl FixedRule {
    /// Create a new fixed rule
    ///
    /// # Arguments
    ///
    /// * `value` - The queue every application lands on
    /// * `create` - Whether this rule may create dynamic queues
    /// * `parent` - The nested rule supplying the parent prefix if any
    #[must_use]
    pub fn new<T: Into<String>>(
        value: T,
        create: bool,
        parent: Option<Box<dyn PlacementRule>>,
    ) -> Self {
        FixedRule {
            value: value.into(),
            create,
            parent,
        }
    }
}

impl PlacementRule for FixedRule {
    /// The name of this rule
    fn name(&self) -> &str {
        "fixed"
    }

    /// Whether this rule may create dynamic queues
    fn can_create(&self) -> bool {
        self.create
    }

    /// Use the configured queue for every application
    fn place_application(
        &self,
        app: &Application,
        resolver: QueueResolver,
    ) -> Result<Option<String>, Error> {
        let parent = resolve_parent(self.parent.as_deref(), app, resolver)?;
        Ok(qualify_queue_path(&self.value, parent.as_deref()))
    }
}
