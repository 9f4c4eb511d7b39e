//! The shared config for Gantry
//!
//! Two kinds of configuration live here: the process settings loaded from a
//! local YAML file with an environment overlay, and the scheduler
//! configuration document resource managers submit over the wire.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::errors::{Error, InvalidEnum};
use crate::models::resources::Resource;

/// Helps serde default the cluster id
fn default_cluster_id() -> String {
    "mycluster".to_owned()
}

/// Helps serde default the scheduling pass interval to one second
fn default_schedule_interval() -> u64 {
    1000
}

/// Helps serde default the pending RM event queue capacity
fn default_pending_event_capacity() -> usize {
    1_048_576
}

/// Helps serde default the inbound scheduler queue capacity
fn default_inbound_event_capacity() -> usize {
    1_048_576
}

/// Helps serde default the event store capacity
fn default_store_capacity() -> usize {
    10_000
}

/// Helps serde default the publish interval to two seconds
fn default_publish_interval() -> u64 {
    2000
}

/// Helps serde default a value to true
fn default_true() -> bool {
    true
}

/// The log levels Gantry components can log at
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Log only errors
    Error,
    /// Log warnings and errors
    Warn,
    /// Log info and above
    #[default]
    Info,
    /// Log debug and above
    Debug,
    /// Log everything
    Trace,
}

impl LogLevel {
    /// Cast our log level to an env filter directive
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// The tracing settings for Gantry
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TracingSettings {
    /// The level to log at
    #[serde(default)]
    pub level: LogLevel,
}

/// The settings for the scheduler core loops
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// How often to run a scheduling pass in milliseconds
    #[serde(default = "default_schedule_interval")]
    pub schedule_interval_ms: u64,
    /// The capacity of the outbound RM event queue
    #[serde(default = "default_pending_event_capacity")]
    pub pending_event_capacity: usize,
    /// The capacity of the inbound scheduler event queue
    #[serde(default = "default_inbound_event_capacity")]
    pub inbound_event_capacity: usize,
}

impl Default for SchedulerSettings {
    /// Create default scheduler settings
    fn default() -> Self {
        SchedulerSettings {
            schedule_interval_ms: default_schedule_interval(),
            pending_event_capacity: default_pending_event_capacity(),
            inbound_event_capacity: default_inbound_event_capacity(),
        }
    }
}

/// The settings for the event store and publisher
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventSettings {
    /// How many event records the store retains before dropping the oldest
    #[serde(default = "default_store_capacity")]
    pub store_capacity: usize,
    /// How often to drain the store to a registered sink in milliseconds
    #[serde(default = "default_publish_interval")]
    pub publish_interval_ms: u64,
    /// Whether event tracking is enabled at all
    #[serde(default = "default_true")]
    pub tracking_enabled: bool,
}

impl Default for EventSettings {
    /// Create default event settings
    fn default() -> Self {
        EventSettings {
            store_capacity: default_store_capacity(),
            publish_interval_ms: default_publish_interval(),
            tracking_enabled: true,
        }
    }
}

/// The settings for all Gantry components
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GantrySettings {
    /// The id of the cluster this scheduler serves
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,
    /// The scheduler core settings
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// The event pipeline settings
    #[serde(default)]
    pub events: EventSettings,
    /// The tracing settings
    #[serde(default)]
    pub tracing: TracingSettings,
}

/// The config for Gantry
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Conf {
    /// The settings for all Gantry components
    #[serde(default)]
    pub gantry: GantrySettings,
}

impl Conf {
    /// Creates a new [`Conf`] object
    ///
    /// # Arguments
    ///
    /// * `path` - The path to use when reading the config file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            // load from a file first
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Yaml))
            // then overlay any environment args ontop
            .add_source(
                config::Environment::with_prefix("gantry")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

/// How a queue orders its children and applications for scheduling
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortPolicy {
    /// Order by used over guaranteed share ascending
    #[default]
    Fair,
    /// Order by first pending ask time
    Fifo,
    /// Prioritise started applications over new ones
    StateAware,
}

impl SortPolicy {
    /// Cast our sort policy to a str
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            SortPolicy::Fair => "fair",
            SortPolicy::Fifo => "fifo",
            SortPolicy::StateAware => "stateaware",
        }
    }
}

impl FromStr for SortPolicy {
    type Err = InvalidEnum;

    /// Convert this str to a [`SortPolicy`]
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "fair" => Ok(SortPolicy::Fair),
            "fifo" => Ok(SortPolicy::Fifo),
            "stateaware" => Ok(SortPolicy::StateAware),
            _ => Err(InvalidEnum(format!("Unknown SortPolicy: {raw}"))),
        }
    }
}

impl fmt::Display for SortPolicy {
    /// Cleanly print a sort policy
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a partition orders candidate nodes for an ask
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeSortPolicy {
    /// Prefer the node with the most available resources
    #[default]
    MostAvailable,
    /// Prefer the node with the least available resources
    LeastAvailable,
}

/// The resource shapes configured on a queue
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct QueueResourcesConfig {
    /// The guaranteed resources for this queue
    #[serde(default)]
    pub guaranteed: BTreeMap<String, u64>,
    /// The maximum resources for this queue
    #[serde(default)]
    pub max: BTreeMap<String, u64>,
}

impl QueueResourcesConfig {
    /// Get the guaranteed resources as a resource vector
    #[must_use]
    pub fn guaranteed_resource(&self) -> Resource {
        Resource::from_pairs(self.guaranteed.iter().map(|(k, v)| (k.clone(), *v)))
    }

    /// Get the max resources as a resource vector if any are set
    #[must_use]
    pub fn max_resource(&self) -> Option<Resource> {
        if self.max.is_empty() {
            None
        } else {
            Some(Resource::from_pairs(
                self.max.iter().map(|(k, v)| (k.clone(), *v)),
            ))
        }
    }
}

/// The template a parent queue stamps onto dynamically created children
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ChildTemplate {
    /// The maximum number of applications for a dynamic child
    #[serde(default)]
    pub max_applications: Option<u64>,
    /// The properties to set on a dynamic child
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// The resource shapes to set on a dynamic child
    #[serde(default)]
    pub resources: QueueResourcesConfig,
}

/// The configuration of one queue in the hierarchy
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct QueueConfig {
    /// The name of this queue
    pub name: String,
    /// Whether this queue must stay a parent even with no children
    #[serde(default)]
    pub parent: bool,
    /// The ACL controlling who may submit to this queue
    #[serde(default)]
    pub submit_acl: String,
    /// The ACL controlling who may administer this queue
    #[serde(default)]
    pub admin_acl: String,
    /// The resource shapes for this queue
    #[serde(default)]
    pub resources: QueueResourcesConfig,
    /// The properties set on this queue
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// The maximum number of running applications if set
    #[serde(default)]
    pub max_applications: Option<u64>,
    /// How this queue orders children and applications
    #[serde(default)]
    pub sort_policy: SortPolicy,
    /// The template stamped onto dynamically created children
    #[serde(default)]
    pub child_template: Option<ChildTemplate>,
    /// The children of this queue
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
}

/// The configuration of one placement rule
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PlacementRuleConfig {
    /// The name of the rule to instantiate
    pub name: String,
    /// Whether this rule may create dynamic queues
    #[serde(default)]
    pub create: bool,
    /// The value this rule resolves with, rule specific
    #[serde(default)]
    pub value: Option<String>,
    /// The nested rule supplying the parent queue prefix
    #[serde(default)]
    pub parent: Option<Box<PlacementRuleConfig>>,
}

/// A user or group quota limit on a queue path
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LimitConfig {
    /// A human readable description of this limit
    #[serde(default)]
    pub limit: String,
    /// The users this limit applies to, `*` for the wildcard user
    #[serde(default)]
    pub users: Vec<String>,
    /// The groups this limit applies to
    #[serde(default)]
    pub groups: Vec<String>,
    /// The maximum resources for each matched user or group
    #[serde(default)]
    pub max_resources: BTreeMap<String, u64>,
    /// The maximum running applications for each matched user or group
    #[serde(default)]
    pub max_applications: Option<u64>,
}

impl LimitConfig {
    /// Get the max resources as a resource vector if any are set
    #[must_use]
    pub fn max_resource(&self) -> Option<Resource> {
        if self.max_resources.is_empty() {
            None
        } else {
            Some(Resource::from_pairs(
                self.max_resources.iter().map(|(k, v)| (k.clone(), *v)),
            ))
        }
    }
}

/// The limits configured for one queue path
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct QueueLimitsConfig {
    /// The dot separated queue path these limits apply to
    pub queue_path: String,
    /// The limits on this path
    #[serde(default)]
    pub limits: Vec<LimitConfig>,
}

/// The configuration of one partition
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PartitionConfig {
    /// The name of this partition
    pub name: String,
    /// The queue hierarchy rooted at `root`
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
    /// The placement rules applied in order
    #[serde(default)]
    pub placement_rules: Vec<PlacementRuleConfig>,
    /// The user and group limits per queue path
    #[serde(default)]
    pub limits: Vec<QueueLimitsConfig>,
    /// How this partition orders candidate nodes
    #[serde(default)]
    pub node_sort_policy: NodeSortPolicy,
}

/// The placement rule names the scheduler recognises
const KNOWN_RULES: [&str; 6] = ["provided", "user", "group", "tag", "fixed", "recovery"];

/// The scheduler configuration submitted by a resource manager
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SchedulerConfig {
    /// The partitions this configuration defines
    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
}

impl SchedulerConfig {
    /// Parse and validate a scheduler configuration document
    ///
    /// # Arguments
    ///
    /// * `raw` - The raw YAML document to parse
    pub fn parse(raw: &str) -> Result<Self, Error> {
        // an empty document is a valid empty config
        if raw.trim().is_empty() {
            return Ok(SchedulerConfig::default());
        }
        let config: SchedulerConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate this scheduler configuration
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = HashSet::with_capacity(self.partitions.len());
        for partition in &self.partitions {
            // partition names must be set and unique
            if partition.name.is_empty() {
                return Err(Error::new("partition name must not be empty"));
            }
            if !seen.insert(partition.name.to_lowercase()) {
                return Err(Error::new(format!(
                    "duplicate partition name: {}",
                    partition.name
                )));
            }
            // the hierarchy must be a single tree rooted at root
            match partition.queues.as_slice() {
                [] => {}
                [root] if root.name.eq_ignore_ascii_case("root") => {
                    validate_queue(root, &partition.name)?;
                }
                [other] => {
                    return Err(Error::new(format!(
                        "partition {} must be rooted at 'root', found '{}'",
                        partition.name, other.name
                    )));
                }
                _ => {
                    return Err(Error::new(format!(
                        "partition {} must have exactly one root queue",
                        partition.name
                    )));
                }
            }
            // every placement rule must be one we know how to build
            for rule in &partition.placement_rules {
                validate_rule(rule, &partition.name)?;
            }
        }
        Ok(())
    }

    /// Get the configuration of one partition by its unqualified name
    ///
    /// # Arguments
    ///
    /// * `name` - The unqualified partition name to look for
    #[must_use]
    pub fn partition(&self, name: &str) -> Option<&PartitionConfig> {
        self.partitions
            .iter()
            .find(|partition| partition.name.eq_ignore_ascii_case(name))
    }
}

/// Validate a queue and its children recursively
///
/// # Arguments
///
/// * `queue` - The queue config to validate
/// * `partition` - The partition this queue belongs to for error messages
fn validate_queue(queue: &QueueConfig, partition: &str) -> Result<(), Error> {
    let mut seen = HashSet::with_capacity(queue.queues.len());
    for child in &queue.queues {
        if child.name.is_empty() || child.name.contains('.') {
            return Err(Error::new(format!(
                "invalid queue name '{}' under '{}' in partition {partition}",
                child.name, queue.name
            )));
        }
        // sibling names must be unique ignoring case
        if !seen.insert(child.name.to_lowercase()) {
            return Err(Error::new(format!(
                "duplicate queue name '{}' under '{}' in partition {partition}",
                child.name, queue.name
            )));
        }
        validate_queue(child, partition)?;
    }
    Ok(())
}

/// Validate a placement rule and its parent chain
///
/// # Arguments
///
/// * `rule` - The rule config to validate
/// * `partition` - The partition this rule belongs to for error messages
fn validate_rule(rule: &PlacementRuleConfig, partition: &str) -> Result<(), Error> {
    if !KNOWN_RULES.contains(&rule.name.to_lowercase().as_str()) {
        return Err(Error::new(format!(
            "unknown placement rule '{}' in partition {partition}",
            rule.name
        )));
    }
    if let Some(parent) = &rule.parent {
        validate_rule(parent, partition)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A small but complete scheduler config document
    const SAMPLE: &str = r"
partitions:
  - name: default
    queues:
      - name: root
        submit_acl: '*'
        queues:
          - name: batch
            resources:
              guaranteed:
                memory: 100
              max:
                memory: 800
            max_applications: 8
    placement_rules:
      - name: provided
        create: true
    limits:
      - queue_path: root.batch
        limits:
          - limit: batch users
            users:
              - '*'
            max_applications: 4
";

    #[test]
    fn parse_sample_config() {
        let config = SchedulerConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.partitions.len(), 1);
        let partition = config.partition("default").unwrap();
        assert_eq!(partition.queues[0].name, "root");
        let batch = &partition.queues[0].queues[0];
        assert_eq!(batch.resources.max_resource().unwrap().get("memory"), 800);
        assert_eq!(batch.max_applications, Some(8));
        assert_eq!(partition.placement_rules[0].name, "provided");
        assert_eq!(partition.limits[0].queue_path, "root.batch");
    }

    #[test]
    fn empty_config_is_valid() {
        let config = SchedulerConfig::parse("").unwrap();
        assert!(config.partitions.is_empty());
    }

    #[test]
    fn duplicate_partitions_fail() {
        let raw = "partitions:\n  - name: a\n  - name: A\n";
        assert!(SchedulerConfig::parse(raw).is_err());
    }

    #[test]
    fn non_root_hierarchy_fails() {
        let raw = "partitions:\n  - name: a\n    queues:\n      - name: other\n";
        assert!(SchedulerConfig::parse(raw).is_err());
    }

    #[test]
    fn duplicate_siblings_fail() {
        let raw = "partitions:
  - name: a
    queues:
      - name: root
        queues:
          - name: child
          - name: Child
";
        assert!(SchedulerConfig::parse(raw).is_err());
    }

    #[test]
    fn unknown_rule_fails() {
        let raw = "partitions:\n  - name: a\n    placement_rules:\n      - name: nope\n";
        assert!(SchedulerConfig::parse(raw).is_err());
    }
}
