//! Multi dimensional resource vectors for scheduling
//!
//! Resources are maps from a resource type name (cpu, memory, gpus, ...) to a
//! quantity. A type that is absent counts as zero when it is used and as
//! unbounded when it caps other resources.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, SubAssign};

/// A typed multi dimensional resource vector
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Resource {
    /// The quantity tracked for each resource type
    resources: BTreeMap<String, u64>,
}

impl Resource {
    /// Create a new empty resource vector
    #[must_use]
    pub fn new() -> Self {
        Resource {
            resources: BTreeMap::default(),
        }
    }

    /// Create a resource vector from a list of type/quantity pairs
    ///
    /// # Arguments
    ///
    /// * `pairs` - The resource types and their quantities
    #[must_use]
    pub fn from_pairs<T: Into<String>, I: IntoIterator<Item = (T, u64)>>(pairs: I) -> Self {
        let mut resource = Resource::new();
        // add each typed quantity to our map
        for (name, quantity) in pairs {
            resource.resources.insert(name.into(), quantity);
        }
        resource
    }

    /// Set the quantity for a single resource type
    ///
    /// # Arguments
    ///
    /// * `name` - The resource type to set
    /// * `quantity` - The quantity to set
    #[must_use]
    pub fn with<T: Into<String>>(mut self, name: T, quantity: u64) -> Self {
        self.resources.insert(name.into(), quantity);
        self
    }

    /// Get the quantity for a resource type
    ///
    /// Absent types count as zero.
    ///
    /// # Arguments
    ///
    /// * `name` - The resource type to get
    #[must_use]
    pub fn get(&self, name: &str) -> u64 {
        self.resources.get(name).copied().unwrap_or_default()
    }

    /// Iterate over the typed quantities in this resource vector
    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.resources.iter()
    }

    /// Check if this vector tracks no quantities at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Check if all tracked quantities are zero
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.resources.values().all(|quantity| *quantity == 0)
    }

    /// Check if this resource vector fits inside a larger one
    ///
    /// Every type named in this vector must fit in the larger vector. A type
    /// that is absent from the larger vector counts as zero there.
    ///
    /// # Arguments
    ///
    /// * `larger` - The resource vector to fit into
    #[must_use]
    pub fn fits_in(&self, larger: &Resource) -> bool {
        // check each of our types against the larger vector
        for (name, quantity) in &self.resources {
            if *quantity > larger.get(name) {
                return false;
            }
        }
        true
    }

    /// Subtract a resource vector saturating each type at zero
    ///
    /// # Arguments
    ///
    /// * `other` - The resource vector to subtract
    pub fn sub_saturating(&mut self, other: &Resource) {
        for (name, quantity) in &other.resources {
            let entry = self.resources.entry(name.clone()).or_default();
            *entry = entry.saturating_sub(*quantity);
        }
    }

    /// Subtract only the types that already exist in this vector
    ///
    /// Types that are only in `other` stay unbounded and are not added.
    ///
    /// # Arguments
    ///
    /// * `other` - The resource vector to subtract
    #[must_use]
    pub fn sub_only_existing(&self, other: &Resource) -> Resource {
        let mut out = self.clone();
        // only touch the types this vector already defines
        for (name, quantity) in &mut out.resources {
            *quantity = quantity.saturating_sub(other.get(name));
        }
        out
    }

    /// The largest used/guaranteed ratio over the guaranteed types
    ///
    /// Used to order fair queues by how far over or under their guaranteed
    /// share they are. A queue with no guaranteed resources sorts as fully
    /// used.
    ///
    /// # Arguments
    ///
    /// * `guaranteed` - The guaranteed resources to compare against
    #[must_use]
    pub fn fair_share_ratio(&self, guaranteed: &Resource) -> f64 {
        let mut ratio: f64 = 0.0;
        let mut defined = false;
        // take the largest ratio over all guaranteed types
        for (name, quantity) in &guaranteed.resources {
            if *quantity > 0 {
                defined = true;
                ratio = ratio.max(self.get(name) as f64 / *quantity as f64);
            }
        }
        // treat an empty guarantee as fully used so it sorts last
        if defined {
            ratio
        } else {
            1.0
        }
    }

    /// The sum of the tracked quantities for a set of types
    ///
    /// # Arguments
    ///
    /// * `names` - The resource types to sum
    #[must_use]
    pub fn sum_of<'a, I: IntoIterator<Item = &'a String>>(&self, names: I) -> u64 {
        names.into_iter().map(|name| self.get(name)).sum()
    }

    /// The total of all tracked quantities
    #[must_use]
    pub fn total(&self) -> u64 {
        self.resources.values().sum()
    }
}

/// The componentwise minimum of two optional resource vectors
///
/// The minimum of a vector and nothing is the vector itself. When both are
/// set the minimum is taken over all types defined in either vector.
///
/// # Arguments
///
/// * `left` - The first resource vector
/// * `right` - The second resource vector
#[must_use]
pub fn component_wise_min(left: Option<&Resource>, right: Option<&Resource>) -> Option<Resource> {
    match (left, right) {
        (Some(left), Some(right)) => {
            let mut out = Resource::new();
            // collect every type defined on either side
            for name in left.resources.keys().chain(right.resources.keys()) {
                out.resources
                    .insert(name.clone(), left.get(name).min(right.get(name)));
            }
            Some(out)
        }
        (Some(left), None) => Some(left.clone()),
        (None, Some(right)) => Some(right.clone()),
        (None, None) => None,
    }
}

/// The absolute used capacity as a percentage per resource type
///
/// Only types defined in both the total and the used vector are reported.
///
/// # Arguments
///
/// * `total` - The total capacity
/// * `used` - The used resources
#[must_use]
pub fn abs_used_capacity(total: &Resource, used: &Resource) -> Resource {
    let mut out = Resource::new();
    for (name, capacity) in &total.resources {
        // skip types with no capacity to avoid dividing by zero
        if *capacity == 0 {
            continue;
        }
        if let Some(quantity) = used.resources.get(name) {
            out.resources
                .insert(name.clone(), quantity.saturating_mul(100) / capacity);
        }
    }
    out
}

impl AddAssign<&Resource> for Resource {
    fn add_assign(&mut self, other: &Resource) {
        // add each typed quantity to our respective value
        for (name, quantity) in &other.resources {
            *self.resources.entry(name.clone()).or_default() += quantity;
        }
    }
}

impl SubAssign<&Resource> for Resource {
    fn sub_assign(&mut self, other: &Resource) {
        self.sub_saturating(other);
    }
}

impl Add<&Resource> for &Resource {
    type Output = Resource;

    /// Add two resource vectors into a new one
    fn add(self, other: &Resource) -> Resource {
        let mut out = self.clone();
        out += other;
        out
    }
}

impl fmt::Display for Resource {
    /// Implement display for a resource vector
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (name, quantity) in &self.resources {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {quantity}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_in_with_missing_type_fails() {
        // a type present in the ask but absent in the target counts as zero
        let ask = Resource::from_pairs([("memory", 1)]);
        let node = Resource::from_pairs([("cpu", 10)]);
        assert!(!ask.fits_in(&node));
        // the empty vector fits everywhere
        assert!(Resource::new().fits_in(&node));
    }

    #[test]
    fn fits_in_componentwise() {
        let ask = Resource::from_pairs([("memory", 5), ("cpu", 2)]);
        let node = Resource::from_pairs([("memory", 10), ("cpu", 2)]);
        assert!(ask.fits_in(&node));
        let too_big = Resource::from_pairs([("memory", 11)]);
        assert!(!too_big.fits_in(&node));
    }

    #[test]
    fn sub_only_existing_ignores_new_types() {
        let max = Resource::from_pairs([("memory", 10)]);
        let used = Resource::from_pairs([("memory", 4), ("cpu", 100)]);
        let left = max.sub_only_existing(&used);
        assert_eq!(left.get("memory"), 6);
        // cpu stays unbounded instead of appearing as zero
        assert!(!left.resources.contains_key("cpu"));
    }

    #[test]
    fn component_wise_min_with_none_is_identity() {
        let some = Resource::from_pairs([("memory", 7)]);
        let min = component_wise_min(Some(&some), None);
        assert_eq!(min, Some(some.clone()));
        let min = component_wise_min(None, Some(&some));
        assert_eq!(min, Some(some));
        assert_eq!(component_wise_min(None, None), None);
    }

    #[test]
    fn component_wise_min_covers_both_sides() {
        let left = Resource::from_pairs([("memory", 10), ("cpu", 2)]);
        let right = Resource::from_pairs([("memory", 4), ("gpu", 1)]);
        let min = component_wise_min(Some(&left), Some(&right)).unwrap();
        assert_eq!(min.get("memory"), 4);
        // types only on one side min against zero
        assert_eq!(min.get("cpu"), 0);
        assert_eq!(min.get("gpu"), 0);
    }

    #[test]
    fn add_and_sub_round_trip() {
        let mut usage = Resource::new();
        let delta = Resource::from_pairs([("memory", 3), ("cpu", 1)]);
        usage += &delta;
        usage += &delta;
        usage -= &delta;
        assert_eq!(usage, delta);
        usage -= &delta;
        assert!(usage.is_zero());
    }

    #[test]
    fn sub_saturates_at_zero() {
        let mut usage = Resource::from_pairs([("memory", 1)]);
        usage -= &Resource::from_pairs([("memory", 5)]);
        assert_eq!(usage.get("memory"), 0);
    }

    #[test]
    fn fair_share_ratio_tracks_largest_type() {
        let used = Resource::from_pairs([("memory", 5), ("cpu", 9)]);
        let guaranteed = Resource::from_pairs([("memory", 10), ("cpu", 10)]);
        let ratio = used.fair_share_ratio(&guaranteed);
        assert!((ratio - 0.9).abs() < f64::EPSILON);
        // no guarantee sorts as fully used
        assert!((used.fair_share_ratio(&Resource::new()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn abs_used_capacity_is_percent_of_defined_types() {
        let total = Resource::from_pairs([("memory", 10), ("cpu", 0)]);
        let used = Resource::from_pairs([("memory", 8), ("cpu", 1), ("gpu", 1)]);
        let percent = abs_used_capacity(&total, &used);
        assert_eq!(percent.get("memory"), 80);
        // zero capacity and undefined types are skipped
        assert!(!percent.resources.contains_key("cpu"));
        assert!(!percent.resources.contains_key("gpu"));
    }
}
