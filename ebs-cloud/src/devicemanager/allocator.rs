//! Device name allocation strategies.
//!
//! An allocator picks the next free device-name suffix for a single node.
//! Suffixes are the part of the device path after the prefix, e.g. `f` in
//! `/dev/xvdf`. The set of names currently in use is passed in on every call,
//! so allocators hold only ordering state.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use thiserror::Error;

/// Names currently in use on a node, keyed by suffix, valued by volume ID.
pub type ExistingNames = HashMap<String, String>;

/// Returned when every name in the pool is already in use.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("there are no names available")]
pub struct ExhaustedError;

/// Chooses device-name suffixes for one node.
pub trait DeviceAllocator: Send {
    /// Returns the first name, in preference order, that is not a key of `existing`.
    fn next(&self, existing: &ExistingNames) -> Result<String, ExhaustedError>;

    /// Moves `name` to the back of the preference order.
    fn deprioritize(&mut self, name: &str);
}

/// Single-letter suffixes `b` through `z`, optionally followed by the
/// two-letter suffixes `ba` through `cz`.
pub fn default_names(extended: bool) -> Vec<String> {
    let mut names: Vec<String> = ('b'..='z').map(String::from).collect();
    if extended {
        for first in ['b', 'c'] {
            for second in 'a'..='z' {
                names.push(format!("{first}{second}"));
            }
        }
    }
    names
}

/// Scans the pool in a fixed order; deprioritization is ignored.
#[derive(Debug, Clone)]
pub struct LinearAllocator {
    names: Vec<String>,
}

impl LinearAllocator {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl DeviceAllocator for LinearAllocator {
    fn next(&self, existing: &ExistingNames) -> Result<String, ExhaustedError> {
        first_free(&self.names, existing)
    }

    fn deprioritize(&mut self, _name: &str) {}
}

/// Keeps recently handed-out names at the back of the pool.
///
/// A name that was just allocated and then freed is not reissued until every
/// other free name has been tried, which gives the cloud's view of the node
/// time to catch up with the detach.
#[derive(Debug, Clone)]
pub struct RecencyAllocator {
    names: Vec<String>,
}

impl RecencyAllocator {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Current preference order.
    pub fn order(&self) -> &[String] {
        &self.names
    }
}

impl DeviceAllocator for RecencyAllocator {
    fn next(&self, existing: &ExistingNames) -> Result<String, ExhaustedError> {
        first_free(&self.names, existing)
    }

    fn deprioritize(&mut self, name: &str) {
        if let Some(idx) = self.names.iter().position(|n| n == name) {
            let name = self.names.remove(idx);
            self.names.push(name);
        }
    }
}

fn first_free(names: &[String], existing: &ExistingNames) -> Result<String, ExhaustedError> {
    names
        .iter()
        .find(|name| !existing.contains_key(name.as_str()))
        .cloned()
        .ok_or(ExhaustedError)
}

// ============================================================================
// AllocatorKind
// ============================================================================

/// Allocation strategy used for newly seen nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorKind {
    /// Deprioritizes just-used names (default)
    #[default]
    Recency,
    /// Always scans in pool order
    Linear,
}

impl AllocatorKind {
    /// Build an allocator of this kind over `names`.
    pub fn build(self, names: Vec<String>) -> Box<dyn DeviceAllocator> {
        match self {
            AllocatorKind::Recency => Box::new(RecencyAllocator::new(names)),
            AllocatorKind::Linear => Box::new(LinearAllocator::new(names)),
        }
    }
}

impl Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocatorKind::Recency => write!(f, "recency"),
            AllocatorKind::Linear => write!(f, "linear"),
        }
    }
}

impl FromStr for AllocatorKind {
    type Err = AllocatorKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recency" | "" => Ok(AllocatorKind::Recency),
            "linear" => Ok(AllocatorKind::Linear),
            _ => Err(AllocatorKindParseError(s.to_string())),
        }
    }
}

/// Error returned when parsing an invalid allocator kind.
#[derive(Error, Debug, Clone)]
#[error("unknown device allocator '{0}': expected 'recency' or 'linear'")]
pub struct AllocatorKindParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    fn in_use(names: &[&str]) -> ExistingNames {
        names
            .iter()
            .map(|n| (n.to_string(), format!("vol-{n}")))
            .collect()
    }

    fn pool(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_default_names() {
        let names = default_names(false);
        assert_eq!(names.len(), 25);
        assert_eq!(names.first().map(String::as_str), Some("b"));
        assert_eq!(names.last().map(String::as_str), Some("z"));

        let extended = default_names(true);
        assert_eq!(extended.len(), 25 + 52);
        assert!(extended.contains(&"ba".to_string()));
        assert_eq!(extended.last().map(String::as_str), Some("cz"));
    }

    #[test]
    fn test_next_returns_first_unused() {
        let allocator = RecencyAllocator::new(pool(&["a", "b", "c", "d"]));
        assert_eq!(allocator.next(&in_use(&["b", "c"])).unwrap(), "a");
        assert_eq!(allocator.next(&in_use(&["a", "b", "c"])).unwrap(), "d");
    }

    #[test]
    fn test_next_exhausted() {
        let allocator = RecencyAllocator::new(pool(&["a", "b"]));
        assert_eq!(allocator.next(&in_use(&["a", "b"])), Err(ExhaustedError));

        let linear = LinearAllocator::new(pool(&["a"]));
        assert_eq!(linear.next(&in_use(&["a"])), Err(ExhaustedError));
    }

    #[test]
    fn test_deprioritize_prefers_other_free_names() {
        let mut allocator = RecencyAllocator::new(pool(&["a", "b", "c"]));
        allocator.deprioritize("a");
        assert_eq!(allocator.order(), &["b", "c", "a"]);
        assert_eq!(allocator.next(&in_use(&[])).unwrap(), "b");
    }

    #[test]
    fn test_deprioritized_name_reused_when_only_one_free() {
        let mut allocator = RecencyAllocator::new(pool(&["a", "b", "c"]));
        allocator.deprioritize("a");
        assert_eq!(allocator.next(&in_use(&["b", "c"])).unwrap(), "a");
    }

    #[test]
    fn test_deprioritize_unknown_name_is_ignored() {
        let mut allocator = RecencyAllocator::new(pool(&["a", "b"]));
        allocator.deprioritize("zz");
        assert_eq!(allocator.order(), &["a", "b"]);
    }

    #[test]
    fn test_linear_ignores_deprioritize() {
        let mut allocator = LinearAllocator::new(pool(&["a", "b"]));
        allocator.deprioritize("a");
        assert_eq!(allocator.next(&in_use(&[])).unwrap(), "a");
    }

    #[test]
    fn test_allocator_kind_from_str() {
        assert_eq!("recency".parse::<AllocatorKind>().unwrap(), AllocatorKind::Recency);
        assert_eq!("LINEAR".parse::<AllocatorKind>().unwrap(), AllocatorKind::Linear);
        assert_eq!("".parse::<AllocatorKind>().unwrap(), AllocatorKind::Recency);
        assert!("random".parse::<AllocatorKind>().is_err());
        assert_eq!(AllocatorKind::Linear.to_string(), "linear");
    }

    #[test]
    fn test_allocator_kind_build() {
        let mut allocator = AllocatorKind::Recency.build(pool(&["a", "b"]));
        allocator.deprioritize("a");
        assert_eq!(allocator.next(&in_use(&[])).unwrap(), "b");

        let mut allocator = AllocatorKind::Linear.build(pool(&["a", "b"]));
        allocator.deprioritize("a");
        assert_eq!(allocator.next(&in_use(&[])).unwrap(), "a");
    }
}
