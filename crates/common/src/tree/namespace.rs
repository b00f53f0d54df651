//! Slash separated names presented as nested grouping directories.
//!
//! Repository names such as `team/api` and ref names such as `feature/x`
//! become a directory per prefix. When a name is also the prefix of a longer
//! one (`team` and `team/api`), the shorter name wins and the longer one is
//! not reachable.

use std::collections::BTreeSet;

/// Result of matching leading path segments against a set of names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    /// `name` is complete after `consumed` segments.
    Leaf { name: String, consumed: usize },
    /// All segments form a prefix of at least one longer name.
    Group,
    Missing,
}

#[derive(Debug, Clone)]
pub struct Namespace<'a> {
    names: Vec<&'a str>,
}

impl<'a> Namespace<'a> {
    pub fn new(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut names: Vec<&'a str> = names.into_iter().collect();
        names.sort_unstable();
        names.dedup();
        Self { names }
    }

    fn contains(&self, name: &str) -> bool {
        self.names.binary_search(&name).is_ok()
    }

    fn has_prefix(&self, prefix: &str) -> bool {
        let dir = format!("{prefix}/");
        let start = self.names.partition_point(|n| *n < dir.as_str());
        self.names
            .get(start)
            .is_some_and(|n| n.starts_with(dir.as_str()))
    }

    /// Match as many leading `segments` as needed to complete a name.
    pub fn lookup(&self, segments: &[String]) -> NameMatch {
        if segments.is_empty() {
            return NameMatch::Group;
        }

        let mut candidate = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                candidate.push('/');
            }
            candidate.push_str(segment);

            if self.contains(&candidate) {
                return NameMatch::Leaf {
                    name: candidate,
                    consumed: i + 1,
                };
            }
            if !self.has_prefix(&candidate) {
                return NameMatch::Missing;
            }
        }
        NameMatch::Group
    }

    /// Segments directly below `segments`, sorted and deduplicated.
    pub fn children(&self, segments: &[String]) -> Vec<String> {
        let prefix = if segments.is_empty() {
            String::new()
        } else {
            format!("{}/", segments.join("/"))
        };

        let mut children = BTreeSet::new();
        for name in &self.names {
            let Some(rest) = name.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let segment = rest.split_once('/').map_or(rest, |(first, _)| first);
            if !segment.is_empty() {
                children.insert(segment);
            }
        }
        children.into_iter().map(str::to_string).collect()
    }
}
