//! Topic list parsing.

use std::collections::HashSet;

use coursebase_shared::GraphNode;
use serde::Serialize;

/// One topic with its stable node ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub id: String,
    pub label: String,
}

impl Topic {
    pub fn node(&self) -> GraphNode {
        GraphNode {
            id: self.id.clone(),
            label: self.label.clone(),
        }
    }
}

/// Ordered, de-duplicated topics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicList {
    topics: Vec<Topic>,
}

impl TopicList {
    /// Split on commas and newlines, trim, drop empties and case-insensitive
    /// duplicates. The first spelling of a topic wins.
    pub fn parse(raw: &str) -> Self {
        let mut seen_labels = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut topics = Vec::new();

        for label in raw.split([',', '\n', '\r']).map(str::trim) {
            if label.is_empty() || !seen_labels.insert(label.to_lowercase()) {
                continue;
            }

            let base = format!("topic-{}", slugify(label));
            let mut id = base.clone();
            let mut n = 2;
            while !seen_ids.insert(id.clone()) {
                id = format!("{base}-{n}");
                n += 1;
            }

            topics.push(Topic {
                id,
                label: label.to_string(),
            });
        }

        Self { topics }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Topic> {
        self.topics.iter()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.topics.iter().map(|t| t.label.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a TopicList {
    type Item = &'a Topic;
    type IntoIter = std::slice::Iter<'a, Topic>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lowercase ASCII alphanumerics joined by single dashes.
fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push('x');
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_commas_and_newlines() {
        let topics = TopicList::parse("Topic A,Topic B\n  Recursion ,\r\n,");
        assert_eq!(topics.labels(), vec!["Topic A", "Topic B", "Recursion"]);
        let ids: Vec<&str> = topics.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["topic-topic-a", "topic-topic-b", "topic-recursion"]);
    }

    #[test]
    fn drops_duplicates_keeping_first() {
        let topics = TopicList::parse("Sorting, sorting ,Graphs,SORTING");
        assert_eq!(topics.labels(), vec!["Sorting", "Graphs"]);
    }

    #[test]
    fn colliding_slugs_get_suffixes() {
        let topics = TopicList::parse("C++, C#, ???");
        let ids: Vec<&str> = topics.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["topic-c", "topic-c-2", "topic-x"]);
    }

    #[test]
    fn blank_input_is_empty() {
        assert!(TopicList::parse("  , \n ").is_empty());
    }
}
