//! Formula dependency graph
//!
//! Each formula records the query shapes it observed during its last
//! evaluation. Reverse indexes map a store change to the formulas whose
//! records match it.

use botrt_script::Value;
use botrt_types::BotId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A query shape observed while evaluating a formula
#[derive(Debug, Clone, PartialEq)]
pub enum Dependency {
    /// Unfiltered `getBots()` or a predicate filter
    All,
    /// Filtered by tag name, optionally by exact value
    Tag { tag: String, value: Option<Value> },
    /// Looked up a specific bot by id
    Id(BotId),
    /// Read one tag of one bot
    BotTag { bot: BotId, tag: String },
}

/// Identifies a formula tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormulaKey {
    pub bot: BotId,
    pub tag: String,
}

impl FormulaKey {
    pub fn new(bot: impl Into<BotId>, tag: impl Into<String>) -> Self {
        Self {
            bot: bot.into(),
            tag: tag.into(),
        }
    }
}

/// A store mutation, as seen by the dependency graph
#[derive(Debug, Clone)]
pub enum Change {
    /// Tags of the added bot with their known values (`None` when a formula
    /// has not been computed yet)
    BotAdded {
        id: BotId,
        tags: BTreeMap<String, Option<Value>>,
    },
    BotRemoved {
        id: BotId,
        tags: BTreeMap<String, Option<Value>>,
    },
    TagChanged {
        bot: BotId,
        tag: String,
        old: Option<Value>,
        new: Option<Value>,
    },
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    forward: HashMap<FormulaKey, Vec<Dependency>>,
    all: HashSet<FormulaKey>,
    by_tag: HashMap<String, HashSet<FormulaKey>>,
    by_id: HashMap<BotId, HashSet<FormulaKey>>,
    by_bot_tag: HashMap<BotId, HashMap<String, HashSet<FormulaKey>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dependency record of a formula
    pub fn set(&mut self, key: FormulaKey, dependencies: Vec<Dependency>) {
        self.remove(&key);

        let mut unique: Vec<Dependency> = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if !unique.contains(&dep) {
                unique.push(dep);
            }
        }

        for dep in &unique {
            match dep {
                Dependency::All => {
                    self.all.insert(key.clone());
                }
                Dependency::Tag { tag, .. } => {
                    self.by_tag.entry(tag.clone()).or_default().insert(key.clone());
                }
                Dependency::Id(id) => {
                    self.by_id.entry(id.clone()).or_default().insert(key.clone());
                }
                Dependency::BotTag { bot, tag } => {
                    self.by_bot_tag
                        .entry(bot.clone())
                        .or_default()
                        .entry(tag.clone())
                        .or_default()
                        .insert(key.clone());
                }
            }
        }
        self.forward.insert(key, unique);
    }

    /// Forget a formula's record
    pub fn remove(&mut self, key: &FormulaKey) {
        let Some(old) = self.forward.remove(key) else {
            return;
        };
        for dep in old {
            match dep {
                Dependency::All => {
                    self.all.remove(key);
                }
                Dependency::Tag { tag, .. } => {
                    if let Some(keys) = self.by_tag.get_mut(&tag) {
                        keys.remove(key);
                        if keys.is_empty() {
                            self.by_tag.remove(&tag);
                        }
                    }
                }
                Dependency::Id(id) => {
                    if let Some(keys) = self.by_id.get_mut(&id) {
                        keys.remove(key);
                        if keys.is_empty() {
                            self.by_id.remove(&id);
                        }
                    }
                }
                Dependency::BotTag { bot, tag } => {
                    if let Some(tags) = self.by_bot_tag.get_mut(&bot) {
                        if let Some(keys) = tags.get_mut(&tag) {
                            keys.remove(key);
                            if keys.is_empty() {
                                tags.remove(&tag);
                            }
                        }
                        if tags.is_empty() {
                            self.by_bot_tag.remove(&bot);
                        }
                    }
                }
            }
        }
    }

    /// Forget every formula owned by a bot
    pub fn remove_bot(&mut self, bot: &str) {
        let keys: Vec<FormulaKey> = self.forward.keys().filter(|k| k.bot == bot).cloned().collect();
        for key in keys {
            self.remove(&key);
        }
    }

    pub fn dependencies(&self, key: &FormulaKey) -> Option<&[Dependency]> {
        self.forward.get(key).map(Vec::as_slice)
    }

    /// Formulas whose records match `change`
    pub fn affected(&self, change: &Change) -> BTreeSet<FormulaKey> {
        let mut out = BTreeSet::new();
        match change {
            Change::BotAdded { id, tags } | Change::BotRemoved { id, tags } => {
                out.extend(self.all.iter().cloned());
                if let Some(keys) = self.by_id.get(id) {
                    out.extend(keys.iter().cloned());
                }
                if let Some(by_tag) = self.by_bot_tag.get(id) {
                    for keys in by_tag.values() {
                        out.extend(keys.iter().cloned());
                    }
                }
                for (tag, value) in tags {
                    // An uncomputed value could equal anything
                    self.collect_tag(&mut out, tag, |expected| {
                        value.as_ref().map_or(true, |v| v == expected)
                    });
                }
            }
            Change::TagChanged { bot, tag, old, new } => {
                if let Some(keys) = self.by_id.get(bot) {
                    out.extend(keys.iter().cloned());
                }
                if let Some(keys) = self.by_bot_tag.get(bot).and_then(|tags| tags.get(tag)) {
                    out.extend(keys.iter().cloned());
                }
                self.collect_tag(&mut out, tag, |expected| {
                    old.as_ref() == Some(expected) || new.as_ref() == Some(expected)
                });
            }
        }
        out
    }

    fn collect_tag(
        &self,
        out: &mut BTreeSet<FormulaKey>,
        tag: &str,
        value_matches: impl Fn(&Value) -> bool,
    ) {
        let Some(keys) = self.by_tag.get(tag) else {
            return;
        };
        for key in keys {
            let matched = self.forward.get(key).is_some_and(|deps| {
                deps.iter().any(|dep| match dep {
                    Dependency::Tag { tag: t, value } if t == tag => {
                        value.as_ref().map_or(true, &value_matches)
                    }
                    _ => false,
                })
            });
            if matched {
                out.insert(key.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bot: &str, tag: &str) -> FormulaKey {
        FormulaKey::new(bot, tag)
    }

    fn changed(bot: &str, tag: &str, old: Option<Value>, new: Option<Value>) -> Change {
        Change::TagChanged {
            bot: bot.to_string(),
            tag: tag.to_string(),
            old,
            new,
        }
    }

    fn added(id: &str, tags: &[(&str, Option<Value>)]) -> Change {
        Change::BotAdded {
            id: id.to_string(),
            tags: tags.iter().map(|(t, v)| (t.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn test_all_matches_adds_only() {
        let mut graph = DependencyGraph::new();
        graph.set(key("a", "count"), vec![Dependency::All]);

        assert!(graph.affected(&added("b", &[])).contains(&key("a", "count")));
        assert!(graph.affected(&changed("b", "x", None, Some(Value::from(1)))).is_empty());
    }

    #[test]
    fn test_tag_filter_precision() {
        let mut graph = DependencyGraph::new();
        graph.set(
            key("a", "f"),
            vec![Dependency::Tag {
                tag: "num".into(),
                value: None,
            }],
        );
        graph.set(
            key("a", "g"),
            vec![Dependency::Tag {
                tag: "num".into(),
                value: Some(Value::from(1)),
            }],
        );

        let hit = graph.affected(&changed("b", "num", Some(Value::from(1)), Some(Value::from(2))));
        assert_eq!(hit.len(), 2);

        let hit = graph.affected(&changed("b", "num", Some(Value::from(2)), Some(Value::from(3))));
        assert_eq!(hit.into_iter().collect::<Vec<_>>(), vec![key("a", "f")]);

        assert!(graph.affected(&changed("b", "other", None, Some(Value::from(1)))).is_empty());
        assert!(graph.affected(&added("c", &[("other", Some(Value::from(1)))])).is_empty());
        assert_eq!(graph.affected(&added("c", &[("num", None)])).len(), 2);
    }

    #[test]
    fn test_id_and_bot_tag() {
        let mut graph = DependencyGraph::new();
        graph.set(key("a", "f"), vec![Dependency::Id("b".into())]);
        graph.set(
            key("a", "g"),
            vec![Dependency::BotTag {
                bot: "b".into(),
                tag: "x".into(),
            }],
        );

        let hit = graph.affected(&changed("b", "y", None, Some(Value::from(1))));
        assert_eq!(hit.into_iter().collect::<Vec<_>>(), vec![key("a", "f")]);

        let hit = graph.affected(&changed("b", "x", None, Some(Value::from(1))));
        assert_eq!(hit.len(), 2);

        let removed = Change::BotRemoved {
            id: "b".into(),
            tags: BTreeMap::new(),
        };
        assert_eq!(graph.affected(&removed).len(), 2);
    }

    #[test]
    fn test_set_replaces_previous_record() {
        let mut graph = DependencyGraph::new();
        graph.set(key("a", "f"), vec![Dependency::All]);
        graph.set(key("a", "f"), vec![Dependency::Id("z".into())]);

        assert!(graph.affected(&added("b", &[])).is_empty());
        assert_eq!(graph.dependencies(&key("a", "f")), Some(&[Dependency::Id("z".into())][..]));

        graph.remove_bot("a");
        assert!(graph.is_empty());
        assert!(graph.affected(&added("z", &[])).is_empty());
    }
}
