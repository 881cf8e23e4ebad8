//! State delta ingestion: add, remove and update bots

use super::recalc::tag_snapshot;
use super::{BotRuntime, UpdateReport};
use crate::deps::Change;
use crate::store::CompiledBot;
use botrt_types::{Bot, BotId, BotState, BotUpdate, StateUpdatedEvent};
use std::collections::{HashMap, HashSet};
use tracing::debug;

impl BotRuntime {
    /// Add bots, overwriting any live bot with the same id
    pub fn add_bots(&mut self, bots: Vec<Bot>) -> StateUpdatedEvent {
        let mut order: Vec<BotId> = Vec::new();
        let mut latest: HashMap<BotId, Bot> = HashMap::new();
        for bot in bots {
            if !latest.contains_key(&bot.id) {
                order.push(bot.id.clone());
            }
            latest.insert(bot.id.clone(), bot);
        }

        self.report = Some(UpdateReport::default());
        for id in &order {
            let Some(bot) = latest.remove(id) else {
                continue;
            };
            if self.store.contains(id) {
                debug!(bot = %id, "overwriting bot");
            }
            self.insert_bot(&bot);
        }
        self.drain_dirty();
        let report = self.report.take().unwrap_or_default();

        let mut event = StateUpdatedEvent::default();
        for id in &order {
            if let Some(bot) = self.store.get(id) {
                event.state.insert(id.clone(), Some(bot.full_state()));
                event.added_bots.push(id.clone());
            }
        }
        let added: HashSet<&BotId> = order.iter().collect();
        self.append_recalculated(&mut event, report, &added);
        debug!(added = event.added_bots.len(), updated = event.updated_bots.len(), "bots added");

        self.finish_batch();
        event
    }

    /// Remove bots. Unknown ids are still reported as removed.
    pub fn remove_bots(&mut self, ids: Vec<BotId>) -> StateUpdatedEvent {
        self.report = Some(UpdateReport::default());
        let mut event = StateUpdatedEvent::default();
        for id in ids {
            self.remove_bot(&id);
            if !event.removed_bots.contains(&id) {
                event.removed_bots.push(id.clone());
            }
            event.state.insert(id, None);
        }
        self.drain_dirty();
        let report = self.report.take().unwrap_or_default();

        // Removed bots are no longer in the store, so they are never listed
        // as updated
        self.append_recalculated(&mut event, report, &HashSet::new());
        debug!(removed = event.removed_bots.len(), "bots removed");

        self.finish_batch();
        event
    }

    /// Apply tag deltas. Updates naming unknown bots are skipped.
    pub fn update_bots(&mut self, updates: Vec<BotUpdate>) -> StateUpdatedEvent {
        self.report = Some(UpdateReport::default());
        let mut event = StateUpdatedEvent::default();
        for update in updates {
            if !self.store.contains(&update.id) {
                debug!(bot = %update.id, "update for unknown bot ignored");
                continue;
            }
            let mut changed = BotState::default();
            for (tag, raw) in update.tags {
                if self.apply_tag(&update.id, &tag, raw.clone()) {
                    changed.tags.insert(tag, raw);
                }
            }
            for (space, tags) in update.masks {
                for (tag, raw) in tags {
                    if self.apply_mask(&update.id, &tag, raw.clone(), &space) {
                        changed.masks.entry(space.clone()).or_default().insert(tag, raw);
                    }
                }
            }
            if changed.tags.is_empty() && changed.masks.is_empty() {
                continue;
            }
            match event.state.get_mut(&update.id) {
                Some(Some(existing)) => {
                    existing.tags.extend(changed.tags);
                    for (space, tags) in changed.masks {
                        existing.masks.entry(space).or_default().extend(tags);
                    }
                }
                _ => {
                    event.state.insert(update.id.clone(), Some(changed));
                    event.updated_bots.push(update.id);
                }
            }
        }
        self.drain_dirty();
        let report = self.report.take().unwrap_or_default();

        self.append_recalculated(&mut event, report, &HashSet::new());
        debug!(updated = event.updated_bots.len(), "bots updated");

        self.finish_batch();
        event
    }

    /// Fold changed values into `event`: values of bots already listed are
    /// merged, other bots are appended in insertion order
    fn append_recalculated(
        &self,
        event: &mut StateUpdatedEvent,
        mut report: UpdateReport,
        excluded: &HashSet<&BotId>,
    ) {
        for id in report.bots.into_values() {
            if excluded.contains(&id) || !self.store.contains(&id) {
                continue;
            }
            let values = report.values.remove(&id).unwrap_or_default();
            match event.state.get_mut(&id) {
                Some(Some(state)) => state.values.extend(values),
                _ => {
                    event.state.insert(
                        id.clone(),
                        Some(BotState {
                            values,
                            ..BotState::default()
                        }),
                    );
                    event.updated_bots.push(id);
                }
            }
        }
    }

    /// Compile and insert a bot, replacing any live bot with its id
    pub(super) fn insert_bot(&mut self, bot: &Bot) {
        // An overwritten bot keeps its place in store order
        let ordinal = self.store.ordinal_for(&bot.id);
        if self.store.contains(&bot.id) {
            self.remove_bot(&bot.id);
        }
        let compiled = CompiledBot::from_bot(bot, ordinal, &self.compiler);
        for tag in compiled.formula_tags() {
            self.dirty.insert((ordinal, tag));
        }
        let tags = tag_snapshot(&compiled);
        self.store.insert(compiled);
        self.notify(Change::BotAdded {
            id: bot.id.clone(),
            tags,
        });
    }

    /// Remove a bot from the live store. Returns false for unknown ids.
    pub(super) fn remove_bot(&mut self, id: &str) -> bool {
        let Some(old) = self.store.remove(id) else {
            return false;
        };
        self.deps.remove_bot(id);
        self.dirty.retain(|(ordinal, _)| *ordinal != old.ordinal);
        self.notify(Change::BotRemoved {
            id: id.to_string(),
            tags: tag_snapshot(&old),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_reports_full_state() {
        let mut runtime = BotRuntime::default();
        let event = runtime.add_bots(vec![Bot::new("a").with_tag("n", "3").with_tag("f", "=tags.n * 2")]);

        assert_eq!(event.added_bots, vec!["a".to_string()]);
        assert!(event.updated_bots.is_empty());
        assert_eq!(event.value("a", "n"), Some(&json!(3)));
        assert_eq!(event.value("a", "f"), Some(&json!(6)));
    }

    #[test]
    fn test_add_same_id_twice_keeps_last() {
        let mut runtime = BotRuntime::default();
        let event = runtime.add_bots(vec![
            Bot::new("a").with_tag("n", "1"),
            Bot::new("b"),
            Bot::new("a").with_tag("n", "2"),
        ]);
        assert_eq!(event.added_bots, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(event.value("a", "n"), Some(&json!(2)));
    }

    #[test]
    fn test_remove_unknown_is_reported() {
        let mut runtime = BotRuntime::default();
        let event = runtime.remove_bots(vec!["ghost".to_string()]);
        assert_eq!(event.removed_bots, vec!["ghost".to_string()]);
        assert_eq!(event.state.get("ghost"), Some(&None));
    }

    #[test]
    fn test_update_unknown_is_skipped() {
        let mut runtime = BotRuntime::default();
        let event = runtime.update_bots(vec![BotUpdate::new("ghost").with_tag("x", 1)]);
        assert!(event.is_empty());
    }

    #[test]
    fn test_update_lists_direct_then_recalculated() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![
            Bot::new("a").with_tag("double", "=getBot('id', 'b').tags.n * 2"),
            Bot::new("b").with_tag("n", "1"),
        ]);

        let event = runtime.update_bots(vec![BotUpdate::new("b").with_tag("n", "5")]);
        assert_eq!(event.updated_bots, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(event.value("b", "n"), Some(&json!(5)));
        assert_eq!(event.value("a", "double"), Some(&json!(10)));
        let b_state = event.state["b"].as_ref().unwrap();
        assert_eq!(b_state.tags["n"], json!("5"));
    }

    #[test]
    fn test_null_deletes_tag() {
        let mut runtime = BotRuntime::default();
        runtime.add_bots(vec![Bot::new("a").with_tag("n", "1")]);
        let event = runtime.update_bots(vec![BotUpdate::new("a").with_tag("n", serde_json::Value::Null)]);
        assert_eq!(event.updated_bots, vec!["a".to_string()]);
        assert!(runtime.bot("a").unwrap().raw("n").is_none());
    }
}
