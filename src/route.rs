use serde::Serialize;
use std::collections::BTreeMap;

use crate::cfg::Config;

fn tag_eq(a: &str, b: &str) -> bool {
    a.trim_start_matches('#')
        .eq_ignore_ascii_case(b.trim_start_matches('#'))
}

/// Resolve the reminder list a document task belongs in. The first tag rule
/// in configuration order wins; with no match the vault's default mapping
/// applies.
pub fn resolve_list<'a>(cfg: &'a Config, vault_id: &str, tags: &[String]) -> Option<&'a str> {
    for route in cfg.tag_routes.iter().filter(|r| r.vault_id == vault_id) {
        if tags.iter().any(|t| tag_eq(t, &route.tag)) {
            return Some(route.list_id.as_str());
        }
    }
    cfg.default_list_for(vault_id)
}

/// The tag rule (if any) that places a task in `list_id`, used to report
/// which tag drove a routing decision.
pub fn routing_tag<'a>(cfg: &'a Config, vault_id: &str, tags: &[String]) -> Option<&'a str> {
    cfg.tag_routes
        .iter()
        .filter(|r| r.vault_id == vault_id)
        .find(|r| tags.iter().any(|t| tag_eq(t, &r.tag)))
        .map(|r| r.tag.as_str())
}

/// Per tag, per destination list, a count of routed tasks. BTreeMaps keep
/// the report order stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagSummary(BTreeMap<String, BTreeMap<String, usize>>);

impl TagSummary {
    pub fn record(&mut self, tag: &str, list: &str) {
        *self
            .0
            .entry(tag.to_owned())
            .or_default()
            .entry(list.to_owned())
            .or_default() += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, usize>)> {
        self.0.iter()
    }

    pub fn merge(&mut self, other: &TagSummary) {
        for (tag, lists) in other.0.iter() {
            for (list, count) in lists {
                *self
                    .0
                    .entry(tag.clone())
                    .or_default()
                    .entry(list.clone())
                    .or_default() += count;
            }
        }
    }
}
