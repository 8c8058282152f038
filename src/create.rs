use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::cfg::{Config, Direction};
use crate::error::Error;
use crate::gateway::{NewReminder, ReminderGateway};
use crate::model::{DocStatus, DocTask, LinkFields, RemStatus, RemTask, SyncLink};
use crate::parse::format_task_line;
use crate::route::{self, TagSummary};
use crate::walker::DocumentWalker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreationCounts {
    pub docs_created: usize,
    pub rems_created: usize,
    pub links_created: usize,
}

#[derive(Debug, Default)]
pub struct CreationOutcome {
    pub links: Vec<SyncLink>,
    pub new_docs: Vec<DocTask>,
    pub new_rems: Vec<RemTask>,
    pub created_doc_uuids: Vec<Arc<str>>,
    pub created_rem_uuids: Vec<Arc<str>>,
    pub counts: CreationCounts,
    pub tag_summary: TagSummary,
    pub errors: Vec<String>,
    pub auth_denied: bool,
}

pub struct Creator<'a> {
    cfg: &'a Config,
    direction: Direction,
    dry_run: bool,
}

impl<'a> Creator<'a> {
    pub fn new(cfg: &'a Config, direction: Direction, dry_run: bool) -> Creator<'a> {
        Creator {
            cfg,
            direction,
            dry_run,
        }
    }

    fn fresh_enough(&self, modified_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.cfg.creation.since_days {
            Some(days) => modified_at >= now - Duration::days(days),
            None => true,
        }
    }

    /// Create counterparts for records that stayed unpaired after matching,
    /// and link them. Creation is the only non-reversible side effect; every
    /// created record id is logged.
    pub fn run(
        &self,
        unpaired_docs: &[&DocTask],
        unpaired_rems: &[&RemTask],
        vault_path: &camino::Utf8Path,
        walker: &mut dyn DocumentWalker,
        gateway: &mut dyn ReminderGateway,
        now: DateTime<Utc>,
    ) -> CreationOutcome {
        let mut outcome = CreationOutcome::default();

        let mut docs: Vec<&DocTask> = if self.direction.creates_reminders() {
            unpaired_docs
                .iter()
                .copied()
                .filter(|d| self.cfg.creation.include_completed || d.status.is_open())
                .filter(|d| self.fresh_enough(d.modified_at, now))
                .collect()
        } else {
            Vec::new()
        };
        docs.sort_by(|a, b| a.uuid.cmp(&b.uuid));

        let mut rems: Vec<&RemTask> = if self.direction.creates_documents() {
            unpaired_rems
                .iter()
                .copied()
                .filter(|r| self.cfg.creation.include_completed || r.status == RemStatus::Todo)
                .filter(|r| self.fresh_enough(r.modified_at, now))
                .collect()
        } else {
            Vec::new()
        };
        rems.sort_by(|a, b| a.uuid.cmp(&b.uuid));

        // Allocate the per-run budget proportionally across both directions.
        let max = self.cfg.creation.max_creates_per_run;
        let total = docs.len() + rems.len();
        if max > 0 && total > max {
            let doc_budget = max * docs.len() / total;
            let rem_budget = max - doc_budget;
            log::info!(
                "creation budget {max} below {total} candidates, keeping {doc_budget} doc→rem and {rem_budget} rem→doc"
            );
            docs.truncate(doc_budget);
            rems.truncate(rem_budget);
        }

        for doc in docs {
            if outcome.auth_denied {
                break;
            }
            self.create_reminder_for(doc, gateway, now, &mut outcome);
        }
        for rem in rems {
            self.create_document_for(rem, vault_path, walker, now, &mut outcome);
        }

        outcome
    }

    fn create_reminder_for(
        &self,
        doc: &DocTask,
        gateway: &mut dyn ReminderGateway,
        now: DateTime<Utc>,
        outcome: &mut CreationOutcome,
    ) {
        let Some(list_id) = route::resolve_list(self.cfg, &doc.vault_id, &doc.tags)
            .or(self.cfg.creation.rem_default_list_id.as_deref())
        else {
            log::warn!(
                "no reminder list configured for vault {vault}, skipping '{desc}'",
                vault = doc.vault_id,
                desc = doc.description
            );
            return;
        };
        let list_id = list_id.to_owned();

        if let Some(tag) = route::routing_tag(self.cfg, &doc.vault_id, &doc.tags) {
            outcome.tag_summary.record(tag, &list_id);
        }

        let fields = map_doc_to_reminder(doc);
        if self.dry_run {
            log::info!(
                "would create reminder '{title}' in {list_id}",
                title = fields.title
            );
            outcome.counts.rems_created += 1;
            outcome.counts.links_created += 1;
            return;
        }

        match gateway.create(&list_id, &fields) {
            Ok(rem) => {
                log::info!(
                    "created reminder {uuid} for document task {doc_uuid}",
                    uuid = rem.uuid,
                    doc_uuid = doc.uuid
                );
                outcome.links.push(created_link(doc, &rem, now));
                outcome.created_rem_uuids.push(rem.uuid.clone());
                outcome.new_rems.push(rem);
                outcome.counts.rems_created += 1;
                outcome.counts.links_created += 1;
            }
            Err(Error::AuthDenied) => {
                outcome.auth_denied = true;
                outcome.errors.push(Error::AuthDenied.to_string());
                log::error!("gateway authorization denied; skipping further reminder creation");
            }
            Err(err) => {
                outcome.errors.push(err.to_string());
                log::error!("failed to create reminder for '{}': {err}", doc.description);
            }
        }
    }

    fn create_document_for(
        &self,
        rem: &RemTask,
        vault_path: &camino::Utf8Path,
        walker: &mut dyn DocumentWalker,
        now: DateTime<Utc>,
        outcome: &mut CreationOutcome,
    ) {
        let (target_file, heading) = self.target_file_for(rem);
        let absolute = vault_path.join(&target_file);

        let status = match rem.status {
            RemStatus::Done => DocStatus::Done,
            RemStatus::Todo => DocStatus::Todo,
        };
        // A tag derived from the source list, unless it is the vault default.
        let vault_id = vault_path.file_name().unwrap_or(vault_path.as_str());
        let default_list = self.cfg.default_list_for(vault_id);
        let tags: Vec<String> = if default_list == Some(rem.list_id.as_str()) {
            Vec::new()
        } else {
            vec![format!("#{}", rem.list_name.to_lowercase().replace(' ', "_"))]
        };

        let description = if rem.title.trim().is_empty() {
            "Untitled Task".to_owned()
        } else {
            rem.title.trim().to_owned()
        };
        let line = format_task_line(
            &description,
            status,
            rem.due_date,
            None,
            rem.priority,
            &tags,
            None,
            "",
        );

        if self.dry_run {
            log::info!("would append '{line}' to {target_file}");
            outcome.counts.docs_created += 1;
            outcome.counts.links_created += 1;
            return;
        }

        match walker.append_task(&absolute, &line, heading.as_deref()) {
            Ok((line_number, block_id)) => {
                let uuid: Arc<str> = match &block_id {
                    Some(token) => format!("doc-{token}").into(),
                    None => {
                        // Without a token the next scan will re-mint by
                        // location; record the best-effort id.
                        format!("doc-{target_file}:{line_number}").into()
                    }
                };
                log::info!("created document task {uuid} at {target_file}:{line_number}");
                let doc = DocTask {
                    uuid: uuid.clone(),
                    vault_id: vault_id.to_owned(),
                    vault_name: vault_id.to_owned(),
                    vault_path: vault_path.to_owned(),
                    file_path: target_file,
                    line_number,
                    block_id,
                    status,
                    description,
                    due_date: rem.due_date,
                    completion_date: None,
                    priority: rem.priority,
                    tags,
                    raw_line: line,
                    created_at: now,
                    modified_at: now,
                };
                outcome.links.push(created_link(&doc, rem, now));
                outcome.created_doc_uuids.push(doc.uuid.clone());
                outcome.new_docs.push(doc);
                outcome.counts.docs_created += 1;
                outcome.counts.links_created += 1;
            }
            Err(err) => {
                outcome.errors.push(err.to_string());
                log::error!("failed to create document task for '{}': {err}", rem.title);
            }
        }
    }

    fn target_file_for(&self, rem: &RemTask) -> (camino::Utf8PathBuf, Option<String>) {
        for rule in &self.cfg.creation.rem_to_doc_rules {
            if rule.list_name == rem.list_name {
                return (rule.target_file.clone(), rule.heading.clone());
            }
        }
        (self.cfg.creation.inbox_file.clone(), None)
    }
}

fn map_doc_to_reminder(doc: &DocTask) -> NewReminder {
    let title = if doc.description.trim().is_empty() {
        "Untitled Task".to_owned()
    } else {
        doc.description.trim().to_owned()
    };

    // Breadcrumbs back to the source line.
    let mut notes = format!("Source: {}\nLine: {}", doc.file_path, doc.line_number);
    if !doc.tags.is_empty() {
        notes.push_str(&format!("\nTags: {}", doc.tags.join(", ")));
    }

    let url = doc.block_id.as_ref().map(|block| {
        format!(
            "vault://{vault}/{file}#^{block}",
            vault = doc.vault_name,
            file = doc.file_path
        )
    });

    NewReminder {
        title,
        status: doc.status.to_rem(),
        due_date: doc.due_date,
        priority: doc.priority,
        notes: Some(notes),
        url,
        tags: doc.tags.clone(),
    }
}

/// Links for created counterparts carry a perfect score; `last_synced`
/// stays empty until the next reconcile pass validates them.
fn created_link(doc: &DocTask, rem: &RemTask, now: DateTime<Utc>) -> SyncLink {
    SyncLink {
        doc_uuid: doc.uuid.clone(),
        rem_uuid: rem.uuid.clone(),
        score: 1.0,
        vault_id: doc.vault_id.clone(),
        created_at: now,
        last_synced: None,
        fields: LinkFields {
            title_similarity: Some(1.0),
            due_equal: Some(true),
            date_distance_days: Some(0),
            ..LinkFields::snapshot(doc, rem)
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::cfg::{CreationConfig, RemToDocRule, TagRoute, VaultMapping};
    use crate::gateway::JsonGateway;
    use crate::model::Priority;
    use crate::walker::MarkdownWalker;
    use camino::Utf8PathBuf;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn vault() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("Vault")).unwrap();
        fs::create_dir_all(&path).unwrap();
        (dir, path)
    }

    fn gateway(dir: &tempfile::TempDir) -> JsonGateway {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("reminders.json")).unwrap();
        let mut gw = JsonGateway::open(&path).unwrap();
        gw.add_list("L1", "Tasks").unwrap();
        gw.add_list("L-proj", "Project").unwrap();
        gw
    }

    fn cfg() -> Config {
        Config {
            vault_mappings: vec![VaultMapping {
                vault_id: "Vault".into(),
                list_id: "L1".into(),
            }],
            creation: CreationConfig {
                rem_default_list_id: Some("L1".into()),
                ..CreationConfig::default()
            },
            ..Config::default()
        }
    }

    fn doc_in_vault(vault: &Utf8PathBuf, line: &str) -> DocTask {
        fs::write(vault.join("todo.md"), format!("{line}\n")).unwrap();
        MarkdownWalker
            .list_tasks(vault, true)
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn doc_to_rem_routes_by_tag() {
        let (dir, vault) = vault();
        let mut gw = gateway(&dir);
        let mut cfg = cfg();
        cfg.tag_routes = vec![TagRoute {
            vault_id: "Vault".into(),
            tag: "#project".into(),
            list_id: "L-proj".into(),
        }];

        let doc = doc_in_vault(&vault, "- [ ] Draft proposal #project 📅 2025-04-01 ⏫ ^drft0001");
        let creator = Creator::new(&cfg, Direction::Both, false);
        let outcome = creator.run(&[&doc], &[], &vault, &mut MarkdownWalker, &mut gw, Utc::now());

        assert_eq!(outcome.counts.rems_created, 1);
        assert_eq!(outcome.counts.links_created, 1);
        assert!(outcome.errors.is_empty());

        let created = gw.list_tasks(&["L-proj".to_owned()], true).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "Draft proposal");
        assert_eq!(created[0].priority, Some(Priority::High));
        let notes = created[0].notes.as_deref().unwrap();
        assert!(notes.contains("Source: todo.md"), "got {notes}");
        assert!(notes.contains("Line: 1"), "got {notes}");
        assert!(
            notes.contains("vault://Vault/todo.md#^drft0001"),
            "got {notes}"
        );

        assert_eq!(outcome.links[0].score, 1.0);
        assert_eq!(outcome.links[0].fields.due_equal, Some(true));
        assert_eq!(outcome.links[0].last_synced, None);
    }

    #[test]
    fn rem_to_doc_lands_in_routed_file_with_list_tag() {
        let (dir, vault) = vault();
        let mut gw = gateway(&dir);
        let rem = gw
            .create(
                "L-proj",
                &NewReminder {
                    title: "Review PR".into(),
                    ..NewReminder::default()
                },
            )
            .unwrap();

        let mut cfg = cfg();
        cfg.creation.rem_to_doc_rules = vec![RemToDocRule {
            list_name: "Project".into(),
            target_file: "Projects.md".into(),
            heading: Some("Imported".into()),
        }];

        let creator = Creator::new(&cfg, Direction::Both, false);
        let outcome = creator.run(&[], &[&rem], &vault, &mut MarkdownWalker, &mut gw, Utc::now());

        assert_eq!(outcome.counts.docs_created, 1);
        let content = fs::read_to_string(vault.join("Projects.md")).unwrap();
        assert!(content.contains("## Imported"), "got {content}");
        assert!(content.contains("- [ ] Review PR #project"), "got {content}");

        // The created line carries a block token, and the recorded uuid
        // matches what the next scan will mint from it.
        let doc = &outcome.new_docs[0];
        assert!(doc.block_id.is_some());
        let rescanned = MarkdownWalker.list_tasks(&vault, true).unwrap();
        let found = rescanned.iter().find(|t| t.uuid == doc.uuid);
        assert!(found.is_some(), "created uuid not stable across rescan");
    }

    #[test]
    fn default_list_reminder_gets_no_list_tag() {
        let (dir, vault) = vault();
        let mut gw = gateway(&dir);
        let rem = gw
            .create(
                "L1",
                &NewReminder {
                    title: "Plain".into(),
                    ..NewReminder::default()
                },
            )
            .unwrap();

        let cfg = cfg();
        let outcome = Creator::new(&cfg, Direction::Both, false).run(
            &[],
            &[&rem],
            &vault,
            &mut MarkdownWalker,
            &mut gw,
            Utc::now(),
        );
        assert_eq!(outcome.new_docs[0].tags, Vec::<String>::new());
        let content = fs::read_to_string(vault.join("Inbox.md")).unwrap();
        assert!(content.contains("- [ ] Plain"), "got {content}");
    }

    #[test]
    fn direction_filters_one_side() {
        let (dir, vault) = vault();
        let mut gw = gateway(&dir);
        let rem = gw
            .create(
                "L1",
                &NewReminder {
                    title: "Remote only".into(),
                    ..NewReminder::default()
                },
            )
            .unwrap();
        let doc = doc_in_vault(&vault, "- [ ] Local only ^loc00001");

        let cfg = cfg();
        let outcome = Creator::new(&cfg, Direction::DocToRem, false).run(
            &[&doc],
            &[&rem],
            &vault,
            &mut MarkdownWalker,
            &mut gw,
            Utc::now(),
        );
        assert_eq!(outcome.counts.rems_created, 1);
        assert_eq!(outcome.counts.docs_created, 0);
    }

    #[test]
    fn completed_records_skipped_by_default() {
        let (dir, vault) = vault();
        let mut gw = gateway(&dir);
        let doc = doc_in_vault(&vault, "- [x] Already done ^done0001");

        let cfg = cfg();
        let outcome = Creator::new(&cfg, Direction::Both, false).run(
            &[&doc],
            &[],
            &vault,
            &mut MarkdownWalker,
            &mut gw,
            Utc::now(),
        );
        assert_eq!(outcome.counts.rems_created, 0);
    }

    #[test]
    fn budget_allocates_proportionally() {
        let (dir, vault) = vault();
        let mut gw = gateway(&dir);

        let lines: Vec<String> = (0..6)
            .map(|i| format!("- [ ] Doc task {i} ^task000{i}"))
            .collect();
        fs::write(vault.join("todo.md"), lines.join("\n") + "\n").unwrap();
        let docs = MarkdownWalker.list_tasks(&vault, true).unwrap();
        let doc_refs: Vec<&DocTask> = docs.iter().collect();

        let rems: Vec<RemTask> = (0..3)
            .map(|i| {
                gw.create(
                    "L1",
                    &NewReminder {
                        title: format!("Rem task {i}"),
                        ..NewReminder::default()
                    },
                )
                .unwrap()
            })
            .collect();
        let rem_refs: Vec<&RemTask> = rems.iter().collect();

        let mut cfg = cfg();
        cfg.creation.max_creates_per_run = 3;
        let outcome = Creator::new(&cfg, Direction::Both, true).run(
            &doc_refs,
            &rem_refs,
            &vault,
            &mut MarkdownWalker,
            &mut gw,
            Utc::now(),
        );
        // 6 docs + 3 rems against a budget of 3: 2 doc→rem, 1 rem→doc.
        assert_eq!(outcome.counts.rems_created, 2);
        assert_eq!(outcome.counts.docs_created, 1);
    }

    #[test]
    fn dry_run_creates_nothing() {
        let (dir, vault) = vault();
        let mut gw = gateway(&dir);
        let doc = doc_in_vault(&vault, "- [ ] Previewed ^prev0001");

        let cfg = cfg();
        let outcome = Creator::new(&cfg, Direction::Both, true).run(
            &[&doc],
            &[],
            &vault,
            &mut MarkdownWalker,
            &mut gw,
            Utc::now(),
        );
        assert_eq!(outcome.counts.rems_created, 1);
        assert!(outcome.created_rem_uuids.is_empty());
        assert_eq!(gw.list_tasks(&[], true).unwrap(), Vec::new());
    }
}
