use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cfg::Config;
use crate::error::Error;
use crate::gateway::{RemFieldChanges, ReminderGateway};
use crate::model::{
    doc_status_after_rem_win, DocTask, LinkFields, RemTask, SyncLink,
};
use crate::parse::{edit_task_line, LineEdit};
use crate::route;
use crate::walker::{DocumentWalker, LineOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDir {
    #[default]
    None,
    ToDoc,
    ToRem,
}

/// Planned actions for one link.
#[derive(Debug, Clone, Serialize)]
pub struct LinkPlan {
    pub doc_uuid: Arc<str>,
    pub rem_uuid: Arc<str>,
    pub status: FieldDir,
    pub due: FieldDir,
    pub priority: FieldDir,
    pub title: FieldDir,
    /// Target list id when the tag rules place the reminder elsewhere.
    pub reroute_to: Option<String>,
}

impl LinkPlan {
    pub fn wants_doc_change(&self) -> bool {
        [self.status, self.due, self.priority, self.title].contains(&FieldDir::ToDoc)
    }

    pub fn wants_rem_change(&self) -> bool {
        [self.status, self.due, self.priority, self.title].contains(&FieldDir::ToRem)
            || self.reroute_to.is_some()
    }

    pub fn is_noop(&self) -> bool {
        !self.wants_doc_change() && !self.wants_rem_change()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub docs_updated: usize,
    pub rems_updated: usize,
    pub rems_rerouted: usize,
    pub conflicts_resolved: usize,
    pub docs_skipped_no_block_id: usize,
    pub docs_skipped_not_found: usize,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub links: Vec<SyncLink>,
    pub plans: Vec<LinkPlan>,
    pub counts: ReconcileCounts,
    pub errors: Vec<String>,
    /// Set when the gateway denied authorization; remaining gateway
    /// operations were skipped.
    pub auth_denied: bool,
}

pub struct Reconciler<'a> {
    cfg: &'a Config,
    dry_run: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(cfg: &'a Config, dry_run: bool) -> Reconciler<'a> {
        Reconciler { cfg, dry_run }
    }

    /// Compare both endpoints of a live link and decide a winner per field.
    /// The fresher side wins; an exact timestamp tie changes nothing. Fields
    /// that would not actually change the loser (a reopened reminder against
    /// a cancelled document task) are planned as `None`.
    pub fn plan(&self, link: &SyncLink, doc: &DocTask, rem: &RemTask) -> LinkPlan {
        let doc_fresh = doc.freshness();
        let rem_fresh = rem.modified_at;
        let winner = if doc_fresh > rem_fresh {
            FieldDir::ToRem
        } else if rem_fresh > doc_fresh {
            FieldDir::ToDoc
        } else {
            FieldDir::None
        };

        let status = if doc.status.to_rem() == rem.status {
            FieldDir::None
        } else if winner == FieldDir::ToDoc
            && doc_status_after_rem_win(doc.status, rem.status) == doc.status
        {
            // The reminder won but cannot reanimate this task.
            FieldDir::None
        } else {
            winner
        };
        let due = if doc.due_date == rem.due_date {
            FieldDir::None
        } else {
            winner
        };
        let priority = if doc.priority == rem.priority {
            FieldDir::None
        } else {
            winner
        };
        let title = if doc.description == rem.title {
            FieldDir::None
        } else {
            winner
        };

        let reroute_to = route::resolve_list(self.cfg, &link.vault_id, &doc.tags)
            .filter(|target| *target != rem.list_id)
            .map(str::to_owned);

        LinkPlan {
            doc_uuid: link.doc_uuid.clone(),
            rem_uuid: link.rem_uuid.clone(),
            status,
            due,
            priority,
            title,
            reroute_to,
        }
    }

    /// Walk every live link in `(vault_id, doc_uuid)` order, plan and, when
    /// not a dry run, apply. Per-link failures become counters plus log
    /// lines; only authorization denial stops further gateway calls.
    pub fn run(
        &self,
        mut links: Vec<SyncLink>,
        docs: &mut HashMap<Arc<str>, DocTask>,
        rems: &mut HashMap<Arc<str>, RemTask>,
        walker: &mut dyn DocumentWalker,
        gateway: &mut dyn ReminderGateway,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        links.sort_by(|a, b| {
            (a.vault_id.as_str(), a.doc_uuid.as_ref()).cmp(&(b.vault_id.as_str(), b.doc_uuid.as_ref()))
        });

        let mut outcome = ReconcileOutcome::default();

        for mut link in links {
            let (Some(doc), Some(rem)) = (docs.get(&link.doc_uuid), rems.get(&link.rem_uuid))
            else {
                // Restore guarantees both endpoints; a miss here is a bug
                // upstream, keep the link untouched.
                log::warn!("link ({}, {}) lost an endpoint", link.doc_uuid, link.rem_uuid);
                outcome.links.push(link);
                continue;
            };

            let plan = self.plan(&link, doc, rem);

            if plan.is_noop() {
                // A link that has never synced gets its validation stamp;
                // otherwise the stamp is left alone so a no-change run keeps
                // the store byte-identical.
                if !self.dry_run && link.last_synced.is_none() {
                    link.last_synced = Some(now);
                }
                outcome.plans.push(plan);
                outcome.links.push(link);
                continue;
            }

            outcome.counts.conflicts_resolved +=
                [plan.status, plan.due, plan.priority, plan.title]
                    .iter()
                    .filter(|d| **d != FieldDir::None)
                    .count();

            if self.dry_run {
                if plan.reroute_to.is_some() {
                    outcome.counts.rems_rerouted += 1;
                }
                if plan.wants_doc_change() {
                    outcome.counts.docs_updated += 1;
                }
                if [plan.status, plan.due, plan.priority, plan.title].contains(&FieldDir::ToRem) {
                    outcome.counts.rems_updated += 1;
                }
                outcome.plans.push(plan);
                outcome.links.push(link);
                continue;
            }

            let doc_ok = self.apply_doc_side(&plan, docs, rems, walker, &mut outcome, now);
            let rem_ok = self.apply_rem_side(&plan, docs, rems, gateway, &mut outcome, now);

            let doc = &docs[&link.doc_uuid];
            let rem = &rems[&link.rem_uuid];
            let mut fields = link.fields.clone();
            if doc_ok {
                let fresh = LinkFields::snapshot(doc, rem);
                fields.doc_title = fresh.doc_title;
                fields.doc_due = fresh.doc_due;
                fields.doc_status = fresh.doc_status;
                fields.doc_priority = fresh.doc_priority;
            }
            if rem_ok {
                let fresh = LinkFields::snapshot(doc, rem);
                fields.rem_title = fresh.rem_title;
                fields.rem_due = fresh.rem_due;
                fields.rem_status = fresh.rem_status;
                fields.rem_priority = fresh.rem_priority;
            }
            fields.due_equal = Some(doc.due_date == rem.due_date);
            link.fields = fields;
            if doc_ok && rem_ok {
                link.last_synced = Some(now);
            }

            outcome.plans.push(plan);
            outcome.links.push(link);
        }

        outcome
    }

    /// Returns false when a planned document change could not be applied.
    fn apply_doc_side(
        &self,
        plan: &LinkPlan,
        docs: &mut HashMap<Arc<str>, DocTask>,
        rems: &HashMap<Arc<str>, RemTask>,
        walker: &mut dyn DocumentWalker,
        outcome: &mut ReconcileOutcome,
        now: DateTime<Utc>,
    ) -> bool {
        if !plan.wants_doc_change() {
            return true;
        }
        let rem = &rems[&plan.rem_uuid];
        let doc = docs.get_mut(&plan.doc_uuid).expect("doc resolved by caller");

        if doc.block_id.is_none() {
            outcome.counts.docs_skipped_no_block_id += 1;
            log::warn!(
                "skipped document update for '{desc}': no block token",
                desc = doc.description
            );
            return false;
        }

        let mut edit = LineEdit::default();
        if plan.status == FieldDir::ToDoc {
            edit.status = Some(doc_status_after_rem_win(doc.status, rem.status));
        }
        if plan.due == FieldDir::ToDoc {
            edit.due = Some(rem.due_date);
        }
        if plan.priority == FieldDir::ToDoc {
            edit.priority = Some(rem.priority);
        }
        if plan.title == FieldDir::ToDoc {
            edit.description = Some(rem.title.clone());
        }

        let new_line = edit_task_line(&doc.raw_line, &edit);
        let path = doc.absolute_path();
        match walker.rewrite_task_line(&path, doc.line_number, &new_line, doc.block_id.as_deref()) {
            Ok(LineOutcome::Applied) => {
                if let Some(status) = edit.status {
                    doc.status = status;
                }
                if let Some(due) = edit.due {
                    doc.due_date = due;
                }
                if let Some(priority) = edit.priority {
                    doc.priority = priority;
                }
                if let Some(description) = edit.description {
                    doc.description = description;
                }
                doc.raw_line = new_line;
                doc.modified_at = now;
                outcome.counts.docs_updated += 1;
                true
            }
            Ok(LineOutcome::NotFound) => {
                outcome.counts.docs_skipped_not_found += 1;
                log::warn!(
                    "skipped: not found — task '{desc}' needs a re-scan of {path}",
                    desc = doc.description
                );
                false
            }
            Err(err) => {
                outcome.errors.push(err.to_string());
                log::error!("document update failed for '{}': {err}", doc.description);
                false
            }
        }
    }

    /// Returns false when a planned reminder change could not be applied.
    fn apply_rem_side(
        &self,
        plan: &LinkPlan,
        docs: &HashMap<Arc<str>, DocTask>,
        rems: &mut HashMap<Arc<str>, RemTask>,
        gateway: &mut dyn ReminderGateway,
        outcome: &mut ReconcileOutcome,
        now: DateTime<Utc>,
    ) -> bool {
        if !plan.wants_rem_change() {
            return true;
        }
        if outcome.auth_denied {
            return false;
        }
        let doc = &docs[&plan.doc_uuid];
        let rem = rems.get_mut(&plan.rem_uuid).expect("rem resolved by caller");

        let mut changes = RemFieldChanges::default();
        if plan.status == FieldDir::ToRem {
            changes.status = Some(doc.status.to_rem());
        }
        if plan.due == FieldDir::ToRem {
            changes.due_date = Some(doc.due_date);
        }
        if plan.priority == FieldDir::ToRem {
            changes.priority = Some(doc.priority);
        }
        if plan.title == FieldDir::ToRem {
            changes.title = Some(doc.description.clone());
        }
        changes.list_id = plan.reroute_to.clone();

        let field_change = changes.status.is_some()
            || changes.due_date.is_some()
            || changes.priority.is_some()
            || changes.title.is_some();

        match gateway.update(&rem.item_id, &changes) {
            Ok(()) => {
                if let Some(status) = changes.status {
                    rem.status = status;
                }
                if let Some(due) = changes.due_date {
                    rem.due_date = due;
                }
                if let Some(priority) = changes.priority {
                    rem.priority = priority;
                }
                if let Some(title) = changes.title {
                    rem.title = title;
                }
                if let Some(list_id) = changes.list_id {
                    rem.list_id = list_id;
                    outcome.counts.rems_rerouted += 1;
                }
                rem.modified_at = now;
                if field_change {
                    outcome.counts.rems_updated += 1;
                }
                true
            }
            Err(Error::AuthDenied) => {
                outcome.auth_denied = true;
                outcome.errors.push(Error::AuthDenied.to_string());
                log::error!("gateway authorization denied; skipping further reminder updates");
                false
            }
            Err(err) => {
                outcome.errors.push(err.to_string());
                log::error!("reminder update failed for '{}': {err}", rem.title);
                false
            }
        }
    }
}
