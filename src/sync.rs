use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use console::{Style, StyledObject};
use indicatif::ProgressIterator;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cfg::{Config, Direction};
use crate::create::Creator;
use crate::dedup::{Cluster, ClusterReview, DedupMode, Deduplicator};
use crate::error::Error;
use crate::gateway::ReminderGateway;
use crate::matcher::Matcher;
use crate::model::{DocTask, RemStatus, RemTask};
use crate::progress_bar::style_progress_bar_count;
use crate::reconcile::{LinkPlan, Reconciler};
use crate::route::TagSummary;
use crate::store::LinkStore;
use crate::walker::DocumentWalker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub docs_listed: usize,
    pub rems_listed: usize,
    pub links_live: usize,
    pub links_created: usize,
    pub links_deleted: usize,
    pub docs_created: usize,
    pub rems_created: usize,
    pub docs_updated: usize,
    pub rems_updated: usize,
    pub docs_deleted: usize,
    pub rems_deleted: usize,
    pub conflicts_resolved: usize,
    pub rems_rerouted: usize,
    pub docs_skipped_no_block_id: usize,
    pub docs_skipped_not_found: usize,
}

impl SyncCounts {
    pub fn any_change(&self) -> bool {
        (self.links_created
            + self.links_deleted
            + self.docs_created
            + self.rems_created
            + self.docs_updated
            + self.rems_updated
            + self.docs_deleted
            + self.rems_deleted
            + self.rems_rerouted)
            > 0
    }

    fn merge(&mut self, other: &SyncCounts) {
        self.docs_listed += other.docs_listed;
        self.rems_listed += other.rems_listed;
        self.links_live += other.links_live;
        self.links_created += other.links_created;
        self.links_deleted += other.links_deleted;
        self.docs_created += other.docs_created;
        self.rems_created += other.rems_created;
        self.docs_updated += other.docs_updated;
        self.rems_updated += other.rems_updated;
        self.docs_deleted += other.docs_deleted;
        self.rems_deleted += other.rems_deleted;
        self.conflicts_resolved += other.conflicts_resolved;
        self.rems_rerouted += other.rems_rerouted;
        self.docs_skipped_no_block_id += other.docs_skipped_no_block_id;
        self.docs_skipped_not_found += other.docs_skipped_not_found;
    }
}

/// Result of syncing one vault.
#[derive(Debug, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub vault_id: String,
    pub vault_path: Utf8PathBuf,
    pub counts: SyncCounts,
    pub created_doc_uuids: Vec<Arc<str>>,
    pub created_rem_uuids: Vec<Arc<str>>,
    pub tag_summary: TagSummary,
    /// Populated on dry runs.
    pub change_plan: Vec<LinkPlan>,
    /// Populated on dry runs.
    pub dedup_clusters: Vec<Cluster>,
    pub errors: Vec<String>,
}

static DONE: Lazy<StyledObject<&str>> = Lazy::new(|| STYLE_DONE.apply_to("✓").bold());
static NEW: Lazy<StyledObject<&str>> = Lazy::new(|| STYLE_NEW.apply_to("✻").bold());
static PULL: Lazy<StyledObject<&str>> = Lazy::new(|| STYLE_PULL.apply_to("↘").bold());
static PUSH: Lazy<StyledObject<&str>> = Lazy::new(|| STYLE_PUSH.apply_to("↗").bold());
static REROUTE: Lazy<StyledObject<&str>> = Lazy::new(|| STYLE_REROUTE.apply_to("⤳").bold());

static STYLE_DONE: Lazy<Style> = Lazy::new(|| Style::new().green());
static STYLE_NEW: Lazy<Style> = Lazy::new(|| Style::new().cyan());
static STYLE_PULL: Lazy<Style> = Lazy::new(|| Style::new().blue());
static STYLE_PUSH: Lazy<Style> = Lazy::new(|| Style::new().magenta());
static STYLE_REROUTE: Lazy<Style> = Lazy::new(|| Style::new().yellow());

impl std::fmt::Display for SyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let updated = DONE.to_string();
        let created = NEW.to_string();
        let to_doc = PULL.to_string();
        let to_rem = PUSH.to_string();
        let rerouted = REROUTE.to_string();

        write!(f, "{vault}: {updated} {to_doc} {docs_updated} {to_rem} {rems_updated} | {created} {to_doc} {docs_created} {to_rem} {rems_created} | {rerouted} {rems_rerouted}",
        vault=self.vault_id,
        docs_updated=STYLE_DONE.apply_to(self.counts.docs_updated),
        rems_updated=STYLE_DONE.apply_to(self.counts.rems_updated),
        docs_created=STYLE_NEW.apply_to(self.counts.docs_created),
        rems_created=STYLE_NEW.apply_to(self.counts.rems_created),
        rems_rerouted=STYLE_REROUTE.apply_to(self.counts.rems_rerouted),
        )
    }
}

/// One sync invocation: collaborators are injected, configuration is
/// explicit, the link store is the only state the engine owns.
pub struct SyncEngine<'a> {
    pub cfg: &'a Config,
    pub walker: &'a mut dyn DocumentWalker,
    pub gateway: &'a mut dyn ReminderGateway,
    pub review: &'a mut dyn ClusterReview,
}

impl<'a> SyncEngine<'a> {
    /// Sync one vault: collect, restore, match, reconcile, create, dedup,
    /// persist. Per-record failures become counters and error strings; only
    /// configuration and link-store I/O abort the vault.
    pub fn sync(
        &mut self,
        vault_path: &Utf8Path,
        list_ids: &[String],
        direction: Direction,
        dry_run: bool,
    ) -> Result<SyncResult, Error> {
        let now = Utc::now();
        let vault_id = vault_path
            .file_name()
            .unwrap_or(vault_path.as_str())
            .to_owned();
        let mut counts = SyncCounts::default();
        let mut errors: Vec<String> = Vec::new();

        let mut link_store = LinkStore::open(&self.cfg.links_path)?;
        let loaded_links = link_store.load()?;

        // Collect both sides.
        let docs = self.walker.list_tasks(vault_path, self.cfg.include_completed)?;
        counts.docs_listed = docs.len();

        let rems = match self.gateway.list_tasks(list_ids, self.cfg.include_completed) {
            Ok(rems) => rems,
            Err(Error::AuthDenied) => {
                // Without the reminder side nothing can be compared; leave
                // the store untouched rather than pruning every link.
                log::error!("gateway authorization denied; vault {vault_id} left as-is");
                errors.push(Error::AuthDenied.to_string());
                link_store.save(&loaded_links)?;
                return Ok(SyncResult {
                    success: true,
                    vault_id,
                    vault_path: vault_path.to_owned(),
                    counts,
                    created_doc_uuids: Vec::new(),
                    created_rem_uuids: Vec::new(),
                    tag_summary: TagSummary::default(),
                    change_plan: Vec::new(),
                    dedup_clusters: Vec::new(),
                    errors,
                });
            }
            Err(err) => return Err(err),
        };
        counts.rems_listed = rems.len();

        let mut docs_by_uuid: HashMap<Arc<str>, DocTask> =
            docs.iter().map(|d| (d.uuid.clone(), d.clone())).collect();
        let mut rems_by_uuid: HashMap<Arc<str>, RemTask> =
            rems.iter().map(|r| (r.uuid.clone(), r.clone())).collect();

        // Restore previously valid links; drop the broken ones.
        let (live_links, dropped) = LinkStore::restore(loaded_links, &docs_by_uuid, &rems_by_uuid);
        counts.links_live = live_links.len();
        counts.links_deleted = dropped.len();
        for link in &dropped {
            log::info!(
                "pruned link ({doc}, {rem}): endpoint gone",
                doc = link.doc_uuid,
                rem = link.rem_uuid
            );
        }

        // Match the residual unpaired records.
        let paired_docs: HashSet<Arc<str>> =
            live_links.iter().map(|l| l.doc_uuid.clone()).collect();
        let paired_rems: HashSet<Arc<str>> =
            live_links.iter().map(|l| l.rem_uuid.clone()).collect();
        let unpaired_docs: Vec<&DocTask> = docs
            .iter()
            .filter(|d| !paired_docs.contains(&d.uuid))
            .collect();
        let unpaired_rems: Vec<&RemTask> = rems
            .iter()
            .filter(|r| !paired_rems.contains(&r.uuid))
            .collect();

        let matcher = Matcher::new(self.cfg);
        let matched = matcher.find_matches(&unpaired_docs, &unpaired_rems, now)?;
        counts.links_created += matched.len();

        let mut all_links = live_links;
        all_links.extend(matched);

        // Reconcile every live link.
        let reconciler = Reconciler::new(self.cfg, dry_run);
        let rec = reconciler.run(
            all_links,
            &mut docs_by_uuid,
            &mut rems_by_uuid,
            self.walker,
            self.gateway,
            now,
        );
        counts.docs_updated = rec.counts.docs_updated;
        counts.rems_updated = rec.counts.rems_updated;
        counts.rems_rerouted = rec.counts.rems_rerouted;
        counts.conflicts_resolved = rec.counts.conflicts_resolved;
        counts.docs_skipped_no_block_id = rec.counts.docs_skipped_no_block_id;
        counts.docs_skipped_not_found = rec.counts.docs_skipped_not_found;
        errors.extend(rec.errors);
        let mut all_links = rec.links;
        let mut auth_denied = rec.auth_denied;

        // Create counterparts for whatever is still unpaired.
        let paired_docs: HashSet<Arc<str>> =
            all_links.iter().map(|l| l.doc_uuid.clone()).collect();
        let paired_rems: HashSet<Arc<str>> =
            all_links.iter().map(|l| l.rem_uuid.clone()).collect();
        let still_unpaired_docs: Vec<&DocTask> = docs
            .iter()
            .filter(|d| !paired_docs.contains(&d.uuid))
            .collect();
        let still_unpaired_rems: Vec<&RemTask> = rems
            .iter()
            .filter(|r| !paired_rems.contains(&r.uuid))
            .collect();

        let creator = Creator::new(self.cfg, direction, dry_run);
        let created = if auth_denied {
            // No further gateway calls this run; document-side work stands.
            crate::create::CreationOutcome::default()
        } else {
            creator.run(
                &still_unpaired_docs,
                &still_unpaired_rems,
                vault_path,
                self.walker,
                self.gateway,
                now,
            )
        };
        counts.docs_created = created.counts.docs_created;
        counts.rems_created = created.counts.rems_created;
        counts.links_created += created.counts.links_created;
        errors.extend(created.errors.iter().cloned());
        auth_denied |= created.auth_denied;

        let created_doc_uuids: HashSet<Arc<str>> =
            created.created_doc_uuids.iter().cloned().collect();
        let created_rem_uuids: HashSet<Arc<str>> =
            created.created_rem_uuids.iter().cloned().collect();
        let tag_summary = created.tag_summary;
        let mut current_docs = docs;
        let mut current_rems = rems;
        // Reconciled field changes live in the uuid maps; fold them back.
        for doc in current_docs.iter_mut() {
            if let Some(updated) = docs_by_uuid.get(&doc.uuid) {
                *doc = updated.clone();
            }
        }
        for rem in current_rems.iter_mut() {
            if let Some(updated) = rems_by_uuid.get(&rem.uuid) {
                *rem = updated.clone();
            }
        }
        current_docs.extend(created.new_docs.iter().cloned());
        current_rems.extend(created.new_rems.iter().cloned());
        all_links.extend(created.links.iter().cloned());

        // Deduplicate within each store.
        let mut dedup_clusters = Vec::new();
        if self.cfg.enable_deduplication && !auth_denied {
            let mode = if dry_run {
                DedupMode::DryRun
            } else if self.cfg.dedup_auto_apply {
                DedupMode::Auto
            } else {
                DedupMode::Interactive
            };
            let dedup = Deduplicator::new(self.cfg, mode);
            let outcome = dedup.run(
                &current_docs,
                &current_rems,
                &all_links,
                &created_doc_uuids,
                &created_rem_uuids,
                self.walker,
                self.gateway,
                self.review,
            );
            counts.docs_deleted = outcome.counts.docs_deleted;
            counts.rems_deleted = outcome.counts.rems_deleted;
            errors.extend(outcome.errors);
            dedup_clusters = outcome.clusters;
        }

        // Clear old completed reminders, dropping their links in the same
        // run so nothing dangles.
        if let Some(days) = self.cfg.clear_completed_older_than_days {
            if !dry_run && !auth_denied {
                let cutoff = now - chrono::Duration::days(days);
                match self.gateway.list_tasks(list_ids, true) {
                    Ok(all_rems) => {
                        for rem in all_rems
                            .iter()
                            .filter(|r| r.status == RemStatus::Done && r.modified_at < cutoff)
                        {
                            match self.gateway.delete(&rem.item_id) {
                                Ok(()) => {
                                    log::info!(
                                        "cleared completed reminder {uuid} (older than {days} days)",
                                        uuid = rem.uuid
                                    );
                                    counts.rems_deleted += 1;
                                    let before = all_links.len();
                                    all_links.retain(|l| l.rem_uuid != rem.uuid);
                                    counts.links_deleted += before - all_links.len();
                                }
                                Err(Error::AuthDenied) => {
                                    errors.push(Error::AuthDenied.to_string());
                                    break;
                                }
                                Err(err) => errors.push(err.to_string()),
                            }
                        }
                    }
                    Err(err) => errors.push(err.to_string()),
                }
            }
        }

        // Persist, even after earlier errors.
        if !dry_run {
            link_store.save(&all_links)?;
        }

        if !tag_summary.is_empty() {
            log::debug!("tag routing summary: {tag_summary:?}");
        }

        Ok(SyncResult {
            success: true,
            vault_id,
            vault_path: vault_path.to_owned(),
            counts,
            created_doc_uuids: created.created_doc_uuids,
            created_rem_uuids: created.created_rem_uuids,
            tag_summary,
            change_plan: if dry_run { rec.plans } else { Vec::new() },
            dedup_clusters: if dry_run { dedup_clusters } else { Vec::new() },
            errors,
        })
    }
}

/// Sync every given vault, printing a per-vault stat line and an
/// aggregate. Returns an error when any vault failed fatally.
pub fn perform_sync(
    cfg: &Config,
    vault_paths: &[Utf8PathBuf],
    direction: Direction,
    dry_run: bool,
    walker: &mut dyn DocumentWalker,
    gateway: &mut dyn ReminderGateway,
    review: &mut dyn ClusterReview,
) -> Result<Vec<SyncResult>, Error> {
    let mut vaults = vault_paths.to_vec();
    vaults.sort();

    let mut results = Vec::new();
    let mut fatal: Option<Error> = None;
    let mut vaults_failed = 0usize;

    for vault in vaults
        .iter()
        .progress_with_style(style_progress_bar_count())
        .with_message("Syncing…")
    {
        let vault_id = vault.file_name().unwrap_or(vault.as_str());
        let list_ids = cfg.list_ids_for(vault_id);
        let mut engine = SyncEngine {
            cfg,
            walker,
            gateway,
            review,
        };
        match engine.sync(vault, &list_ids, direction, dry_run) {
            Ok(result) => results.push(result),
            Err(err) if err.is_fatal() => {
                log::error!("vault {vault} failed fatally: {err}");
                fatal = Some(err);
                break;
            }
            Err(err) => {
                // A broken vault does not abort the others.
                log::error!("vault {vault} failed: {err}");
                vaults_failed += 1;
            }
        }
    }

    for result in results.iter().filter(|r| r.counts.any_change()) {
        println!("{result}");
    }

    let mut total = SyncCounts::default();
    for result in &results {
        total.merge(&result.counts);
    }
    let error_count: usize = results.iter().map(|r| r.errors.len()).sum();
    if total.any_change() {
        println!(
            "Totals: {} updated ({} doc / {} rem), {} created ({} doc / {} rem), {} deleted, {} rerouted, {} links created, {} links pruned",
            total.docs_updated + total.rems_updated,
            total.docs_updated,
            total.rems_updated,
            total.docs_created + total.rems_created,
            total.docs_created,
            total.rems_created,
            total.docs_deleted + total.rems_deleted,
            total.rems_rerouted,
            total.links_created,
            total.links_deleted,
        );
    } else if fatal.is_none() {
        println!("No changes needed - everything is in sync!");
    }
    if error_count > 0 {
        println!("{} record-level errors; see the log for details.", error_count);
    }
    if vaults_failed > 0 {
        println!("{} vault(s) could not be synced; see the log for details.", vaults_failed);
    }
    if dry_run {
        println!("This was a dry run. Use --apply to make changes.");
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(results),
    }
}
