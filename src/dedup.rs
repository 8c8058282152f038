use petgraph::unionfind::UnionFind;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cfg::Config;
use crate::gateway::ReminderGateway;
use crate::model::{DocTask, RemStatus, RemTask, SyncLink};
use crate::text::title_similarity;
use crate::walker::{DocumentWalker, LineOutcome};

/// Token similarity two records must exceed to be dedup candidates.
const SIMILARITY_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Doc,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    DryRun,
    Auto,
    Interactive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMember {
    pub uuid: Arc<str>,
    pub label: String,
    /// Linked records anchor a cluster and are never deleted.
    pub linked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub side: Side,
    pub members: Vec<ClusterMember>,
}

/// Decides which members of a cluster survive an interactive review.
/// Returning `None` skips the cluster (everything is kept).
pub trait ClusterReview {
    fn review(&mut self, cluster: &Cluster) -> Option<Vec<usize>>;
}

/// Terminal review backed by a multi-select prompt; aborting the prompt
/// keeps the whole cluster.
#[derive(Debug, Default)]
pub struct ConsoleReview;

impl ClusterReview for ConsoleReview {
    fn review(&mut self, cluster: &Cluster) -> Option<Vec<usize>> {
        let labels: Vec<&str> = cluster.members.iter().map(|m| m.label.as_str()).collect();
        let defaults = vec![true; labels.len()];
        dialoguer::MultiSelect::new()
            .with_prompt("Duplicate tasks found — select the records to KEEP")
            .items(&labels)
            .defaults(&defaults)
            .interact_opt()
            .unwrap_or(None)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupCounts {
    pub docs_deleted: usize,
    pub rems_deleted: usize,
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub clusters: Vec<Cluster>,
    pub counts: DedupCounts,
    pub errors: Vec<String>,
}

pub struct Deduplicator<'a> {
    cfg: &'a Config,
    mode: DedupMode,
}

impl<'a> Deduplicator<'a> {
    pub fn new(cfg: &'a Config, mode: DedupMode) -> Deduplicator<'a> {
        Deduplicator { cfg, mode }
    }

    /// Find near-duplicate clusters within each store and collapse them.
    /// Records created this run sit the round out; completed records only
    /// participate when configured to.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        docs: &[DocTask],
        rems: &[RemTask],
        links: &[SyncLink],
        created_docs: &HashSet<Arc<str>>,
        created_rems: &HashSet<Arc<str>>,
        walker: &mut dyn DocumentWalker,
        gateway: &mut dyn ReminderGateway,
        review: &mut dyn ClusterReview,
    ) -> DedupOutcome {
        let linked_docs: HashSet<&str> = links.iter().map(|l| l.doc_uuid.as_ref()).collect();
        let linked_rems: HashSet<&str> = links.iter().map(|l| l.rem_uuid.as_ref()).collect();

        let mut outcome = DedupOutcome::default();

        let doc_pool: Vec<&DocTask> = docs
            .iter()
            .filter(|d| !created_docs.contains(&d.uuid))
            .filter(|d| self.cfg.include_completed || d.status.is_open())
            .collect();
        let doc_clusters = cluster(
            &doc_pool,
            |d| &d.description,
            |d| d.due_date,
            |d| d.uuid.clone(),
            |d| {
                ClusterMember {
                    uuid: d.uuid.clone(),
                    label: format!("{} ({}:{})", d.description, d.file_path, d.line_number),
                    linked: linked_docs.contains(d.uuid.as_ref()),
                }
            },
            Side::Doc,
        );

        let rem_pool: Vec<&RemTask> = rems
            .iter()
            .filter(|r| !created_rems.contains(&r.uuid))
            .filter(|r| self.cfg.include_completed || r.status != RemStatus::Done)
            .collect();
        let rem_clusters = cluster(
            &rem_pool,
            |r| &r.title,
            |r| r.due_date,
            |r| r.uuid.clone(),
            |r| {
                ClusterMember {
                    uuid: r.uuid.clone(),
                    label: format!("{} ({})", r.title, r.list_name),
                    linked: linked_rems.contains(r.uuid.as_ref()),
                }
            },
            Side::Rem,
        );

        let docs_by_uuid: HashMap<&str, &DocTask> =
            docs.iter().map(|d| (d.uuid.as_ref(), d)).collect();
        let rems_by_uuid: HashMap<&str, &RemTask> =
            rems.iter().map(|r| (r.uuid.as_ref(), r)).collect();

        for cluster in doc_clusters.into_iter().chain(rem_clusters) {
            let losers = self.resolve(&cluster, review);
            for uuid in losers {
                match cluster.side {
                    Side::Doc => {
                        let Some(doc) = docs_by_uuid.get(uuid.as_ref()) else { continue };
                        match walker.delete_task_line(
                            &doc.absolute_path(),
                            doc.line_number,
                            doc.block_id.as_deref(),
                        ) {
                            Ok(LineOutcome::Applied) => {
                                log::info!("deleted duplicate document task {uuid}");
                                outcome.counts.docs_deleted += 1;
                            }
                            Ok(LineOutcome::NotFound) => {
                                log::warn!("duplicate document task {uuid} already gone");
                            }
                            Err(err) => {
                                outcome.errors.push(err.to_string());
                                log::error!("failed to delete document task {uuid}: {err}");
                            }
                        }
                    }
                    Side::Rem => {
                        let Some(rem) = rems_by_uuid.get(uuid.as_ref()) else { continue };
                        match gateway.delete(&rem.item_id) {
                            Ok(()) => {
                                log::info!("deleted duplicate reminder {uuid}");
                                outcome.counts.rems_deleted += 1;
                            }
                            Err(err) => {
                                outcome.errors.push(err.to_string());
                                log::error!("failed to delete reminder {uuid}: {err}");
                            }
                        }
                    }
                }
            }
            outcome.clusters.push(cluster);
        }

        outcome
    }

    /// Members to delete. Linked members always survive; beyond that the
    /// mode decides: dry-run keeps everything, auto keeps the first by
    /// ascending uuid, interactive keeps the reviewer's picks.
    fn resolve(&self, cluster: &Cluster, review: &mut dyn ClusterReview) -> Vec<Arc<str>> {
        let mut keep: Vec<bool> = cluster.members.iter().map(|m| m.linked).collect();
        match self.mode {
            DedupMode::DryRun => return Vec::new(),
            DedupMode::Auto => {
                if !keep.iter().any(|k| *k) {
                    // Members are sorted by uuid; the first anchors.
                    keep[0] = true;
                }
            }
            DedupMode::Interactive => match review.review(cluster) {
                Some(indices) => {
                    for idx in indices {
                        if let Some(flag) = keep.get_mut(idx) {
                            *flag = true;
                        }
                    }
                    if !keep.iter().any(|k| *k) {
                        keep[0] = true;
                    }
                }
                // Skip = keep all.
                None => return Vec::new(),
            },
        }
        cluster
            .members
            .iter()
            .zip(&keep)
            .filter(|(_, keep)| !**keep)
            .map(|(m, _)| m.uuid.clone())
            .collect()
    }
}

/// Union-find clustering over candidate pairs: normalized similarity above
/// the threshold and due dates equal or both absent.
fn cluster<T, FText, FDue, FUuid, FMember>(
    pool: &[&T],
    text: FText,
    due: FDue,
    uuid: FUuid,
    member: FMember,
    side: Side,
) -> Vec<Cluster>
where
    FText: Fn(&T) -> &str,
    FDue: Fn(&T) -> Option<chrono::NaiveDate>,
    FUuid: Fn(&T) -> Arc<str>,
    FMember: Fn(&T) -> ClusterMember,
{
    let mut indices: Vec<usize> = (0..pool.len()).collect();
    indices.sort_by(|&a, &b| uuid(pool[a]).cmp(&uuid(pool[b])));

    let mut uf: UnionFind<usize> = UnionFind::new(pool.len());
    for i in 0..indices.len() {
        for j in (i + 1)..indices.len() {
            let (a, b) = (pool[indices[i]], pool[indices[j]]);
            if due(a) != due(b) {
                continue;
            }
            if title_similarity(text(a), text(b)) > SIMILARITY_THRESHOLD {
                uf.union(indices[i], indices[j]);
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for &idx in &indices {
        groups.entry(uf.find(idx)).or_default().push(idx);
    }

    let mut clusters: Vec<Cluster> = groups
        .into_values()
        .filter(|members| members.len() > 1)
        .map(|mut members| {
            members.sort_by(|&a, &b| uuid(pool[a]).cmp(&uuid(pool[b])));
            Cluster {
                side,
                members: members.iter().map(|&i| member(pool[i])).collect(),
            }
        })
        .collect();
    clusters.sort_by(|a, b| a.members[0].uuid.cmp(&b.members[0].uuid));
    clusters
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::gateway::{JsonGateway, NewReminder};
    use crate::model::LinkFields;
    use crate::walker::MarkdownWalker;
    use camino::Utf8PathBuf;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::fs;

    struct KeepNone;
    impl ClusterReview for KeepNone {
        fn review(&mut self, _cluster: &Cluster) -> Option<Vec<usize>> {
            Some(Vec::new())
        }
    }

    struct SkipAll;
    impl ClusterReview for SkipAll {
        fn review(&mut self, _cluster: &Cluster) -> Option<Vec<usize>> {
            None
        }
    }

    fn vault_with(lines: &str) -> (tempfile::TempDir, Utf8PathBuf, Vec<DocTask>) {
        let dir = tempfile::tempdir().unwrap();
        let vault = Utf8PathBuf::from_path_buf(dir.path().join("Vault")).unwrap();
        fs::create_dir_all(&vault).unwrap();
        fs::write(vault.join("todo.md"), lines).unwrap();
        let docs = MarkdownWalker.list_tasks(&vault, true).unwrap();
        (dir, vault, docs)
    }

    fn gateway(dir: &tempfile::TempDir) -> JsonGateway {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("reminders.json")).unwrap();
        let mut gw = JsonGateway::open(&path).unwrap();
        gw.add_list("L1", "Tasks").unwrap();
        gw
    }

    fn link_for(doc: &DocTask, rem_uuid: &str) -> SyncLink {
        SyncLink {
            doc_uuid: doc.uuid.clone(),
            rem_uuid: rem_uuid.into(),
            score: 1.0,
            vault_id: doc.vault_id.clone(),
            created_at: Utc::now(),
            last_synced: None,
            fields: LinkFields::default(),
        }
    }

    #[test]
    fn identical_descriptions_cluster_differing_dates_do_not() {
        let (dir, _vault, docs) = vault_with(
            "- [ ] Buy milk ^aaa00001\n\
             - [ ] Buy milk ^bbb00001\n\
             - [ ] Buy milk 📅 2025-05-01 ^ccc00001\n\
             - [ ] Something else ^ddd00001\n",
        );
        let mut gw = gateway(&dir);
        let cfg = Config::default();
        let dedup = Deduplicator::new(&cfg, DedupMode::DryRun);
        let outcome = dedup.run(
            &docs,
            &[],
            &[],
            &HashSet::new(),
            &HashSet::new(),
            &mut MarkdownWalker,
            &mut gw,
            &mut SkipAll,
        );
        assert_eq!(outcome.clusters.len(), 1);
        assert_eq!(outcome.clusters[0].members.len(), 2);
        assert_eq!(outcome.counts, DedupCounts::default());
    }

    #[test]
    fn auto_apply_keeps_linked_member() {
        let (dir, vault, docs) = vault_with(
            "- [ ] Water plants ^wat00001\n\
             - [ ] Water plants ^wat00002\n",
        );
        let mut gw = gateway(&dir);
        // The second task is the linked one; it must survive.
        let links = vec![link_for(&docs[1], "rem-1")];
        let cfg = Config::default();
        let dedup = Deduplicator::new(&cfg, DedupMode::Auto);
        let outcome = dedup.run(
            &docs,
            &[],
            &links,
            &HashSet::new(),
            &HashSet::new(),
            &mut MarkdownWalker,
            &mut gw,
            &mut SkipAll,
        );
        assert_eq!(outcome.counts.docs_deleted, 1);
        let content = fs::read_to_string(vault.join("todo.md")).unwrap();
        assert_eq!(content, "- [ ] Water plants ^wat00002\n");
    }

    #[test]
    fn auto_apply_without_links_keeps_first_uuid() {
        let (dir, vault, docs) = vault_with(
            "- [ ] Same thing ^zzz00001\n\
             - [ ] Same thing ^aaa00001\n",
        );
        let mut gw = gateway(&dir);
        let cfg = Config::default();
        let outcome = Deduplicator::new(&cfg, DedupMode::Auto).run(
            &docs,
            &[],
            &[],
            &HashSet::new(),
            &HashSet::new(),
            &mut MarkdownWalker,
            &mut gw,
            &mut SkipAll,
        );
        assert_eq!(outcome.counts.docs_deleted, 1);
        // doc-aaa00001 sorts first and survives.
        let content = fs::read_to_string(vault.join("todo.md")).unwrap();
        assert_eq!(content, "- [ ] Same thing ^aaa00001\n");
    }

    #[test]
    fn cancelled_records_sit_out_like_completed_ones() {
        let (dir, vault, docs) = vault_with(
            "- [-] Abandoned plan ^aba00001\n\
             - [-] Abandoned plan ^aba00002\n",
        );
        let mut gw = gateway(&dir);
        let cfg = Config::default();
        let outcome = Deduplicator::new(&cfg, DedupMode::Auto).run(
            &docs,
            &[],
            &[],
            &HashSet::new(),
            &HashSet::new(),
            &mut MarkdownWalker,
            &mut gw,
            &mut SkipAll,
        );
        assert_eq!(outcome.clusters.len(), 0);
        assert_eq!(outcome.counts.docs_deleted, 0);
        assert_eq!(
            fs::read_to_string(vault.join("todo.md")).unwrap().lines().count(),
            2
        );
    }

    #[test]
    fn created_this_run_are_excluded() {
        let (dir, _vault, docs) = vault_with(
            "- [ ] Fresh pair ^fre00001\n\
             - [ ] Fresh pair ^fre00002\n",
        );
        let mut gw = gateway(&dir);
        let created: HashSet<Arc<str>> = [docs[0].uuid.clone()].into();
        let cfg = Config::default();
        let outcome = Deduplicator::new(&cfg, DedupMode::Auto).run(
            &docs,
            &[],
            &[],
            &created,
            &HashSet::new(),
            &mut MarkdownWalker,
            &mut gw,
            &mut SkipAll,
        );
        assert_eq!(outcome.clusters.len(), 0);
        assert_eq!(outcome.counts.docs_deleted, 0);
    }

    #[test]
    fn reminder_duplicates_deleted_through_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let mut gw = gateway(&dir);
        for _ in 0..2 {
            gw.create(
                "L1",
                &NewReminder {
                    title: "Call plumber".into(),
                    ..NewReminder::default()
                },
            )
            .unwrap();
        }
        let rems = gw.list_tasks(&[], true).unwrap();

        let cfg = Config::default();
        let outcome = Deduplicator::new(&cfg, DedupMode::Auto).run(
            &[],
            &rems,
            &[],
            &HashSet::new(),
            &HashSet::new(),
            &mut MarkdownWalker,
            &mut gw,
            &mut SkipAll,
        );
        assert_eq!(outcome.counts.rems_deleted, 1);
        assert_eq!(gw.list_tasks(&[], true).unwrap().len(), 1);
    }

    #[test]
    fn interactive_skip_keeps_everything() {
        let (dir, vault, docs) = vault_with(
            "- [ ] Twice ^twi00001\n\
             - [ ] Twice ^twi00002\n",
        );
        let mut gw = gateway(&dir);
        let cfg = Config::default();
        let outcome = Deduplicator::new(&cfg, DedupMode::Interactive).run(
            &docs,
            &[],
            &[],
            &HashSet::new(),
            &HashSet::new(),
            &mut MarkdownWalker,
            &mut gw,
            &mut SkipAll,
        );
        assert_eq!(outcome.counts.docs_deleted, 0);
        assert_eq!(
            fs::read_to_string(vault.join("todo.md")).unwrap().lines().count(),
            2
        );
    }

    #[test]
    fn interactive_empty_keep_still_anchors_one() {
        let (dir, vault, docs) = vault_with(
            "- [ ] Guarded ^gua00001\n\
             - [ ] Guarded ^gua00002\n",
        );
        let mut gw = gateway(&dir);
        let cfg = Config::default();
        let outcome = Deduplicator::new(&cfg, DedupMode::Interactive).run(
            &docs,
            &[],
            &[],
            &HashSet::new(),
            &HashSet::new(),
            &mut MarkdownWalker,
            &mut gw,
            &mut KeepNone,
        );
        // Deleting an entire cluster is never allowed.
        assert_eq!(outcome.counts.docs_deleted, 1);
        assert_eq!(
            fs::read_to_string(vault.join("todo.md")).unwrap().lines().count(),
            1
        );
    }
}
