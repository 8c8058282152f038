use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;

use crate::error::Error;
use crate::model::{DocTask, RemTask, SyncLink};

const SCHEMA: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Meta {
    schema: u32,
    generated_at: DateTime<Utc>,
    #[serde(default)]
    run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkDocument {
    meta: Meta,
    #[serde(default)]
    links: Vec<SyncLink>,
}

/// Persistent registry of links. Holds an advisory lock on a sibling
/// `.lock` file for the whole load→save window; the lock is released when
/// the store is dropped.
#[derive(Debug)]
pub struct LinkStore {
    path: Utf8PathBuf,
    run_id: String,
    loaded_run_id: Option<String>,
    _lock: File,
}

fn new_run_id() -> String {
    format!("{}-{}", std::process::id(), Utc::now().timestamp_millis())
}

impl LinkStore {
    pub fn open<P: AsRef<Utf8Path>>(path: P) -> Result<LinkStore, Error> {
        let path = path.as_ref().to_owned();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::LinkStoreIo {
                path: path.to_string(),
                source,
            })?;
        }
        let lock_path = path.with_extension("lock");
        let lock = File::create(&lock_path).map_err(|source| Error::LinkStoreIo {
            path: lock_path.to_string(),
            source,
        })?;
        lock.lock_exclusive().map_err(|source| Error::LinkStoreIo {
            path: lock_path.to_string(),
            source,
        })?;
        Ok(LinkStore {
            path,
            run_id: new_run_id(),
            loaded_run_id: None,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Load all persisted links. A missing file is an empty store; malformed
    /// content is an empty store plus a warning.
    pub fn load(&mut self) -> Result<Vec<SyncLink>, Error> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(Error::LinkStoreIo {
                    path: self.path.to_string(),
                    source,
                })
            }
        };
        match serde_json::from_str::<LinkDocument>(&raw) {
            Ok(doc) => {
                self.loaded_run_id = doc.meta.run_id;
                Ok(doc.links)
            }
            Err(err) => {
                log::warn!("malformed link store {path}: {err}; starting empty", path = self.path);
                Ok(Vec::new())
            }
        }
    }

    /// Split loaded links into live links (both endpoints resolve) and
    /// dropped ones. A live link whose document moved vaults keeps working
    /// with a refreshed `vault_id`.
    pub fn restore(
        links: Vec<SyncLink>,
        docs_by_uuid: &HashMap<Arc<str>, DocTask>,
        rems_by_uuid: &HashMap<Arc<str>, RemTask>,
    ) -> (Vec<SyncLink>, Vec<SyncLink>) {
        let mut live = Vec::new();
        let mut dropped = Vec::new();
        for mut link in links {
            match (docs_by_uuid.get(&link.doc_uuid), rems_by_uuid.get(&link.rem_uuid)) {
                (Some(doc), Some(_)) => {
                    if link.vault_id != doc.vault_id {
                        log::debug!(
                            "link {doc_uuid} moved vaults: {old} -> {new}",
                            doc_uuid = link.doc_uuid,
                            old = link.vault_id,
                            new = doc.vault_id
                        );
                        link.vault_id = doc.vault_id.clone();
                    }
                    live.push(link);
                }
                _ => dropped.push(link),
            }
        }
        (live, dropped)
    }

    /// Persist the links. Writes atomically (temp file + rename) and only
    /// when the content differs from what is on disk, ignoring the
    /// `generated_at` and `run_id` stamps. Returns whether a write happened.
    pub fn save(&self, links: &[SyncLink]) -> Result<bool, Error> {
        let links = enforce_one_to_one(links);

        if let Ok(raw) = fs::read_to_string(&self.path) {
            if let Ok(on_disk) = serde_json::from_str::<LinkDocument>(&raw) {
                if let (Some(ours), Some(theirs)) = (&self.loaded_run_id, &on_disk.meta.run_id) {
                    if ours != theirs {
                        log::warn!(
                            "link store {path} was rewritten by run {theirs} during this run",
                            path = self.path
                        );
                    }
                }
                if on_disk.meta.schema == SCHEMA && on_disk.links == links {
                    return Ok(false);
                }
            }
        }

        let doc = LinkDocument {
            meta: Meta {
                schema: SCHEMA,
                generated_at: Utc::now(),
                run_id: Some(self.run_id.clone()),
            },
            links,
        };
        let payload = serde_json::to_string_pretty(&doc)?;

        let dir = self.path.parent().unwrap_or(Utf8Path::new("."));
        let io_err = |source: std::io::Error| Error::LinkStoreIo {
            path: self.path.to_string(),
            source,
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-links-")
            .suffix(".json")
            .tempfile_in(dir)
            .map_err(io_err)?;
        tmp.write_all(payload.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|err| io_err(err.error))?;
        Ok(true)
    }
}

/// At most one link per document uuid and one per reminder uuid; the first
/// occurrence in sorted order wins. Output is sorted for deterministic
/// diffs.
fn enforce_one_to_one(links: &[SyncLink]) -> Vec<SyncLink> {
    let mut sorted: Vec<SyncLink> = links.to_vec();
    sorted.sort_by(|a, b| {
        (a.doc_uuid.as_ref(), a.rem_uuid.as_ref()).cmp(&(b.doc_uuid.as_ref(), b.rem_uuid.as_ref()))
    });

    let mut seen_doc: HashSet<Arc<str>> = HashSet::new();
    let mut seen_rem: HashSet<Arc<str>> = HashSet::new();
    let mut out = Vec::with_capacity(sorted.len());
    for link in sorted {
        if !seen_doc.insert(link.doc_uuid.clone()) || !seen_rem.insert(link.rem_uuid.clone()) {
            log::warn!(
                "dropping duplicate link ({doc}, {rem})",
                doc = link.doc_uuid,
                rem = link.rem_uuid
            );
            continue;
        }
        out.push(link);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::model::{DocStatus, LinkFields, Priority, RemStatus};
    use pretty_assertions::assert_eq;

    pub(crate) fn doc_task(uuid: &str) -> DocTask {
        DocTask {
            uuid: uuid.into(),
            vault_id: "V".into(),
            vault_name: "V".into(),
            vault_path: "/tmp/vault".into(),
            file_path: "todo.md".into(),
            line_number: 1,
            block_id: None,
            status: DocStatus::Todo,
            description: "task".into(),
            due_date: None,
            completion_date: None,
            priority: Some(Priority::Medium),
            tags: Vec::new(),
            raw_line: "- [ ] task".into(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    pub(crate) fn rem_task(uuid: &str) -> RemTask {
        RemTask {
            uuid: uuid.into(),
            item_id: uuid.trim_start_matches("rem-").into(),
            list_id: "L1".into(),
            list_name: "Tasks".into(),
            status: RemStatus::Todo,
            title: "task".into(),
            due_date: None,
            priority: Some(Priority::Medium),
            notes: None,
            tags: Vec::new(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    fn link(doc: &str, rem: &str) -> SyncLink {
        SyncLink {
            doc_uuid: doc.into(),
            rem_uuid: rem.into(),
            score: 1.0,
            vault_id: "V".into(),
            created_at: Utc::now(),
            last_synced: None,
            fields: LinkFields::default(),
        }
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("links.json")).unwrap();
        let mut store = LinkStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), Vec::new());
    }

    #[test]
    fn malformed_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("links.json")).unwrap();
        fs::write(&path, "{ not json").unwrap();
        let mut store = LinkStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), Vec::new());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("links.json")).unwrap();
        let links = vec![link("doc-a", "rem-1"), link("doc-b", "rem-2")];
        {
            let store = LinkStore::open(&path).unwrap();
            assert!(store.save(&links).unwrap());
        }
        let mut store = LinkStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), links);
    }

    #[test]
    fn save_skips_unchanged_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("links.json")).unwrap();
        let links = vec![link("doc-a", "rem-1")];
        let store = LinkStore::open(&path).unwrap();
        assert!(store.save(&links).unwrap());
        // Identical content, fresh generated_at: no rewrite.
        assert!(!store.save(&links).unwrap());
        assert!(store.save(&[]).unwrap());
    }

    #[test]
    fn restore_drops_links_with_missing_endpoints() {
        let docs: HashMap<Arc<str>, DocTask> =
            [(Arc::from("doc-a"), doc_task("doc-a"))].into_iter().collect();
        let rems: HashMap<Arc<str>, RemTask> =
            [(Arc::from("rem-1"), rem_task("rem-1"))].into_iter().collect();

        let (live, dropped) = LinkStore::restore(
            vec![link("doc-a", "rem-1"), link("doc-gone", "rem-1"), link("doc-a", "rem-gone")],
            &docs,
            &rems,
        );
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].doc_uuid.as_ref(), "doc-a");
        assert_eq!(dropped.len(), 2);
    }

    #[test]
    fn restore_refreshes_moved_vault_id() {
        let docs: HashMap<Arc<str>, DocTask> =
            [(Arc::from("doc-a"), doc_task("doc-a"))].into_iter().collect();
        let rems: HashMap<Arc<str>, RemTask> =
            [(Arc::from("rem-1"), rem_task("rem-1"))].into_iter().collect();

        let mut stale = link("doc-a", "rem-1");
        stale.vault_id = "old-vault".into();
        let (live, _) = LinkStore::restore(vec![stale], &docs, &rems);
        assert_eq!(live[0].vault_id, "V");
    }

    #[test]
    fn duplicate_links_collapse_on_save() {
        let links = vec![link("doc-a", "rem-1"), link("doc-a", "rem-2"), link("doc-b", "rem-1")];
        let unique = enforce_one_to_one(&links);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].rem_uuid.as_ref(), "rem-1");
    }
}
