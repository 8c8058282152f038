use camino::{Utf8Path, Utf8PathBuf};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

use crate::error::Error;
use crate::model::{Priority, RemStatus, RemTask};

/// Field updates for one reminder. Outer `None` leaves the field alone;
/// inner `None` clears it. `list_id` moves the reminder to another list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemFieldChanges {
    pub status: Option<RemStatus>,
    pub title: Option<String>,
    pub due_date: Option<Option<NaiveDate>>,
    pub priority: Option<Option<Priority>>,
    pub notes: Option<Option<String>>,
    pub list_id: Option<String>,
}

impl RemFieldChanges {
    pub fn is_empty(&self) -> bool {
        *self == RemFieldChanges::default()
    }
}

/// Fields for a reminder to be created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewReminder {
    pub title: String,
    pub status: RemStatus,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<Priority>,
    pub notes: Option<String>,
    pub url: Option<String>,
    pub tags: Vec<String>,
}

/// Boundary to the reminder service. Operations are per-record and
/// synchronous; implementations are expected to enforce their own bounded
/// timeouts and surface [`Error::AuthDenied`] / [`Error::GatewayTimeout`].
pub trait ReminderGateway {
    fn list_tasks(&self, list_ids: &[String], include_completed: bool)
        -> Result<Vec<RemTask>, Error>;

    fn create(&mut self, list_id: &str, fields: &NewReminder) -> Result<RemTask, Error>;

    fn update(&mut self, item_id: &str, changes: &RemFieldChanges) -> Result<(), Error>;

    fn delete(&mut self, item_id: &str) -> Result<(), Error>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemList {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GatewayDocument {
    #[serde(default)]
    lists: Vec<RemList>,
    #[serde(default)]
    tasks: Vec<RemTask>,
}

/// File-backed gateway used by tests and offline runs. The whole store is a
/// single JSON document; every mutation is persisted atomically.
#[derive(Debug)]
pub struct JsonGateway {
    path: Utf8PathBuf,
    doc: GatewayDocument,
    /// Failure injection for tests: every update fails with a save error.
    pub inject_save_error: bool,
    /// Failure injection for tests: every call fails authorization.
    pub inject_auth_denied: bool,
}

impl JsonGateway {
    pub fn open<P: AsRef<Utf8Path>>(path: P) -> Result<JsonGateway, Error> {
        let path = path.as_ref().to_owned();
        let doc = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => GatewayDocument::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(JsonGateway {
            path,
            doc,
            inject_save_error: false,
            inject_auth_denied: false,
        })
    }

    pub fn add_list(&mut self, id: &str, name: &str) -> Result<(), Error> {
        if !self.doc.lists.iter().any(|l| l.id == id) {
            self.doc.lists.push(RemList {
                id: id.to_owned(),
                name: name.to_owned(),
            });
            self.persist()?;
        }
        Ok(())
    }

    pub fn lists(&self) -> &[RemList] {
        &self.doc.lists
    }

    fn list_name(&self, list_id: &str) -> Option<&str> {
        self.doc
            .lists
            .iter()
            .find(|l| l.id == list_id)
            .map(|l| l.name.as_str())
    }

    fn next_item_id(&self) -> String {
        let max = self
            .doc
            .tasks
            .iter()
            .filter_map(|t| t.item_id.strip_prefix("item-"))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        format!("item-{}", max + 1)
    }

    fn persist(&self) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(&self.doc)?;
        let dir = self.path.parent().unwrap_or(Utf8Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-reminders-")
            .suffix(".json")
            .tempfile_in(dir)?;
        tmp.write_all(payload.as_bytes())?;
        tmp.persist(&self.path).map_err(|err| Error::from(err.error))?;
        Ok(())
    }

    fn check_auth(&self) -> Result<(), Error> {
        if self.inject_auth_denied {
            return Err(Error::AuthDenied);
        }
        Ok(())
    }
}

impl ReminderGateway for JsonGateway {
    fn list_tasks(
        &self,
        list_ids: &[String],
        include_completed: bool,
    ) -> Result<Vec<RemTask>, Error> {
        self.check_auth()?;
        let mut tasks: Vec<RemTask> = self
            .doc
            .tasks
            .iter()
            .filter(|t| list_ids.is_empty() || list_ids.iter().any(|id| *id == t.list_id))
            .filter(|t| include_completed || t.status != RemStatus::Done)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(tasks)
    }

    fn create(&mut self, list_id: &str, fields: &NewReminder) -> Result<RemTask, Error> {
        self.check_auth()?;
        let list_name = self
            .list_name(list_id)
            .ok_or_else(|| Error::NotFound {
                what: format!("reminder list {list_id}"),
            })?
            .to_owned();
        let item_id = self.next_item_id();
        let now = Utc::now();
        let notes = match (&fields.notes, &fields.url) {
            (Some(notes), Some(url)) => Some(format!("{notes}\n{url}")),
            (Some(notes), None) => Some(notes.clone()),
            (None, Some(url)) => Some(url.clone()),
            (None, None) => None,
        };
        let task = RemTask {
            uuid: format!("rem-{item_id}").into(),
            item_id,
            list_id: list_id.to_owned(),
            list_name,
            status: fields.status,
            title: fields.title.clone(),
            due_date: fields.due_date,
            priority: fields.priority,
            notes,
            tags: fields.tags.clone(),
            created_at: now,
            modified_at: now,
        };
        self.doc.tasks.push(task.clone());
        self.persist()?;
        Ok(task)
    }

    fn update(&mut self, item_id: &str, changes: &RemFieldChanges) -> Result<(), Error> {
        self.check_auth()?;
        if self.inject_save_error {
            return Err(Error::RemSave {
                item_id: item_id.to_owned(),
                message: "injected save failure".into(),
            });
        }
        let new_list_name = changes
            .list_id
            .as_deref()
            .map(|id| {
                self.list_name(id).map(str::to_owned).ok_or_else(|| Error::NotFound {
                    what: format!("reminder list {id}"),
                })
            })
            .transpose()?;
        let task = self
            .doc
            .tasks
            .iter_mut()
            .find(|t| t.item_id == item_id)
            .ok_or_else(|| Error::RemNotFound {
                item_id: item_id.to_owned(),
            })?;
        if let Some(status) = changes.status {
            task.status = status;
        }
        if let Some(title) = &changes.title {
            task.title = title.clone();
        }
        if let Some(due) = changes.due_date {
            task.due_date = due;
        }
        if let Some(priority) = changes.priority {
            task.priority = priority;
        }
        if let Some(notes) = &changes.notes {
            task.notes = notes.clone();
        }
        if let Some(list_id) = &changes.list_id {
            task.list_id = list_id.clone();
            task.list_name = new_list_name.expect("list name resolved above");
        }
        task.modified_at = Utc::now();
        self.persist()?;
        Ok(())
    }

    fn delete(&mut self, item_id: &str) -> Result<(), Error> {
        self.check_auth()?;
        let before = self.doc.tasks.len();
        self.doc.tasks.retain(|t| t.item_id != item_id);
        if self.doc.tasks.len() == before {
            return Err(Error::RemNotFound {
                item_id: item_id.to_owned(),
            });
        }
        self.persist()?;
        Ok(())
    }
}
