use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;

use crate::error::Error;
use crate::ident::mint_id;
use crate::model::{DocStatus, DocTask};
use crate::parse::{parse_task_line, ParsedLine};

/// Result of a line-level mutation. I/O failures surface as errors; a line
/// that cannot be located is reported, not fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Applied,
    NotFound,
}

/// Boundary to the document store.
pub trait DocumentWalker {
    fn list_tasks(&self, vault_path: &Utf8Path, include_completed: bool)
        -> Result<Vec<DocTask>, Error>;

    fn rewrite_task_line(
        &mut self,
        path: &Utf8Path,
        line_number: usize,
        new_raw_line: &str,
        expected_block_id: Option<&str>,
    ) -> Result<LineOutcome, Error>;

    fn delete_task_line(
        &mut self,
        path: &Utf8Path,
        line_number: usize,
        expected_block_id: Option<&str>,
    ) -> Result<LineOutcome, Error>;

    /// Append a formatted task line, optionally under a heading. Returns the
    /// 1-based line number and the block token carried by the line.
    fn append_task(
        &mut self,
        target_file: &Utf8Path,
        formatted_line: &str,
        heading: Option<&str>,
    ) -> Result<(usize, Option<String>), Error>;
}

/// Walks Markdown vaults on the local filesystem.
#[derive(Debug, Default)]
pub struct MarkdownWalker;

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn collect_md_files(dir: &Utf8Path, out: &mut Vec<Utf8PathBuf>) -> Result<(), Error> {
    let mut entries: Vec<Utf8PathBuf> = Vec::new();
    for entry in dir.read_dir_utf8()? {
        entries.push(entry?.path().to_owned());
    }
    entries.sort();
    for path in entries {
        let Some(name) = path.file_name() else { continue };
        if is_hidden(name) {
            continue;
        }
        if path.is_dir() {
            collect_md_files(&path, out)?;
        } else if path.extension() == Some("md") {
            out.push(path);
        }
    }
    Ok(())
}

fn read_lines(path: &Utf8Path) -> Result<Vec<String>, Error> {
    Ok(fs::read_to_string(path)?
        .split('\n')
        .map(str::to_owned)
        .collect())
}

fn write_lines(path: &Utf8Path, lines: &[String]) -> Result<(), Error> {
    let mut content = lines.join("\n");
    if !content.ends_with('\n') {
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}

fn line_has_block_id(line: &str, block_id: &str) -> bool {
    line.trim_end().ends_with(&format!("^{block_id}"))
}

/// Locate the target line: a block token is authoritative (preferring the
/// recorded line number), otherwise the recorded line must still parse as a
/// task line. Returns a 0-based index.
fn locate_line(lines: &[String], line_number: usize, expected_block_id: Option<&str>) -> Option<usize> {
    match expected_block_id {
        Some(id) => {
            if line_number >= 1 && line_number <= lines.len() && line_has_block_id(&lines[line_number - 1], id) {
                return Some(line_number - 1);
            }
            lines.iter().position(|l| line_has_block_id(l, id))
        }
        None => {
            if line_number >= 1
                && line_number <= lines.len()
                && parse_task_line(&lines[line_number - 1]).is_some()
            {
                Some(line_number - 1)
            } else {
                None
            }
        }
    }
}

impl MarkdownWalker {
    fn parse_file(
        &self,
        vault_path: &Utf8Path,
        rel_path: &Utf8Path,
        vault_id: &str,
    ) -> Result<Vec<DocTask>, Error> {
        let full_path = vault_path.join(rel_path);
        let metadata = fs::metadata(&full_path)?;
        let file_modified: DateTime<Utc> = metadata.modified()?.into();
        let lines = read_lines(&full_path)?;

        let existing_block_ids: HashSet<String> = lines
            .iter()
            .filter_map(|l| parse_task_line(l))
            .filter_map(|p| p.block_id)
            .collect();

        let mut tasks = Vec::new();
        for (idx, raw_line) in lines.iter().enumerate() {
            let Some(parsed) = parse_task_line(raw_line) else {
                continue;
            };
            let line_number = idx + 1;
            let ParsedLine {
                status,
                description,
                block_id,
                due_date,
                completion_date,
                priority,
                tags,
                ..
            } = parsed;

            let minted = mint_id(
                vault_path,
                rel_path,
                line_number,
                &description,
                &existing_block_ids,
                block_id.as_deref(),
            )?;

            tasks.push(DocTask {
                uuid: minted.uuid.into(),
                vault_id: vault_id.to_owned(),
                vault_name: vault_id.to_owned(),
                vault_path: vault_path.to_owned(),
                file_path: rel_path.to_owned(),
                line_number,
                block_id,
                status,
                description,
                due_date,
                completion_date,
                priority,
                tags,
                raw_line: raw_line.clone(),
                created_at: file_modified,
                modified_at: file_modified,
            });
        }
        Ok(tasks)
    }
}

impl DocumentWalker for MarkdownWalker {
    fn list_tasks(
        &self,
        vault_path: &Utf8Path,
        include_completed: bool,
    ) -> Result<Vec<DocTask>, Error> {
        let vault_id = vault_path
            .file_name()
            .unwrap_or(vault_path.as_str())
            .to_owned();

        let mut files = Vec::new();
        collect_md_files(vault_path, &mut files)?;

        let mut tasks = Vec::new();
        for file in files {
            let rel = file
                .strip_prefix(vault_path)
                .unwrap_or(file.as_path())
                .to_owned();
            match self.parse_file(vault_path, &rel, &vault_id) {
                Ok(found) => tasks.extend(found),
                Err(err) => log::error!("error parsing {rel}: {err}"),
            }
        }

        if !include_completed {
            tasks.retain(|t| t.status != DocStatus::Done);
        }
        Ok(tasks)
    }

    fn rewrite_task_line(
        &mut self,
        path: &Utf8Path,
        line_number: usize,
        new_raw_line: &str,
        expected_block_id: Option<&str>,
    ) -> Result<LineOutcome, Error> {
        if !path.is_file() {
            return Ok(LineOutcome::NotFound);
        }
        let mut lines = read_lines(path)?;
        let Some(idx) = locate_line(&lines, line_number, expected_block_id) else {
            return Ok(LineOutcome::NotFound);
        };
        if lines[idx] == new_raw_line {
            return Ok(LineOutcome::Applied);
        }
        lines[idx] = new_raw_line.to_owned();
        write_lines(path, &lines).map_err(|err| match err {
            Error::IO { source } => Error::DocIo {
                file: path.to_string(),
                source,
            },
            other => other,
        })?;
        Ok(LineOutcome::Applied)
    }

    fn delete_task_line(
        &mut self,
        path: &Utf8Path,
        line_number: usize,
        expected_block_id: Option<&str>,
    ) -> Result<LineOutcome, Error> {
        if !path.is_file() {
            return Ok(LineOutcome::NotFound);
        }
        let mut lines = read_lines(path)?;
        let Some(idx) = locate_line(&lines, line_number, expected_block_id) else {
            return Ok(LineOutcome::NotFound);
        };
        lines.remove(idx);
        write_lines(path, &lines).map_err(|err| match err {
            Error::IO { source } => Error::DocIo {
                file: path.to_string(),
                source,
            },
            other => other,
        })?;
        Ok(LineOutcome::Applied)
    }

    fn append_task(
        &mut self,
        target_file: &Utf8Path,
        formatted_line: &str,
        heading: Option<&str>,
    ) -> Result<(usize, Option<String>), Error> {
        if let Some(parent) = target_file.parent() {
            fs::create_dir_all(parent)?;
        }
        if !target_file.is_file() {
            let title = target_file.file_stem().unwrap_or("Inbox");
            fs::write(target_file, format!("# {title}\n\n"))?;
        }

        let mut lines = read_lines(target_file)?;
        // Drop a trailing phantom line caused by the final newline.
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        let insert_at = match heading {
            Some(heading) => match find_heading(&lines, heading) {
                Some(heading_idx) => {
                    // Insert after the last non-empty line of the section.
                    let section_end = lines
                        .iter()
                        .enumerate()
                        .skip(heading_idx + 1)
                        .find(|(_, l)| l.trim_start().starts_with('#'))
                        .map(|(i, _)| i)
                        .unwrap_or(lines.len());
                    let mut at = section_end;
                    while at > heading_idx + 1 && lines[at - 1].trim().is_empty() {
                        at -= 1;
                    }
                    at
                }
                None => {
                    if lines.last().is_some_and(|l| !l.trim().is_empty()) {
                        lines.push(String::new());
                    }
                    lines.push(format!("## {heading}"));
                    lines.len()
                }
            },
            None => lines.len(),
        };

        // A line without a block token gets one minted here so the identity
        // survives the next scan.
        let parsed = parse_task_line(formatted_line);
        let mut line = formatted_line.to_owned();
        let block_id = match parsed.as_ref().and_then(|p| p.block_id.clone()) {
            Some(id) => Some(id),
            None => match parsed {
                Some(parsed) => {
                    let existing: HashSet<String> = lines
                        .iter()
                        .filter_map(|l| parse_task_line(l))
                        .filter_map(|p| p.block_id)
                        .collect();
                    let vault_dir = target_file.parent().unwrap_or(Utf8Path::new("."));
                    let file_name = Utf8Path::new(target_file.file_name().unwrap_or("Inbox.md"));
                    let minted = mint_id(
                        vault_dir,
                        file_name,
                        insert_at + 1,
                        &parsed.description,
                        &existing,
                        None,
                    )?;
                    let token = minted.block_suggestion.expect("minted id carries a token");
                    line.push_str(&format!(" ^{token}"));
                    Some(token)
                }
                None => None,
            },
        };

        lines.insert(insert_at, line);
        write_lines(target_file, &lines).map_err(|err| match err {
            Error::IO { source } => Error::DocIo {
                file: target_file.to_string(),
                source,
            },
            other => other,
        })?;

        Ok((insert_at + 1, block_id))
    }
}

fn find_heading(lines: &[String], heading: &str) -> Option<usize> {
    lines.iter().position(|l| {
        let trimmed = l.trim_start();
        trimmed.starts_with('#') && trimmed.trim_start_matches('#').trim() == heading
    })
}

#[cfg(test)]
mod test {
    use super::*;

    use pretty_assertions::assert_eq;

    fn vault() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("Vault")).unwrap();
        fs::create_dir_all(&path).unwrap();
        (dir, path)
    }

    #[test]
    fn lists_tasks_with_stable_ids() {
        let (_dir, vault) = vault();
        fs::write(
            vault.join("todo.md"),
            "# Todo\n\n- [ ] Buy milk 📅 2025-01-10\n- [x] Old chore\n- [ ] Anchored ^abc12345\n",
        )
        .unwrap();

        let walker = MarkdownWalker;
        let tasks = walker.list_tasks(&vault, true).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].description, "Buy milk");
        assert_eq!(tasks[2].uuid.as_ref(), "doc-abc12345");

        // A second scan mints the same ids.
        let again = walker.list_tasks(&vault, true).unwrap();
        let ids =
            |tasks: &[DocTask]| tasks.iter().map(|t| t.uuid.to_string()).collect::<Vec<_>>();
        assert_eq!(ids(&tasks), ids(&again));

        let open_only = walker.list_tasks(&vault, false).unwrap();
        assert_eq!(open_only.len(), 2);
    }

    #[test]
    fn cancelled_tasks_survive_completed_filter() {
        let (_dir, vault) = vault();
        fs::write(vault.join("todo.md"), "- [-] Dropped\n- [x] Done\n").unwrap();
        let tasks = MarkdownWalker.list_tasks(&vault, false).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, DocStatus::Cancelled);
    }

    #[test]
    fn rewrite_follows_moved_block_id() {
        let (_dir, vault) = vault();
        let file = vault.join("todo.md");
        fs::write(&file, "# Todo\n- [ ] Other\n- [ ] Target ^tgt00001\n").unwrap();

        // Line numbers shifted since the scan: a new line was inserted above.
        let mut walker = MarkdownWalker;
        let outcome = walker
            .rewrite_task_line(&file, 2, "- [x] Target ^tgt00001", Some("tgt00001"))
            .unwrap();
        assert_eq!(outcome, LineOutcome::Applied);
        let content = fs::read_to_string(&file).unwrap();
        assert_eq!(content, "# Todo\n- [ ] Other\n- [x] Target ^tgt00001\n");
    }

    #[test]
    fn rewrite_reports_missing_lines() {
        let (_dir, vault) = vault();
        let file = vault.join("todo.md");
        fs::write(&file, "# Todo\n").unwrap();
        let mut walker = MarkdownWalker;
        let outcome = walker
            .rewrite_task_line(&file, 5, "- [ ] x", Some("gone1234"))
            .unwrap();
        assert_eq!(outcome, LineOutcome::NotFound);
    }

    #[test]
    fn delete_removes_the_line() {
        let (_dir, vault) = vault();
        let file = vault.join("todo.md");
        fs::write(&file, "- [ ] Keep\n- [ ] Drop ^drop0001\n").unwrap();
        let mut walker = MarkdownWalker;
        let outcome = walker.delete_task_line(&file, 2, Some("drop0001")).unwrap();
        assert_eq!(outcome, LineOutcome::Applied);
        assert_eq!(fs::read_to_string(&file).unwrap(), "- [ ] Keep\n");
    }

    #[test]
    fn append_mints_a_block_token_when_missing() {
        let (_dir, vault) = vault();
        let file = vault.join("Inbox.md");
        let mut walker = MarkdownWalker;
        let (line, block_id) = walker.append_task(&file, "- [ ] Untokened", None).unwrap();
        let token = block_id.expect("token minted on append");

        let content = fs::read_to_string(&file).unwrap();
        assert!(content.contains(&format!("- [ ] Untokened ^{token}")), "got {content}");

        // The recorded identity matches what a scan derives from the token.
        let tasks = walker.list_tasks(&vault, true).unwrap();
        let found = tasks.iter().find(|t| t.line_number == line).unwrap();
        assert_eq!(found.uuid.as_ref(), format!("doc-{token}"));
    }

    #[test]
    fn append_creates_file_and_heading() {
        let (_dir, vault) = vault();
        let file = vault.join("Inbox.md");
        let mut walker = MarkdownWalker;
        let (line, block_id) = walker
            .append_task(&file, "- [ ] Imported ^imp00001", Some("From Reminders"))
            .unwrap();
        assert_eq!(block_id.as_deref(), Some("imp00001"));
        let content = fs::read_to_string(&file).unwrap();
        assert_eq!(content, "# Inbox\n\n## From Reminders\n- [ ] Imported ^imp00001\n");
        assert_eq!(line, 4);

        // Appending under the same heading lands inside the section.
        walker
            .append_task(&file, "- [ ] Second ^imp00002", Some("From Reminders"))
            .unwrap();
        let content = fs::read_to_string(&file).unwrap();
        assert_eq!(
            content,
            "# Inbox\n\n## From Reminders\n- [ ] Imported ^imp00001\n- [ ] Second ^imp00002\n"
        );
    }
}
