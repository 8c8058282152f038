use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::assign::min_cost_assignment;
use crate::cfg::Config;
use crate::error::Error;
use crate::model::{DocTask, RemTask, SyncLink};
use crate::text;

const TITLE_WEIGHT: f64 = 0.70;
const DATE_WEIGHT: f64 = 0.25;
const PRIORITY_BONUS: f64 = 0.05;

/// Above this many candidate pairs the exact solver gives way to the greedy
/// fallback.
const EXACT_PAIR_LIMIT: usize = 10_000;

/// Cost matrix entry for pairs below the score threshold.
const REJECT_COST: f64 = 1000.0;

pub struct Matcher {
    min_score: f64,
    days_tolerance: i64,
}

impl Matcher {
    pub fn new(cfg: &Config) -> Matcher {
        Matcher {
            min_score: cfg.min_score,
            days_tolerance: cfg.days_tolerance,
        }
    }

    /// Weighted similarity in `[0, 1]`: title 0.70, due date 0.25, equal
    /// priorities add 0.05.
    pub fn similarity(&self, doc: &DocTask, rem: &RemTask) -> f64 {
        let doc_tokens: HashSet<String> = text::tokenize(&doc.description).into_iter().collect();
        let rem_tokens: HashSet<String> = text::tokenize(&rem.title).into_iter().collect();

        // Tasks that normalize to nothing (a bare "#", an unparseable URL)
        // are matched on their raw text instead.
        if doc_tokens.is_empty() && rem_tokens.is_empty() {
            if doc.description.trim().to_lowercase() == rem.title.trim().to_lowercase() {
                return 1.0;
            }
            return 0.0;
        }

        let title_score = text::dice(&doc_tokens, &rem_tokens);

        let date_score = match (doc.due_date, rem.due_date) {
            (Some(d), Some(r)) if d == r => 1.0,
            (Some(d), Some(r)) if (d - r).num_days().abs() <= self.days_tolerance => 0.5,
            (Some(_), Some(_)) => 0.0,
            (None, None) => 0.5,
            _ => 0.0,
        };

        let priority_bonus = match (doc.priority, rem.priority) {
            (Some(d), Some(r)) if d == r => PRIORITY_BONUS,
            _ => 0.0,
        };

        (TITLE_WEIGHT * title_score + DATE_WEIGHT * date_score + priority_bonus).min(1.0)
    }

    /// Pair the given unpaired records one-to-one, maximizing total
    /// similarity. Exact assignment up to [`EXACT_PAIR_LIMIT`] candidate
    /// pairs, greedy beyond. Only pairs at or above `min_score` become
    /// links.
    pub fn find_matches(
        &self,
        docs: &[&DocTask],
        rems: &[&RemTask],
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncLink>, Error> {
        if docs.is_empty() || rems.is_empty() {
            return Ok(Vec::new());
        }

        // Fixed comparison order so equal-cost solutions come out the same
        // every run.
        let mut docs: Vec<&DocTask> = docs.to_vec();
        docs.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        let mut rems: Vec<&RemTask> = rems.to_vec();
        rems.sort_by(|a, b| a.uuid.cmp(&b.uuid));

        let mut links = if docs.len() * rems.len() <= EXACT_PAIR_LIMIT {
            self.match_exact(&docs, &rems, now)?
        } else {
            log::info!(
                "candidate matrix {}x{} exceeds exact solver limit, matching greedily",
                docs.len(),
                rems.len()
            );
            self.match_greedy(&docs, &rems, now)
        };
        links.sort_by(|a, b| (a.doc_uuid.clone(), a.rem_uuid.clone()).cmp(&(b.doc_uuid.clone(), b.rem_uuid.clone())));
        Ok(links)
    }

    fn match_exact(
        &self,
        docs: &[&DocTask],
        rems: &[&RemTask],
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncLink>, Error> {
        let scores: Vec<Vec<f64>> = docs
            .iter()
            .map(|d| rems.iter().map(|r| self.similarity(d, r)).collect())
            .collect();
        let cost: Vec<Vec<f64>> = scores
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&s| if s >= self.min_score { -s } else { REJECT_COST })
                    .collect()
            })
            .collect();

        let assignment = min_cost_assignment(&cost)?;

        let mut links = Vec::new();
        for (i, j) in assignment.into_iter().enumerate() {
            let Some(j) = j else { continue };
            let score = scores[i][j];
            if score >= self.min_score {
                links.push(SyncLink::new(docs[i], rems[j], score, now));
            }
        }
        log::info!("exact matching found {} links", links.len());
        Ok(links)
    }

    fn match_greedy(&self, docs: &[&DocTask], rems: &[&RemTask], now: DateTime<Utc>) -> Vec<SyncLink> {
        let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
        for (i, doc) in docs.iter().enumerate() {
            for (j, rem) in rems.iter().enumerate() {
                let score = self.similarity(doc, rem);
                if score >= self.min_score {
                    candidates.push((i, j, score));
                }
            }
        }
        // Best score first; index order (= uuid order) breaks ties.
        candidates.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (a.0, a.1).cmp(&(b.0, b.1)))
        });

        let mut used_docs = vec![false; docs.len()];
        let mut used_rems = vec![false; rems.len()];
        let mut links = Vec::new();
        for (i, j, score) in candidates {
            if used_docs[i] || used_rems[j] {
                continue;
            }
            used_docs[i] = true;
            used_rems[j] = true;
            links.push(SyncLink::new(docs[i], rems[j], score, now));
        }
        log::info!("greedy matching found {} links", links.len());
        links
    }
}
