//src/reference.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;

use crate::derep::strip_size_annotation;
use crate::error::{ExternalToolError, PipelineError, Result};

/// Ranked reference hits per query, as reported by the aligner.
#[derive(Debug, Clone, Default)]
pub struct MultiHitAlignments {
    matched: Vec<(String, Vec<String>)>,
    index: AHashMap<String, usize>,
    unmatched: Vec<String>,
}

impl MultiHitAlignments {
    /// Builds alignments from already-ranked hit lists, keeping at most
    /// `max_hits` per query; an empty list marks the query as unmatched.
    pub fn from_hits<I, S>(hits: I, max_hits: usize) -> Self
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let mut out = Self::default();
        for (query, targets) in hits {
            let query = query.into();
            if targets.is_empty() {
                out.mark_unmatched(query);
            } else {
                for t in targets {
                    out.push_hit(&query, t, max_hits);
                }
            }
        }
        out
    }

    /// Parses usearch `-uc` output: `H` records are hits in rank order,
    /// `N` records are queries without any hit. At most `max_hits` hits
    /// are kept per query.
    ///
    /// Columns used: 0 = record type, 8 = query label, 9 = target label.
    pub fn parse_uc<P: AsRef<Path>>(
        path: P,
        max_hits: usize,
    ) -> std::result::Result<Self, ExternalToolError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|_| ExternalToolError::MissingOutput {
            path: path.to_path_buf(),
        })?;
        let reader = BufReader::new(file);

        let mut out = Self::default();
        for (n, line_result) in reader.lines().enumerate() {
            let line = line_result.map_err(|e| ExternalToolError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 10 {
                return Err(ExternalToolError::Unparseable {
                    path: path.to_path_buf(),
                    line: n + 1,
                    message: format!("expected 10 tab-separated fields, found {}", parts.len()),
                });
            }
            let query = strip_size_annotation(parts[8].trim());
            match parts[0] {
                "H" => {
                    let target = strip_size_annotation(parts[9].trim()).to_string();
                    out.push_hit(query, target, max_hits);
                }
                "N" => out.mark_unmatched(query.to_string()),
                "S" | "C" => {}
                other => {
                    return Err(ExternalToolError::Unparseable {
                        path: path.to_path_buf(),
                        line: n + 1,
                        message: format!("unknown record type '{other}'"),
                    })
                }
            }
        }
        // a query with at least one hit is matched, whatever else was reported
        let index = &out.index;
        out.unmatched.retain(|q| !index.contains_key(q));

        log::info!(
            "Parsed {} matched and {} unmatched queries from {}",
            out.matched.len(),
            out.unmatched.len(),
            path.display()
        );
        Ok(out)
    }

    fn push_hit(&mut self, query: &str, target: String, max_hits: usize) {
        match self.index.get(query) {
            Some(&i) => {
                let hits = &mut self.matched[i].1;
                if hits.len() < max_hits {
                    hits.push(target);
                }
            }
            None => {
                self.index.insert(query.to_string(), self.matched.len());
                self.matched.push((query.to_string(), vec![target]));
            }
        }
    }

    fn mark_unmatched(&mut self, query: String) {
        if !self.index.contains_key(&query) && !self.unmatched.contains(&query) {
            self.unmatched.push(query);
        }
    }

    pub fn hits(&self, query: &str) -> Option<&[String]> {
        self.index.get(query).map(|&i| self.matched[i].1.as_slice())
    }

    pub fn is_matched(&self, query: &str) -> bool {
        self.index.contains_key(query)
    }

    /// Queries with at least one hit, in first-reported order.
    pub fn matched(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.matched.iter().map(|(q, h)| (q.as_str(), h.as_slice()))
    }

    pub fn unmatched(&self) -> &[String] {
        &self.unmatched
    }

    /// Replaces reference ids by their taxonomy label; ids without an entry
    /// are kept as they are.
    pub fn relabel(&mut self, taxonomy: &ReferenceTaxonomy) {
        for (_, hits) in self.matched.iter_mut() {
            for h in hits.iter_mut() {
                if let Some(label) = taxonomy.label(h) {
                    *h = label.to_string();
                }
            }
        }
    }
}

/// Reference id to taxonomy label, from a `ref_id<TAB>label` file.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTaxonomy {
    labels: AHashMap<String, String>,
}

impl ReferenceTaxonomy {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let reader = BufReader::new(file);

        let mut labels = AHashMap::new();
        for line_result in reader.lines() {
            let line = line_result.map_err(|e| PipelineError::io(path, e))?;
            let parts: Vec<&str> = line.split('\t').collect();
            // Skip malformed lines
            if parts.len() < 2 || parts[0].trim().is_empty() {
                continue;
            }
            labels.insert(parts[0].trim().to_string(), parts[1].trim().to_string());
        }
        log::info!("Loaded {} reference taxonomy labels", labels.len());
        Ok(Self { labels })
    }

    pub fn label(&self, reference_id: &str) -> Option<&str> {
        self.labels.get(reference_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Agreement condition for one stringency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusRule {
    pub level: usize,
    /// A query with fewer than `level` hits is never assigned when set.
    pub require_full_depth: bool,
}

/// Collapses ranked hits into one label.
///
/// The top hit's label is assigned iff every one of the first `level` hits
/// carries it. Level 1 always assigns the top hit. When fewer than `level`
/// hits exist, the query is unassigned under `require_full_depth`, and
/// otherwise all available hits must agree.
pub fn collapse(hits: &[String], rule: ConsensusRule) -> Option<&str> {
    let top = hits.first()?;
    if rule.level <= 1 {
        return Some(top.as_str());
    }
    let depth = if hits.len() < rule.level {
        if rule.require_full_depth {
            return None;
        }
        hits.len()
    } else {
        rule.level
    };
    hits[..depth].iter().all(|h| h == top).then_some(top.as_str())
}

/// Per-query labels at one stringency level; absent queries are unassigned.
#[derive(Debug, Clone)]
pub struct ConsensusAssignment {
    pub rule: ConsensusRule,
    labels: AHashMap<String, String>,
}

impl ConsensusAssignment {
    pub fn compute(alignments: &MultiHitAlignments, rule: ConsensusRule) -> Self {
        let labels: AHashMap<String, String> = alignments
            .matched()
            .filter_map(|(q, hits)| collapse(hits, rule).map(|l| (q.to_string(), l.to_string())))
            .collect();
        log::info!(
            "Consensus level {}: {} of {} matched queries assigned",
            rule.level,
            labels.len(),
            alignments.matched.len()
        );
        Self { rule, labels }
    }

    pub fn label(&self, query: &str) -> Option<&str> {
        self.labels.get(query).map(String::as_str)
    }

    pub fn assigned(&self) -> usize {
        self.labels.len()
    }
}
