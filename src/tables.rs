//src/tables.rs

use std::collections::BTreeSet;
use std::fmt::Write as FmtWrite;
use std::path::Path;

use ahash::AHashMap;

use crate::clusters::ClusterMembership;
use crate::derep::DereplicationMap;
use crate::error::{PipelineError, Result};
use crate::reference::ConsensusAssignment;

/// Row label of features without any assignment.
pub const UNASSIGNED: &str = "Unassigned";

/// Sparse sample x feature matrix of counts or fractions.
///
/// Features keep insertion order; samples are kept sorted. A sample can be
/// registered without values, in which case its column is all zeros.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbundanceTable {
    samples: BTreeSet<String>,
    features: Vec<String>,
    feature_index: AHashMap<String, usize>,
    rows: Vec<AHashMap<String, f64>>,
}

impl AbundanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples<I, S>(samples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            samples: samples.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn add_sample(&mut self, sample: &str) {
        if !self.samples.contains(sample) {
            self.samples.insert(sample.to_string());
        }
    }

    fn row_mut(&mut self, feature: &str) -> &mut AHashMap<String, f64> {
        let i = match self.feature_index.get(feature) {
            Some(&i) => i,
            None => {
                self.feature_index.insert(feature.to_string(), self.features.len());
                self.features.push(feature.to_string());
                self.rows.push(AHashMap::new());
                self.features.len() - 1
            }
        };
        &mut self.rows[i]
    }

    /// Adds `value` to the `(feature, sample)` cell, creating either as needed.
    pub fn add(&mut self, feature: &str, sample: &str, value: f64) {
        self.add_sample(sample);
        *self.row_mut(feature).entry(sample.to_string()).or_insert(0.0) += value;
    }

    pub fn value(&self, feature: &str, sample: &str) -> f64 {
        self.feature_index
            .get(feature)
            .and_then(|&i| self.rows[i].get(sample))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn samples(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(String::as_str)
    }

    pub fn contains_feature(&self, feature: &str) -> bool {
        self.feature_index.contains_key(feature)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn column_sum(&self, sample: &str) -> f64 {
        self.rows.iter().filter_map(|r| r.get(sample)).sum()
    }

    /// `(sample, column sum)` for every sample, in sample order.
    pub fn sample_totals(&self) -> Vec<(String, f64)> {
        self.samples
            .iter()
            .map(|s| (s.clone(), self.column_sum(s)))
            .collect()
    }

    /// Each column divided by its sum. Columns summing to zero stay zero.
    pub fn relative_abundance(&self) -> Self {
        let totals: AHashMap<&str, f64> = self
            .samples
            .iter()
            .map(|s| (s.as_str(), self.column_sum(s)))
            .collect();
        let mut out = self.clone();
        for row in out.rows.iter_mut() {
            for (sample, v) in row.iter_mut() {
                let total = totals.get(sample.as_str()).copied().unwrap_or(0.0);
                *v = if total > 0.0 { *v / total } else { 0.0 };
            }
        }
        out
    }

    /// Sums rows that map to the same key, keeping first-seen key order.
    pub fn collapse<F>(&self, key: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        let mut out = Self {
            samples: self.samples.clone(),
            ..Default::default()
        };
        for (feature, row) in self.features.iter().zip(&self.rows) {
            let k = key(feature);
            let target = out.row_mut(&k);
            for (sample, v) in row {
                *target.entry(sample.clone()).or_insert(0.0) += v;
            }
            // keep the row even when it carries no counts
        }
        out
    }

    /// Open-reference table: closed-reference rows followed by de-novo rows.
    ///
    /// Every sample of either table becomes a column. A de-novo feature id
    /// that already names a closed-reference row is renamed `denovo_<id>`;
    /// the renames are returned as `(old, new)` pairs.
    pub fn merge_open_reference(closed: &Self, denovo: &Self) -> (Self, Vec<(String, String)>) {
        let mut out = closed.clone();
        for s in denovo.samples() {
            out.add_sample(s);
        }
        let mut renamed = Vec::new();
        for (feature, row) in denovo.features.iter().zip(&denovo.rows) {
            let mut id = feature.clone();
            while out.contains_feature(&id) {
                id = format!("denovo_{id}");
            }
            if &id != feature {
                renamed.push((feature.clone(), id.clone()));
            }
            let target = out.row_mut(&id);
            for (sample, v) in row {
                target.insert(sample.clone(), *v);
            }
        }
        (out, renamed)
    }

    /// Classic dense layout: `#OTU ID<TAB>S1<TAB>S2...`, then one row per feature.
    pub fn to_classic(&self) -> String {
        let mut out = String::from("#OTU ID");
        for s in &self.samples {
            out.push('\t');
            out.push_str(s);
        }
        out.push('\n');
        for (feature, row) in self.features.iter().zip(&self.rows) {
            out.push_str(feature);
            for s in &self.samples {
                write!(out, "\t{}", row.get(s).copied().unwrap_or(0.0)).unwrap();
            }
            out.push('\n');
        }
        out
    }

    pub fn write_classic<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_classic()).map_err(|e| PipelineError::io(path, e))?;
        log::info!(
            "Wrote {} features x {} samples to {}",
            self.features.len(),
            self.samples.len(),
            path.display()
        );
        Ok(())
    }
}

/// Oligotype table: one row per clustered representative, named
/// `<otu>.<k>` where `k` ranks the representative within its cluster by
/// abundance. Representatives outside `clusters` are left out.
pub fn oligotype_table(map: &DereplicationMap, clusters: &ClusterMembership) -> AbundanceTable {
    let mut table = AbundanceTable::with_samples(map.samples());
    let mut next_variant: AHashMap<&str, usize> = AHashMap::new();
    for rep in map.representatives() {
        let Some(otu) = clusters.otu_of(&rep.id) else {
            continue;
        };
        let k = next_variant.entry(otu).or_insert(0);
        *k += 1;
        let feature = format!("{otu}.{k}");
        for (sample, count) in &rep.sample_counts {
            table.add(&feature, sample, *count as f64);
        }
    }
    table
}

/// OTU table: oligotype rows summed onto their cluster id.
pub fn otu_table(oligotypes: &AbundanceTable) -> AbundanceTable {
    oligotypes.collapse(|f| match f.rsplit_once('.') {
        Some((otu, _)) => otu.to_string(),
        None => f.to_string(),
    })
}

/// Closed-reference table at one consensus level: assigned representatives
/// summed per reference label. Unassigned representatives are left out.
pub fn closed_reference_table(
    map: &DereplicationMap,
    assignment: &ConsensusAssignment,
) -> AbundanceTable {
    let mut table = AbundanceTable::with_samples(map.samples());
    for rep in map.representatives() {
        if let Some(label) = assignment.label(&rep.id) {
            for (sample, count) in &rep.sample_counts {
                table.add(label, sample, *count as f64);
            }
        }
    }
    table
}

/// Relabels OTU rows with their lineage, summing rows sharing one.
pub fn relabel_by_lineage(otus: &AbundanceTable, lineages: &AHashMap<String, String>) -> AbundanceTable {
    otus.collapse(|otu| {
        lineages
            .get(otu)
            .cloned()
            .unwrap_or_else(|| UNASSIGNED.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derep::dereplicate;
    use crate::reference::{ConsensusRule, MultiHitAlignments};
    use crate::types::SeqRecord;

    fn table(cells: &[(&str, &str, f64)]) -> AbundanceTable {
        let mut t = AbundanceTable::new();
        for (f, s, v) in cells {
            t.add(f, s, *v);
        }
        t
    }

    #[test]
    fn open_reference_merge_zero_fills() {
        let closed = table(&[("OTU_1", "S1", 4.0), ("OTU_2", "S1", 1.0)]);
        let denovo = table(&[("OTU_3", "S2", 6.0)]);
        let (merged, renamed) = AbundanceTable::merge_open_reference(&closed, &denovo);

        assert!(renamed.is_empty());
        assert_eq!(merged.features(), &["OTU_1", "OTU_2", "OTU_3"]);
        assert_eq!(merged.samples().collect::<Vec<_>>(), vec!["S1", "S2"]);
        assert_eq!(merged.value("OTU_1", "S2"), 0.0);
        assert_eq!(merged.value("OTU_3", "S1"), 0.0);
        assert_eq!(merged.value("OTU_3", "S2"), 6.0);
    }

    #[test]
    fn colliding_denovo_ids_are_renamed() {
        let closed = table(&[("OTU_1", "S1", 4.0), ("denovo_OTU_1", "S1", 1.0)]);
        let denovo = table(&[("OTU_1", "S1", 2.0)]);
        let (merged, renamed) = AbundanceTable::merge_open_reference(&closed, &denovo);
        assert_eq!(merged.len(), 3);
        assert_eq!(
            renamed,
            vec![("OTU_1".to_string(), "denovo_denovo_OTU_1".to_string())]
        );
        assert_eq!(merged.value("OTU_1", "S1"), 4.0);
        assert_eq!(merged.value("denovo_denovo_OTU_1", "S1"), 2.0);
    }

    #[test]
    fn relative_columns_sum_to_one_or_zero() {
        let mut t = table(&[("a", "S1", 3.0), ("b", "S1", 1.0), ("a", "S2", 5.0)]);
        t.add_sample("S3");
        let rel = t.relative_abundance();
        assert!((rel.column_sum("S1") - 1.0).abs() < 1e-6);
        assert!((rel.column_sum("S2") - 1.0).abs() < 1e-6);
        assert_eq!(rel.column_sum("S3"), 0.0);
        assert_eq!(rel.value("b", "S1"), 0.25);
        assert!(rel.to_classic().lines().all(|l| !l.contains("NaN")));
    }

    fn reads(spec: &[(&str, &str, usize)]) -> Vec<SeqRecord> {
        let mut out = Vec::new();
        for (sample, seq, count) in spec {
            for _ in 0..*count {
                out.push(SeqRecord::new(format!("{sample}_{}", out.len()), *seq, None));
            }
        }
        out
    }

    fn clusters(rows: &str) -> ClusterMembership {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.uc");
        std::fs::write(&path, rows).unwrap();
        ClusterMembership::parse_uc(&path).unwrap()
    }

    #[test]
    fn oligotypes_collapse_to_otus() {
        let d = dereplicate(
            reads(&[("S1", "AAAA", 5), ("S2", "AAAA", 2), ("S1", "AAAT", 3), ("S2", "CCCC", 4)]),
            '_',
            1,
        );
        // derep1 = AAAA (7), derep2 = CCCC (4), derep3 = AAAT (3)
        let c = clusters(
            "S\t0\t4\t*\t*\t*\t*\t*\tderep1;size=7;\t*\n\
             S\t1\t4\t*\t*\t*\t*\t*\tderep2;size=4;\t*\n\
             H\t0\t4\t75.0\t+\t0\t0\t4M\tderep3;size=3;\tderep1;size=7;\n",
        );
        let oligo = oligotype_table(&d.map, &c);
        assert_eq!(oligo.features(), &["OTU_1.1", "OTU_2.1", "OTU_1.2"]);
        assert_eq!(oligo.value("OTU_1.2", "S1"), 3.0);

        let otus = otu_table(&oligo);
        assert_eq!(otus.features(), &["OTU_1", "OTU_2"]);
        assert_eq!(otus.value("OTU_1", "S1"), 8.0);
        assert_eq!(otus.value("OTU_1", "S2"), 2.0);
        assert_eq!(otus.value("OTU_2", "S2"), 4.0);
        // collapsing preserves every sample total
        for (s, total) in oligo.sample_totals() {
            assert_eq!(otus.column_sum(&s), total);
        }
    }

    #[test]
    fn closed_reference_sums_representatives_sharing_a_label() {
        let d = dereplicate(
            reads(&[("S1", "AAAA", 5), ("S1", "CCCC", 3), ("S2", "GGGG", 2), ("S2", "TTTT", 1)]),
            '_',
            1,
        );
        let a = MultiHitAlignments::from_hits(vec![
            ("derep1", vec!["ref1".to_string()]),
            ("derep2", vec!["ref1".to_string()]),
            ("derep3", vec!["ref2".to_string(), "ref3".to_string()]),
            ("derep4", vec![]),
        ], 10);
        let rule = ConsensusRule {
            level: 1,
            require_full_depth: true,
        };
        let t = closed_reference_table(&d.map, &ConsensusAssignment::compute(&a, rule));
        assert_eq!(t.features(), &["ref1", "ref2"]);
        assert_eq!(t.value("ref1", "S1"), 8.0);
        assert_eq!(t.value("ref2", "S2"), 2.0);
        assert_eq!(t.samples().count(), 2);
    }

    #[test]
    fn lineage_relabel_merges_rows_and_marks_unassigned() {
        let otus = table(&[("OTU_1", "S1", 2.0), ("OTU_2", "S1", 3.0), ("OTU_3", "S1", 1.0)]);
        let mut lineages = AHashMap::new();
        lineages.insert("OTU_1".to_string(), "Bacteria;Firmicutes".to_string());
        lineages.insert("OTU_2".to_string(), "Bacteria;Firmicutes".to_string());
        let t = relabel_by_lineage(&otus, &lineages);
        assert_eq!(t.features(), &["Bacteria;Firmicutes", UNASSIGNED]);
        assert_eq!(t.value("Bacteria;Firmicutes", "S1"), 5.0);
        assert_eq!(t.value(UNASSIGNED, "S1"), 1.0);
    }

    #[test]
    fn classic_format_is_dense() {
        let t = table(&[("OTU_1", "S1", 3.0), ("OTU_2", "S2", 1.0)]);
        assert_eq!(t.to_classic(), "#OTU ID\tS1\tS2\nOTU_1\t3\t0\nOTU_2\t0\t1\n");
    }
}
