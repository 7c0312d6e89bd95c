//src/derep.rs

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ahash::AHashMap;

use crate::error::{PipelineError, Result};
use crate::fastq::{open_reader, RecordReader};
use crate::types::{sample_label, SeqRecord};

/// One retained group of identical reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representative {
    /// `derep<rank>`, rank 1 being the most abundant.
    pub id: String,
    pub sequence: String,
    pub total: u64,
    pub sample_counts: BTreeMap<String, u64>,
    /// Original read ids, in input order.
    pub members: Vec<String>,
}

/// Representatives ordered by descending total count, ties in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DereplicationMap {
    representatives: Vec<Representative>,
    index: AHashMap<String, usize>,
}

impl DereplicationMap {
    pub fn representatives(&self) -> &[Representative] {
        &self.representatives
    }

    pub fn get(&self, rep_id: &str) -> Option<&Representative> {
        self.index.get(rep_id).map(|&i| &self.representatives[i])
    }

    pub fn len(&self) -> usize {
        self.representatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.representatives.is_empty()
    }

    /// Every sample with at least one retained read.
    pub fn samples(&self) -> Vec<String> {
        let mut samples: Vec<String> = self
            .representatives
            .iter()
            .flat_map(|r| r.sample_counts.keys().cloned())
            .collect();
        samples.sort();
        samples.dedup();
        samples
    }

    /// The reads this map was built from (retained ones only), in map order.
    pub fn expand_reads(&self) -> Vec<SeqRecord> {
        self.representatives
            .iter()
            .flat_map(|r| {
                r.members
                    .iter()
                    .map(move |id| SeqRecord::new(id.clone(), r.sequence.clone(), None))
            })
            .collect()
    }

    /// Representatives as FASTA with usearch-style size annotations.
    pub fn write_fasta<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut out = BufWriter::new(File::create(path).map_err(|e| PipelineError::io(path, e))?);
        for r in &self.representatives {
            writeln!(out, ">{};size={};\n{}", r.id, r.total, r.sequence)
                .map_err(|e| PipelineError::io(path, e))?;
        }
        out.flush().map_err(|e| PipelineError::io(path, e))
    }

    /// `rep_id<TAB>total<TAB>S1:n,S2:m<TAB>read,read,...` per representative.
    pub fn write_map<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut out = BufWriter::new(File::create(path).map_err(|e| PipelineError::io(path, e))?);
        for r in &self.representatives {
            let samples: Vec<String> = r
                .sample_counts
                .iter()
                .map(|(s, n)| format!("{s}:{n}"))
                .collect();
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                r.id,
                r.total,
                samples.join(","),
                r.members.join(",")
            )
            .map_err(|e| PipelineError::io(path, e))?;
        }
        out.flush().map_err(|e| PipelineError::io(path, e))
    }
}

/// Result of one dereplication pass.
#[derive(Debug, Clone)]
pub struct Dereplication {
    pub map: DereplicationMap,
    pub reads_in: u64,
    pub unique_sequences: usize,
    /// Reads belonging to groups below the minimum count.
    pub reads_discarded: u64,
}

struct Group {
    sequence: String,
    total: u64,
    sample_counts: BTreeMap<String, u64>,
    members: Vec<String>,
}

/// Groups reads by exact sequence, ranks groups by total count (ties keep
/// first-seen order), and keeps groups with `total >= min_count`.
pub fn dereplicate<I>(reads: I, separator: char, min_count: u64) -> Dereplication
where
    I: IntoIterator<Item = SeqRecord>,
{
    // 1) group in first-seen order
    let mut groups: Vec<Group> = Vec::new();
    let mut by_seq: AHashMap<String, usize> = AHashMap::new();
    let mut reads_in = 0u64;

    for read in reads {
        reads_in += 1;
        let sample = sample_label(&read.id, separator).to_string();
        let gi = match by_seq.get(&read.seq) {
            Some(&gi) => gi,
            None => {
                by_seq.insert(read.seq.clone(), groups.len());
                groups.push(Group {
                    sequence: read.seq,
                    total: 0,
                    sample_counts: BTreeMap::new(),
                    members: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let g = &mut groups[gi];
        g.total += 1;
        *g.sample_counts.entry(sample).or_insert(0) += 1;
        g.members.push(read.id);
    }
    let unique_sequences = groups.len();

    // 2) stable sort keeps first-seen order among equal totals
    groups.sort_by(|a, b| b.total.cmp(&a.total));

    // 3) cutoff and naming
    let mut map = DereplicationMap::default();
    let mut reads_discarded = 0u64;
    for g in groups {
        if g.total < min_count {
            reads_discarded += g.total;
            continue;
        }
        let id = format!("derep{}", map.representatives.len() + 1);
        map.index.insert(id.clone(), map.representatives.len());
        map.representatives.push(Representative {
            id,
            sequence: g.sequence,
            total: g.total,
            sample_counts: g.sample_counts,
            members: g.members,
        });
    }

    log::info!(
        "Dereplicated {} reads into {} unique sequences; kept {} with count >= {} ({} reads discarded)",
        reads_in,
        unique_sequences,
        map.len(),
        min_count,
        reads_discarded
    );

    Dereplication {
        map,
        reads_in,
        unique_sequences,
        reads_discarded,
    }
}

/// Dereplicates a merged FASTA file.
pub fn dereplicate_file<P: AsRef<Path>>(
    path: P,
    separator: char,
    min_count: u64,
) -> Result<Dereplication> {
    let path = path.as_ref();
    let reader = open_reader(path).map_err(|e| PipelineError::io(path, e))?;
    let reads: Vec<SeqRecord> = RecordReader::new(reader)
        .collect::<std::io::Result<_>>()
        .map_err(|e| PipelineError::io(path, e))?;
    Ok(dereplicate(reads, separator, min_count))
}

/// Strips usearch-style `;size=N;` annotations from a sequence label.
pub fn strip_size_annotation(label: &str) -> &str {
    label.split(';').next().unwrap_or(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reads(spec: &[(&str, &str, usize)]) -> Vec<SeqRecord> {
        let mut out = Vec::new();
        let mut n = 0;
        for (sample, seq, count) in spec {
            for _ in 0..*count {
                out.push(SeqRecord::new(format!("{sample}_{n}"), *seq, None));
                n += 1;
            }
        }
        out
    }

    #[test]
    fn threshold_is_inclusive() {
        // 7 + 3 reads of one sequence over two samples, 9 of another
        let input = reads(&[("S1", "AAAA", 7), ("S2", "AAAA", 3), ("S1", "CCCC", 9)]);
        let d = dereplicate(input, '_', 10);

        assert_eq!(d.map.len(), 1);
        let rep = &d.map.representatives()[0];
        assert_eq!(rep.sequence, "AAAA");
        assert_eq!(rep.total, 10);
        assert_eq!(rep.sample_counts.get("S1"), Some(&7));
        assert_eq!(rep.sample_counts.get("S2"), Some(&3));
        assert_eq!(d.reads_discarded, 9);
        assert_eq!(d.unique_sequences, 2);
    }

    #[test]
    fn totals_equal_sum_of_sample_counts() {
        let input = reads(&[
            ("A", "ACGT", 3),
            ("B", "ACGT", 2),
            ("B", "TTTT", 4),
            ("C", "GGGG", 1),
            ("A", "TTTT", 1),
        ]);
        let d = dereplicate(input, '_', 1);
        for rep in d.map.representatives() {
            assert_eq!(rep.total, rep.sample_counts.values().sum::<u64>());
            assert_eq!(rep.total as usize, rep.members.len());
        }
        assert_eq!(d.reads_discarded, 0);
    }

    #[test]
    fn ordering_is_by_count_then_first_seen() {
        let input = reads(&[("S", "GGGG", 2), ("S", "CCCC", 5), ("S", "AAAA", 2)]);
        let d = dereplicate(input, '_', 1);
        let order: Vec<_> = d.map.representatives().iter().map(|r| r.sequence.as_str()).collect();
        assert_eq!(order, vec!["CCCC", "GGGG", "AAAA"]);
        assert_eq!(d.map.representatives()[0].id, "derep1");
        assert_eq!(d.map.get("derep3").unwrap().sequence, "AAAA");
    }

    #[test]
    fn dereplication_is_idempotent() {
        let input = reads(&[
            ("S1", "ACGT", 12),
            ("S2", "ACGT", 3),
            ("S2", "TTTT", 10),
            ("S3", "GGGG", 4),
        ]);
        let first = dereplicate(input, '_', 10);
        let second = dereplicate(first.map.expand_reads(), '_', 10);
        assert_eq!(first.map, second.map);
        assert_eq!(second.reads_discarded, 0);
    }

    #[test]
    fn sample_labels_may_contain_separator() {
        let input = vec![
            SeqRecord::new("gut_A_0", "AC", None),
            SeqRecord::new("gut_A_1", "AC", None),
        ];
        let d = dereplicate(input, '_', 1);
        assert_eq!(d.map.samples(), vec!["gut_A".to_string()]);
    }

    #[test]
    fn writes_sized_fasta_and_map() {
        let dir = tempfile::tempdir().unwrap();
        let d = dereplicate(reads(&[("S1", "ACGT", 2), ("S2", "ACGT", 1)]), '_', 1);
        let fa = dir.path().join("derep.fasta");
        let map = dir.path().join("derep.map");
        d.map.write_fasta(&fa).unwrap();
        d.map.write_map(&map).unwrap();
        assert_eq!(std::fs::read_to_string(fa).unwrap(), ">derep1;size=3;\nACGT\n");
        assert_eq!(
            std::fs::read_to_string(map).unwrap(),
            "derep1\t3\tS1:2,S2:1\tS1_0,S1_1,S2_2\n"
        );
    }

    #[test]
    fn size_annotation_is_stripped() {
        assert_eq!(strip_size_annotation("derep4;size=12;"), "derep4");
        assert_eq!(strip_size_annotation("derep4"), "derep4");
    }
}
