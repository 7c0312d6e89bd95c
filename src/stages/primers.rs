use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::ChunkStage;
use crate::config::PrimerStrictness;
use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::types::{Chunk, SeqRecord};

const IUPAC_CODES: &[u8] = b"ACGTURYSWKMBDHVN";

/// True if read base `b` is allowed by (possibly degenerate) primer base `p`.
#[inline]
fn iupac_matches(p: u8, b: u8) -> bool {
    let b = b.to_ascii_uppercase();
    match p.to_ascii_uppercase() {
        b'A' => b == b'A',
        b'C' => b == b'C',
        b'G' => b == b'G',
        b'T' | b'U' => b == b'T' || b == b'U',
        b'R' => matches!(b, b'A' | b'G'),
        b'Y' => matches!(b, b'C' | b'T'),
        b'S' => matches!(b, b'G' | b'C'),
        b'W' => matches!(b, b'A' | b'T'),
        b'K' => matches!(b, b'G' | b'T'),
        b'M' => matches!(b, b'A' | b'C'),
        b'B' => matches!(b, b'C' | b'G' | b'T'),
        b'D' => matches!(b, b'A' | b'G' | b'T'),
        b'H' => matches!(b, b'A' | b'C' | b'T'),
        b'V' => matches!(b, b'A' | b'C' | b'G'),
        b'N' => true,
        _ => false,
    }
}

/// Removes a primer from the start of each read.
pub struct PrimerTrimmer {
    pub primers: Vec<String>,
    pub max_mismatches: usize,
    pub strictness: PrimerStrictness,
}

impl PrimerTrimmer {
    /// Reads primer sequences, one per line. `>` headers, `#` comments and
    /// blank lines are skipped; for `name<TAB>SEQ` lines the last field is used.
    pub fn load_primers<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let mut primers = Vec::new();
        for (n, line_result) in BufReader::new(file).lines().enumerate() {
            let line = line_result.map_err(|e| PipelineError::io(path, e))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('>') {
                continue;
            }
            let seq = line.rsplit('\t').next().unwrap_or(line).trim();
            if !seq.bytes().all(|b| IUPAC_CODES.contains(&b.to_ascii_uppercase())) {
                return Err(PipelineError::parse(path, n + 1, format!("'{seq}' is not a nucleotide primer")));
            }
            primers.push(seq.to_ascii_uppercase());
        }
        if primers.is_empty() {
            return Err(PipelineError::config(format!("primer file {} is empty", path.display())));
        }
        Ok(primers)
    }

    /// Length of the primer found at the start of `seq`, if any.
    pub fn find_primer(&self, seq: &str) -> Option<usize> {
        let seq = seq.as_bytes();
        self.primers.iter().find_map(|primer| {
            let p = primer.as_bytes();
            if seq.len() < p.len() {
                return None;
            }
            let mismatches = p
                .iter()
                .zip(seq)
                .filter(|(pb, sb)| !iupac_matches(**pb, **sb))
                .count();
            (mismatches <= self.max_mismatches).then_some(p.len())
        })
    }
}

impl ChunkStage for PrimerTrimmer {
    fn name(&self) -> &str {
        "remove primers"
    }

    fn tag(&self) -> &str {
        "pt"
    }

    fn apply(
        &self,
        _ctx: &PipelineContext,
        _chunk: &Chunk,
        reads: Vec<SeqRecord>,
    ) -> Result<Vec<SeqRecord>> {
        Ok(reads
            .into_iter()
            .filter_map(|mut read| match self.find_primer(&read.seq) {
                Some(len) => {
                    read.strip_prefix(len);
                    Some(read)
                }
                None => match self.strictness {
                    PrimerStrictness::Drop => None,
                    PrimerStrictness::PassThrough => Some(read),
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordFormat;

    fn trimmer(mismatches: usize, strictness: PrimerStrictness) -> PrimerTrimmer {
        PrimerTrimmer {
            primers: vec!["GTGYCAGCMGCCGCGGTAA".to_string()],
            max_mismatches: mismatches,
            strictness,
        }
    }

    #[test]
    fn degenerate_primer_is_removed() {
        let t = trimmer(0, PrimerStrictness::Drop);
        assert_eq!(t.find_primer("GTGCCAGCAGCCGCGGTAATACG"), Some(19));
        assert_eq!(t.find_primer("GTGTCAGCCGCCGCGGTAATACG"), Some(19));
        assert_eq!(t.find_primer("GTGACAGCAGCCGCGGTAATACG"), None);
    }

    #[test]
    fn near_match_within_mismatch_budget() {
        let t = trimmer(1, PrimerStrictness::Drop);
        assert_eq!(t.find_primer("GTGACAGCAGCCGCGGTAATACG"), Some(19));
        assert_eq!(t.find_primer("CCGACAGCAGCCGCGGTAATACG"), None);
    }

    #[test]
    fn strictness_decides_unmatched_reads() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(dir.path(), "d", 97).unwrap();
        let chunk = Chunk::new(0, "x", RecordFormat::Fasta);
        let reads = || {
            vec![
                SeqRecord::new("S1_0", "GTGCCAGCAGCCGCGGTAATACG", None),
                SeqRecord::new("S1_1", "TTTTTTTTTTTTTTTTTTTTTTT", None),
            ]
        };
        let dropped = trimmer(0, PrimerStrictness::Drop).apply(&ctx, &chunk, reads()).unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].seq, "TACG");

        let kept = trimmer(0, PrimerStrictness::PassThrough).apply(&ctx, &chunk, reads()).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].seq.len(), 23);
    }

    #[test]
    fn primer_file_skips_headers() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("primers.txt");
        std::fs::write(&p, ">515F\nGTGYCAGCMGCCGCGGTAA\n# reverse\nrev\tggactachvgggtwtctaat\n").unwrap();
        let primers = PrimerTrimmer::load_primers(&p).unwrap();
        assert_eq!(primers, vec!["GTGYCAGCMGCCGCGGTAA", "GGACTACHVGGGTWTCTAAT"]);
    }
}
