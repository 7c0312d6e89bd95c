use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;

use super::ChunkStage;
use crate::config::{BarcodeLocation, BarcodeMatching};
use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::types::{Chunk, SeqRecord};

/// Barcode -> sample lookup.
#[derive(Debug, Clone, Default)]
pub struct BarcodeMap {
    by_barcode: AHashMap<String, String>,
    /// (barcode, sample) in file order, for tolerant matching.
    entries: Vec<(String, String)>,
    /// Distinct barcode lengths, longest first.
    lengths: Vec<usize>,
}

impl BarcodeMap {
    pub fn from_pairs<I, S, T>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let mut map = BarcodeMap::default();
        for (barcode, sample) in pairs {
            let barcode = barcode.into().to_ascii_uppercase();
            let sample = sample.into();
            if barcode.is_empty() {
                return Err(PipelineError::config(format!("empty barcode for sample {sample}")));
            }
            if let Some(prev) = map.by_barcode.get(&barcode) {
                return Err(PipelineError::config(format!(
                    "barcode {barcode} is assigned to both {prev} and {sample}"
                )));
            }
            map.by_barcode.insert(barcode.clone(), sample.clone());
            if !map.lengths.contains(&barcode.len()) {
                map.lengths.push(barcode.len());
            }
            map.entries.push((barcode, sample));
        }
        map.lengths.sort_unstable_by(|a, b| b.cmp(a));
        Ok(map)
    }

    /// Parses a mapping file of `SampleID<TAB>BarcodeSequence[<TAB>...]` lines;
    /// `#` lines (including the header) are skipped.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let mut pairs = Vec::new();
        for (n, line_result) in BufReader::new(file).lines().enumerate() {
            let line = line_result.map_err(|e| PipelineError::io(path, e))?;
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 2 {
                return Err(PipelineError::parse(path, n + 1, "expected SampleID<TAB>Barcode"));
            }
            pairs.push((parts[1].trim().to_string(), parts[0].trim().to_string()));
        }
        if pairs.is_empty() {
            return Err(PipelineError::config(format!("barcode map {} is empty", path.display())));
        }
        Self::from_pairs(pairs)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the sample whose barcode prefixes `seq`; returns it with the
    /// barcode length to strip.
    pub fn match_prefix(&self, seq: &str, matching: BarcodeMatching) -> Option<(&str, usize)> {
        let seq = seq.as_bytes();
        for &len in &self.lengths {
            if seq.len() < len {
                continue;
            }
            let Ok(prefix) = std::str::from_utf8(&seq[..len]) else {
                continue;
            };
            if let Some(sample) = self.by_barcode.get(&prefix.to_ascii_uppercase()) {
                return Some((sample.as_str(), len));
            }
        }
        match matching {
            BarcodeMatching::Exact => None,
            BarcodeMatching::Tolerant { max_mismatches } => self
                .closest(max_mismatches, |bc| {
                    (seq.len() >= bc.len()).then(|| hamming(bc.as_bytes(), &seq[..bc.len()]))
                })
                .map(|(sample, bc)| (sample, bc.len())),
        }
    }

    /// Matches a whole barcode string (header mode).
    pub fn match_whole(&self, barcode: &str, matching: BarcodeMatching) -> Option<&str> {
        let barcode = barcode.to_ascii_uppercase();
        if let Some(sample) = self.by_barcode.get(&barcode) {
            return Some(sample.as_str());
        }
        match matching {
            BarcodeMatching::Exact => None,
            BarcodeMatching::Tolerant { max_mismatches } => self
                .closest(max_mismatches, |bc| {
                    (bc.len() == barcode.len()).then(|| hamming(bc.as_bytes(), barcode.as_bytes()))
                })
                .map(|(sample, _)| sample),
        }
    }

    /// Unique barcode at minimum distance <= `max_mismatches`; ties give `None`.
    fn closest<F>(&self, max_mismatches: usize, distance: F) -> Option<(&str, &str)>
    where
        F: Fn(&str) -> Option<usize>,
    {
        let mut best: Option<(usize, &str, &str)> = None;
        let mut tied = false;
        for (bc, sample) in &self.entries {
            let Some(d) = distance(bc) else { continue };
            if d > max_mismatches {
                continue;
            }
            match best {
                Some((bd, _, _)) if d > bd => {}
                Some((bd, _, _)) if d == bd => tied = true,
                _ => {
                    best = Some((d, sample.as_str(), bc.as_str()));
                    tied = false;
                }
            }
        }
        if tied {
            return None;
        }
        best.map(|(_, sample, bc)| (sample, bc))
    }
}

fn hamming(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .zip(b)
        .filter(|(x, y)| !x.eq_ignore_ascii_case(y))
        .count()
}

/// Barcode of a header like `M00123:1:... 1:N:0:ACGTAC`: its last `:` field.
fn header_barcode(header: &str) -> &str {
    let last_token = header.split_whitespace().last().unwrap_or(header);
    last_token.rsplit(':').next().unwrap_or(last_token)
}

/// Assigns reads to samples by barcode; unmatched reads are dropped.
pub struct Demultiplexer {
    pub barcodes: BarcodeMap,
    pub location: BarcodeLocation,
    pub matching: BarcodeMatching,
    pub separator: char,
}

impl ChunkStage for Demultiplexer {
    fn name(&self) -> &str {
        "split by barcodes"
    }

    fn tag(&self) -> &str {
        "sb"
    }

    fn apply(
        &self,
        _ctx: &PipelineContext,
        chunk: &Chunk,
        reads: Vec<SeqRecord>,
    ) -> Result<Vec<SeqRecord>> {
        let mut out = Vec::with_capacity(reads.len());
        let mut unmatched = 0usize;

        for mut read in reads {
            let sample = match self.location {
                BarcodeLocation::InSequence => {
                    match self.barcodes.match_prefix(&read.seq, self.matching) {
                        Some((sample, len)) => {
                            let sample = sample.to_string();
                            read.strip_prefix(len);
                            Some(sample)
                        }
                        None => None,
                    }
                }
                BarcodeLocation::InHeader => self
                    .barcodes
                    .match_whole(header_barcode(&read.header), self.matching)
                    .map(str::to_string),
            };

            match sample {
                Some(sample) => {
                    read.relabel(format!("{}{}{}", sample, self.separator, out.len()));
                    out.push(read);
                }
                None => unmatched += 1,
            }
        }

        log::debug!(
            "Chunk {}: {} reads assigned to samples, {} unmatched",
            chunk.index,
            out.len(),
            unmatched
        );
        Ok(out)
    }
}

/// Pre-demultiplexed mode: every read takes the chunk's declared sample label.
pub struct SampleRelabeler {
    pub separator: char,
}

impl ChunkStage for SampleRelabeler {
    fn name(&self) -> &str {
        "split by barcodes for multiple files (replacing read ids with sample ids)"
    }

    fn tag(&self) -> &str {
        "sb"
    }

    fn apply(
        &self,
        _ctx: &PipelineContext,
        chunk: &Chunk,
        reads: Vec<SeqRecord>,
    ) -> Result<Vec<SeqRecord>> {
        let sample = chunk.sample.as_deref().ok_or_else(|| {
            PipelineError::config(format!("chunk {} has no declared sample label", chunk.index))
        })?;
        Ok(reads
            .into_iter()
            .enumerate()
            .map(|(n, mut read)| {
                read.relabel(format!("{}{}{}", sample, self.separator, n));
                read
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordFormat;

    fn ctx() -> (tempfile::TempDir, PipelineContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(dir.path(), "d", 97).unwrap();
        (dir, ctx)
    }

    fn barcodes() -> BarcodeMap {
        BarcodeMap::from_pairs([("ACGT", "S1"), ("TTGCA", "S2"), ("GGGG", "S3")]).unwrap()
    }

    #[test]
    fn exact_prefix_prefers_longest_barcode() {
        let map = BarcodeMap::from_pairs([("AC", "short"), ("ACGT", "long")]).unwrap();
        assert_eq!(map.match_prefix("ACGTTT", BarcodeMatching::Exact), Some(("long", 4)));
        assert_eq!(map.match_prefix("ACTTTT", BarcodeMatching::Exact), Some(("short", 2)));
    }

    #[test]
    fn split_multibyte_prefix_falls_back_to_shorter_barcode() {
        let map = BarcodeMap::from_pairs([("AC", "short"), ("ACGT", "long")]).unwrap();
        // the 4-byte prefix cuts 'é' in half
        assert_eq!(map.match_prefix("ACG\u{e9}TT", BarcodeMatching::Exact), Some(("short", 2)));
    }

    #[test]
    fn tolerant_matching_allows_one_mismatch() {
        let map = barcodes();
        let tol = BarcodeMatching::Tolerant { max_mismatches: 1 };
        assert_eq!(map.match_prefix("ACGAAAAA", BarcodeMatching::Exact), None);
        assert_eq!(map.match_prefix("ACGAAAAA", tol), Some(("S1", 4)));
        assert_eq!(map.match_prefix("CCCAAAAA", tol), None);
    }

    #[test]
    fn tolerant_tie_drops_read() {
        let map = BarcodeMap::from_pairs([("AAAA", "S1"), ("AATT", "S2")]).unwrap();
        let tol = BarcodeMatching::Tolerant { max_mismatches: 1 };
        // AAAT is one mismatch away from both
        assert_eq!(map.match_prefix("AATACC", tol), None);
        assert_eq!(map.match_whole("AAAT", tol), None);
    }

    #[test]
    fn duplicate_barcodes_are_rejected() {
        assert!(BarcodeMap::from_pairs([("ACGT", "S1"), ("acgt", "S2")]).is_err());
    }

    #[test]
    fn demultiplexer_strips_barcode_and_drops_unmatched() {
        let (_dir, ctx) = ctx();
        let stage = Demultiplexer {
            barcodes: barcodes(),
            location: BarcodeLocation::InSequence,
            matching: BarcodeMatching::Exact,
            separator: '_',
        };
        let chunk = Chunk::new(0, "x", RecordFormat::Fastq);
        let reads = vec![
            SeqRecord::new("a", "ACGTCCCC", Some("IIIIJJJJ".into())),
            SeqRecord::new("b", "NNNNCCCC", Some("IIIIIIII".into())),
            SeqRecord::new("c", "TTGCAGG", Some("IIIIIKK".into())),
        ];
        let out = stage.apply(&ctx, &chunk, reads).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "S1_0");
        assert_eq!(out[0].seq, "CCCC");
        assert_eq!(out[0].qual.as_deref(), Some("JJJJ"));
        assert_eq!(out[1].id, "S2_1");
        assert_eq!(out[1].seq, "GG");
    }

    #[test]
    fn header_barcodes_are_read_from_last_field() {
        let (_dir, ctx) = ctx();
        let stage = Demultiplexer {
            barcodes: barcodes(),
            location: BarcodeLocation::InHeader,
            matching: BarcodeMatching::Exact,
            separator: '_',
        };
        let mut read = SeqRecord::new("M1:1:x", "ACGTACGT", None);
        read.header = "M1:1:x 1:N:0:GGGG".to_string();
        let out = stage
            .apply(&ctx, &Chunk::new(0, "x", RecordFormat::Fasta), vec![read])
            .unwrap();
        assert_eq!(out[0].id, "S3_0");
        assert_eq!(out[0].seq, "ACGTACGT");
    }

    #[test]
    fn zero_matches_gives_empty_chunk() {
        let (_dir, ctx) = ctx();
        let stage = Demultiplexer {
            barcodes: barcodes(),
            location: BarcodeLocation::InSequence,
            matching: BarcodeMatching::Exact,
            separator: '_',
        };
        let reads = vec![SeqRecord::new("a", "CCCCCCC", None)];
        let out = stage
            .apply(&ctx, &Chunk::new(0, "x", RecordFormat::Fasta), reads)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn relabeler_uses_declared_sample() {
        let (_dir, ctx) = ctx();
        let mut chunk = Chunk::new(1, "x", RecordFormat::Fasta);
        chunk.sample = Some("gut_A".into());
        let reads = vec![SeqRecord::new("orig1", "AC", None), SeqRecord::new("orig2", "GT", None)];
        let out = SampleRelabeler { separator: '_' }.apply(&ctx, &chunk, reads).unwrap();
        assert_eq!(out[1].id, "gut_A_1");

        chunk.sample = None;
        assert!(SampleRelabeler { separator: '_' }.apply(&ctx, &chunk, vec![]).is_err());
    }

    #[test]
    fn mapping_file_skips_header() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("map.txt");
        std::fs::write(&p, "#SampleID\tBarcodeSequence\tDescription\nS1\tACGT\tgut\nS2\tTTTT\tgut\n").unwrap();
        let map = BarcodeMap::from_file(&p).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.match_whole("tttt", BarcodeMatching::Exact), Some("S2"));
    }
}
