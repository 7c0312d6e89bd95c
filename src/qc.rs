use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::fastq::{open_reader, RecordReader};
use crate::tables::AbundanceTable;

/// Read-length histogram of one artifact, shortest length first.
pub fn length_histogram<P: AsRef<Path>>(path: P) -> Result<BTreeMap<usize, u64>> {
    let path = path.as_ref();
    let reader = open_reader(path).map_err(|e| PipelineError::io(path, e))?;
    let mut histogram = BTreeMap::new();
    for record in RecordReader::new(reader) {
        let record = record.map_err(|e| PipelineError::io(path, e))?;
        *histogram.entry(record.seq.len()).or_insert(0u64) += 1;
    }
    Ok(histogram)
}

/// Writes `length<TAB>reads` lines.
pub fn write_length_histogram<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<()> {
    let histogram = length_histogram(input)?;
    let mut out = String::from("length\treads\n");
    for (len, n) in &histogram {
        writeln!(out, "{len}\t{n}").unwrap();
    }
    let output = output.as_ref();
    std::fs::write(output, out).map_err(|e| PipelineError::io(output, e))
}

/// Writes `sample<TAB>reads` lines from a count table, most reads first.
pub fn write_sample_read_counts<P: AsRef<Path>>(table: &AbundanceTable, output: P) -> Result<()> {
    let mut totals = table.sample_totals();
    totals.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut out = String::from("sample\treads\n");
    for (sample, total) in totals {
        writeln!(out, "{sample}\t{total}").unwrap();
    }
    let output = output.as_ref();
    std::fs::write(output, out).map_err(|e| PipelineError::io(output, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_counts_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("r.fastq");
        std::fs::write(&input, "@a\nACGT\n+\nIIII\n@b\nAC\n+\nII\n@c\nTTGA\n+\nIIII\n").unwrap();
        let out = dir.path().join("h.txt");
        write_length_histogram(&input, &out).unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "length\treads\n2\t1\n4\t2\n");
    }

    #[test]
    fn sample_counts_are_sorted_by_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = AbundanceTable::new();
        t.add("OTU_1", "S1", 2.0);
        t.add("OTU_1", "S2", 5.0);
        t.add("OTU_2", "S1", 1.0);
        t.add_sample("S3");
        let out = dir.path().join("c.txt");
        write_sample_read_counts(&t, &out).unwrap();
        assert_eq!(
            std::fs::read_to_string(out).unwrap(),
            "sample\treads\nS2\t5\nS1\t3\nS3\t0\n"
        );
    }
}
