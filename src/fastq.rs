use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::types::{RecordFormat, SeqRecord};

/// Open a read file as a buffered reader, transparently decompressing `.gz`.
pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let f = File::open(path)?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    Ok(if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    })
}

/// Streaming FASTA/FASTQ reader.
///
/// The layout is detected from the first header character (`@` or `>`).
/// FASTA sequences may span several lines.
pub struct RecordReader<R: BufRead> {
    reader: R,
    line: String,
    /// A FASTA header read ahead while finishing the previous record.
    pending_header: Option<String>,
    format: Option<RecordFormat>,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            pending_header: None,
            format: None,
        }
    }

    /// Format of the stream, known after the first record was read.
    pub fn format(&self) -> Option<RecordFormat> {
        self.format
    }

    fn next_line(&mut self) -> io::Result<Option<String>> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        Ok(Some(self.line.trim_end().to_string()))
    }

    fn next_record(&mut self) -> io::Result<Option<SeqRecord>> {
        // 1) find a header
        let header_line = match self.pending_header.take() {
            Some(h) => h,
            None => loop {
                match self.next_line()? {
                    None => return Ok(None),
                    Some(l) if l.is_empty() => continue,
                    Some(l) => break l,
                }
            },
        };

        let format = match header_line.as_bytes()[0] {
            b'@' => RecordFormat::Fastq,
            b'>' => RecordFormat::Fasta,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("not a FASTA/FASTQ header: {header_line}"),
                ))
            }
        };
        self.format.get_or_insert(format);
        let header = header_line[1..].to_string();
        let id = header.split_whitespace().next().unwrap_or("").to_string();

        match format {
            RecordFormat::Fastq => {
                // 2) sequence, plus line, quality
                let seq = self.next_line()?.ok_or_else(|| truncated(&id))?;
                let _plus = self.next_line()?.ok_or_else(|| truncated(&id))?;
                let qual = self.next_line()?.ok_or_else(|| truncated(&id))?;
                if qual.len() != seq.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("read {id}: quality length differs from sequence length"),
                    ));
                }
                Ok(Some(SeqRecord {
                    id,
                    header,
                    seq,
                    qual: Some(qual),
                }))
            }
            RecordFormat::Fasta => {
                // 2) sequence lines until the next header
                let mut seq = String::new();
                while let Some(l) = self.next_line()? {
                    if l.starts_with('>') {
                        self.pending_header = Some(l);
                        break;
                    }
                    seq.push_str(&l);
                }
                Ok(Some(SeqRecord {
                    id,
                    header,
                    seq,
                    qual: None,
                }))
            }
        }
    }
}

fn truncated(id: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("FASTQ record {id} is truncated"),
    )
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = io::Result<SeqRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Read every record of a FASTA/FASTQ file (optionally gzipped).
pub fn read_records<P: AsRef<Path>>(path: P) -> io::Result<Vec<SeqRecord>> {
    RecordReader::new(open_reader(path)?).collect()
}

/// Write records in the given layout. Records without qualities cannot be
/// written as FASTQ.
pub fn write_records<W: Write>(
    out: &mut W,
    records: &[SeqRecord],
    format: RecordFormat,
) -> io::Result<()> {
    for r in records {
        write_record(out, r, format)?;
    }
    Ok(())
}

pub fn write_record<W: Write>(out: &mut W, r: &SeqRecord, format: RecordFormat) -> io::Result<()> {
    match format {
        RecordFormat::Fastq => {
            let qual = r.qual.as_deref().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("read {} has no qualities to write as FASTQ", r.id),
                )
            })?;
            writeln!(out, "@{}\n{}\n+\n{}", r.header, r.seq, qual)
        }
        RecordFormat::Fasta => writeln!(out, ">{}\n{}", r.header, r.seq),
    }
}

/// Write records to `path`, creating or truncating it. Zero records give a
/// zero-byte file, which is what the empty-output pruner looks for.
pub fn write_records_to<P: AsRef<Path>>(
    path: P,
    records: &[SeqRecord],
    format: RecordFormat,
) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_records(&mut out, records, format)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_multiline_fasta() {
        let data = ">a desc\nACGT\nAC\n>b\nTTTT\n";
        let recs: Vec<_> = RecordReader::new(Cursor::new(data))
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].id, "a");
        assert_eq!(recs[0].header, "a desc");
        assert_eq!(recs[0].seq, "ACGTAC");
        assert_eq!(recs[1].seq, "TTTT");
        assert!(recs[1].qual.is_none());
    }

    #[test]
    fn reads_fastq_and_detects_format() {
        let data = "@r1 1:N:0:ACGT\nACGT\n+\nIIII\n@r2\nGG\n+\n##\n";
        let mut reader = RecordReader::new(Cursor::new(data));
        let first = reader.next().unwrap().unwrap();
        assert_eq!(reader.format(), Some(RecordFormat::Fastq));
        assert_eq!(first.id, "r1");
        assert_eq!(first.qual.as_deref(), Some("IIII"));
        assert_eq!(reader.count(), 1);
    }

    #[test]
    fn truncated_fastq_is_an_error() {
        let data = "@r1\nACGT\n+\n";
        let res: io::Result<Vec<_>> = RecordReader::new(Cursor::new(data)).collect();
        assert!(res.is_err());
    }

    #[test]
    fn empty_write_gives_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("empty.fasta");
        write_records_to(&p, &[], RecordFormat::Fasta).unwrap();
        assert_eq!(std::fs::metadata(&p).unwrap().len(), 0);
    }
}
