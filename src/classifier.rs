use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;

use crate::derep::strip_size_annotation;
use crate::error::ExternalToolError;

/// One confident rank of a classifier lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct RankCall {
    pub name: String,
    pub rank: String,
    pub confidence: f64,
}

/// Lineage truncated at the first rank below the cutoff.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Lineage {
    pub ranks: Vec<RankCall>,
}

impl Lineage {
    /// `Bacteria;Firmicutes;Bacilli`
    pub fn label(&self) -> String {
        self.ranks
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Parses RDP classifier `fixrank` output:
/// ```text
/// <seqid>\t[<strand>]\t<name>\t<rank>\t<conf>\t<name>\t<rank>\t<conf>...
/// ```
/// Only ranks with confidence `>= cutoff` are kept, stopping at the first
/// one below it. Sequences left with no rank are absent from the result.
pub fn parse_fixrank<P: AsRef<Path>>(
    path: P,
    cutoff: f64,
) -> Result<AHashMap<String, Lineage>, ExternalToolError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|_| ExternalToolError::MissingOutput {
        path: path.to_path_buf(),
    })?;
    let reader = BufReader::new(file);

    let mut lineages = AHashMap::new();
    let mut unassigned = 0usize;
    for (n, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| ExternalToolError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        // the strand column is optional
        let triples_start = match (parts.len() - 1) % 3 {
            0 => 1,
            1 => 2,
            _ => {
                return Err(ExternalToolError::Unparseable {
                    path: path.to_path_buf(),
                    line: n + 1,
                    message: "expected <name, rank, confidence> triples".to_string(),
                })
            }
        };

        let mut lineage = Lineage::default();
        for t in parts[triples_start..].chunks(3) {
            let confidence: f64 = t[2].trim().parse().map_err(|_| ExternalToolError::Unparseable {
                path: path.to_path_buf(),
                line: n + 1,
                message: format!("bad confidence '{}'", t[2]),
            })?;
            if t[1].trim() == "rootrank" {
                continue;
            }
            if confidence < cutoff {
                break;
            }
            lineage.ranks.push(RankCall {
                name: t[0].trim().trim_matches('"').to_string(),
                rank: t[1].trim().to_string(),
                confidence,
            });
        }

        if lineage.ranks.is_empty() {
            unassigned += 1;
        } else {
            lineages.insert(strip_size_annotation(parts[0].trim()).to_string(), lineage);
        }
    }
    log::info!(
        "Classifier assigned {} sequences at cutoff {} ({} below cutoff at the top rank)",
        lineages.len(),
        cutoff,
        unassigned
    );
    Ok(lineages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lineage_stops_at_first_low_confidence_rank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rdp.txt");
        std::fs::write(
            &path,
            "OTU_1;size=9;\t\tBacteria\tdomain\t1.0\tFirmicutes\tphylum\t0.92\tBacilli\tclass\t0.41\tLactobacillales\torder\t0.9\n\
             OTU_2\t-\tBacteria\tdomain\t0.3\tFirmicutes\tphylum\t0.2\n\
             OTU_3\tRoot\trootrank\t1.0\tFungi\tkingdom\t0.88\n",
        )
        .unwrap();
        let l = parse_fixrank(&path, 0.5).unwrap();
        assert_eq!(l["OTU_1"].label(), "Bacteria;Firmicutes");
        assert_eq!(l["OTU_1"].ranks[1].rank, "phylum");
        assert!(!l.contains_key("OTU_2"));
        assert_eq!(l["OTU_3"].label(), "Fungi");
    }

    #[test]
    fn malformed_rows_are_tool_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rdp.txt");
        std::fs::write(&path, "OTU_1\tBacteria\tdomain\n").unwrap();
        assert!(matches!(
            parse_fixrank(&path, 0.5),
            Err(ExternalToolError::Unparseable { line: 1, .. })
        ));
        std::fs::write(&path, "OTU_1\tBacteria\tdomain\thigh\n").unwrap();
        assert!(matches!(
            parse_fixrank(&path, 0.5),
            Err(ExternalToolError::Unparseable { .. })
        ));
    }
}
