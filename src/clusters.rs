use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;

use crate::derep::strip_size_annotation;
use crate::error::ExternalToolError;

/// De-novo cluster membership of dereplicated representatives.
#[derive(Debug, Clone, Default)]
pub struct ClusterMembership {
    otu_of: AHashMap<String, String>,
    /// `(otu id, centroid representative)` in cluster-number order.
    otus: Vec<(String, String)>,
}

/// OTU id of a 0-based cluster number.
pub fn otu_id(cluster: usize) -> String {
    format!("OTU_{}", cluster + 1)
}

impl ClusterMembership {
    /// Parses usearch clustering `-uc` output. `S` records open a cluster with
    /// its centroid, `H` records add members; column 1 is the cluster number,
    /// column 8 the representative label.
    pub fn parse_uc<P: AsRef<Path>>(path: P) -> Result<Self, ExternalToolError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|_| ExternalToolError::MissingOutput {
            path: path.to_path_buf(),
        })?;
        let reader = BufReader::new(file);

        let unparseable = |line: usize, message: String| ExternalToolError::Unparseable {
            path: path.to_path_buf(),
            line,
            message,
        };

        let mut centroids: Vec<(usize, String)> = Vec::new();
        let mut otu_of = AHashMap::new();
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
                return Err(unparseable(
                    n + 1,
                    format!("expected 10 tab-separated fields, found {}", parts.len()),
                ));
            }
            let record = parts[0];
            if record == "C" {
                continue;
            }
            if record != "S" && record != "H" {
                return Err(unparseable(n + 1, format!("unknown record type '{record}'")));
            }
            let cluster: usize = parts[1]
                .trim()
                .parse()
                .map_err(|_| unparseable(n + 1, format!("bad cluster number '{}'", parts[1])))?;
            let member = strip_size_annotation(parts[8].trim()).to_string();
            if record == "S" {
                centroids.push((cluster, member.clone()));
            }
            otu_of.insert(member, otu_id(cluster));
        }

        centroids.sort_by_key(|(c, _)| *c);
        let otus = centroids
            .into_iter()
            .map(|(c, centroid)| (otu_id(c), centroid))
            .collect::<Vec<_>>();
        log::info!(
            "{} representatives in {} de-novo clusters ({})",
            otu_of.len(),
            otus.len(),
            path.display()
        );
        Ok(Self { otu_of, otus })
    }

    pub fn otu_of(&self, representative: &str) -> Option<&str> {
        self.otu_of.get(representative).map(String::as_str)
    }

    /// `(otu id, centroid representative id)` pairs.
    pub fn otus(&self) -> impl Iterator<Item = (&str, &str)> {
        self.otus.iter().map(|(o, c)| (o.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.otus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.otus.is_empty()
    }
}
