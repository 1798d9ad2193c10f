//! Finding and parsing harvest files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use walkdir::WalkDir;

use mathsearch_cmml::{parse_harvest, Harvest};

pub const HARVEST_EXTENSION: &str = "harvest";

/// Expand the command-line paths: files are taken as given, directories are
/// walked for `*.harvest` files. The result is sorted so indexing order
/// (and therefore formula ids) does not depend on directory listing order.
pub fn collect_harvest_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).follow_links(true) {
                let entry = entry.with_context(|| format!("walking {}", input.display()))?;
                if entry.file_type().is_file() && is_harvest(entry.path()) {
                    paths.push(entry.into_path());
                }
            }
        } else if input.exists() {
            paths.push(input.clone());
        } else {
            anyhow::bail!("no such file or directory: {}", input.display());
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

fn is_harvest(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(HARVEST_EXTENSION)
}

/// Read and parse files in parallel, keeping input order.
pub fn parse_harvest_files(paths: &[PathBuf]) -> Vec<(PathBuf, Result<Harvest>)> {
    paths
        .par_iter()
        .map(|path| {
            let parsed = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))
                .and_then(|xml| {
                    parse_harvest(&xml).with_context(|| format!("parsing {}", path.display()))
                });
            (path.clone(), parsed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_are_walked_for_harvest_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.harvest"), "<mws:harvest/>").unwrap();
        fs::write(dir.path().join("sub/a.harvest"), "<mws:harvest/>").unwrap();
        fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let paths = collect_harvest_paths(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(names, vec![PathBuf::from("b.harvest"), PathBuf::from("sub/a.harvest")]);
    }

    #[test]
    fn missing_inputs_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_harvest_paths(&[dir.path().join("nope.harvest")]).is_err());
    }

    #[test]
    fn parse_failures_are_reported_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.harvest");
        let bad = dir.path().join("bad.harvest");
        fs::write(&good, "<mws:harvest/>").unwrap();
        fs::write(&bad, "<mws:harvest><mws:expr><ci>x</ci></mws:expr></mws:harvest>").unwrap();

        let parsed = parse_harvest_files(&[good.clone(), bad.clone()]);
        assert_eq!(parsed[0].0, good);
        assert!(parsed[0].1.is_ok());
        assert!(parsed[1].1.is_err());
    }
}
