//! Data directory layout.
//!
//! ```text
//! <data_path>/
//!   formula.log   formula occurrences (append-only)
//!   crawl.log     crawled documents (append-only)
//!   index.mwsi    trie image
//!   meaning.dat   meaning dictionary image
//! ```
//!
//! The logs are written as documents are indexed. The two images are only
//! written by [`DataDir::save_index`], always through a temporary file and a
//! rename, so a crash leaves either the old or the new image in place.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use memmap2::Mmap;
use tracing::info;

use mathsearch_index::{FormulaIndex, MeaningDictionary, SubstitutionTrie, TrieImage};

use crate::log::{LogCrawlStore, LogFormulaStore};

pub const FORMULA_LOG: &str = "formula.log";
pub const CRAWL_LOG: &str = "crawl.log";
pub const INDEX_IMAGE: &str = "index.mwsi";
pub const MEANING_IMAGE: &str = "meaning.dat";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Open (creating if needed) a data directory.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("creating data directory {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn formula_log_path(&self) -> PathBuf {
        self.root.join(FORMULA_LOG)
    }

    pub fn crawl_log_path(&self) -> PathBuf {
        self.root.join(CRAWL_LOG)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_IMAGE)
    }

    pub fn meaning_path(&self) -> PathBuf {
        self.root.join(MEANING_IMAGE)
    }

    pub fn open_formula_store(&self) -> Result<LogFormulaStore> {
        let path = self.formula_log_path();
        LogFormulaStore::open(&path).with_context(|| format!("opening {}", path.display()))
    }

    pub fn open_crawl_store(&self) -> Result<LogCrawlStore> {
        let path = self.crawl_log_path();
        LogCrawlStore::open(&path).with_context(|| format!("opening {}", path.display()))
    }

    /// Load the saved dictionary and trie, if both images exist.
    pub fn load_index(&self) -> Result<Option<(MeaningDictionary, SubstitutionTrie)>> {
        let (index_path, meaning_path) = (self.index_path(), self.meaning_path());
        if !index_path.exists() || !meaning_path.exists() {
            return Ok(None);
        }

        let dictionary = {
            let map = map_file(&meaning_path)?;
            MeaningDictionary::from_bytes(&map)
                .with_context(|| format!("decoding {}", meaning_path.display()))?
        };
        let trie = {
            let map = map_file(&index_path)?;
            let image = TrieImage::from_bytes(&map)
                .with_context(|| format!("decoding {}", index_path.display()))?;
            SubstitutionTrie::load(image)
                .with_context(|| format!("loading {}", index_path.display()))?
        };

        info!(
            path = %self.root.display(),
            symbols = dictionary.len(),
            nodes = trie.node_count(),
            formulas = trie.leaf_count(),
            "loaded index"
        );
        Ok(Some((dictionary, trie)))
    }

    /// Write both images atomically.
    pub fn save_index(&self, dictionary: &MeaningDictionary, index: &FormulaIndex) -> Result<()> {
        let image = index.snapshot();
        let trie_bytes = image.to_bytes().context("encoding trie image")?;
        let meaning_bytes = dictionary.to_bytes().context("encoding dictionary")?;

        write_atomic(&self.meaning_path(), &meaning_bytes)?;
        write_atomic(&self.index_path(), &trie_bytes)?;

        info!(
            path = %self.root.display(),
            nodes = image.nodes.len(),
            formulas = image.hits.len(),
            "saved index"
        );
        Ok(())
    }
}

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    // SAFETY: images are only replaced by rename, never modified in place,
    // so the mapped file does not change while the map is alive.
    unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {}", path.display()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file =
            File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("writing {}", tmp.display()))?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}
