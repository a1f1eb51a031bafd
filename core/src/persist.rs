use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const CACHE_VERSION: u32 = 1;

/// One dense vector per document, in corpus order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorCache {
    pub dimension: u32,
    pub vectors: Vec<Vec<f32>>,
}

impl VectorCache {
    pub fn new(vectors: Vec<Vec<f32>>) -> Self {
        let dimension = vectors.first().map(|v| v.len() as u32).unwrap_or(0);
        Self { dimension, vectors }
    }

    pub fn len(&self) -> usize { self.vectors.len() }

    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }
}

/// Human-readable sidecar written next to the vector cache.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub dimension: u32,
    pub backend: String,
    pub created_at: String,
    pub version: u32,
}

/// File locations for one corpus + backend pair.
pub struct CachePaths {
    pub root: PathBuf,
    stem: String,
}

impl CachePaths {
    pub fn new<P: AsRef<Path>>(root: P, stem: impl Into<String>) -> Self {
        Self { root: root.as_ref().to_path_buf(), stem: stem.into() }
    }

    /// Cache files are named after the corpus file and the embedding backend,
    /// e.g. `syllabus_all.hashed.vectors.bin`.
    pub fn for_corpus<P: AsRef<Path>>(root: P, corpus_path: &Path, backend: &str) -> Self {
        let corpus_stem = corpus_path.file_stem().and_then(|s| s.to_str()).unwrap_or("corpus");
        Self::new(root, format!("{corpus_stem}.{backend}"))
    }

    pub fn vectors(&self) -> PathBuf { self.root.join(format!("{}.vectors.bin", self.stem)) }
    pub fn meta(&self) -> PathBuf { self.root.join(format!("{}.meta.json", self.stem)) }
}

pub fn save_vectors(paths: &CachePaths, cache: &VectorCache) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.vectors())?;
    let bytes = bincode::serialize(cache)?;
    f.write_all(&bytes)?;
    Ok(())
}

pub fn load_vectors(paths: &CachePaths) -> Result<VectorCache> {
    let mut f = File::open(paths.vectors())?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let cache = bincode::deserialize(&buf)?;
    Ok(cache)
}

pub fn save_meta(paths: &CachePaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &CachePaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// Persist vectors plus sidecar for `backend`.
pub fn save_cache(paths: &CachePaths, cache: &VectorCache, backend: &str) -> Result<()> {
    save_vectors(paths, cache)?;
    let meta = MetaFile {
        num_docs: cache.len() as u32,
        dimension: cache.dimension,
        backend: backend.to_string(),
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        version: CACHE_VERSION,
    };
    save_meta(paths, &meta)
}
