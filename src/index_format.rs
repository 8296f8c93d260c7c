// On-Disk Index Format - the stable contract between the offline builder
// and the retrieval server.
//
// An index directory holds exactly three files:
//   global_index.json      header + domain table + records + BM25 state
//   content_embeddings.bin little-endian f32 matrix (N_items, D)
//   domain_embeddings.bin  little-endian f32 matrix (N_domains, D)
//
// Each .bin starts with (u32 magic, u32 version, u32 rows, u32 dim), all
// little-endian. Any header mismatch is a fatal load error; there are no
// partial loads.

use crate::bm25::Bm25State;
use crate::errors::GovernanceError;
use crate::models::{Domain, ItemRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const MATRIX_MAGIC: u32 = 0x4756_4458; // "GVDX"
pub const FORMAT_VERSION: u32 = 1;

pub const GLOBAL_INDEX_FILE: &str = "global_index.json";
pub const CONTENT_EMBEDDINGS_FILE: &str = "content_embeddings.bin";
pub const DOMAIN_EMBEDDINGS_FILE: &str = "domain_embeddings.bin";

/// Row-major matrix of f32 values backing dense search.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dimension: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn new(rows: usize, dimension: usize, data: Vec<f32>) -> Result<Self, GovernanceError> {
        if data.len() != rows * dimension {
            return Err(GovernanceError::Format(format!(
                "matrix data length {} does not match {rows}x{dimension}",
                data.len()
            )));
        }
        Ok(Self {
            rows,
            dimension,
            data,
        })
    }

    pub fn from_rows(rows: Vec<Vec<f32>>, dimension: usize) -> Result<Self, GovernanceError> {
        let count = rows.len();
        let mut data = Vec::with_capacity(count * dimension);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dimension {
                return Err(GovernanceError::Format(format!(
                    "row {i} has dimension {} instead of {dimension}",
                    row.len()
                )));
            }
            data.extend(row);
        }
        Self::new(count, dimension, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }
}

/// Write a matrix with the fixed binary header.
pub fn write_matrix(path: &Path, matrix: &EmbeddingMatrix) -> Result<(), GovernanceError> {
    let file = std::fs::File::create(path)
        .map_err(|e| GovernanceError::Format(format!("cannot create {}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);

    let io_err =
        |e: std::io::Error| GovernanceError::Format(format!("write {}: {e}", path.display()));

    writer.write_all(&MATRIX_MAGIC.to_le_bytes()).map_err(io_err)?;
    writer
        .write_all(&FORMAT_VERSION.to_le_bytes())
        .map_err(io_err)?;
    writer
        .write_all(&(matrix.rows as u32).to_le_bytes())
        .map_err(io_err)?;
    writer
        .write_all(&(matrix.dimension as u32).to_le_bytes())
        .map_err(io_err)?;
    for value in &matrix.data {
        writer.write_all(&value.to_le_bytes()).map_err(io_err)?;
    }
    writer.flush().map_err(io_err)?;
    Ok(())
}

/// Read a matrix, verifying magic, version, and exact payload size.
pub fn read_matrix(path: &Path) -> Result<EmbeddingMatrix, GovernanceError> {
    let file = std::fs::File::open(path)
        .map_err(|e| GovernanceError::Format(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);

    let io_err =
        |e: std::io::Error| GovernanceError::Format(format!("read {}: {e}", path.display()));

    let mut word = [0u8; 4];
    reader.read_exact(&mut word).map_err(io_err)?;
    let magic = u32::from_le_bytes(word);
    if magic != MATRIX_MAGIC {
        return Err(GovernanceError::Format(format!(
            "{}: bad magic {magic:#010x}, expected {MATRIX_MAGIC:#010x}",
            path.display()
        )));
    }

    reader.read_exact(&mut word).map_err(io_err)?;
    let version = u32::from_le_bytes(word);
    if version != FORMAT_VERSION {
        return Err(GovernanceError::Format(format!(
            "{}: format version {version}, this build reads {FORMAT_VERSION}",
            path.display()
        )));
    }

    reader.read_exact(&mut word).map_err(io_err)?;
    let rows = u32::from_le_bytes(word) as usize;
    reader.read_exact(&mut word).map_err(io_err)?;
    let dimension = u32::from_le_bytes(word) as usize;

    let expected = rows
        .checked_mul(dimension)
        .ok_or_else(|| GovernanceError::Format("matrix shape overflows".into()))?;
    let mut data = Vec::with_capacity(expected);
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).map_err(io_err)?;
    if buf.len() != expected * 4 {
        return Err(GovernanceError::Format(format!(
            "{}: payload is {} bytes, header promises {}",
            path.display(),
            buf.len(),
            expected * 4
        )));
    }
    for chunk in buf.chunks_exact(4) {
        data.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    EmbeddingMatrix::new(rows, dimension, data)
}

/// Header of the JSON index body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub format_version: u32,
    pub dimension: usize,
    pub item_count: usize,
    pub domain_count: usize,
    /// SHA-256 over every source file, in manifest order.
    pub corpus_sha256: String,
    /// Identity of the bi-encoder the matrices were produced with. A
    /// mismatch at load time degrades dense search instead of failing.
    pub embedding_model: String,
}

/// The serialised form of `global_index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalIndexFile {
    pub header: IndexHeader,
    /// Domain table in priority order.
    pub domains: Vec<Domain>,
    /// Principle records in ID order.
    pub principles: Vec<ItemRecord>,
    /// Method records in ID order.
    pub methods: Vec<ItemRecord>,
    pub bm25_by_domain: BTreeMap<String, Bm25State>,
}

impl GlobalIndexFile {
    pub fn write(&self, path: &Path) -> Result<(), GovernanceError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GovernanceError::Format(format!("serialise index: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| GovernanceError::Format(format!("write {}: {e}", path.display())))
    }

    pub fn read(path: &Path) -> Result<Self, GovernanceError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GovernanceError::Format(format!("cannot read {}: {e}", path.display())))?;
        let file: GlobalIndexFile = serde_json::from_str(&content)
            .map_err(|e| GovernanceError::Format(format!("malformed {}: {e}", path.display())))?;
        if file.header.format_version != FORMAT_VERSION {
            return Err(GovernanceError::Format(format!(
                "index format version {} does not match supported version {FORMAT_VERSION}",
                file.header.format_version
            )));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        let matrix =
            EmbeddingMatrix::from_rows(vec![vec![1.0, 0.0, 0.0], vec![0.0, -0.5, 0.25]], 3)
                .unwrap();
        write_matrix(&path, &matrix).unwrap();
        let loaded = read_matrix(&path).unwrap();
        assert_eq!(loaded, matrix);
        assert_eq!(loaded.row(1).unwrap(), &[0.0, -0.5, 0.25]);
        assert!(loaded.row(2).is_none());
    }

    #[test]
    fn test_matrix_write_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let matrix = EmbeddingMatrix::from_rows(vec![vec![0.25f32; 4]; 3], 4).unwrap();
        write_matrix(&a, &matrix).unwrap();
        write_matrix(&b, &matrix).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        let mut bytes = Vec::new();
        bytes.extend(0xDEADBEEFu32.to_le_bytes());
        bytes.extend(FORMAT_VERSION.to_le_bytes());
        bytes.extend(0u32.to_le_bytes());
        bytes.extend(0u32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();
        let err = read_matrix(&path).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        let mut bytes = Vec::new();
        bytes.extend(MATRIX_MAGIC.to_le_bytes());
        bytes.extend(99u32.to_le_bytes());
        bytes.extend(0u32.to_le_bytes());
        bytes.extend(0u32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();
        let err = read_matrix(&path).unwrap_err();
        assert!(err.to_string().contains("format version"));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        let matrix = EmbeddingMatrix::from_rows(vec![vec![1.0f32; 4]; 2], 4).unwrap();
        write_matrix(&path, &matrix).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        let err = read_matrix(&path).unwrap_err();
        assert!(err.to_string().contains("payload"));
    }

    #[test]
    fn test_shape_mismatch_detected() {
        assert!(EmbeddingMatrix::new(2, 3, vec![0.0; 5]).is_err());
        assert!(EmbeddingMatrix::from_rows(vec![vec![0.0; 3], vec![0.0; 2]], 3).is_err());
    }
}
