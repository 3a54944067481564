//! Named storage for vectors and scalars.
//!
//! The optimizer itself keeps its state in memory; stores are used to
//! checkpoint it between process invocations (see [`crate::Optimizer::save`]
//! and [`crate::Optimizer::load`]). Every float must survive a round trip
//! bit for bit.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndarray::Array1;

use crate::OptimizeError;

/// Named vector/scalar storage.
///
/// Reading a name that was never written (or was written with the other
/// kind) is an [`OptimizeError::Configuration`] naming it.
pub trait VectorStore {
    fn read_vector(&self, name: &str) -> Result<Array1<f64>, OptimizeError>;
    fn read_scalar(&self, name: &str) -> Result<f64, OptimizeError>;
    fn write_vector(&mut self, name: &str, value: &Array1<f64>) -> Result<(), OptimizeError>;
    fn write_scalar(&mut self, name: &str, value: f64) -> Result<(), OptimizeError>;
    /// Removes `name`; deleting a missing name is not an error.
    fn delete(&mut self, name: &str) -> Result<(), OptimizeError>;
    /// Moves `from` to `to`, replacing whatever `to` held.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), OptimizeError>;
    fn contains(&self, name: &str) -> bool;
}

fn missing(name: &str) -> OptimizeError {
    OptimizeError::Configuration {
        name: name.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Vector(Array1<f64>),
    Scalar(f64),
}

/// In-process store backed by a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl VectorStore for MemoryStore {
    fn read_vector(&self, name: &str) -> Result<Array1<f64>, OptimizeError> {
        match self.entries.get(name) {
            Some(Entry::Vector(v)) => Ok(v.clone()),
            _ => Err(missing(name)),
        }
    }

    fn read_scalar(&self, name: &str) -> Result<f64, OptimizeError> {
        match self.entries.get(name) {
            Some(Entry::Scalar(v)) => Ok(*v),
            _ => Err(missing(name)),
        }
    }

    fn write_vector(&mut self, name: &str, value: &Array1<f64>) -> Result<(), OptimizeError> {
        self.entries
            .insert(name.to_string(), Entry::Vector(value.clone()));
        Ok(())
    }

    fn write_scalar(&mut self, name: &str, value: f64) -> Result<(), OptimizeError> {
        self.entries.insert(name.to_string(), Entry::Scalar(value));
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), OptimizeError> {
        self.entries.remove(name);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), OptimizeError> {
        let entry = self.entries.remove(from).ok_or_else(|| missing(from))?;
        self.entries.insert(to.to_string(), entry);
        Ok(())
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

const VECTOR_EXT: &str = "f64";
const SCALAR_EXT: &str = "txt";

/// One file per name inside a run directory.
///
/// Vectors are raw little-endian `f64` values (`<name>.f64`); scalars are
/// shortest round-trip decimal text (`<name>.txt`). Both keep infinities,
/// which a failed trial can leave in `f_try`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Opens `root`, creating it if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, OptimizeError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str, ext: &str) -> Result<PathBuf, OptimizeError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid store name {name:?}"),
            )
            .into());
        }
        Ok(self.root.join(format!("{name}.{ext}")))
    }

    fn remove_if_present(path: &Path) -> Result<(), OptimizeError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_missing_as_config<T>(name: &str, result: io::Result<T>) -> Result<T, OptimizeError> {
        match result {
            Ok(v) => Ok(v),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(missing(name)),
            Err(e) => Err(e.into()),
        }
    }
}

impl VectorStore for DirectoryStore {
    fn read_vector(&self, name: &str) -> Result<Array1<f64>, OptimizeError> {
        let bytes = Self::read_missing_as_config(name, fs::read(self.path(name, VECTOR_EXT)?))?;
        if bytes.len() % 8 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{name}: {} bytes is not a whole number of f64 values", bytes.len()),
            )
            .into());
        }
        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect::<Vec<_>>();
        Ok(Array1::from(values))
    }

    fn read_scalar(&self, name: &str) -> Result<f64, OptimizeError> {
        let text =
            Self::read_missing_as_config(name, fs::read_to_string(self.path(name, SCALAR_EXT)?))?;
        text.trim().parse::<f64>().map_err(|e| {
            OptimizeError::from(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{name}: {e}"),
            ))
        })
    }

    fn write_vector(&mut self, name: &str, value: &Array1<f64>) -> Result<(), OptimizeError> {
        let mut bytes = Vec::with_capacity(value.len() * 8);
        for v in value.iter() {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        fs::write(self.path(name, VECTOR_EXT)?, bytes)?;
        Self::remove_if_present(&self.path(name, SCALAR_EXT)?)
    }

    fn write_scalar(&mut self, name: &str, value: f64) -> Result<(), OptimizeError> {
        fs::write(self.path(name, SCALAR_EXT)?, format!("{value:e}\n"))?;
        Self::remove_if_present(&self.path(name, VECTOR_EXT)?)
    }

    fn delete(&mut self, name: &str) -> Result<(), OptimizeError> {
        Self::remove_if_present(&self.path(name, VECTOR_EXT)?)?;
        Self::remove_if_present(&self.path(name, SCALAR_EXT)?)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), OptimizeError> {
        for (ext, other) in [(VECTOR_EXT, SCALAR_EXT), (SCALAR_EXT, VECTOR_EXT)] {
            let source = self.path(from, ext)?;
            if source.exists() {
                fs::rename(&source, self.path(to, ext)?)?;
                return Self::remove_if_present(&self.path(to, other)?);
            }
        }
        Err(missing(from))
    }

    fn contains(&self, name: &str) -> bool {
        [VECTOR_EXT, SCALAR_EXT]
            .iter()
            .any(|ext| self.path(name, ext).is_ok_and(|p| p.exists()))
    }
}
