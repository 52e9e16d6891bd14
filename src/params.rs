//! Parameter store
//!
//! Owns every named learnable tensor of a network in declaration order,
//! together with the archive format used to persist them.
//!
//! ## Naming
//!
//! | Name | Shape | Meaning |
//! |------|-------|---------|
//! | `<layer>_W` | `[n_in, k * n_out]` | input weights |
//! | `<layer>_U` | `[n_out, k * n_out]` | recurrent weights |
//! | `<layer>_b` | `[1, k * n_out]` | bias row |
//! | `<layer>_clk_a`, `<layer>_clk_b` | `[1, n_out]` | clock gate (optional) |
//! | `<layer>_init` | `[1, state_width]` | learnable initial state (optional) |
//!
//! In inference mode every name carries the instance prefix. Archives always
//! store un-prefixed keys, so a training run and any number of inference
//! instances read the same file.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::{ArrayD, IxDyn};

use crate::error::{NetError, Result};

/// Reserved suffix of learnable initial-state parameters.
pub const INIT_SUFFIX: &str = "init";

/// Default archive name inside a run directory.
pub const DEFAULT_ARCHIVE: &str = "params";

/// On-disk collection of named arrays, keyed by un-prefixed parameter name.
pub type Archive = BTreeMap<String, ArrayD<f32>>;

/// Whether `name` denotes a learnable initial state
pub fn is_init_param(name: &str) -> bool {
    name.ends_with(INIT_SUFFIX)
}

/// Path of a named archive inside `dir`
pub fn archive_path(dir: &Path, name: Option<&str>) -> std::path::PathBuf {
    dir.join(format!("{}.bin", name.unwrap_or(DEFAULT_ARCHIVE)))
}

/// Write an archive with bincode
pub fn write_archive(path: &Path, archive: &Archive) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, archive)?;
    Ok(())
}

/// Read an archive written by [`write_archive`]
pub fn read_archive(path: &Path) -> Result<Archive> {
    let reader = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(reader)?)
}

/// Copy a tensor into an owned n-dimensional array of the same shape
pub fn tensor_to_array<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Result<ArrayD<f32>> {
    let data = tensor.to_data();
    let shape = data.shape.clone();
    let values = data
        .to_vec::<f32>()
        .map_err(|err| NetError::Serialization(format!("{err:?}")))?;
    ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|err| NetError::Serialization(err.to_string()))
}

/// Build a rank-2 tensor from an archived array
pub fn array_to_tensor<B: Backend>(array: &ArrayD<f32>, device: &B::Device) -> Result<Tensor<B, 2>> {
    if array.ndim() != 2 {
        return Err(NetError::Serialization(format!(
            "expected a rank-2 array, found rank {}",
            array.ndim()
        )));
    }
    let values: Vec<f32> = array.iter().copied().collect();
    let data = TensorData::new(values, array.shape().to_vec());
    Ok(Tensor::from_data(data, device))
}

/// A named learnable tensor
#[derive(Debug, Clone)]
pub struct Parameter<B: Backend> {
    pub name: String,
    pub value: Tensor<B, 2>,
}

/// Ordered store of named parameters.
#[derive(Debug, Clone)]
pub struct ParamStore<B: Backend> {
    prefix: String,
    entries: Vec<Parameter<B>>,
    index: HashMap<String, usize>,
}

impl<B: Backend> ParamStore<B> {
    /// Create an empty store whose names all start with `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a parameter; names must be unique
    pub fn declare(&mut self, name: impl Into<String>, value: Tensor<B, 2>) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(NetError::DuplicateParam(name));
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(Parameter { name, value });
        Ok(())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Tensor<B, 2>> {
        self.position(name).map(|i| &self.entries[i].value)
    }

    pub fn value(&self, position: usize) -> &Tensor<B, 2> {
        &self.entries[position].value
    }

    /// Replace the value at `position`
    pub fn set(&mut self, position: usize, value: Tensor<B, 2>) {
        self.entries[position].value = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter<B>> {
        self.entries.iter()
    }

    /// Positions of parameters updated directly from their own gradient
    pub fn optimizable_positions(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, p)| !is_init_param(&p.name))
            .map(|(i, _)| i)
            .collect()
    }

    /// Name with the instance prefix removed
    pub fn unprefixed<'a>(&self, name: &'a str) -> &'a str {
        name.strip_prefix(self.prefix.as_str()).unwrap_or(name)
    }

    /// Map every value into another backend, keeping names and order
    pub fn view<C: Backend>(&self, lift: impl Fn(&Tensor<B, 2>) -> Tensor<C, 2>) -> ParamView<'_, C> {
        ParamView {
            index: &self.index,
            values: self.entries.iter().map(|p| lift(&p.value)).collect(),
        }
    }

    /// Snapshot all values into an archive with un-prefixed keys
    pub fn to_archive(&self) -> Result<Archive> {
        let mut archive = Archive::new();
        for param in &self.entries {
            archive.insert(
                self.unprefixed(&param.name).to_string(),
                tensor_to_array(&param.value)?,
            );
        }
        Ok(archive)
    }

    /// Overwrite every value from `archive`.
    ///
    /// All keys and shapes are checked before anything is written, so a
    /// failing load leaves the store untouched.
    pub fn overlay(&mut self, archive: &Archive, device: &B::Device) -> Result<()> {
        let mut loaded = Vec::with_capacity(self.entries.len());
        for param in &self.entries {
            let key = self.unprefixed(&param.name);
            let array = archive
                .get(key)
                .ok_or_else(|| NetError::MissingParam(key.to_string()))?;
            let expected = param.value.dims().to_vec();
            if array.shape() != expected.as_slice() {
                return Err(NetError::ShapeMismatch {
                    name: key.to_string(),
                    expected,
                    found: array.shape().to_vec(),
                });
            }
            loaded.push(array_to_tensor::<B>(array, device)?);
        }
        for (param, value) in self.entries.iter_mut().zip(loaded) {
            param.value = value;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_archive(path, &self.to_archive()?)
    }

    pub fn load(&mut self, path: &Path, device: &B::Device) -> Result<()> {
        let archive = read_archive(path)?;
        self.overlay(&archive, device)
    }
}

/// Read-only, name-addressable view of parameter values on some backend.
///
/// Forward graphs read parameters through a view so the same layer code can
/// run on tracked (autodiff) tensors or plain ones.
#[derive(Debug)]
pub struct ParamView<'a, C: Backend> {
    index: &'a HashMap<String, usize>,
    values: Vec<Tensor<C, 2>>,
}

impl<'a, C: Backend> ParamView<'a, C> {
    pub fn get(&self, name: &str) -> Result<Tensor<C, 2>> {
        self.index
            .get(name)
            .map(|&i| self.values[i].clone())
            .ok_or_else(|| NetError::MissingParam(name.to_string()))
    }

    pub fn value(&self, position: usize) -> &Tensor<C, 2> {
        &self.values[position]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    fn sample_store(prefix: &str) -> ParamStore<TestBackend> {
        let device = Default::default();
        let mut store = ParamStore::new(prefix);
        store
            .declare(
                format!("{prefix}GRU_0_W"),
                Tensor::from_floats([[0.25, -1.5, 3.0], [0.125, 2.0, -0.75]], &device),
            )
            .unwrap();
        store
            .declare(
                format!("{prefix}GRU_0_init"),
                Tensor::from_floats([[1.0, 2.0]], &device),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let device = Default::default();
        let mut store = sample_store("");
        let err = store
            .declare("GRU_0_W", Tensor::<TestBackend, 2>::zeros([1, 1], &device))
            .unwrap_err();
        assert!(matches!(err, NetError::DuplicateParam(_)));
    }

    #[test]
    fn test_init_params_not_optimizable() {
        let store = sample_store("");
        assert_eq!(store.optimizable_positions(), vec![0]);
        assert!(is_init_param("LSTM_1_init"));
        assert!(!is_init_param("LSTM_1_W"));
    }

    #[test]
    fn test_archive_strips_prefix() {
        let store = sample_store("abc_");
        let archive = store.to_archive().unwrap();
        let keys: Vec<_> = archive.keys().cloned().collect();
        assert_eq!(keys, vec!["GRU_0_W".to_string(), "GRU_0_init".to_string()]);
        assert_eq!(archive["GRU_0_W"].shape(), &[2, 3]);
    }

    #[test]
    fn test_save_load_bit_identical() {
        let dir = tempdir().unwrap();
        let device = Default::default();
        let path = archive_path(dir.path(), None);

        let store = sample_store("");
        store.save(&path).unwrap();

        let mut other = ParamStore::<TestBackend>::new("xyz_");
        other
            .declare("xyz_GRU_0_W", Tensor::zeros([2, 3], &device))
            .unwrap();
        other
            .declare("xyz_GRU_0_init", Tensor::zeros([1, 2], &device))
            .unwrap();
        other.load(&path, &device).unwrap();

        for (a, b) in store.iter().zip(other.iter()) {
            let a = a.value.to_data().to_vec::<f32>().unwrap();
            let b = b.value.to_data().to_vec::<f32>().unwrap();
            let a_bits: Vec<u32> = a.iter().map(|v| v.to_bits()).collect();
            let b_bits: Vec<u32> = b.iter().map(|v| v.to_bits()).collect();
            assert_eq!(a_bits, b_bits);
        }
    }

    #[test]
    fn test_missing_key_fails_without_partial_write() {
        let device = Default::default();
        let mut store = sample_store("");
        let mut archive = store.to_archive().unwrap();
        archive.remove("GRU_0_init");
        archive.insert("GRU_0_W".into(), ArrayD::from_elem(IxDyn(&[2, 3]), 9.0));

        let err = store.overlay(&archive, &device).unwrap_err();
        assert!(matches!(err, NetError::MissingParam(ref k) if k == "GRU_0_init"));

        let w = store.get("GRU_0_W").unwrap().clone();
        assert!(w.max().into_scalar() < 9.0);
    }

    #[test]
    fn test_shape_mismatch_reported() {
        let device = Default::default();
        let mut store = sample_store("");
        let mut archive = store.to_archive().unwrap();
        archive.insert("GRU_0_W".into(), ArrayD::zeros(IxDyn(&[3, 2])));

        match store.overlay(&archive, &device) {
            Err(NetError::ShapeMismatch { name, expected, found }) => {
                assert_eq!(name, "GRU_0_W");
                assert_eq!(expected, vec![2, 3]);
                assert_eq!(found, vec![3, 2]);
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_view_lookup() {
        let store = sample_store("p_");
        let view = store.view(|t| t.clone());
        assert_eq!(view.get("p_GRU_0_init").unwrap().dims(), [1, 2]);
        assert!(view.get("GRU_0_init").is_err());
    }
}
