//! Numpy tensor readers.
//!
//! `single_tensor` loads `.npy` files eagerly. `FromFileList` walks plain-text
//! list files naming `.npz` archives and yields their arrays lazily; every
//! call to `load` starts a fresh pass.
//!
//! Arrays are returned as `f32`. Stored `f64` data is converted on load.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use ndarray::{concatenate, ArrayD, ArrayViewD, Axis};
use ndarray_npy::{read_npy, NpzReader, ReadNpyError, ReadNpzError};

use crate::data::dataset::Series;
use crate::error::ReaderError;

/// Load one tensor, or the axis-0 concatenation of several.
pub fn single_tensor<P: AsRef<Path>>(files: &[P]) -> Result<ArrayD<f32>, ReaderError> {
    match files {
        [] => Err(ReaderError::NoFiles),
        [file] => load_npy(file.as_ref()),
        _ => {
            let arrays = files
                .iter()
                .map(|f| load_npy(f.as_ref()))
                .collect::<Result<Vec<_>, _>>()?;
            let views: Vec<ArrayViewD<'_, f32>> = arrays.iter().map(|a| a.view()).collect();
            Ok(concatenate(Axis(0), &views)?)
        }
    }
}

fn load_npy(path: &Path) -> Result<ArrayD<f32>, ReaderError> {
    let loaded = match read_npy::<_, ArrayD<f32>>(path) {
        Err(ReadNpyError::WrongDescriptor(_)) => read_npy::<_, ArrayD<f64>>(path).map(narrow),
        other => other,
    };
    loaded.map_err(|source| ReaderError::Npy {
        path: path.to_path_buf(),
        source,
    })
}

fn narrow(arr: ArrayD<f64>) -> ArrayD<f32> {
    arr.mapv(|v| v as f32)
}

/// Loader for `.npz` archives listed one per line in list files.
#[derive(Debug, Clone)]
pub struct FromFileList {
    prefix: PathBuf,
    shape: Vec<usize>,
    suffix: String,
    default_tensor_name: String,
}

impl FromFileList {
    /// `prefix` is joined with every listed path; `shape` is what every
    /// loaded array must have.
    pub fn new(prefix: impl Into<PathBuf>, shape: Vec<usize>) -> Self {
        Self {
            prefix: prefix.into(),
            shape,
            suffix: String::new(),
            default_tensor_name: "arr_0".to_string(),
        }
    }

    /// Text appended to every listed path.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Archive entry to extract (`arr_0` by default).
    pub fn with_tensor_name(mut self, name: impl Into<String>) -> Self {
        self.default_tensor_name = name.into();
        self
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Start a lazy pass over the arrays named in `list_files`.
    pub fn load<P: AsRef<Path>>(&self, list_files: &[P]) -> FileListArrays<'_> {
        FileListArrays {
            loader: self,
            pending: list_files.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            current: None,
            failed: false,
        }
    }

    /// Load everything into a tensor series.
    pub fn load_series<P: AsRef<Path>>(&self, list_files: &[P]) -> Result<Series, ReaderError> {
        let arrays = self.load(list_files).collect::<Result<Vec<_>, _>>()?;
        Ok(Series::Tensors(arrays))
    }

    fn resolve(&self, line: &str) -> PathBuf {
        let mut path = self.prefix.join(line).into_os_string();
        path.push(&self.suffix);
        PathBuf::from(path)
    }

    fn load_entry(&self, path: &Path) -> Result<ArrayD<f32>, ReaderError> {
        let npz_err = |source| ReaderError::Npz {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(|source| ReaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut npz = NpzReader::new(file).map_err(npz_err)?;

        // numpy stores entries as `<name>.npy`
        let wanted = &self.default_tensor_name;
        let with_ext = format!("{}.npy", wanted);
        let entry = npz
            .names()
            .map_err(npz_err)?
            .into_iter()
            .find(|n| n == wanted || *n == with_ext)
            .ok_or_else(|| ReaderError::MissingEntry {
                path: path.to_path_buf(),
                name: wanted.clone(),
            })?;
        let first: Result<ArrayD<f32>, ReadNpzError> = npz.by_name(&entry);
        let arr = match first {
            Err(ReadNpzError::Npy(ReadNpyError::WrongDescriptor(_))) => {
                let wide: Result<ArrayD<f64>, ReadNpzError> = npz.by_name(&entry);
                wide.map(narrow)
            }
            other => other,
        }
        .map_err(npz_err)?;

        if arr.shape() != self.shape.as_slice() {
            return Err(ReaderError::ShapeMismatch {
                expected: self.shape.clone(),
                found: arr.shape().to_vec(),
            });
        }
        Ok(arr)
    }
}

/// Lazy, finite sequence of arrays produced by [`FromFileList::load`].
///
/// Stops after the first error.
pub struct FileListArrays<'a> {
    loader: &'a FromFileList,
    pending: VecDeque<PathBuf>,
    current: Option<(PathBuf, Lines<BufReader<File>>)>,
    failed: bool,
}

impl Iterator for FileListArrays<'_> {
    type Item = Result<ArrayD<f32>, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.current.is_none() {
                let list_path = self.pending.pop_front()?;
                match File::open(&list_path) {
                    Ok(f) => self.current = Some((list_path, BufReader::new(f).lines())),
                    Err(source) => {
                        self.failed = true;
                        return Some(Err(ReaderError::Io {
                            path: list_path,
                            source,
                        }));
                    }
                }
            }
            let Some((list_path, lines)) = self.current.as_mut() else {
                continue;
            };

            match lines.next() {
                Some(Ok(line)) => {
                    let line = line.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    let path = self.loader.resolve(line);
                    let result = self.loader.load_entry(&path);
                    self.failed = result.is_err();
                    return Some(result);
                }
                Some(Err(source)) => {
                    let path = list_path.clone();
                    self.failed = true;
                    return Some(Err(ReaderError::Io { path, source }));
                }
                None => self.current = None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3, IxDyn};
    use ndarray_npy::{write_npy, NpzWriter};
    use std::io::Write;

    fn write_npz(path: &Path, arr: &ArrayD<f32>) {
        let mut npz = NpzWriter::new(File::create(path).unwrap());
        npz.add_array("arr_0", arr).unwrap();
        npz.finish().unwrap();
    }

    #[test]
    fn single_file_is_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.npy");
        let arr = Array2::<f32>::from_shape_fn((2, 3), |(i, j)| (i * 3 + j) as f32).into_dyn();
        write_npy(&path, &arr).unwrap();

        let loaded = single_tensor(&[&path]).unwrap();
        assert_eq!(loaded, arr);
    }

    #[test]
    fn multiple_files_concatenate_on_first_axis() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.npy");
        let b = dir.path().join("b.npy");
        write_npy(&a, &Array3::<f32>::zeros((2, 4, 5))).unwrap();
        write_npy(&b, &Array3::<f32>::ones((3, 4, 5))).unwrap();

        let loaded = single_tensor(&[&a, &b]).unwrap();
        assert_eq!(loaded.shape(), &[5, 4, 5]);
        assert_eq!(loaded[IxDyn(&[1, 0, 0])], 0.0);
        assert_eq!(loaded[IxDyn(&[2, 0, 0])], 1.0);
    }

    #[test]
    fn double_precision_arrays_are_narrowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.npy");
        write_npy(&path, &ndarray::arr1(&[0.25f64, -2.0]).into_dyn()).unwrap();
        assert_eq!(single_tensor(&[&path]).unwrap(), ndarray::arr1(&[0.25f32, -2.0]).into_dyn());

        let archive = dir.path().join("wide.npz");
        let mut npz = NpzWriter::new(File::create(&archive).unwrap());
        npz.add_array("arr_0", &Array2::<f64>::ones((2, 2)).into_dyn()).unwrap();
        npz.finish().unwrap();
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "wide.npz\n").unwrap();
        let arrays: Vec<_> = FromFileList::new(dir.path(), vec![2, 2])
            .load(&[&list])
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(arrays, vec![Array2::<f32>::ones((2, 2)).into_dyn()]);
    }

    #[test]
    fn no_files_is_an_error() {
        let files: [&Path; 0] = [];
        assert!(matches!(single_tensor(&files), Err(ReaderError::NoFiles)));
    }

    #[test]
    fn file_list_yields_matching_arrays_and_restarts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["x", "y"] {
            let arr = Array2::<f32>::ones((2, 2)).into_dyn();
            write_npz(&dir.path().join(format!("{name}.npz")), &arr);
        }
        let list = dir.path().join("list.txt");
        let mut f = File::create(&list).unwrap();
        writeln!(f, "x").unwrap();
        writeln!(f, "y").unwrap();

        let loader = FromFileList::new(dir.path(), vec![2, 2]).with_suffix(".npz");
        let first: Vec<_> = loader.load(&[&list]).collect::<Result<_, _>>().unwrap();
        let second: Vec<_> = loader.load(&[&list]).collect::<Result<_, _>>().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn file_list_shape_mismatch_names_both_shapes() {
        let dir = tempfile::tempdir().unwrap();
        write_npz(&dir.path().join("x.npz"), &Array2::<f32>::zeros((3, 2)).into_dyn());
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "x.npz\n").unwrap();

        let loader = FromFileList::new(dir.path(), vec![2, 3]);
        let mut arrays = loader.load(&[&list]);
        match arrays.next() {
            Some(Err(ReaderError::ShapeMismatch { expected, found })) => {
                assert_eq!(expected, vec![2, 3]);
                assert_eq!(found, vec![3, 2]);
            }
            other => panic!("expected shape mismatch, got {:?}", other.map(|r| r.is_ok())),
        }
        assert!(arrays.next().is_none());
    }

    #[test]
    fn named_entry_is_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feat.npz");
        let mut npz = NpzWriter::new(File::create(&path).unwrap());
        npz.add_array("features", &Array2::<f32>::ones((1, 4)).into_dyn())
            .unwrap();
        npz.finish().unwrap();
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "feat\n").unwrap();

        let loader = FromFileList::new(dir.path(), vec![1, 4])
            .with_suffix(".npz")
            .with_tensor_name("features");
        let series = loader.load_series(&[&list]).unwrap();
        assert_eq!(series.len(), 1);
    }
}
