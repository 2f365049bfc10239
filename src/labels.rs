use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tch::Tensor;

use crate::error::DatasetError;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LabelRecord {
    pub id: String,
    pub breed: String,
}

/// First column of the sample submission, the remaining columns are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TestRecord {
    pub id: String,
}

fn read_records<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {path:?}"))?;

    let records = rdr
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("parsing {path:?}"))?;

    if records.is_empty() {
        return Err(DatasetError::Empty(path.to_path_buf()).into());
    }
    Ok(records)
}

pub fn read_labels(path: &Path) -> Result<Vec<LabelRecord>> {
    read_records(path)
}

pub fn read_test_ids(path: &Path) -> Result<Vec<TestRecord>> {
    read_records(path)
}

/// Maps breed names to one-hot vectors. Classes are kept sorted so the
/// column order of the submission is stable across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<'a, I>(breeds: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let classes: BTreeSet<&str> = breeds.into_iter().collect();
        Self {
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn index_of(&self, breed: &str) -> Result<usize, DatasetError> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(breed))
            .map_err(|_| DatasetError::UnknownBreed(breed.to_string()))
    }

    pub fn one_hot(&self, breed: &str) -> Result<Vec<f32>, DatasetError> {
        let mut v = vec![0f32; self.len()];
        v[self.index_of(breed)?] = 1.0;
        Ok(v)
    }

    /// Stacks the one-hot vectors of `breeds` into a `[N, k]` float tensor.
    pub fn one_hot_matrix<'a, I>(&self, breeds: I) -> Result<Tensor, DatasetError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut data = Vec::new();
        let mut rows = 0i64;
        for breed in breeds {
            data.extend(self.one_hot(breed)?);
            rows += 1;
        }
        Ok(Tensor::from_slice(&data).view([rows, self.len() as i64]))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn classes_are_sorted_and_unique() {
        let enc = LabelEncoder::fit(["pug", "beagle", "pug", "akita"]);
        assert_eq!(enc.classes(), ["akita", "beagle", "pug"]);
        assert_eq!(enc.index_of("pug"), Ok(2));
        assert_eq!(
            enc.index_of("poodle"),
            Err(DatasetError::UnknownBreed("poodle".to_string()))
        );
    }

    #[test]
    fn one_hot_rows() {
        let enc = LabelEncoder::fit(["pug", "beagle", "akita"]);
        assert_eq!(enc.one_hot("beagle").unwrap(), vec![0.0, 1.0, 0.0]);

        let m = enc.one_hot_matrix(["pug", "akita", "pug"]).unwrap();
        assert_eq!(m.size(), [3, 3]);
        let row_sums = Vec::<f32>::try_from(&m.sum_dim_intlist(-1, false, tch::Kind::Float)).unwrap();
        assert_eq!(row_sums, vec![1.0, 1.0, 1.0]);
        let argmax = Vec::<i64>::try_from(&m.argmax(-1, false)).unwrap();
        assert_eq!(argmax, vec![2, 0, 2]);
    }

    #[test]
    fn reads_csv_files() {
        let mut labels = tempfile::NamedTempFile::new().unwrap();
        writeln!(labels, "id,breed\n 000bec180eb18c7604dcecc8fe0dba07 , boston_bull\nabc,dingo").unwrap();
        let rows = read_labels(labels.path()).unwrap();
        assert_eq!(
            rows,
            vec![
                LabelRecord { id: "000bec180eb18c7604dcecc8fe0dba07".into(), breed: "boston_bull".into() },
                LabelRecord { id: "abc".into(), breed: "dingo".into() },
            ]
        );

        let mut test = tempfile::NamedTempFile::new().unwrap();
        writeln!(test, "id,affenpinscher,afghan_hound\nx1,0.5,0.5\nx2,0.5,0.5").unwrap();
        let ids: Vec<_> = read_test_ids(test.path()).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["x1", "x2"]);
    }

    #[test]
    fn empty_file_is_an_error() {
        let mut labels = tempfile::NamedTempFile::new().unwrap();
        writeln!(labels, "id,breed").unwrap();
        let err = read_labels(labels.path()).unwrap_err();
        assert!(matches!(err.downcast_ref::<DatasetError>(), Some(DatasetError::Empty(_))));
    }
}
