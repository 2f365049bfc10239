use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tch::{Kind, Tensor};

use crate::error::DatasetError;

/// Writes `id,<class...>` followed by one row of probabilities per id.
pub fn write_submission<W: Write, S: AsRef<str>>(
    writer: W,
    classes: &[String],
    ids: &[S],
    probs: &Tensor,
) -> Result<()> {
    let (rows, cols) = probs.size2()?;
    if rows as usize != ids.len() {
        return Err(DatasetError::ShapeMismatch {
            what: "predictions",
            got: rows as usize,
            expected: ids.len(),
        }
        .into());
    }
    if cols as usize != classes.len() {
        return Err(DatasetError::ShapeMismatch {
            what: "prediction columns",
            got: cols as usize,
            expected: classes.len(),
        }
        .into());
    }

    let values = Vec::<f32>::try_from(&probs.to_kind(Kind::Float).to_device(tch::Device::Cpu).view([-1]))?;
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(std::iter::once("id").chain(classes.iter().map(String::as_str)))?;
    for (id, row) in ids.iter().zip(values.chunks(classes.len().max(1))) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(id.as_ref().to_string());
        record.extend(row.iter().map(|p| p.to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_submission<S: AsRef<str>>(
    path: &Path,
    classes: &[String],
    ids: &[S],
    probs: &Tensor,
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {path:?}"))?;
    write_submission(file, classes, ids, probs).with_context(|| format!("writing {path:?}"))
}
