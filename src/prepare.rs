//! Data preparation: raw ratings in, five named partitions out.
//!
//! [`DataPreparation`] is the seam the orchestrator calls. [`CsvPreparation`]
//! reads the books, ratings and users exports and cleans and splits them with
//! the functions in `split`.

mod book_crossing;
mod split;

use std::{io, path::PathBuf};

use crate::model::{Datasets, TaskDescriptor, TrainingConfiguration};

pub use book_crossing::CsvPreparation;

#[cfg(test)]
pub(crate) use book_crossing::tests::write_sample_files;

/// Errors raised while loading or splitting ratings.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{file}: missing column {column:?}")]
    MissingColumn { file: PathBuf, column: &'static str },

    #[error("{file}: line {line}: {reason}")]
    Malformed {
        file: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("partition {0} is empty after cleaning")]
    EmptyPartition(&'static str),

    #[error("train ratings all equal {0}, cannot normalise")]
    FlatRatings(f64),
}

pub type Result<T> = core::result::Result<T, PrepareError>;

/// Produces the dataset partitions a training job runs on.
pub trait DataPreparation {
    fn prepare(
        &self,
        task: &TaskDescriptor,
        configuration: &TrainingConfiguration,
    ) -> Result<Datasets>;
}
