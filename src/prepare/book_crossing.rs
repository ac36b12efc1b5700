//! CSV preparation for Book-Crossing style exports.
//!
//! ```text
//! books:   ISBN, Year-Of-Publication, ...
//! ratings: User-ID, ISBN, Book-Rating
//! users:   User-ID, ...
//! ```

use std::collections::HashSet;
use std::path::Path;

use csv::StringRecord;
use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, info};

use crate::config::DataSettings;
use crate::model::{Datasets, Rating, TaskDescriptor, TrainingConfiguration};

use super::{DataPreparation, PrepareError, Result, split};

/// Books published after this year are dropped, as are books with year 0.
const LATEST_YEAR: i64 = 2004;

/// Reads ratings from CSV files and splits them per [`DataSettings`].
pub struct CsvPreparation {
    settings: DataSettings,
}

impl CsvPreparation {
    pub fn new(settings: DataSettings) -> Self {
        Self { settings }
    }
}

impl DataPreparation for CsvPreparation {
    fn prepare(
        &self,
        task: &TaskDescriptor,
        configuration: &TrainingConfiguration,
    ) -> Result<Datasets> {
        let books = read_books(&self.settings.books)?;
        let users = read_users(&self.settings.users)?;
        let ratings = read_ratings(&self.settings.ratings, &users, &books)?;
        debug!(
            books = books.len(),
            users = users.len(),
            ratings = ratings.len(),
            "ratings loaded"
        );

        let params = &configuration.document.runtime_parameters;
        let cleaned = split::clean(ratings, params.min_user_ratings, params.min_item_ratings);

        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let datasets = split::partition(
            cleaned,
            self.settings.test_size,
            self.settings.validation_size,
            &mut rng,
        )?;

        info!(
            task = %task.task_type_key,
            train = datasets.train.len(),
            validation = datasets.validation.len(),
            test = datasets.test.len(),
            "preparation done"
        );
        Ok(datasets)
    }
}

/// ISBNs of books with a usable publication year.
fn read_books(path: &Path) -> Result<HashSet<String>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let isbn = column(&headers, path, "ISBN")?;
    let year = column(&headers, path, "Year-Of-Publication")?;

    let mut books = HashSet::new();
    for record in reader.records() {
        let record = record?;
        let Some(year) = record.get(year).and_then(|y| y.trim().parse::<i64>().ok()) else {
            continue;
        };
        if year == 0 || year > LATEST_YEAR {
            continue;
        }
        if let Some(isbn) = record.get(isbn) {
            books.insert(isbn.to_string());
        }
    }
    Ok(books)
}

fn read_users(path: &Path) -> Result<HashSet<String>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let user = column(&headers, path, "User-ID")?;

    let mut users = HashSet::new();
    for record in reader.records() {
        if let Some(id) = record?.get(user) {
            users.insert(id.to_string());
        }
    }
    Ok(users)
}

/// Ratings whose user and book are both known.
fn read_ratings(
    path: &Path,
    users: &HashSet<String>,
    books: &HashSet<String>,
) -> Result<Vec<Rating>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let user = column(&headers, path, "User-ID")?;
    let isbn = column(&headers, path, "ISBN")?;
    let rating = column(&headers, path, "Book-Rating")?;

    let mut ratings = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, csv::Position::line);
        let field = |index: usize| {
            record.get(index).ok_or_else(|| PrepareError::Malformed {
                file: path.to_path_buf(),
                line,
                reason: format!("missing field {}", index + 1),
            })
        };
        let (user_id, book) = (field(user)?, field(isbn)?);
        if !users.contains(user_id) || !books.contains(book) {
            continue;
        }
        let value = field(rating)?
            .trim()
            .parse::<f64>()
            .map_err(|e| PrepareError::Malformed {
                file: path.to_path_buf(),
                line,
                reason: format!("invalid Book-Rating: {e}"),
            })?;
        ratings.push(Rating::new(user_id, book, value));
    }
    Ok(ratings)
}

fn column(headers: &StringRecord, path: &Path, name: &'static str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| PrepareError::MissingColumn {
            file: path.to_path_buf(),
            column: name,
        })
}
