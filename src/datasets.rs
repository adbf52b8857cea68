//! Readers for behaviour logs, tokenised titles and embedding tables.
//!
//! All inputs are CSV. List-valued cells hold space-separated integer ids,
//! and an empty cell is an empty list.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv;
use failure;

use wyrm::Arr;

use crate::data::{ArticleTokens, Behaviors, Impression};
use crate::{ArticleId, Timestamp, TokenId, UserId};

/// Columns a behaviour log must provide.
pub const BEHAVIOR_COLUMNS: [&str; 6] = [
    "impression_id",
    "user_id",
    "impression_time",
    "article_id_fixed",
    "article_ids_inview",
    "article_ids_clicked",
];

/// Columns a title table must provide.
pub const ARTICLE_COLUMNS: [&str; 2] = ["article_id", "title_tokens"];

/// Dataset error types.
#[derive(Debug, Fail)]
pub enum DatasetError {
    /// The table lacks a required column.
    #[fail(display = "Missing required column: {}.", _0)]
    MissingColumn(String),
    /// A list cell holds something other than space-separated integers.
    #[fail(display = "Malformed list in column {}: {:?}.", column, value)]
    MalformedList {
        /// Column of the cell.
        column: &'static str,
        /// Cell contents.
        value: String,
    },
}

#[derive(Deserialize)]
struct BehaviorRecord {
    impression_id: usize,
    user_id: UserId,
    impression_time: Timestamp,
    article_id_fixed: String,
    article_ids_inview: String,
    article_ids_clicked: String,
}

#[derive(Deserialize)]
struct ArticleRecord {
    article_id: ArticleId,
    title_tokens: String,
}

fn check_columns(headers: &csv::StringRecord, required: &[&str]) -> Result<(), DatasetError> {
    for &column in required {
        if !headers.iter().any(|header| header.trim() == column) {
            return Err(DatasetError::MissingColumn(column.to_owned()));
        }
    }

    Ok(())
}

fn parse_list(column: &'static str, value: &str) -> Result<Vec<usize>, DatasetError> {
    value
        .split_whitespace()
        .map(|id| {
            id.parse().map_err(|_| DatasetError::MalformedList {
                column,
                value: value.to_owned(),
            })
        })
        .collect()
}

/// Read impressions from a behaviour log.
pub fn read_behaviors<R: Read>(reader: R) -> Result<Behaviors, failure::Error> {
    let mut reader = csv::Reader::from_reader(reader);
    check_columns(reader.headers()?, &BEHAVIOR_COLUMNS)?;

    let mut behaviors = Behaviors::new();

    for record in reader.deserialize() {
        let record: BehaviorRecord = record?;

        behaviors.push(Impression::new(
            record.impression_id,
            record.user_id,
            record.impression_time,
            parse_list("article_id_fixed", &record.article_id_fixed)?,
            parse_list("article_ids_inview", &record.article_ids_inview)?,
            parse_list("article_ids_clicked", &record.article_ids_clicked)?,
        ));
    }

    info!(
        impressions = behaviors.len(),
        users = behaviors.num_users(),
        time_range = ?behaviors.time_range(),
        "read behaviour log"
    );

    Ok(behaviors)
}

/// Load impressions from a behaviour log file.
pub fn load_behaviors<P: AsRef<Path>>(path: P) -> Result<Behaviors, failure::Error> {
    read_behaviors(File::open(path)?)
}

/// Read tokenised titles, truncating or padding each to `title_size`.
pub fn read_article_tokens<R: Read>(
    reader: R,
    title_size: usize,
) -> Result<ArticleTokens, failure::Error> {
    let mut reader = csv::Reader::from_reader(reader);
    check_columns(reader.headers()?, &ARTICLE_COLUMNS)?;

    let mut articles = ArticleTokens::new(title_size);

    for record in reader.deserialize() {
        let record: ArticleRecord = record?;
        let tokens: Vec<TokenId> = parse_list("title_tokens", &record.title_tokens)?;

        articles.insert(record.article_id, &tokens);
    }

    info!(
        articles = articles.len(),
        vocab_size = articles.vocab_size(),
        "read article titles"
    );

    Ok(articles)
}

/// Load tokenised titles from a file.
pub fn load_article_tokens<P: AsRef<Path>>(
    path: P,
    title_size: usize,
) -> Result<ArticleTokens, failure::Error> {
    read_article_tokens(File::open(path)?, title_size)
}

/// Read a headerless, space-delimited embedding table: one row per token.
pub fn read_embeddings<R: Read>(reader: R) -> Result<Arr, failure::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b' ')
        .from_reader(reader);

    let mut values = Vec::new();
    let mut rows = 0;

    for record in reader.records() {
        let record = record?;
        for value in record.iter() {
            values.push(value.trim().parse::<f32>()?);
        }
        rows += 1;
    }

    let cols = if rows == 0 { 0 } else { values.len() / rows };

    Ok(Arr::from_shape_vec((rows, cols), values)?)
}

/// Load an embedding table from a file.
pub fn load_embeddings<P: AsRef<Path>>(path: P) -> Result<Arr, failure::Error> {
    read_embeddings(File::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEHAVIORS: &str = "\
impression_id,user_id,impression_time,article_id_fixed,article_ids_inview,article_ids_clicked
1,10,100,3 4 5,6 7 8,7
2,11,101,,6 9,9 6
";

    #[test]
    fn reads_behaviors() {
        let behaviors = read_behaviors(BEHAVIORS.as_bytes()).unwrap();

        assert_eq!(behaviors.len(), 2);
        assert_eq!(behaviors.num_users(), 2);
        assert_eq!(behaviors.time_range(), Some((100, 101)));

        let first = &behaviors.data()[0];
        assert_eq!(first.history(), &[3, 4, 5]);
        assert_eq!(first.inview(), &[6, 7, 8]);
        assert_eq!(first.labels(), vec![0.0, 1.0, 0.0]);

        let second = &behaviors.data()[1];
        assert!(second.history().is_empty());
        assert_eq!(second.clicked(), &[9, 6]);
    }

    #[test]
    fn missing_columns_are_named() {
        let data = "impression_id,user_id,article_id_fixed,article_ids_inview\n1,2,3,4\n";

        let error = read_behaviors(data.as_bytes()).unwrap_err();

        match error.downcast::<DatasetError>() {
            Ok(DatasetError::MissingColumn(column)) => assert_eq!(column, "impression_time"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn malformed_lists_are_rejected() {
        let data = "\
impression_id,user_id,impression_time,article_id_fixed,article_ids_inview,article_ids_clicked
1,10,100,3 x,6,6
";

        assert!(read_behaviors(data.as_bytes()).is_err());
    }

    #[test]
    fn reads_article_tokens() {
        let data = "article_id,title_tokens\n1,5 6 7 8\n2,9\n";

        let articles = read_article_tokens(data.as_bytes(), 3).unwrap();

        assert_eq!(articles.len(), 2);
        assert_eq!(articles.get(1), &[5, 6, 7]);
        assert_eq!(articles.get(2), &[9, 0, 0]);
        assert_eq!(articles.get(3), &[0, 0, 0]);
        assert_eq!(articles.vocab_size(), 10);
    }

    #[test]
    fn reads_embeddings() {
        let data = "0.0 0.0\n0.5 -1.5\n2 3\n";

        let embeddings = read_embeddings(data.as_bytes()).unwrap();

        assert_eq!(embeddings.dim(), (3, 2));
        assert_eq!(embeddings[(1, 1)], -1.5);

        assert!(read_embeddings("1 2\n3\n".as_bytes()).is_err());
    }
}
