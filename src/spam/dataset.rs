use std::fmt;
use std::fs;
use std::path::Path;

use csv::ReaderBuilder;
use ndarray::{Array2, Axis};
use tracing::info;

use crate::error::{Error, Result};

pub const TARGET_COLUMN: &str = "spam";

// frames longer than this print only their head and tail
const MAX_PRINTED_ROWS: usize = 60;
const EDGE_ROWS: usize = 5;
const MAX_DECIMALS: usize = 6;

/// Numeric feature table with a binary `spam` target. `index` keeps each
/// row's position in the source file so subsets still print their origin.
#[derive(Debug, Clone)]
pub struct SpamDataset {
    pub feature_names: Vec<String>,
    pub integer_columns: Vec<bool>,
    pub index: Vec<usize>,
    pub features: Array2<f64>,
    pub labels: Vec<u8>,
}

/// Every Latin-1 byte maps to the code point of the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&byte| char::from(byte)).collect()
}

pub fn load_csv(path: &Path) -> Result<SpamDataset> {
    let bytes = fs::read(path)?;
    let dataset = parse(&decode_latin1(&bytes))?;

    info!(
        rows = dataset.len(),
        features = dataset.feature_names.len(),
        spam = dataset.labels.iter().filter(|&&label| label == 1).count(),
        "loaded {}",
        path.display()
    );

    Ok(dataset)
}

fn parse_label(value: &str) -> Result<u8> {
    let trimmed = value.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => return Ok(1),
        "false" => return Ok(0),
        _ => {}
    }

    match trimmed.parse::<f64>() {
        Ok(number) if number == 0.0 => Ok(0),
        Ok(number) if number == 1.0 => Ok(1),
        _ => Err(Error::InvalidLabel(value.to_string())),
    }
}

pub fn parse(text: &str) -> Result<SpamDataset> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let target_index = headers
        .iter()
        .position(|header| header.trim() == TARGET_COLUMN)
        .ok_or_else(|| Error::MissingColumn(TARGET_COLUMN.to_string()))?;

    let feature_indices: Vec<usize> = (0..headers.len()).filter(|&i| i != target_index).collect();
    let feature_names: Vec<String> = feature_indices
        .iter()
        .map(|&i| headers.get(i).unwrap_or_default().to_string())
        .collect();

    let mut values = Vec::new();
    let mut labels = Vec::new();
    let mut integer_columns = vec![true; feature_names.len()];

    for (row, result) in reader.records().enumerate() {
        let record = result?;

        labels.push(parse_label(record.get(target_index).unwrap_or_default())?);

        for (column, &field_index) in feature_indices.iter().enumerate() {
            let raw = record.get(field_index).unwrap_or_default().trim();
            let value = raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| Error::NonNumeric {
                    column: feature_names[column].clone(),
                    row,
                    value: raw.to_string(),
                })?;

            integer_columns[column] &= raw.parse::<i64>().is_ok();
            values.push(value);
        }
    }

    if labels.is_empty() {
        return Err(Error::EmptyDataset);
    }

    let features = Array2::from_shape_vec((labels.len(), feature_names.len()), values)?;

    Ok(SpamDataset {
        feature_names,
        integer_columns,
        index: (0..labels.len()).collect(),
        features,
        labels,
    })
}

impl SpamDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Rows at `positions`, in that order.
    pub fn select(&self, positions: &[usize]) -> SpamDataset {
        SpamDataset {
            feature_names: self.feature_names.clone(),
            integer_columns: self.integer_columns.clone(),
            index: positions.iter().map(|&p| self.index[p]).collect(),
            features: self.features.select(Axis(0), positions),
            labels: positions.iter().map(|&p| self.labels[p]).collect(),
        }
    }

    /// Feature columns laid out like a printed data frame.
    pub fn table(&self) -> FeatureTable<'_> {
        FeatureTable { dataset: self }
    }
}

pub struct FeatureTable<'a> {
    dataset: &'a SpamDataset,
}

impl FeatureTable<'_> {
    fn visible_rows(&self) -> Vec<Option<usize>> {
        let rows = self.dataset.len();
        if rows > MAX_PRINTED_ROWS {
            (0..EDGE_ROWS)
                .map(Some)
                .chain([None])
                .chain((rows - EDGE_ROWS..rows).map(Some))
                .collect()
        } else {
            (0..rows).map(Some).collect()
        }
    }

    fn column_cells(&self, column: usize, rows: &[Option<usize>]) -> Vec<String> {
        let values = self.dataset.features.column(column);

        if self.dataset.integer_columns[column] {
            return rows
                .iter()
                .map(|row| row.map_or_else(|| "...".to_string(), |r| format!("{}", values[r] as i64)))
                .collect();
        }

        let decimals = rows
            .iter()
            .flatten()
            .map(|&r| significant_decimals(values[r]))
            .max()
            .unwrap_or(1);

        rows.iter()
            .map(|row| row.map_or_else(|| "...".to_string(), |r| format!("{:.*}", decimals, values[r])))
            .collect()
    }
}

fn significant_decimals(value: f64) -> usize {
    let formatted = format!("{:.*}", MAX_DECIMALS, value);
    let trimmed = formatted.trim_end_matches('0');
    let decimals = trimmed.split_once('.').map_or(0, |(_, fraction)| fraction.len());
    decimals.max(1)
}

impl fmt::Display for FeatureTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.visible_rows();
        let index: Vec<String> = rows
            .iter()
            .map(|row| row.map_or_else(|| "...".to_string(), |r| self.dataset.index[r].to_string()))
            .collect();
        let columns: Vec<Vec<String>> = (0..self.dataset.feature_names.len())
            .map(|column| self.column_cells(column, &rows))
            .collect();

        let index_width = index.iter().map(String::len).max().unwrap_or(0);
        let widths: Vec<usize> = columns
            .iter()
            .zip(&self.dataset.feature_names)
            .map(|(cells, name)| {
                cells
                    .iter()
                    .map(String::len)
                    .chain([name.chars().count()])
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        write!(f, "{:index_width$}", "")?;
        for (name, &width) in self.dataset.feature_names.iter().zip(&widths) {
            write!(f, "  {name:>width$}")?;
        }

        for (line, label) in index.iter().enumerate() {
            write!(f, "\n{label:<index_width$}")?;
            for (cells, &width) in columns.iter().zip(&widths) {
                write!(f, "  {:>width$}", cells[line])?;
            }
        }

        if self.dataset.len() > MAX_PRINTED_ROWS {
            write!(
                f,
                "\n\n[{} rows x {} columns]",
                self.dataset.len(),
                self.dataset.feature_names.len()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
word_freq_free,capital_run_length,spam
0.5,12,1
0,3,0
1.25,40,1
";

    #[test]
    fn parses_features_and_target() {
        let dataset = parse(SAMPLE).unwrap();

        assert_eq!(dataset.feature_names, vec!["word_freq_free", "capital_run_length"]);
        assert_eq!(dataset.labels, vec![1, 0, 1]);
        assert_eq!(dataset.features.dim(), (3, 2));
        assert!((dataset.features[(2, 0)] - 1.25).abs() < f64::EPSILON);
        assert_eq!(dataset.integer_columns, vec![false, true]);
        assert_eq!(dataset.index, vec![0, 1, 2]);
    }

    #[test]
    fn target_column_may_sit_anywhere_and_be_boolean() {
        let dataset = parse("spam,a\nTrue,1\nfalse,2\n1.0,3\n").unwrap();
        assert_eq!(dataset.labels, vec![1, 0, 1]);
        assert_eq!(dataset.feature_names, vec!["a"]);
    }

    #[test]
    fn missing_target_column_is_fatal() {
        assert!(matches!(
            parse("a,b\n1,2\n"),
            Err(Error::MissingColumn(column)) if column == "spam"
        ));
    }

    #[test]
    fn non_numeric_feature_is_fatal() {
        let result = parse("subject,spam\n3,1\nwin money,0\n");
        assert!(matches!(
            result,
            Err(Error::NonNumeric { ref column, row: 1, .. }) if column == "subject"
        ));
        assert!(matches!(parse("a,spam\nNaN,1\n"), Err(Error::NonNumeric { .. })));
    }

    #[test]
    fn non_binary_target_is_fatal() {
        assert!(matches!(parse("a,spam\n1,2\n"), Err(Error::InvalidLabel(_))));
    }

    #[test]
    fn header_only_file_is_empty() {
        assert!(matches!(parse("a,spam\n"), Err(Error::EmptyDataset)));
    }

    #[test]
    fn ragged_rows_are_csv_errors() {
        assert!(matches!(parse("a,spam\n1,0,7\n"), Err(Error::Csv(_))));
    }

    #[test]
    fn latin1_bytes_decode_to_matching_code_points() {
        assert_eq!(decode_latin1(b"caf\xe9 \xa3"), "café £");
    }

    #[test]
    fn loads_latin1_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"r\xe9sum\xe9,spam\n1,0\n2,1\n").unwrap();

        let dataset = load_csv(file.path()).unwrap();
        assert_eq!(dataset.feature_names, vec!["résumé"]);
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_csv(&dir.path().join("spam.csv")), Err(Error::Io(_))));
    }

    #[test]
    fn select_keeps_original_index() {
        let dataset = parse(SAMPLE).unwrap();
        let subset = dataset.select(&[2, 0]);

        assert_eq!(subset.index, vec![2, 0]);
        assert_eq!(subset.labels, vec![1, 1]);
        assert!((subset.features[(0, 1)] - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn table_aligns_columns_like_a_data_frame() {
        let dataset = parse(SAMPLE).unwrap().select(&[2, 1]);
        let printed = dataset.table().to_string();

        assert_eq!(
            printed,
            "   word_freq_free  capital_run_length\n\
             2            1.25                  40\n\
             1            0.00                   3"
        );
    }

    #[test]
    fn long_tables_show_head_and_tail() {
        let mut csv = String::from("x,spam\n");
        for i in 0..70 {
            csv.push_str(&format!("{i},{}\n", i % 2));
        }
        let printed = parse(&csv).unwrap().table().to_string();
        let lines: Vec<&str> = printed.lines().collect();

        assert_eq!(lines.len(), 1 + 11 + 2);
        assert!(lines[1].starts_with('0'));
        assert!(lines[6].starts_with("..."));
        assert!(lines[11].starts_with("69"));
        assert_eq!(lines[13], "[70 rows x 1 columns]");
    }
}
