use std::path::PathBuf;

use clap::Args;

pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Args)]
pub struct TrainConfig {
    /// Number of passes over the training set
    #[arg(long, default_value_t = 5)]
    pub epochs: usize,

    /// Samples per gradient update
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    /// Fraction of the training set held out for validation
    #[arg(long, default_value_t = 0.1)]
    pub validation_split: f64,

    /// Adam learning rate
    #[arg(long, default_value_t = 0.001)]
    pub learning_rate: f32,

    /// Seed for weight initialisation and shuffling
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 64,
            validation_split: 0.1,
            learning_rate: 0.001,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct SpamConfig {
    /// Labeled feature table with a `spam` column
    #[arg(long, default_value = "spam.csv")]
    pub csv: PathBuf,

    /// Fraction of rows used for testing
    #[arg(long, default_value_t = 0.2)]
    pub test_size: f64,

    /// Seed for the train/test split
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            csv: PathBuf::from("spam.csv"),
            test_size: 0.2,
            seed: DEFAULT_SEED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TrainCli {
        #[command(flatten)]
        train: TrainConfig,
    }

    #[derive(Parser)]
    struct SpamCli {
        #[command(flatten)]
        spam: SpamConfig,
    }

    #[test]
    fn cli_defaults_match_default_impls() {
        let train_cli = TrainCli::parse_from(["test"]);
        let spam_cli = SpamCli::parse_from(["test"]);
        let train = TrainConfig::default();
        let spam = SpamConfig::default();

        assert_eq!(train_cli.train.epochs, train.epochs);
        assert_eq!(train_cli.train.batch_size, train.batch_size);
        assert!((train_cli.train.validation_split - train.validation_split).abs() < f64::EPSILON);
        assert!((train_cli.train.learning_rate - train.learning_rate).abs() < f32::EPSILON);
        assert_eq!(train_cli.train.seed, 42);
        assert_eq!(spam_cli.spam.csv, spam.csv);
        assert!((spam_cli.spam.test_size - spam.test_size).abs() < f64::EPSILON);
        assert_eq!(spam_cli.spam.seed, spam.seed);
    }

    #[test]
    fn flags_override_defaults() {
        let train_cli = TrainCli::parse_from(["test", "--epochs", "1"]);
        let spam_cli = SpamCli::parse_from(["test", "--csv", "other.csv"]);
        assert_eq!(train_cli.train.epochs, 1);
        assert_eq!(spam_cli.spam.csv, PathBuf::from("other.csv"));
    }
}
