use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use classify::config::SpamConfig;
use classify::spam::logistic_regression::LogisticRegression;
use classify::spam::{dataset, metrics, split};
use classify::{logging, plot, report};

/// Fits a logistic regression spam filter and reports test metrics
#[derive(Parser, Debug)]
#[command(name = "spam_classifier")]
#[command(about = "Fits a logistic regression spam filter and reports test metrics")]
struct Cli {
    #[command(flatten)]
    spam: SpamConfig,

    /// Directory for the confusion matrix plot
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Skip writing the confusion matrix plot
    #[arg(long)]
    no_plot: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let data = dataset::load_csv(&cli.spam.csv)
        .with_context(|| format!("loading {}", cli.spam.csv.display()))?;
    let (train, test) = split::train_test_split(&data, cli.spam.test_size, cli.spam.seed)?;
    info!(train = train.len(), test = test.len(), "split dataset");

    let mut model = LogisticRegression::default();
    model
        .fit(&train.features, &train.labels)
        .context("fitting logistic regression")?;
    let predicted = model.predict(&test.features)?;

    println!("{}", test.table());

    let accuracy = metrics::accuracy(&test.labels, &predicted)?;
    let precision = metrics::precision(&test.labels, &predicted)?;
    let recall = metrics::recall(&test.labels, &predicted)?;
    let f1 = metrics::f1_score(&test.labels, &predicted)?;

    println!("Accuracy: {}", report::python_float(accuracy));
    println!("Precision: {}", report::python_float(precision));
    println!("Recall: {}", report::python_float(recall));
    println!("F1 Score: {}", report::python_float(f1));

    if !cli.no_plot {
        let matrix = metrics::confusion_matrix(&test.labels, &predicted)?;
        plot::save_confusion_matrix(&cli.output_dir.join("confusion_matrix.svg"), &matrix)?;
    }

    Ok(())
}
