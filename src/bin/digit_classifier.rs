use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ndarray::Axis;
use tracing::info;

use classify::config::TrainConfig;
use classify::digits::mnist::{self, MnistSource, DEFAULT_BASE_URL, DEFAULT_DATA_DIR};
use classify::digits::{cnn, preprocess};
use classify::nn::{argmax, Adam, FitOptions};
use classify::{logging, plot, report};

/// Trains a small CNN on MNIST and reports test accuracy
#[derive(Parser, Debug)]
#[command(name = "digit_classifier")]
#[command(about = "Trains a small CNN on MNIST and reports test accuracy")]
struct Cli {
    /// Cache directory for the gzipped IDX files
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Where missing IDX files are downloaded from
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[command(flatten)]
    train: TrainConfig,

    /// Directory for the prediction plot
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Skip writing the prediction plot
    #[arg(long)]
    no_plot: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let source = MnistSource {
        data_dir: cli.data_dir,
        base_url: cli.base_url,
    };
    let (train, test) = mnist::load_data(&source).context("loading MNIST")?;

    let x_train = preprocess::add_channel_axis(preprocess::normalize(&train.images));
    let x_test = preprocess::add_channel_axis(preprocess::normalize(&test.images));
    let y_train = preprocess::to_categorical(&train.labels, cnn::NUM_CLASSES)?;
    let y_test = preprocess::to_categorical(&test.labels, cnn::NUM_CLASSES)?;

    let mut model = cnn::build(cli.train.seed).context("building the CNN")?;
    info!("model summary\n{}", model.summary());

    model.compile(Adam::new(cli.train.learning_rate));
    let history = model
        .fit(&x_train, &y_train, &FitOptions::from(&cli.train))
        .context("training")?;
    if let Some(last) = history.last() {
        info!(loss = last.loss, accuracy = last.accuracy, "training finished");
    }

    let (_, accuracy) = model.evaluate(&x_test, &y_test).context("evaluating")?;
    println!("Test accuracy: {}", report::python_float(accuracy));

    let predictions = model.predict(&x_test).context("predicting")?;
    let first = argmax(&predictions.view())
        .first()
        .copied()
        .context("test set is empty")?;
    println!("Predictions for first test image: {first}");

    if !cli.no_plot {
        let image = x_test.index_axis(Axis(0), 0).index_axis_move(Axis(2), 0);
        let path = cli.output_dir.join("digit_prediction.svg");
        plot::save_digit(&path, image, first)?;
    }

    Ok(())
}
