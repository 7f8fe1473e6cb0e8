//! SVG figures for the two classifiers.

use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayView2};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use tracing::info;

use crate::error::{Error, Result};
use crate::spam::metrics::ConfusionMatrix;

const DIGIT_SIZE: (u32, u32) = (420, 460);
const MATRIX_SIZE: (u32, u32) = (480, 480);
const TITLE_FONT: (&str, u32) = ("sans-serif", 24);
const LABEL_FONT: (&str, u32) = ("sans-serif", 16);
const COUNT_FONT: (&str, u32) = ("sans-serif", 28);

// pixels reserved for tick labels left of and below the heatmap
const AXIS_BAND: u32 = 60;
// darkest heatmap cell
const HEAT: RGBColor = RGBColor(8, 48, 107);

fn plot_error(error: impl std::fmt::Display) -> Error {
    Error::Plot(error.to_string())
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

/// Gray levels stretched over the image's own range, darkest pixel black
/// and brightest white. A flat image is all black.
fn grayscale(image: ArrayView2<f32>) -> Array2<u8> {
    let (low, high) = image
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(low, high), &value| {
            (low.min(value), high.max(value))
        });
    let range = high - low;

    image.mapv(|value| {
        if range > 0.0 {
            ((value - low) / range * 255.0).round() as u8
        } else {
            0
        }
    })
}

/// Grayscale image of one digit titled with the predicted class.
pub fn render_digit<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    image: ArrayView2<f32>,
    predicted: usize,
) -> Result<()> {
    let (rows, cols) = image.dim();
    root.fill(&WHITE).map_err(plot_error)?;

    // y runs top to bottom like image rows
    let mut chart = ChartBuilder::on(root)
        .caption(format!("Predicted Label: {predicted}"), TITLE_FONT)
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(0..cols as i32, rows as i32..0)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .label_style(LABEL_FONT)
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(grayscale(image).indexed_iter().map(|((row, col), &shade)| {
            let (x, y) = (col as i32, row as i32);
            Rectangle::new([(x, y), (x + 1, y + 1)], RGBColor(shade, shade, shade).filled())
        }))
        .map_err(plot_error)?;

    Ok(())
}

pub fn save_digit(path: &Path, image: ArrayView2<f32>, predicted: usize) -> Result<()> {
    ensure_parent(path)?;

    let root = SVGBackend::new(path, DIGIT_SIZE).into_drawing_area();
    render_digit(&root, image, predicted)?;
    root.present().map_err(plot_error)?;

    info!("saved digit plot to {}", path.display());
    Ok(())
}

fn heat_color(intensity: f64) -> RGBColor {
    let mix = |low: u8, high: u8| {
        (f64::from(low) + (f64::from(high) - f64::from(low)) * intensity).round() as u8
    };
    RGBColor(mix(247, HEAT.0), mix(251, HEAT.1), mix(255, HEAT.2))
}

fn centered(font: (&'static str, u32), color: &RGBColor) -> TextStyle<'static> {
    font.into_font()
        .color(color)
        .pos(Pos::new(HPos::Center, VPos::Center))
}

/// Annotated 2x2 heatmap. True labels run down the rows and predicted
/// labels across the columns, class 0 first in both.
pub fn render_confusion_matrix<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    matrix: &ConfusionMatrix,
) -> Result<()> {
    let cells = matrix.as_array();
    let peak = cells.iter().flatten().copied().max().unwrap_or(0).max(1);

    root.fill(&WHITE).map_err(plot_error)?;
    let area = root.titled("Confusion Matrix", TITLE_FONT).map_err(plot_error)?;

    let (_, height) = area.dim_in_pixel();
    let (axis_left, body) = area.split_horizontally(AXIS_BAND);
    let (grid, axis_bottom) = body.split_vertically(height.saturating_sub(AXIS_BAND));
    let (grid_width, grid_height) = grid.dim_in_pixel();

    // split_evenly yields panels row by row, matching the flattened counts
    for (panel, &count) in grid.split_evenly((2, 2)).iter().zip(cells.iter().flatten()) {
        let intensity = count as f64 / peak as f64;
        panel.fill(&heat_color(intensity)).map_err(plot_error)?;

        let ink = if intensity > 0.5 { WHITE } else { BLACK };
        let (width, height) = panel.dim_in_pixel();
        panel
            .draw_text(
                &count.to_string(),
                &centered(COUNT_FONT, &ink),
                (width as i32 / 2, height as i32 / 2),
            )
            .map_err(plot_error)?;
    }

    let label_style = centered(LABEL_FONT, &BLACK);
    let (cell_width, cell_height) = (grid_width as i32 / 2, grid_height as i32 / 2);
    for class in 0..2 {
        let offset = class * 2 + 1;
        axis_bottom
            .draw_text(&class.to_string(), &label_style, (offset * cell_width / 2, 12))
            .map_err(plot_error)?;
        axis_left
            .draw_text(
                &class.to_string(),
                &label_style,
                (AXIS_BAND as i32 - 12, offset * cell_height / 2),
            )
            .map_err(plot_error)?;
    }
    axis_bottom
        .draw_text("Predicted", &label_style, (grid_width as i32 / 2, 40))
        .map_err(plot_error)?;
    axis_left
        .draw_text("Actual", &label_style, (16, grid_height as i32 / 2))
        .map_err(plot_error)?;

    Ok(())
}

pub fn save_confusion_matrix(path: &Path, matrix: &ConfusionMatrix) -> Result<()> {
    ensure_parent(path)?;

    let root = SVGBackend::new(path, MATRIX_SIZE).into_drawing_area();
    render_confusion_matrix(&root, matrix)?;
    root.present().map_err(plot_error)?;

    info!("saved confusion matrix to {}", path.display());
    Ok(())
}
