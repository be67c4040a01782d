//! Line plots of training history metrics, rendered to PNG or summarised through the log

use crate::io::configuration::{PLOT_MARGIN, PLOT_PANEL_HEIGHT, PLOT_PANEL_WIDTH};
use crate::io::error::{PipelineError, Result, WithPath, invalid_parameter};
use crate::model::history::History;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};

type ChartResult<T> = std::result::Result<T, Box<dyn Error>>;

// Curve colours in the order they are assigned within a panel
const PALETTE: [RGBColor; 8] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
];

/// Where a history plot goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    /// Render a PNG file with one panel per metric group
    File(PathBuf),
    /// Log a per-metric summary instead of drawing
    Log,
}

/// Split comma-separated metric lists such as `"loss,val_loss"` into groups
///
/// Blank entries are dropped, so `"mse,,mae"` yields `["mse", "mae"]`.
pub fn parse_metric_groups(specs: &[String]) -> Vec<Vec<String>> {
    specs
        .iter()
        .map(|spec| {
            spec.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .collect()
}

/// Plot the given metric groups of a history, one panel per group
///
/// # Errors
///
/// Returns an error if:
/// - No group, or an empty group, is requested
/// - A metric was never recorded
/// - The output directory cannot be created or the chart cannot be drawn and saved
pub fn plot_history(history: &History, groups: &[Vec<String>], target: &RenderTarget) -> Result<()> {
    let panels = collect_series(history, groups)?;

    match target {
        RenderTarget::File(path) => render_png(&panels, path),
        RenderTarget::Log => {
            log_summary(&panels);
            Ok(())
        }
    }
}

type Panel<'a> = Vec<(&'a str, &'a [f64])>;

fn collect_series<'a>(history: &'a History, groups: &'a [Vec<String>]) -> Result<Vec<Panel<'a>>> {
    if groups.is_empty() {
        return Err(invalid_parameter(
            "metrics",
            &"",
            &"at least one metric group is required",
        ));
    }

    groups
        .iter()
        .enumerate()
        .map(|(index, group)| {
            if group.is_empty() {
                return Err(invalid_parameter(
                    "metrics",
                    &format!("group {}", index + 1),
                    &"metric group is empty",
                ));
            }
            group
                .iter()
                .map(|metric| {
                    history
                        .get(metric)
                        .map(|values| (metric.as_str(), values))
                        .ok_or_else(|| PipelineError::UnknownMetric {
                            metric: metric.clone(),
                            available: history
                                .metric_names()
                                .into_iter()
                                .map(str::to_string)
                                .collect(),
                        })
                })
                .collect::<Result<Panel<'a>>>()
        })
        .collect()
}

fn render_png(panels: &[Panel<'_>], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_path(parent, "create directory")?;
    }

    draw_chart(panels, path).map_err(|error| PipelineError::PlotRender {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })?;

    log::info!("Saved history plot to {}", path.display());
    Ok(())
}

fn draw_chart(panels: &[Panel<'_>], path: &Path) -> ChartResult<()> {
    let width = PLOT_PANEL_WIDTH * panels.len() as u32;
    let root = BitMapBackend::new(path, (width, PLOT_PANEL_HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;

    let areas = root.split_evenly((1, panels.len()));
    for (area, panel) in areas.iter().zip(panels) {
        draw_panel(area, panel)?;
    }

    root.present()?;
    Ok(())
}

// Smallest and largest finite value over all curves, widened when flat
fn value_range(panel: &[(&str, &[f64])]) -> (f64, f64) {
    let (low, high) = panel
        .iter()
        .flat_map(|(_, values)| values.iter().copied())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });

    if low > high {
        (0.0, 1.0)
    } else if (high - low).abs() < f64::EPSILON {
        (low - 0.5, high + 0.5)
    } else {
        (low, high)
    }
}

fn draw_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    panel: &[(&str, &[f64])],
) -> ChartResult<()> {
    let epochs = panel.iter().map(|(_, values)| values.len()).max().unwrap_or(0);
    let (low, high) = value_range(panel);
    let caption = panel.iter().map(|(metric, _)| *metric).collect::<Vec<_>>().join(", ");

    // Epochs are numbered from 1
    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 20))
        .margin(PLOT_MARGIN)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(1.0..epochs.max(2) as f64, low..high)?;

    chart
        .configure_mesh()
        .x_desc("epoch")
        .x_labels(epochs.clamp(2, 10))
        .x_label_formatter(&|x| format!("{x:.0}"))
        .y_label_formatter(&|y| format!("{y:.3}"))
        .draw()?;

    for ((metric, values), colour) in panel.iter().zip(PALETTE.iter().copied().cycle()) {
        let points: Vec<(f64, f64)> = values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_finite())
            .map(|(epoch, &value)| ((epoch + 1) as f64, value))
            .collect();

        chart
            .draw_series(LineSeries::new(points.iter().copied(), colour.stroke_width(2)))?
            .label(*metric)
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 15, y)], colour.stroke_width(2))
            });
        chart.draw_series(points.iter().map(|&point| Circle::new(point, 3, colour.filled())))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

fn log_summary(panels: &[Panel<'_>]) {
    for (index, panel) in panels.iter().enumerate() {
        log::info!("Panel {}", index + 1);
        for (metric, values) in panel {
            let best = values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_finite())
                .min_by(|a, b| a.1.total_cmp(b.1));
            match (values.first(), values.last(), best) {
                (Some(first), Some(last), Some((epoch, min))) => log::info!(
                    "  {metric}: {} epochs, first {first:.5}, last {last:.5}, min {min:.5} at epoch {}",
                    values.len(),
                    epoch + 1
                ),
                _ => log::info!("  {metric}: no finite values"),
            }
        }
    }
}
