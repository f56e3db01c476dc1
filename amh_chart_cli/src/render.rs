use std::panic;
use std::path::{Path, PathBuf};

use amh_chart::config::{LegendPosition, MarkerShape};
use amh_chart::{Band, ChartConfig, ChartError, ChartRenderer, ChartTable};
use anyhow::Result;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug)]
pub enum ChartKind {
    Png,
    Svg,
}

/// Redraws every target file on each call so the files always hold the latest table.
/// A single failed target is logged and skipped; the draw fails only when no target
/// could be written.
pub struct PlotRenderer {
    targets: Vec<(PathBuf, ChartKind)>,
    written: Vec<PathBuf>,
}

impl PlotRenderer {
    pub fn new(targets: Vec<(PathBuf, ChartKind)>) -> Self {
        Self {
            targets,
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ChartRenderer for PlotRenderer {
    fn draw(&mut self, table: &ChartTable, config: &ChartConfig) -> Result<(), ChartError> {
        self.written.clear();
        let mut last_error = None;
        for (path, kind) in &self.targets {
            match render_chart_guard(table, config, path, *kind) {
                Ok(()) => {
                    debug!("Rendered {}", path.display());
                    self.written.push(path.clone());
                }
                Err(err) => {
                    warn!("Skipping render ({}): {}", path.display(), err);
                    last_error = Some(format!("{}: {}", path.display(), err));
                }
            }
        }
        match last_error {
            Some(err) if self.written.is_empty() => Err(ChartError::Render(err)),
            _ => Ok(()),
        }
    }
}

fn render_chart_guard(
    table: &ChartTable,
    config: &ChartConfig,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        let size = (config.width.max(200), config.height.max(200));
        let result = match kind {
            ChartKind::Png => {
                let root = BitMapBackend::new(path, size).into_drawing_area();
                draw_chart(root, table, config)
            }
            ChartKind::Svg => {
                let root = SVGBackend::new(path, size).into_drawing_area();
                draw_chart(root, table, config)
            }
        };
        result.map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn draw_chart<DB>(
    area: DrawingArea<DB, plotters::coord::Shift>,
    table: &ChartTable,
    config: &ChartConfig,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    area.fill(&WHITE)?;

    let table_max = table.max_age().unwrap_or(1.0);
    let x_min = config.h_axis.min.unwrap_or(0.0);
    let x_max = config.h_axis.max.unwrap_or(table_max).max(x_min + 1.0);
    let y_min = config.v_axis.min.unwrap_or(0.0);
    let y_max = config
        .v_axis
        .max
        .unwrap_or_else(|| value_ceiling(table, config))
        .max(y_min + 1.0);

    let title_font = FontDesc::new(FontFamily::SansSerif, 22.0, FontStyle::Bold);
    let mut chart = ChartBuilder::on(&area)
        .caption(&config.title, title_font)
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 45)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal);
    let x_labels = config
        .h_axis
        .gridlines
        .map(|n| n as usize)
        .or_else(|| config.h_axis.interval.map(|i| ((x_max - x_min) / i) as usize + 1))
        .unwrap_or(11);
    let y_labels = config
        .v_axis
        .gridlines
        .map(|n| n as usize)
        .or_else(|| config.v_axis.interval.map(|i| ((y_max - y_min) / i) as usize + 1))
        .unwrap_or(10);
    chart
        .configure_mesh()
        .x_desc(config.h_axis.title.as_str())
        .y_desc(config.v_axis.title.as_str())
        .x_labels(x_labels.clamp(2, 60))
        .y_labels(y_labels.clamp(2, 40))
        .light_line_style(&BLACK.mix(0.05))
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .label_style(axis_font.color(&BLACK.mix(0.85)))
        .draw()?;

    for band in Band::ALL {
        let (color, opacity) = match config.band_series(band) {
            Some(series) if !series.visible => continue,
            Some(series) => (parse_color(&series.color), series.opacity),
            None => (RGBColor(90, 90, 90), 0.5),
        };
        // Defined values of a band are contiguous under both interpolation policies.
        let points: Vec<(f64, f64)> = table
            .rows()
            .iter()
            .filter_map(|row| row.band(band).map(|v| (row.age, v)))
            .collect();
        if points.is_empty() {
            continue;
        }
        let style = ShapeStyle {
            color: color.mix(opacity.clamp(0.0, 1.0)),
            filled: false,
            stroke_width: 2,
        };
        chart
            .draw_series(LineSeries::new(points, style))?
            .label(band.column_label())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], style));
    }

    let marker = &config.patient;
    let marker_color = parse_color(&marker.color);
    let size = marker.size as i32;
    let patient_points: Vec<(f64, f64)> = table
        .rows()
        .iter()
        .filter_map(|row| row.patient.map(|v| (row.age, v)))
        .collect();
    if !patient_points.is_empty() {
        let marker_style = ShapeStyle {
            color: marker_color.to_rgba(),
            filled: true,
            stroke_width: 3,
        };
        let half = size / 2;
        let anno = match marker.shape {
            MarkerShape::Cross => chart.draw_series(
                patient_points
                    .iter()
                    .map(|&point| Cross::new(point, half, marker_style)),
            )?,
            MarkerShape::Circle => chart.draw_series(
                patient_points
                    .iter()
                    .map(|&point| Circle::new(point, half, marker_style)),
            )?,
            MarkerShape::Triangle => chart.draw_series(
                patient_points
                    .iter()
                    .map(|&point| TriangleMarker::new(point, half, marker_style)),
            )?,
        };
        anno.label("Patient")
            .legend(move |(x, y)| Cross::new((x + 12, y), 6, marker_style));
    }

    if let Some(position) = legend_position(config.legend) {
        let legend_font = FontDesc::new(FontFamily::SansSerif, 15.0, FontStyle::Normal);
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK.mix(0.3))
            .label_font(legend_font.color(&BLACK))
            .position(position)
            .draw()?;
    }

    area.present()?;
    Ok(())
}

fn legend_position(position: LegendPosition) -> Option<SeriesLabelPosition> {
    match position {
        LegendPosition::Top => Some(SeriesLabelPosition::UpperMiddle),
        LegendPosition::Bottom => Some(SeriesLabelPosition::LowerMiddle),
        LegendPosition::Left => Some(SeriesLabelPosition::MiddleLeft),
        LegendPosition::Right => Some(SeriesLabelPosition::MiddleRight),
        LegendPosition::None => None,
    }
}

/// Largest plotted value with headroom, rounded up to the gridline interval.
fn value_ceiling(table: &ChartTable, config: &ChartConfig) -> f64 {
    let max = table
        .rows()
        .iter()
        .flat_map(|row| row.bands.iter().chain(std::iter::once(&row.patient)))
        .flatten()
        .copied()
        .fold(1.0, f64::max)
        * 1.1;
    match config.v_axis.interval {
        Some(interval) if interval > 0.0 => (max / interval).ceil() * interval,
        _ => max,
    }
}

fn parse_color(name: &str) -> RGBColor {
    let name = name.trim().to_ascii_lowercase();
    if let Some(hex) = name.strip_prefix('#') {
        if hex.len() == 6 {
            if let Ok(v) = u32::from_str_radix(hex, 16) {
                return RGBColor((v >> 16) as u8, (v >> 8) as u8, v as u8);
            }
        }
    }
    match name.as_str() {
        "red" => RGBColor(255, 0, 0),
        "orange" => RGBColor(255, 165, 0),
        "black" => RGBColor(0, 0, 0),
        "green" => RGBColor(0, 128, 0),
        "darkgreen" => RGBColor(0, 100, 0),
        "blue" => RGBColor(0, 0, 255),
        "gray" | "grey" => RGBColor(128, 128, 128),
        other => {
            warn!("Unknown color '{}', using gray", other);
            RGBColor(128, 128, 128)
        }
    }
}
