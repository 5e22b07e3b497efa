//! Comparison charts attached to alerts
//!
//! Renders the current day and the reference day of one metric as two line
//! series over the time-of-day axis. [`SvgChartRenderer`] produces the
//! vector drawing; [`PngChartRenderer`] rasterizes it so chat clients show
//! it inline.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use resvg::{tiny_skia, usvg};
use thiserror::Error;

use crate::models::MetricSeries;

/// Rendered chart ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("no observations for {current} or {reference} in series '{metric}'")]
    NoData {
        metric: String,
        current: NaiveDate,
        reference: NaiveDate,
    },

    #[error("failed to rasterize chart: {0}")]
    Rasterize(String),
}

/// Turns two days of a series into an image
pub trait ChartRenderer: Send + Sync {
    fn render(
        &self,
        title: &str,
        series: &MetricSeries,
        current_date: NaiveDate,
        reference_date: NaiveDate,
    ) -> Result<Chart, ChartError>;
}

const LINE_COLORS: [&str; 2] = ["#1f77b4", "#ff7f0e"];
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_BOTTOM: f64 = 60.0;
const Y_TICKS: usize = 5;

/// SVG line chart renderer
#[derive(Debug, Clone)]
pub struct SvgChartRenderer {
    pub width: u32,
    pub height: u32,
    /// Show every n-th time-of-day label on the x axis
    pub label_every: usize,
}

impl Default for SvgChartRenderer {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 1000,
            label_every: 15,
        }
    }
}

impl ChartRenderer for SvgChartRenderer {
    fn render(
        &self,
        title: &str,
        series: &MetricSeries,
        current_date: NaiveDate,
        reference_date: NaiveDate,
    ) -> Result<Chart, ChartError> {
        let days = [current_date, reference_date];

        let labels: Vec<String> = days
            .iter()
            .flat_map(|&d| series.on_date(d).map(|o| o.time_label.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if labels.is_empty() {
            return Err(ChartError::NoData {
                metric: series.metric().to_string(),
                current: current_date,
                reference: reference_date,
            });
        }

        let max_value = days
            .iter()
            .flat_map(|&d| series.on_date(d).map(|o| o.value))
            .fold(0.0_f64, f64::max);
        let y_max = if max_value > 0.0 { max_value * 1.1 } else { 1.0 };

        let width = self.width as f64;
        let height = self.height as f64;
        let plot_w = width - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_h = height - MARGIN_TOP - MARGIN_BOTTOM;
        let x_step = if labels.len() > 1 {
            plot_w / (labels.len() - 1) as f64
        } else {
            0.0
        };
        let x_of = |label: &str| {
            let idx = labels.iter().position(|l| l == label).unwrap_or(0);
            MARGIN_LEFT + idx as f64 * x_step
        };
        let y_of = |value: f64| MARGIN_TOP + plot_h - (value / y_max) * plot_h;

        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif">"#,
            w = self.width,
            h = self.height
        ));
        svg.push_str(r#"<rect width="100%" height="100%" fill="white"/>"#);
        svg.push_str(&format!(
            r#"<text x="{}" y="35" font-size="24" text-anchor="middle">{}</text>"#,
            width / 2.0,
            escape(title)
        ));

        // Axes
        let x_axis_y = MARGIN_TOP + plot_h;
        svg.push_str(&format!(
            r##"<line x1="{l}" y1="{t}" x2="{l}" y2="{b}" stroke="#333"/><line x1="{l}" y1="{b}" x2="{r}" y2="{b}" stroke="#333"/>"##,
            l = MARGIN_LEFT,
            t = MARGIN_TOP,
            b = x_axis_y,
            r = MARGIN_LEFT + plot_w
        ));

        for i in 0..=Y_TICKS {
            let value = y_max * i as f64 / Y_TICKS as f64;
            let y = y_of(value);
            svg.push_str(&format!(
                r##"<line x1="{l}" y1="{y:.1}" x2="{r}" y2="{y:.1}" stroke="#eee"/><text x="{tx}" y="{ty:.1}" font-size="14" text-anchor="end">{v}</text>"##,
                l = MARGIN_LEFT,
                r = MARGIN_LEFT + plot_w,
                tx = MARGIN_LEFT - 8.0,
                ty = y + 5.0,
                v = format_tick(value)
            ));
        }

        let every = self.label_every.max(1);
        for (idx, label) in labels.iter().enumerate().filter(|(i, _)| i % every == 0) {
            let x = MARGIN_LEFT + idx as f64 * x_step;
            svg.push_str(&format!(
                r#"<text x="{x:.1}" y="{y:.1}" font-size="14" text-anchor="middle">{}</text>"#,
                escape(label),
                y = x_axis_y + 22.0
            ));
        }
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-size="16" text-anchor="middle">Time</text>"#,
            MARGIN_LEFT + plot_w / 2.0,
            height - 15.0
        ));

        for (i, day) in days.iter().enumerate() {
            let points: Vec<String> = series
                .on_date(*day)
                .map(|o| format!("{:.1},{:.1}", x_of(&o.time_label), y_of(o.value)))
                .collect();
            let color = LINE_COLORS[i % LINE_COLORS.len()];

            if !points.is_empty() {
                svg.push_str(&format!(
                    r#"<polyline fill="none" stroke="{color}" stroke-width="2" points="{}"/>"#,
                    points.join(" ")
                ));
            }

            let legend_y = MARGIN_TOP + 20.0 + i as f64 * 22.0;
            let legend_x = MARGIN_LEFT + plot_w - 140.0;
            svg.push_str(&format!(
                r#"<line x1="{legend_x}" y1="{ly:.1}" x2="{lx2}" y2="{ly:.1}" stroke="{color}" stroke-width="3"/><text x="{tx}" y="{ty:.1}" font-size="14">{day}</text>"#,
                ly = legend_y,
                lx2 = legend_x + 25.0,
                tx = legend_x + 32.0,
                ty = legend_y + 5.0
            ));
        }

        svg.push_str("</svg>");

        Ok(Chart {
            file_name: format!("{}.svg", series.metric()),
            mime_type: "image/svg+xml".to_string(),
            bytes: svg.into_bytes(),
        })
    }
}

/// PNG renderer on top of [`SvgChartRenderer`].
///
/// System fonts are loaded once; without any installed font the text is
/// left out and the curves are still drawn.
pub struct PngChartRenderer {
    svg: SvgChartRenderer,
    fonts: Arc<usvg::fontdb::Database>,
}

impl PngChartRenderer {
    pub fn new(svg: SvgChartRenderer) -> Self {
        let mut fonts = usvg::fontdb::Database::new();
        fonts.load_system_fonts();
        Self {
            svg,
            fonts: Arc::new(fonts),
        }
    }
}

impl Default for PngChartRenderer {
    fn default() -> Self {
        Self::new(SvgChartRenderer::default())
    }
}

impl ChartRenderer for PngChartRenderer {
    fn render(
        &self,
        title: &str,
        series: &MetricSeries,
        current_date: NaiveDate,
        reference_date: NaiveDate,
    ) -> Result<Chart, ChartError> {
        let svg = self.svg.render(title, series, current_date, reference_date)?;

        let options = usvg::Options {
            fontdb: self.fonts.clone(),
            ..usvg::Options::default()
        };
        let tree = usvg::Tree::from_data(&svg.bytes, &options)
            .map_err(|e| ChartError::Rasterize(e.to_string()))?;

        let size = tree.size().to_int_size();
        let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height()).ok_or_else(|| {
            ChartError::Rasterize(format!("invalid size {}x{}", size.width(), size.height()))
        })?;
        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

        let bytes = pixmap
            .encode_png()
            .map_err(|e| ChartError::Rasterize(e.to_string()))?;

        Ok(Chart {
            file_name: format!("{}.png", series.metric()),
            mime_type: "image/png".to_string(),
            bytes,
        })
    }
}

fn format_tick(value: f64) -> String {
    if value >= 100.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Escape text for XML/HTML content
pub(crate) fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
