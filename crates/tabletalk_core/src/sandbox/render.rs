use anyhow::{anyhow, Result};
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder};
use plotters::prelude::*;

use super::figure::{FigureState, Trace};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

type Rect = ((f64, f64), (f64, f64));

/// Renders the pending figure to PNG bytes via an in-memory bitmap.
/// Rendering is text-free (captions travel in the tool output, not on the
/// canvas), which keeps it independent of any system font lookup.
pub fn render_png(fig: &FigureState) -> Result<Vec<u8>> {
    let mut lines: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut points: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut rects: Vec<Vec<Rect>> = Vec::new();

    for trace in &fig.traces {
        match trace {
            Trace::Line { x, y } => lines.push(pair_up(x, y)),
            Trace::Scatter { x, y } => points.push(pair_up(x, y)),
            Trace::Bars { labels: _, values } => rects.push(bar_rects(values)),
            Trace::Hist { values, bins } => rects.push(histogram_rects(values, *bins)),
        }
    }

    let (x_range, y_range) = data_ranges(&lines, &points, &rects);

    let mut raw = vec![0u8; (WIDTH * HEIGHT * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut raw, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE).map_err(|e| anyhow!("figure rendering failed: {e}"))?;

        let mut chart = ChartBuilder::on(&root)
            .margin(20)
            .build_cartesian_2d(x_range, y_range)
            .map_err(|e| anyhow!("figure rendering failed: {e}"))?;

        let mut color_idx = 0usize;
        let mut next_color = move || {
            let c = Palette99::pick(color_idx);
            color_idx += 1;
            c
        };

        for series in &lines {
            let color = next_color();
            chart
                .draw_series(LineSeries::new(series.clone(), color.stroke_width(2)))
                .map_err(|e| anyhow!("figure rendering failed: {e}"))?;
        }
        for series in &points {
            let color = next_color();
            chart
                .draw_series(series.iter().map(|&(x, y)| Circle::new((x, y), 4, color.filled())))
                .map_err(|e| anyhow!("figure rendering failed: {e}"))?;
        }
        for series in &rects {
            let color = next_color();
            chart
                .draw_series(
                    series
                        .iter()
                        .map(|&((x0, y0), (x1, y1))| Rectangle::new([(x0, y0), (x1, y1)], color.filled())),
                )
                .map_err(|e| anyhow!("figure rendering failed: {e}"))?;
        }

        root.present().map_err(|e| anyhow!("figure rendering failed: {e}"))?;
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&raw, WIDTH, HEIGHT, ColorType::Rgb8)
        .map_err(|e| anyhow!("PNG encoding failed: {e}"))?;
    Ok(png)
}

fn pair_up(x: &[f64], y: &[f64]) -> Vec<(f64, f64)> {
    x.iter().copied().zip(y.iter().copied()).collect()
}

fn bar_rects(values: &[f64]) -> Vec<Rect> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let x = i as f64;
            ((x - 0.4, v.min(0.0)), (x + 0.4, v.max(0.0)))
        })
        .collect()
}

fn histogram_rects(values: &[f64], bins: usize) -> Vec<Rect> {
    if values.is_empty() {
        return Vec::new();
    }
    let bins = bins.max(1);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mut max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max <= min {
        max = min + 1.0;
    }
    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in values {
        let idx = (((v - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    counts
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let x0 = min + i as f64 * width;
            ((x0, 0.0), (x0 + width, c as f64))
        })
        .collect()
}

fn data_ranges(
    lines: &[Vec<(f64, f64)>],
    points: &[Vec<(f64, f64)>],
    rects: &[Vec<Rect>],
) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let mut xs: Vec<f64> = Vec::new();
    let mut ys: Vec<f64> = Vec::new();
    for series in lines.iter().chain(points.iter()) {
        for &(x, y) in series {
            xs.push(x);
            ys.push(y);
        }
    }
    for series in rects {
        for &((x0, y0), (x1, y1)) in series {
            xs.extend([x0, x1]);
            ys.extend([y0, y1]);
        }
    }
    (padded_range(&xs), padded_range(&ys))
}

fn padded_range(values: &[f64]) -> std::ops::Range<f64> {
    if values.is_empty() {
        return 0.0..1.0;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max > min {
        let pad = (max - min) * 0.05;
        (min - pad)..(max + pad)
    } else {
        (min - 0.5)..(max + 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    #[test]
    fn renders_a_line_figure_to_png() {
        let mut fig = FigureState::default();
        fig.traces.push(Trace::Line { x: vec![0.0, 1.0, 2.0], y: vec![1.0, 4.0, 9.0] });
        let png = render_png(&fig).unwrap();
        assert_eq!(&png[..8], &PNG_SIGNATURE);
    }

    #[test]
    fn renders_an_empty_figure() {
        // A script may only call title() and still expect an image back.
        let png = render_png(&FigureState::default()).unwrap();
        assert_eq!(&png[..8], &PNG_SIGNATURE);
    }

    #[test]
    fn histogram_bins_cover_all_values() {
        let rects = histogram_rects(&[1.0, 1.5, 2.0, 9.0], 4);
        assert_eq!(rects.len(), 4);
        let total: f64 = rects.iter().map(|&((_, _), (_, y1))| y1).sum();
        assert_eq!(total, 4.0);
    }
}
