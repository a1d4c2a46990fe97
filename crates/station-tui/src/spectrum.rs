//! Spectrum bars from the player's analysis tap.
//!
//! A frame-rate task asks the coordinator for its analyser, averages the
//! byte magnitudes into logarithmic bands and publishes bar heights on a
//! watch channel.  Drawing reads the latest heights.

use std::future::Future;
use std::time::Duration;

use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use station_player::analyser::DEFAULT_SAMPLE_RATE;
use station_player::{Analyser, StreamHandle};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub const MIN_FREQUENCY: f64 = 60.0;
pub const MAX_FREQUENCY: f64 = 14_000.0;
const MIN_FRAME: Duration = Duration::from_millis(1);

/// Cyan → purple → pink.  A bar's colour is picked by its index.
pub const GRADIENT: [Color; 16] = [
    Color::Rgb(0x00, 0xff, 0xff),
    Color::Rgb(0x00, 0xe5, 0xff),
    Color::Rgb(0x00, 0xcc, 0xff),
    Color::Rgb(0x00, 0xb3, 0xff),
    Color::Rgb(0x00, 0x99, 0xff),
    Color::Rgb(0x00, 0x80, 0xff),
    Color::Rgb(0x00, 0x66, 0xff),
    Color::Rgb(0x4d, 0x4d, 0xff),
    Color::Rgb(0x66, 0x33, 0xff),
    Color::Rgb(0x80, 0x00, 0xff),
    Color::Rgb(0x99, 0x33, 0xff),
    Color::Rgb(0xb3, 0x66, 0xff),
    Color::Rgb(0xcc, 0x00, 0xff),
    Color::Rgb(0xe6, 0x00, 0xe6),
    Color::Rgb(0xff, 0x00, 0xcc),
    Color::Rgb(0xff, 0x00, 0x99),
];

// ── bands ─────────────────────────────────────────────────────────────────────

/// N+1 bin boundaries; bar `i` covers `[boundaries[i], boundaries[i + 1])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyBands {
    boundaries: Vec<usize>,
}

impl FrequencyBands {
    /// Boundaries spaced exponentially from 60 Hz to 14 kHz.  Each boundary
    /// is at least one bin past the previous one, so every band is non-empty
    /// even where low frequencies share a bin.
    pub fn logarithmic(bar_count: usize, fft_size: usize, sample_rate: u32) -> Self {
        let sample_rate = if sample_rate == 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            sample_rate
        } as f64;
        let log_min = MIN_FREQUENCY.ln();
        let log_range = MAX_FREQUENCY.ln() - log_min;

        let mut boundaries: Vec<usize> = Vec::with_capacity(bar_count + 1);
        for i in 0..=bar_count {
            let t = if bar_count == 0 { 0.0 } else { i as f64 / bar_count as f64 };
            let freq = (log_min + t * log_range).exp();
            let bin = (freq * fft_size as f64 / sample_rate).round() as usize;
            let bin = match boundaries.last() {
                Some(&prev) if bin <= prev => prev + 1,
                _ => bin,
            };
            boundaries.push(bin);
        }
        Self { boundaries }
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    pub fn bar_count(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }

    pub fn band(&self, index: usize) -> (usize, usize) {
        (self.boundaries[index], self.boundaries[index + 1])
    }
}

/// Mean of `data[start..end]`, clamped to the data.  A range that clamps to
/// nothing reads the single sample at `start`, or 0 past the end.
pub fn band_value(data: &[u8], start: usize, end: usize) -> f32 {
    let end = end.min(data.len());
    if start >= end {
        return data.get(start).copied().unwrap_or(0) as f32;
    }
    let slice = &data[start..end];
    slice.iter().map(|&v| v as u32).sum::<u32>() as f32 / slice.len() as f32
}

/// Heights in `0.0..=1.0`, one per band.
pub fn bar_heights(data: &[u8], bands: &FrequencyBands) -> Vec<f32> {
    (0..bands.bar_count())
        .map(|i| {
            let (start, end) = bands.band(i);
            band_value(data, start, end) / 255.0
        })
        .collect()
}

pub fn bar_color(index: usize, bar_count: usize) -> Color {
    if bar_count == 0 {
        return GRADIENT[0];
    }
    let slot = index * GRADIENT.len() / bar_count;
    GRADIENT[slot.min(GRADIENT.len() - 1)]
}

// ── renderer ──────────────────────────────────────────────────────────────────

/// Whatever can hand out the live analyser, if there is one yet.
pub trait AnalyserSource: Send + Sync + 'static {
    fn analyser(&self) -> impl Future<Output = Option<Analyser>> + Send;
}

impl AnalyserSource for StreamHandle {
    fn analyser(&self) -> impl Future<Output = Option<Analyser>> + Send {
        StreamHandle::analyser(self)
    }
}

/// Owns the frame loop.  Dropping the renderer stops it.
pub struct SpectrumRenderer {
    bars: watch::Receiver<Vec<f32>>,
    task: AbortHandle,
}

impl SpectrumRenderer {
    /// `frame` is floored at 1 ms.
    pub fn spawn<S: AnalyserSource>(source: S, bar_count: usize, frame: Duration) -> Self {
        let (tx, bars) = watch::channel(Vec::new());
        let frame = frame.max(MIN_FRAME);
        let task = tokio::spawn(frame_loop(source, bar_count, frame, tx));
        Self {
            bars,
            task: task.abort_handle(),
        }
    }

    /// Latest bar heights; empty while nothing is playing.
    pub fn subscribe(&self) -> watch::Receiver<Vec<f32>> {
        self.bars.clone()
    }
}

impl Drop for SpectrumRenderer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn frame_loop<S: AnalyserSource>(
    source: S,
    bar_count: usize,
    frame: Duration,
    tx: watch::Sender<Vec<f32>>,
) {
    let mut interval = tokio::time::interval(frame);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut session: Option<(Analyser, FrequencyBands)> = None;
    let mut data: Vec<u8> = Vec::new();

    loop {
        interval.tick().await;

        let Some(analyser) = source.analyser().await else {
            if session.take().is_some() {
                tx.send_replace(Vec::new());
            }
            continue;
        };

        let fresh = !matches!(&session, Some((current, _)) if current.same_node(&analyser));
        if fresh {
            let bands =
                FrequencyBands::logarithmic(bar_count, analyser.fft_size(), analyser.sample_rate());
            debug!("spectrum: bands {:?}", bands.boundaries());
            session = Some((analyser, bands));
        }
        let Some((analyser, bands)) = session.as_ref() else {
            continue;
        };

        data.resize(analyser.frequency_bin_count(), 0);
        analyser.byte_frequency_data(&mut data);
        if tx.send(bar_heights(&data, bands)).is_err() {
            break;
        }
    }
}

// ── drawing ───────────────────────────────────────────────────────────────────

const EIGHTHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Paint `bars` bottom-up into `area`, one gradient colour per bar.
pub fn draw_spectrum(frame: &mut Frame, area: Rect, bars: &[f32]) {
    if bars.is_empty() || area.width == 0 || area.height == 0 {
        return;
    }
    let count = bars.len();
    let slot = (area.width as usize / count).max(1);
    let gap = usize::from(slot > 2);
    let bar_width = slot - gap;
    let rows = area.height as usize;

    let lines: Vec<Line> = (0..rows)
        .map(|row| {
            let from_bottom = rows - 1 - row;
            let spans: Vec<Span> = bars
                .iter()
                .take(area.width as usize)
                .enumerate()
                .map(|(i, &height)| {
                    let filled = (height.clamp(0.0, 1.0) * (rows * 8) as f32).round() as usize;
                    let cell = filled.saturating_sub(from_bottom * 8).min(8);
                    let mut text = EIGHTHS[cell].to_string().repeat(bar_width);
                    text.push_str(&" ".repeat(gap));
                    Span::styled(text, Style::default().fg(bar_color(i, count)))
                })
                .collect();
            Line::from(spans)
        })
        .collect();

    frame.render_widget(Paragraph::new(lines), area);
}
