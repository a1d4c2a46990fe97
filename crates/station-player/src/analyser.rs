//! Audio-analysis tap: a copy of the decoded PCM is pushed into an
//! [`Analyser`], which turns the newest window into byte magnitudes the same
//! way a web `AnalyserNode` does (Blackman window, FFT, temporal smoothing,
//! dB scaling onto 0..=255).  Audible output never passes through here.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

pub const FFT_SIZE: usize = 256;
pub const SMOOTHING_TIME_CONSTANT: f32 = 0.92;
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

struct AnalyserCore {
    state: ContextState,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    samples: VecDeque<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

/// Cloneable handle onto one analysis node.  Clones share the node.
#[derive(Clone)]
pub struct Analyser {
    core: Arc<Mutex<AnalyserCore>>,
    fft_size: usize,
    sample_rate: u32,
    smoothing: f32,
}

impl std::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyser")
            .field("fft_size", &self.fft_size)
            .field("sample_rate", &self.sample_rate)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / n;
            0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
        })
        .collect()
}

impl Analyser {
    /// `fft_size` must be a power of two ≥ 32.
    pub fn new(fft_size: usize, sample_rate: u32, smoothing: f32) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let core = AnalyserCore {
            state: ContextState::Suspended,
            fft,
            window: blackman_window(fft_size),
            samples: VecDeque::with_capacity(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        };
        Self {
            core: Arc::new(Mutex::new(core)),
            fft_size,
            sample_rate: if sample_rate == 0 {
                DEFAULT_SAMPLE_RATE
            } else {
                sample_rate
            },
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AnalyserCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// True when both handles point at the same node.
    pub fn same_node(&self, other: &Analyser) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    pub fn state(&self) -> ContextState {
        self.lock().state
    }

    fn set_state(&self, state: ContextState) {
        let mut core = self.lock();
        if core.state == ContextState::Closed {
            return;
        }
        core.state = state;
        if state == ContextState::Closed {
            core.samples.clear();
        }
    }

    /// Feed mono PCM (-1.0..1.0).  Only the newest `fft_size` samples are
    /// kept.  Ignored unless the graph is running.
    pub fn push_samples(&self, samples: &[f32]) {
        let mut core = self.lock();
        if core.state != ContextState::Running {
            return;
        }
        let keep = samples.len().min(self.fft_size);
        let overflow = (core.samples.len() + keep).saturating_sub(self.fft_size);
        core.samples.drain(..overflow);
        core.samples.extend(&samples[samples.len() - keep..]);
    }

    /// Fill `out` with the current frequency magnitudes, one byte per bin.
    /// Writes `min(out.len(), frequency_bin_count())` bytes.
    pub fn byte_frequency_data(&self, out: &mut [u8]) {
        let mut guard = self.lock();
        let core = &mut *guard;
        let size = self.fft_size;

        let pad = size - core.samples.len();
        for (i, slot) in core.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { core.samples[i - pad] };
            *slot = Complex::new(sample * core.window[i], 0.0);
        }
        core.fft.process(&mut core.buffer);

        let scale = 255.0 / (MAX_DECIBELS - MIN_DECIBELS);
        for (k, slot) in out.iter_mut().take(size / 2).enumerate() {
            let magnitude = core.buffer[k].norm() / size as f32;
            let smoothed = self.smoothing * core.smoothed[k] + (1.0 - self.smoothing) * magnitude;
            core.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };

            let db = 20.0 * core.smoothed[k].log10();
            *slot = if db.is_finite() {
                (scale * (db - MIN_DECIBELS)).clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }
    }
}

/// The analysis graph owned by a playback engine: one context-like state
/// machine and one analyser node.
pub struct AudioGraph {
    analyser: Analyser,
}

impl AudioGraph {
    /// New graphs start suspended, like a freshly created browser context
    /// without a user gesture.
    pub fn new(fft_size: usize, sample_rate: u32, smoothing: f32) -> Self {
        Self {
            analyser: Analyser::new(fft_size, sample_rate, smoothing),
        }
    }

    pub fn analyser(&self) -> &Analyser {
        &self.analyser
    }

    pub fn state(&self) -> ContextState {
        self.analyser.state()
    }

    pub fn resume(&mut self) {
        self.analyser.set_state(ContextState::Running);
    }

    /// Terminal: a closed graph never runs again.
    pub fn close(&mut self) {
        self.analyser.set_state(ContextState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(bin: usize, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / FFT_SIZE as f32).sin()
            })
            .collect()
    }

    fn running_graph() -> AudioGraph {
        let mut graph = AudioGraph::new(FFT_SIZE, DEFAULT_SAMPLE_RATE, SMOOTHING_TIME_CONSTANT);
        graph.resume();
        graph
    }

    #[test]
    fn test_bin_centred_sine_peaks_at_its_bin() {
        let graph = running_graph();
        graph.analyser().push_samples(&sine(20, FFT_SIZE));
        let mut data = vec![0u8; graph.analyser().frequency_bin_count()];
        graph.analyser().byte_frequency_data(&mut data);

        assert!(data[20] > 200, "peak too low: {}", data[20]);
        assert!(data[20] > data[19] && data[20] > data[21]);
        assert!(data[60] < 20, "leakage at bin 60: {}", data[60]);
    }

    #[test]
    fn test_silence_is_zero() {
        let graph = running_graph();
        let mut data = vec![7u8; 128];
        graph.analyser().byte_frequency_data(&mut data);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_suspended_graph_ignores_samples() {
        let mut graph = AudioGraph::new(FFT_SIZE, 48_000, SMOOTHING_TIME_CONSTANT);
        assert_eq!(graph.state(), ContextState::Suspended);
        graph.analyser().push_samples(&sine(10, FFT_SIZE));
        let mut data = vec![0u8; 128];
        graph.analyser().byte_frequency_data(&mut data);
        assert_eq!(data[10], 0);

        graph.resume();
        graph.analyser().push_samples(&sine(10, FFT_SIZE));
        graph.analyser().byte_frequency_data(&mut data);
        assert!(data[10] > 0);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut graph = running_graph();
        graph.close();
        graph.resume();
        assert_eq!(graph.state(), ContextState::Closed);
    }

    #[test]
    fn test_smoothing_rises_over_frames() {
        let graph = running_graph();
        graph.analyser().push_samples(&sine(8, FFT_SIZE));
        let mut first = vec![0u8; 128];
        let mut later = vec![0u8; 128];
        graph.analyser().byte_frequency_data(&mut first);
        for _ in 0..10 {
            graph.analyser().byte_frequency_data(&mut later);
        }
        assert!(later[8] > first[8]);
    }

    #[test]
    fn test_window_keeps_newest_samples() {
        let graph = running_graph();
        graph.analyser().push_samples(&vec![0.5; FFT_SIZE * 3]);
        graph.analyser().push_samples(&[0.1; 10]);
        assert_eq!(graph.analyser().lock().samples.len(), FFT_SIZE);
        assert_eq!(graph.analyser().lock().samples.back().copied(), Some(0.1));
    }

    #[test]
    fn test_zero_sample_rate_falls_back() {
        let analyser = Analyser::new(FFT_SIZE, 0, 0.5);
        assert_eq!(analyser.sample_rate(), DEFAULT_SAMPLE_RATE);
        assert_eq!(analyser.frequency_bin_count(), 128);
    }
}
