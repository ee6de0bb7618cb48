//! Sample-rate conversion over a fixed-point cursor
//!
//! The cursor is integer sample position plus a 12-bit fraction; the step
//! per output sample is `src_rate / dst_rate * pitch` in the same fixed
//! point. Kernels range from nearest-sample up to bandlimited sinc with a
//! Kaiser window (60 dB stopband), whose coefficient tables are generated
//! once per process and memoized.
//!
//! The input slice convention: `src[src_pos]` is the sample at the integer
//! cursor position, with at least `RESAMPLER_PADDING / 2` valid samples
//! before and after the span the kernel can reach.

use std::sync::OnceLock;

use aural_core::{cubic, lerp, FRACTION_BITS, FRACTION_MASK, FRACTION_ONE};

/// Total history window a voice must keep per channel; covers the widest
/// sinc kernel.
pub const RESAMPLER_PADDING: usize = 24;

/// Quantized kernel phases: 32 phases, bilinear between them.
const PHASE_BITS: u32 = 5;
const PHASE_COUNT: usize = 1 << PHASE_BITS;
const FRAC_PHASE_BITDIFF: u32 = FRACTION_BITS - PHASE_BITS;

/// Scale steps widening the kernel for downsampling.
const SCALE_COUNT: usize = 16;

/// Resampling kernel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerKind {
    /// Nearest sample.
    Point,
    /// Two-point linear.
    #[default]
    Linear,
    /// Four-point Catmull-Rom.
    Cubic,
    /// 12-point bandlimited sinc, scale-interpolated for downsampling.
    Bsinc12,
    /// 24-point bandlimited sinc, scale-interpolated for downsampling.
    Bsinc24,
    /// 12-point sinc pinned to the unity-ratio kernel.
    FastBsinc12,
    /// 24-point sinc pinned to the unity-ratio kernel.
    FastBsinc24,
}

impl ResamplerKind {
    /// History samples the kernel reads before the cursor position.
    pub fn left_padding(self) -> usize {
        match self {
            ResamplerKind::Point | ResamplerKind::Linear => 0,
            ResamplerKind::Cubic => 1,
            _ => RESAMPLER_PADDING / 2 - 1,
        }
    }

    /// Samples the kernel reads at or after the cursor position.
    pub fn right_padding(self) -> usize {
        match self {
            ResamplerKind::Point => 1,
            ResamplerKind::Linear => 2,
            ResamplerKind::Cubic => 3,
            _ => RESAMPLER_PADDING / 2 + 1,
        }
    }
}

struct ScaleEntry {
    /// Taps at this scale step.
    m: usize,
    /// Offset of this scale's phase blocks in the coefficient vector.
    offset: usize,
}

struct BsincTable {
    scale_base: f64,
    scale_range: f64,
    scales: [ScaleEntry; SCALE_COUNT],
    /// Per (scale, phase): m coefficients, m phase deltas, m scale deltas,
    /// m scale+phase deltas.
    coeffs: Vec<f32>,
}

/// Zero-order modified Bessel function of the first kind.
fn bessel_i0(x: f64) -> f64 {
    let x2 = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut k = 1;
    loop {
        let y = x2 / k as f64;
        k += 1;
        let last = sum;
        term *= y * y;
        sum += term;
        if sum == last {
            return sum;
        }
    }
}

fn kaiser(beta: f64, k: f64, i0_beta: f64) -> f64 {
    if !(-1.0..=1.0).contains(&k) {
        return 0.0;
    }
    bessel_i0(beta * (1.0 - k * k).sqrt()) / i0_beta
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-15 {
        return 1.0;
    }
    (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
}

/// Transition width of the Kaiser window for the given stopband rejection
/// (dB) and filter order.
fn kaiser_width(rejection: f64, order: usize) -> f64 {
    if rejection > 21.19 {
        (rejection - 7.95) / (order as f64 * 2.285 * std::f64::consts::TAU)
    } else {
        5.79 / (order as f64 * std::f64::consts::TAU)
    }
}

fn kaiser_beta(rejection: f64) -> f64 {
    if rejection > 50.0 {
        0.1102 * (rejection - 8.7)
    } else if rejection >= 21.0 {
        0.5842 * (rejection - 21.0).powf(0.4) + 0.07886 * (rejection - 21.0)
    } else {
        0.0
    }
}

/// Builds the full phase/scale table for an `order`-order kernel
/// (`order + 1` base points) at 60 dB rejection.
fn generate_bsinc_table(order: usize) -> BsincTable {
    const REJECTION: f64 = 60.0;
    let num_points = order + 1;
    let points_max = RESAMPLER_PADDING;
    let points_half = points_max / 2;

    let width = kaiser_width(REJECTION, order);
    let beta = kaiser_beta(REJECTION);
    let i0_beta = bessel_i0(beta);
    let scale_base = width / 2.0;
    let scale_range = 1.0 - scale_base;

    // Taps per scale step; wider for downsampling, capped at the padding
    // window.
    let mut a = [0usize; SCALE_COUNT];
    for (si, a) in a.iter_mut().enumerate() {
        let scale = scale_base + scale_range * si as f64 / (SCALE_COUNT - 1) as f64;
        *a = ((num_points as f64 / 2.0 / scale) as usize)
            .min(num_points)
            .min(points_half);
    }

    // Kaiser-windowed sinc per (scale, phase, tap); one extra phase row so
    // the last phase delta has a target.
    let mut filter = vec![[[0.0f64; RESAMPLER_PADDING]; PHASE_COUNT + 1]; SCALE_COUNT];
    for si in 0..SCALE_COUNT {
        let m = a[si] * 2;
        let o = points_half - m / 2;
        let l = a[si] as f64 - 1.0;
        let scale = scale_base + scale_range * si as f64 / (SCALE_COUNT - 1) as f64;
        let cutoff = scale - scale_base * scale.max(0.5) * 2.0;

        for pi in 0..=PHASE_COUNT {
            let phase = l + pi as f64 / PHASE_COUNT as f64;
            for i in 0..m {
                let x = i as f64 - phase;
                filter[si][pi][o + i] =
                    kaiser(beta, x / a[si] as f64, i0_beta) * cutoff * sinc(cutoff * x);
            }
        }
    }

    // Flatten with phase/scale deltas so the kernel can bilinearly
    // interpolate at mix time.
    let mut coeffs = Vec::new();
    let mut scales: Vec<ScaleEntry> = Vec::with_capacity(SCALE_COUNT);
    for si in 0..SCALE_COUNT {
        let m = a[si] * 2;
        let o = points_half - m / 2;
        let last_scale = si == SCALE_COUNT - 1;
        scales.push(ScaleEntry {
            m,
            offset: coeffs.len(),
        });
        for pi in 0..PHASE_COUNT {
            for i in 0..m {
                coeffs.push(filter[si][pi][o + i] as f32);
            }
            for i in 0..m {
                coeffs.push((filter[si][pi + 1][o + i] - filter[si][pi][o + i]) as f32);
            }
            for i in 0..m {
                let d = if last_scale {
                    0.0
                } else {
                    filter[si + 1][pi][o + i] - filter[si][pi][o + i]
                };
                coeffs.push(d as f32);
            }
            for i in 0..m {
                let d = if last_scale {
                    0.0
                } else {
                    (filter[si + 1][pi + 1][o + i] - filter[si + 1][pi][o + i])
                        - (filter[si][pi + 1][o + i] - filter[si][pi][o + i])
                };
                coeffs.push(d as f32);
            }
        }
    }

    BsincTable {
        scale_base,
        scale_range,
        scales: scales
            .try_into()
            .unwrap_or_else(|_| unreachable!("scale count is fixed")),
        coeffs,
    }
}

fn bsinc12_table() -> &'static BsincTable {
    static TABLE: OnceLock<BsincTable> = OnceLock::new();
    TABLE.get_or_init(|| generate_bsinc_table(11))
}

fn bsinc24_table() -> &'static BsincTable {
    static TABLE: OnceLock<BsincTable> = OnceLock::new();
    TABLE.get_or_init(|| generate_bsinc_table(23))
}

/// Per-voice resampler state. Cheap to copy; `update_rate` must be called
/// whenever the step changes so the sinc kernels can pick their scale.
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    kind: ResamplerKind,
    /// Interpolation weight between the selected scale and the next.
    sf: f32,
    /// Taps of the selected kernel.
    m: usize,
    /// Taps reaching before the cursor (m / 2 - 1).
    l: usize,
    /// Offset of the selected scale's phase blocks.
    offset: usize,
}

impl Resampler {
    pub fn new(kind: ResamplerKind) -> Self {
        let mut r = Self {
            kind,
            sf: 0.0,
            m: 0,
            l: 0,
            offset: 0,
        };
        r.update_rate(FRACTION_ONE);
        r
    }

    pub fn kind(&self) -> ResamplerKind {
        self.kind
    }

    /// Reconfigures the sinc kernel for a new step (no-op for the
    /// polynomial kernels).
    pub fn update_rate(&mut self, increment: u32) {
        let table = match self.kind {
            ResamplerKind::Bsinc12 | ResamplerKind::FastBsinc12 => bsinc12_table(),
            ResamplerKind::Bsinc24 | ResamplerKind::FastBsinc24 => bsinc24_table(),
            _ => return,
        };
        let fast = matches!(
            self.kind,
            ResamplerKind::FastBsinc12 | ResamplerKind::FastBsinc24
        );

        let ratio = FRACTION_ONE as f64 / increment as f64;
        let (si, sf) = if ratio >= 1.0 || fast {
            (SCALE_COUNT - 1, 0.0)
        } else {
            let sf = ((ratio - table.scale_base) / table.scale_range
                * (SCALE_COUNT - 1) as f64)
                .clamp(0.0, (SCALE_COUNT - 1) as f64);
            let si = (sf as usize).min(SCALE_COUNT - 2);
            (si, (sf - si as f64) as f32)
        };

        let entry = &table.scales[si];
        self.sf = sf;
        self.m = entry.m;
        self.l = entry.m / 2 - 1;
        self.offset = entry.offset;
    }

    /// Produces `dst.len()` output samples starting at cursor
    /// `(src_pos, frac)` with the given step. The caller advances its own
    /// cursor afterwards.
    pub fn resample(&self, src: &[f32], src_pos: usize, frac: u32, increment: u32, dst: &mut [f32]) {
        debug_assert!(frac < FRACTION_ONE);
        match self.kind {
            ResamplerKind::Point => {
                let mut pos = src_pos;
                let mut frac = frac;
                for out in dst.iter_mut() {
                    *out = src[pos];
                    frac += increment;
                    pos += (frac >> FRACTION_BITS) as usize;
                    frac &= FRACTION_MASK;
                }
            }
            ResamplerKind::Linear => {
                let mut pos = src_pos;
                let mut frac = frac;
                for out in dst.iter_mut() {
                    *out = lerp(src[pos], src[pos + 1], frac as f32 / FRACTION_ONE as f32);
                    frac += increment;
                    pos += (frac >> FRACTION_BITS) as usize;
                    frac &= FRACTION_MASK;
                }
            }
            ResamplerKind::Cubic => {
                let mut pos = src_pos;
                let mut frac = frac;
                for out in dst.iter_mut() {
                    *out = cubic(
                        src[pos - 1],
                        src[pos],
                        src[pos + 1],
                        src[pos + 2],
                        frac as f32 / FRACTION_ONE as f32,
                    );
                    frac += increment;
                    pos += (frac >> FRACTION_BITS) as usize;
                    frac &= FRACTION_MASK;
                }
            }
            _ => self.resample_bsinc(src, src_pos, frac, increment, dst),
        }
    }

    fn resample_bsinc(
        &self,
        src: &[f32],
        src_pos: usize,
        frac: u32,
        increment: u32,
        dst: &mut [f32],
    ) {
        let table = match self.kind {
            ResamplerKind::Bsinc12 | ResamplerKind::FastBsinc12 => bsinc12_table(),
            _ => bsinc24_table(),
        };
        let coeffs = &table.coeffs[..];
        let (m, l, sf) = (self.m, self.l, self.sf);

        let mut pos = src_pos;
        let mut frac = frac;
        for out in dst.iter_mut() {
            let pi = (frac >> FRAC_PHASE_BITDIFF) as usize;
            let pf = (frac & ((1 << FRAC_PHASE_BITDIFF) - 1)) as f32
                / (1 << FRAC_PHASE_BITDIFF) as f32;

            let base = self.offset + pi * m * 4;
            let fil = &coeffs[base..base + m];
            let phd = &coeffs[base + m..base + m * 2];
            let scd = &coeffs[base + m * 2..base + m * 3];
            let spd = &coeffs[base + m * 3..base + m * 4];
            let window = &src[pos - l..pos - l + m];

            let mut acc = 0.0f32;
            for j in 0..m {
                acc += (fil[j] + sf * scd[j] + pf * (phd[j] + sf * spd[j])) * window[j];
            }
            *out = acc;

            frac += increment;
            pos += (frac >> FRACTION_BITS) as usize;
            frac &= FRACTION_MASK;
        }
    }
}
