//! Sync-tone synthesis and localization.
//!
//! The live page plays a short sinusoid shortly after capture starts; both
//! recorded tracks contain it. Locating its onset in each track gives the
//! audio↔video offset. Pure functions over f32 slices, no I/O.

use std::f64::consts::TAU;

/// Tone frequency the live page emits.
pub const TONE_FREQUENCY_HZ: f64 = 1000.0;
/// Tone length.
pub const TONE_DURATION_MS: u64 = 800;
/// Tone amplitude.
pub const TONE_AMPLITUDE: f32 = 0.95;

/// Analysis block length. Bounds the onset quantization well inside the
/// 50 ms residual tolerance.
const BLOCK_MS: u64 = 4;

/// Magnitudes below this are treated as silence, not a candidate tone.
const SILENCE_FLOOR: f64 = 1e-4;

/// Fraction of the block-scan peak a block must reach to count as tone.
const PEAK_FRACTION: f64 = 0.5;

/// Synthesize the reference tone at the given sample rate.
pub fn reference_tone(rate: u32) -> Vec<f32> {
    let count = (rate as u64 * TONE_DURATION_MS / 1000) as usize;
    (0..count)
        .map(|i| {
            let phase = TAU * TONE_FREQUENCY_HZ * i as f64 / rate as f64;
            (TONE_AMPLITUDE as f64 * phase.sin()) as f32
        })
        .collect()
}

/// Goertzel magnitude of one block at the tone frequency, normalized by
/// block length.
fn block_magnitude(block: &[f32], rate: u32) -> f64 {
    if block.is_empty() {
        return 0.0;
    }
    let coeff = 2.0 * (TAU * TONE_FREQUENCY_HZ / rate as f64).cos();
    let (mut s1, mut s2) = (0.0f64, 0.0f64);
    for &x in block {
        let s0 = x as f64 + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }
    ((s1 * s1 + s2 * s2 - coeff * s1 * s2).abs()).sqrt() / block.len() as f64
}

/// Locate the tone onset in `signal`, in seconds from the start.
///
/// Block-scans the signal for sustained energy at the tone frequency, then
/// refines the onset by cross-correlating the known tone waveform around
/// the candidate block. Returns `None` when no sustained tone is present.
pub fn locate_tone(signal: &[f32], rate: u32) -> Option<f64> {
    let block_len = (rate as u64 * BLOCK_MS / 1000).max(1) as usize;
    if signal.len() < block_len {
        return None;
    }

    let magnitudes: Vec<f64> = signal
        .chunks(block_len)
        .map(|block| block_magnitude(block, rate))
        .collect();

    let peak = magnitudes.iter().cloned().fold(0.0f64, f64::max);
    if peak <= SILENCE_FLOOR {
        return None;
    }

    // The tone must hold for at least half its nominal duration to rule
    // out clicks and speech transients at the same frequency.
    let threshold = peak * PEAK_FRACTION;
    let required = ((TONE_DURATION_MS / 2) / BLOCK_MS).max(1) as usize;

    let mut run = 0usize;
    let mut onset_block = None;
    for (i, &mag) in magnitudes.iter().enumerate() {
        if mag >= threshold {
            run += 1;
            if run >= required {
                onset_block = Some(i + 1 - run);
                break;
            }
        } else {
            run = 0;
        }
    }

    let onset_block = onset_block?;
    let coarse = onset_block * block_len;
    Some(refine_onset(signal, rate, coarse, block_len) as f64 / rate as f64)
}

/// Sample-level refinement: maximize correlation magnitude of the known
/// tone against the signal within ±2 blocks of the coarse onset.
fn refine_onset(signal: &[f32], rate: u32, coarse: usize, block_len: usize) -> usize {
    let tone = reference_tone(rate);
    let window = block_len * 2;
    let start = coarse.saturating_sub(window);
    let end = (coarse + window).min(signal.len().saturating_sub(1));

    let mut best = coarse;
    let mut best_score = f64::MIN;
    for offset in start..=end {
        let len = tone.len().min(signal.len() - offset);
        if len == 0 {
            break;
        }
        let dot: f64 = signal[offset..offset + len]
            .iter()
            .zip(&tone[..len])
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum();
        let score = dot.abs();
        if score > best_score {
            best_score = score;
            best = offset;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8_000;

    fn signal_with_tone_at(seconds: f64) -> Vec<f32> {
        let onset = (seconds * RATE as f64) as usize;
        let tone = reference_tone(RATE);
        let mut signal = vec![0.0f32; onset + tone.len() + RATE as usize];
        // Low-level hiss so the tone is not the only nonzero content.
        for (i, s) in signal.iter_mut().enumerate() {
            *s = if i % 2 == 0 { 0.001 } else { -0.001 };
        }
        signal[onset..onset + tone.len()].copy_from_slice(&tone);
        signal
    }

    #[test]
    fn test_reference_tone_shape() {
        let tone = reference_tone(RATE);
        assert_eq!(tone.len(), 6_400); // 800ms at 8kHz
        let max = tone.iter().cloned().fold(0.0f32, f32::max);
        assert!((max - TONE_AMPLITUDE).abs() < 0.01);
    }

    #[test]
    fn test_locate_tone_within_tolerance() {
        for &at in &[0.5f64, 2.0, 7.05] {
            let signal = signal_with_tone_at(at);
            let found = locate_tone(&signal, RATE).unwrap();
            assert!(
                (found - at).abs() <= 0.05,
                "tone at {at}s located at {found}s"
            );
        }
    }

    #[test]
    fn test_locate_tone_at_start() {
        let signal = signal_with_tone_at(0.0);
        let found = locate_tone(&signal, RATE).unwrap();
        assert!(found <= 0.05);
    }

    #[test]
    fn test_silence_has_no_tone() {
        let signal = vec![0.0f32; RATE as usize * 5];
        assert!(locate_tone(&signal, RATE).is_none());
    }

    #[test]
    fn test_short_click_is_not_a_tone() {
        // 40ms burst: loud but far below the sustain requirement.
        let mut signal = vec![0.0f32; RATE as usize * 3];
        let click: Vec<f32> = reference_tone(RATE)[..320].to_vec();
        signal[8_000..8_000 + click.len()].copy_from_slice(&click);
        assert!(locate_tone(&signal, RATE).is_none());
    }

    #[test]
    fn test_empty_signal() {
        assert!(locate_tone(&[], RATE).is_none());
    }
}
