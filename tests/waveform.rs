//! Waveform model and signal primitive tests.

use scopedec::cache::AnalysisCache;
use scopedec::signal::*;
use scopedec::waveform::*;

fn uniform_analog(timescale: i64, samples: &[f32]) -> UniformWaveform<f32> {
    let tb = Timebase {
        timescale,
        ..Timebase::default()
    };
    UniformWaveform::from_samples(tb, samples.to_vec())
}

#[test]
fn duration_fill_from_offsets() {
    let mut w = SparseWaveform::new(Timebase::default());
    for &o in &[0i64, 3, 7, 20] {
        w.push(o, 1, 0.0f32);
    }
    w.fill_durations();
    assert_eq!(w.durations, vec![3, 4, 13, 1]);
}

#[test]
fn sparse_invariants_hold_after_fill() {
    let mut w = SparseWaveform::new(Timebase::default());
    for &o in &[2i64, 9, 11, 30] {
        w.push(o, 1, true);
    }
    w.fill_durations();
    assert_eq!(w.samples.len(), w.offsets.len());
    assert_eq!(w.samples.len(), w.durations.len());
    for i in 1..w.len() {
        assert!(w.offsets[i] > w.offsets[i - 1]);
        assert!(w.offsets[i - 1] + w.durations[i - 1] <= w.offsets[i]);
        assert!(w.durations[i] >= 1);
    }
    // Femtosecond conversion is monotonic.
    for i in 1..w.len() {
        assert!(SampleSource::offset_fs(&w, i) > SampleSource::offset_fs(&w, i - 1));
    }
}

#[test]
fn interpolate_time_at_exact_sample_is_zero() {
    let w = uniform_analog(1, &[0.25, 0.75]);
    assert_eq!(interpolate_time(&w, 0, 0.25), 0.0);
}

#[test]
fn interpolate_time_no_crossing_is_zero() {
    let w = uniform_analog(1, &[0.0, 0.1]);
    assert_eq!(interpolate_time(&w, 0, 0.5), 0.0);
}

#[test]
fn interpolate_time_linear_crossing() {
    let w = uniform_analog(1, &[0.0, 1.0]);
    assert!((interpolate_time(&w, 0, 0.25) - 0.25).abs() < 1e-6);
    assert!((interpolate_time(&w, 0, 0.75) - 0.75).abs() < 1e-6);
}

#[test]
fn interpolate_value_normalizes_sparse_spacing() {
    let mut w = SparseWaveform::new(Timebase::default());
    w.push(0, 10, 0.0f32);
    w.push(10, 1, 1.0f32);
    // Five ticks into a ten tick gap is halfway up the ramp.
    assert!((interpolate_value(&w, 0, 5.0) - 0.5).abs() < 1e-6);
}

#[test]
fn edge_finder_threshold_above_everything() {
    let w = uniform_analog(1, &[0.0, 1.0, 0.0, 1.0, 0.0]);
    assert!(find_rising_edges(&w, 2.0).is_empty());
    assert!(find_falling_edges(&w, 2.0).is_empty());
    assert!(find_zero_crossings(&w, 2.0).is_empty());
}

#[test]
fn rising_edge_interpolates_crossing_time() {
    let w = uniform_analog(2, &[0.0, 0.0, 1.0]);
    // Edge between samples 1 and 2; crossing halfway through sample 1.
    assert_eq!(find_rising_edges(&w, 0.5), vec![3]);
}

#[test]
fn digital_edges_sit_at_sample_midpoints() {
    let tb = Timebase {
        timescale: 10,
        trigger_phase: 3,
        ..Timebase::default()
    };
    let w = UniformWaveform::from_samples(tb, vec![false, false, true, true, false]);
    assert_eq!(find_digital_rising_edges(&w), vec![8 + 20]);
    assert_eq!(find_digital_falling_edges(&w), vec![8 + 40]);
    assert_eq!(find_digital_edges(&w), vec![28, 48]);
}

#[test]
fn histogram_clamps_and_clips() {
    let w = uniform_analog(1, &[-1.0, 0.1, 0.5, 0.9, 2.0]);
    let clamped = make_histogram(&w, 0.0, 1.0, 4);
    assert_eq!(clamped.iter().sum::<usize>(), 5);
    assert_eq!(clamped[0], 2); // -1.0 clamped in, 0.1
    assert_eq!(clamped[3], 2); // 0.9, 2.0 clamped in

    let clipped = make_histogram_clipped(&w, 0.0, 1.0, 4);
    assert_eq!(clipped.iter().sum::<usize>(), 3);
    assert_eq!(clipped[0], 1);
}

#[test]
fn level_measurements() {
    let w = uniform_analog(1, &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0]);
    assert_eq!(min_level(&w), 0.0);
    assert_eq!(max_level(&w), 1.0);
    assert!((avg_level(&w) - 0.5).abs() < 1e-6);
    assert!(base_level(&w) < 0.1);
    assert!(top_level(&w) > 0.9);
}

#[test]
fn peak_finder_reports_local_maxima() {
    let w = uniform_analog(1, &[0.0, 1.0, 2.0, 1.0, 0.0, 1.0, 3.0, 1.0]);
    let peaks = find_peaks(&w, 0.5);
    assert!(peaks.contains(&3) || peaks.contains(&2));
}

#[test]
fn clock_sampling_emits_one_sample_per_edge() {
    // Data toggles every tick, clock every four ticks.
    let n = 32;
    let data = UniformWaveform::from_samples(
        Timebase::default(),
        (0..n).map(|i| i % 2 == 0).collect::<Vec<_>>(),
    );
    let clock = UniformWaveform::from_samples(
        Timebase::default(),
        (0..n).map(|i| (i / 4) % 2 == 1).collect::<Vec<_>>(),
    );
    let nedges = (1..n).filter(|&i| (i / 4) % 2 != ((i - 1) / 4) % 2).count();

    let out = sample_on_edges(&data, &clock, EdgeMode::Any);
    assert_eq!(out.len(), nedges);
    for i in 1..out.len() {
        assert!(out.offsets[i] > out.offsets[i - 1]);
    }

    let rising = sample_on_edges(&data, &clock, EdgeMode::Rising);
    let falling = sample_on_edges(&data, &clock, EdgeMode::Falling);
    assert_eq!(rising.len() + falling.len(), out.len());
}

#[test]
fn interpolating_sampler_tracks_a_ramp() {
    let data = uniform_analog(10, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    let clock = UniformWaveform::from_samples(
        Timebase {
            timescale: 10,
            ..Timebase::default()
        },
        vec![false, true, false, true, false, true, false, true],
    );
    let out = sample_on_edges_interpolated(&data, &clock, EdgeMode::Rising);
    // The ramp has slope 0.1 per femtosecond tick, so interpolated values
    // land on the line.
    for i in 0..out.len() {
        let expected = out.offsets[i] as f32 / 10.0;
        assert!((out.samples[i] - expected).abs() < 1e-4);
    }
}

#[test]
fn zero_crossing_cache_hits_on_same_revision() {
    let cache = AnalysisCache::new();
    let w = uniform_analog(1, &[0.0, 1.0, 0.0, 1.0]);

    let a = find_zero_crossings_cached(&cache, &w, 0.5);
    let b = find_zero_crossings_cached(&cache, &w, 0.5);
    assert_eq!(a, b);
    assert_eq!(cache.len(), 1);

    // Different threshold is a different key.
    let _ = find_zero_crossings_cached(&cache, &w, 0.7);
    assert_eq!(cache.len(), 2);

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn cache_misses_after_revision_bump() {
    let cache = AnalysisCache::new();
    let mut w = uniform_analog(1, &[0.0, 1.0, 0.0]);
    let _ = find_zero_crossings_cached(&cache, &w, 0.5);
    w.samples.push(1.0);
    w.bump_revision();
    let _ = find_zero_crossings_cached(&cache, &w, 0.5);
    assert_eq!(cache.len(), 2);
}

#[test]
fn waveform_equality_ignores_identity() {
    let a = uniform_analog(1, &[0.0, 1.0]);
    let b = uniform_analog(1, &[0.0, 1.0]);
    assert_eq!(a, b);
    assert_ne!(a.id(), b.id());
}
