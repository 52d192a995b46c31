use chrono::{TimeZone, Utc};
use num_complex::Complex64;

use radarqc::config::PipelineConfig;
use radarqc::data::loader;
use radarqc::filter::{filter_file, FitMode, MaskMode, PreFitPcaFilter, ScoreRule, SpectrumFilter};
use radarqc::processing::{Abs, CompositeProcessor, Normalize, NormalizeTarget, SignalProcessor};
use radarqc::{Channel, CsFile, CsFileHeader, QcError, Samples, Spectrum};

fn header(num_range: usize, num_doppler: usize) -> CsFileHeader {
    CsFileHeader {
        version: 6,
        timestamp: Utc.with_ymd_and_hms(2020, 1, 2, 3, 0, 0).unwrap(),
        cskind: 1,
        site_code: "TEST".to_string(),
        cover_minutes: 30,
        deleted_source: false,
        override_source: false,
        start_freq_mhz: 13.45,
        rep_freq_mhz: 2.0,
        bandwidth_khz: 100.0,
        sweep_up: true,
        num_doppler_cells: num_doppler as i32,
        num_range_cells: num_range as i32,
        first_range_cell: 1,
        range_cell_dist_km: 1.5,
        output_interval: 30,
        create_type_code: "TEST".to_string(),
        creator_version: "2.0 ".to_string(),
        num_active_channels: 3,
        num_spectra_channels: 3,
        active_channels: 7,
        blocks: Vec::new(),
    }
}

fn file_from(num_range: usize, num_doppler: usize, real: [Vec<f64>; 3], cross: f64) -> CsFile {
    let cells = num_range * num_doppler;
    let r = |v: Vec<f64>| Spectrum::real(num_range, num_doppler, v).unwrap();
    let c = || Spectrum::complex(num_range, num_doppler, vec![Complex64::new(cross, -cross); cells]).unwrap();
    let [a1, a2, a3] = real;
    CsFile::new(header(num_range, num_doppler), [r(a1), r(a2), r(a3), c(), c(), c()], None).unwrap()
}

fn real_values(sp: &Spectrum) -> Vec<f64> {
    match sp.samples() {
        Samples::Real(v) => v.clone(),
        Samples::Complex(_) => panic!("expected real samples"),
    }
}

#[test]
fn test_decode_then_abs_normalize_gives_ones() {
    let file = file_from(2, 2, [vec![-3.0; 4], vec![2.5; 4], vec![0.5; 4]], 3.0);
    let bytes = file.to_bytes().unwrap();

    let decoded = loader::load(&bytes).unwrap();
    assert_eq!(decoded.shape(), (2, 2));
    assert_eq!(decoded.header().site_code, "TEST");

    let pipeline = CompositeProcessor::new(vec![Box::new(Abs), Box::new(Normalize::new(NormalizeTarget::MaxAbs))]);
    let processed = decoded.map_spectra(|sp| pipeline.process(sp)).unwrap();
    for channel in Channel::STANDARD {
        let sp = processed.channel(channel).unwrap();
        assert_eq!(real_values(sp), vec![1.0; 4], "{channel}");
    }
}

#[test]
fn test_truncated_file_is_rejected() {
    let bytes = file_from(2, 2, [vec![1.0; 4], vec![1.0; 4], vec![1.0; 4]], 1.0)
        .to_bytes()
        .unwrap();
    let err = loader::load(&bytes[..bytes.len() - 3]).unwrap_err();
    assert!(err.is_format_error(), "{err}");
}

#[test]
fn test_noise_pipeline_from_config() {
    let mut a3 = vec![1.0; 12];
    a3[6] = 100.0;
    let file = file_from(2, 6, [vec![1.0; 12], vec![1.0; 12], a3], 1.0);
    let decoded = loader::load(&file.to_bytes().unwrap()).unwrap();

    let config = PipelineConfig::from_json_str(
        r#"{
            "preprocess": [{ "kind": "rectifier", "floor": 0.0 }],
            "filters": [{ "kind": "noise", "window": 3, "threshold": 5.0,
                          "channels": ["antenna3"], "mask": "zero" }],
            "max_flagged_fraction": 0.25
        }"#,
    )
    .unwrap();
    let preprocess = config.build_preprocess().unwrap();
    let mut filters = config.build_filters().unwrap();

    let current = decoded.map_spectra(|sp| preprocess.process(sp)).unwrap();
    let (filtered, output) = filter_file(filters[0].as_mut(), &current).unwrap();

    // spike at (1, 0) and its reflected neighbourhood
    assert!(output.mask.is_flagged(1, 0));
    assert!(output.mask.is_flagged(1, 1));
    assert!(!output.mask.is_flagged(0, 0));
    assert!(output.is_accepted(config.max_flagged_fraction));
    assert_eq!(real_values(filtered.antenna3())[6], 0.0);
    assert_eq!(filtered.antenna1(), current.antenna1());

    // filtered file still encodes
    let again = loader::load(&filtered.to_bytes().unwrap()).unwrap();
    assert_eq!(again, filtered);
}

#[test]
fn test_pre_fit_pca_across_files() {
    let line = |scale: f64| -> [Vec<f64>; 3] {
        let base: Vec<f64> = (0..8).map(|i| scale * (1.0 + i as f64)).collect();
        [
            base.clone(),
            base.iter().map(|x| 2.0 * x).collect(),
            base.iter().map(|x| -x).collect(),
        ]
    };
    let clean = file_from(2, 4, line(1.0), 1.0);
    let mut noisy_channels = line(1.5);
    noisy_channels[1][3] += 25.0;
    let noisy = file_from(2, 4, noisy_channels, 1.0);

    let channels = vec![Channel::Antenna1, Channel::Antenna2, Channel::Antenna3];
    let mut filter = PreFitPcaFilter::new(
        1,
        ScoreRule::Residual,
        1.0,
        channels.clone(),
        MaskMode::Keep,
        false,
        FitMode::Persist,
    )
    .unwrap();
    filter.fit(&[clean.channels(&channels).unwrap()]).unwrap();

    let output = filter.apply_file(&noisy).unwrap();
    assert_eq!(output.mask.flagged_count(), 1, "scores {:?}", output.scores);
    assert!(output.mask.is_flagged(0, 3));
    assert_eq!(&output.spectra[1], noisy.antenna2());

    let mut small = PreFitPcaFilter::new(3, ScoreRule::Residual, 1.0, channels, MaskMode::Zero, false, FitMode::PerCall)
        .unwrap();
    let tiny = file_from(1, 2, [vec![1.0, 2.0], vec![0.0, 1.0], vec![3.0, 3.0]], 0.0);
    assert!(matches!(
        small.apply_file(&tiny),
        Err(QcError::InsufficientData { samples: 2, components: 3 })
    ));
}
