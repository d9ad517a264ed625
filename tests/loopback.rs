//! End-to-end measurements through the simulated loopback
//!
//! Each test builds a configuration for a host-supported audio API, plays a
//! 1 kHz sine through [`SimulatedLoopback`] and checks the calibrated,
//! aligned result.

use approx::assert_relative_eq;
use loopmeter::audio::calibration::UNKNOWN_UNIT;
use loopmeter::audio::device::{supported_apis, DeviceCapabilities, DirectionInfo};
use loopmeter::audio::signal::{rms, ToneGenerator};
use loopmeter::{
    Advisory, Calibration, CalibrationSource, LoopbackMeasurement, MeasurementConfig,
    MeasurementError, SimulatedLoopback, Stimulus, Transfer,
};

const FS: u32 = 44100;

fn host_api() -> &'static str {
    supported_apis(std::env::consts::OS)
        .first()
        .copied()
        .unwrap_or("alsa")
}

fn device(channels: usize) -> DirectionInfo {
    DirectionInfo {
        name: "Loopback Interface".to_string(),
        api: host_api().to_string(),
        channels,
        sample_rates: vec![44100, 48000, 96000],
    }
}

/// Two output channels, two input channels, 100 samples of padding at 44.1 kHz
fn config() -> MeasurementConfig {
    MeasurementConfig {
        sample_rate: FS,
        latency: Some(100.0 / FS as f64),
        device: DeviceCapabilities {
            output: device(2),
            input: device(2),
        },
        ..Default::default()
    }
}

fn sine(amplitude: f64, samples: usize) -> Stimulus {
    let mut tone = ToneGenerator::new(1000.0, amplitude, FS);
    Stimulus::mono(tone.take(samples), FS).unwrap()
}

fn padded(stimulus: &Stimulus, pad: usize) -> Vec<f64> {
    let mut out = vec![0.0; pad];
    out.extend_from_slice(&stimulus.channels()[0]);
    out.extend(std::iter::repeat(0.0).take(pad));
    out
}

#[test]
fn test_uncalibrated_sine_round_trip() {
    let stimulus = sine(0.5, 1000);
    let measurement = LoopbackMeasurement::new(config(), SimulatedLoopback::new(1.0, 0, 1));

    let result = measurement.run(&stimulus).unwrap();

    assert_eq!(result.pad_samples, 100);
    assert_eq!(result.len(), 1200);
    assert_eq!(result.dut_in.len(), 1);
    assert_eq!(result.dut_in[0], padded(&stimulus, 100));
    assert_eq!(result.dut_out[0], result.dut_in[0]);
    assert_eq!(result.dut_in_unit, UNKNOWN_UNIT);
    assert_eq!(result.dut_out_unit, UNKNOWN_UNIT);
    assert_eq!(result.stimulus_rms, None);
    assert_relative_eq!(result.time[1], 1.0 / FS as f64, epsilon = 1e-12);
    assert_eq!(result.time, result.dut_in_time);

    // No calibration at all is a normal outcome, not a skipped stage
    assert!(!result
        .advisories
        .contains(|a| matches!(a, Advisory::CalibrationSkipped { .. })));
    assert!(result
        .advisories
        .contains(|a| matches!(a, Advisory::LatencyBelowRecommended { .. })));
}

#[test]
fn test_dac_calibration_scales_stimulus() {
    let stimulus = sine(0.5, 1000);
    let config = MeasurementConfig {
        calibration: Some(CalibrationSource::Inline(Calibration {
            dac: Some(Transfer::gain(2.0, "V")),
            ..Default::default()
        })),
        ..config()
    };
    let measurement = LoopbackMeasurement::new(config, SimulatedLoopback::new(1.0, 0, 1));

    let result = measurement.run(&stimulus).unwrap();

    let raw = padded(&stimulus, 100);
    for (cal, raw) in result.dut_in[0].iter().zip(&raw) {
        assert_relative_eq!(*cal, 2.0 * raw, epsilon = 1e-12);
    }
    assert_eq!(result.dut_in_unit, "V");
    // SENSOR/ADC missing: the response stays uncalibrated
    assert_eq!(result.dut_out_unit, UNKNOWN_UNIT);
    assert_eq!(result.dut_out[0], raw);

    let expected = 2.0 * rms(&stimulus.channels()[0]).unwrap();
    assert_relative_eq!(result.stimulus_rms.unwrap(), expected, epsilon = 1e-9);
}

#[test]
fn test_sensor_and_adc_calibrate_response() {
    let stimulus = sine(0.5, 441);
    let config = MeasurementConfig {
        calibration: Some(CalibrationSource::Inline(Calibration {
            name: Some("bench".to_string()),
            dac: Some(Transfer::gain(1.0, "V")),
            sensor: Some(Transfer::gain(0.01, "Pa").with_delay(0.001)),
            adc: Some(Transfer::gain(4.0, "V")),
        })),
        ..config()
    };
    let measurement = LoopbackMeasurement::new(config, SimulatedLoopback::new(0.5, 0, 1));

    let result = measurement.run(&stimulus).unwrap();

    assert_eq!(result.dut_out_unit, "Pa");
    let raw = padded(&stimulus, 100);
    for (cal, raw) in result.dut_out[0].iter().zip(&raw) {
        assert_relative_eq!(*cal, raw * 0.5 * 4.0 * 0.01, epsilon = 1e-12);
    }
    // Sensor delay shifts only the response time base
    assert_relative_eq!(result.time[0], -0.001, epsilon = 1e-12);
    assert_relative_eq!(result.dut_in_time[0], 0.0, epsilon = 1e-12);
}

#[test]
fn test_delayed_loopback_stays_inside_padding() {
    let stimulus = sine(0.5, 1000);
    let measurement = LoopbackMeasurement::new(config(), SimulatedLoopback::new(1.0, 60, 1));

    let result = measurement.run(&stimulus).unwrap();

    let out = &result.dut_out[0];
    assert_eq!(out.len(), 1200);
    assert!(out[..160].iter().all(|&s| s == 0.0));
    assert_eq!(&out[160..1160], &stimulus.channels()[0][..]);
}

#[test]
fn test_channel_selection_keeps_requested_order() {
    let stimulus = sine(0.5, 500);
    let config = MeasurementConfig {
        channels: vec![2],
        device: DeviceCapabilities {
            output: device(2),
            input: device(3),
        },
        ..config()
    };
    let measurement = LoopbackMeasurement::new(config, SimulatedLoopback::new(1.0, 0, 3));

    let result = measurement.run(&stimulus).unwrap();
    assert_eq!(result.channels, vec![2]);
    assert_eq!(result.dut_out.len(), 1);

    let bad = MeasurementConfig {
        channels: vec![4],
        device: DeviceCapabilities {
            output: device(2),
            input: device(3),
        },
        ..self::config()
    };
    let measurement = LoopbackMeasurement::new(bad, SimulatedLoopback::new(1.0, 0, 3));
    assert!(matches!(
        measurement.run(&stimulus),
        Err(MeasurementError::ChannelOutOfRange { channel: 4, .. })
    ));
}

#[test]
fn test_full_scale_sine_asks_before_continuing() {
    let stimulus = sine(1.0, 1000);

    let declined = LoopbackMeasurement::new(config(), SimulatedLoopback::new(1.0, 0, 1))
        .with_confirmation(|_| false);
    assert!(matches!(
        declined.run(&stimulus),
        Err(MeasurementError::Aborted(_))
    ));

    let accepted = LoopbackMeasurement::new(config(), SimulatedLoopback::new(1.0, 0, 1))
        .with_confirmation(|_| true);
    let result = accepted.run(&stimulus).unwrap();
    assert!(result
        .advisories
        .contains(|a| matches!(a, Advisory::PossibleClipping { channel: 1, .. })));
}

#[test]
fn test_too_many_stimulus_channels_rejected() {
    let channels = vec![vec![0.1; 100]; 3];
    let stimulus = Stimulus::new(channels, FS).unwrap();
    let measurement = LoopbackMeasurement::new(config(), SimulatedLoopback::default());
    assert!(matches!(
        measurement.run(&stimulus),
        Err(MeasurementError::UnsupportedChannelCount {
            requested: 3,
            available: 2
        })
    ));
}

#[test]
fn test_unlisted_sample_rate_is_advisory() {
    let mut tone = ToneGenerator::new(1000.0, 0.5, 22050);
    let stimulus = Stimulus::mono(tone.take(220), 22050).unwrap();
    let config = MeasurementConfig {
        sample_rate: 22050,
        latency: Some(0.01),
        ..config()
    };
    let measurement = LoopbackMeasurement::new(config, SimulatedLoopback::default());

    let result = measurement.run(&stimulus).unwrap();
    assert!(result
        .advisories
        .contains(|a| matches!(a, Advisory::SampleRateNotListed { sample_rate: 22050, .. })));
}

#[test]
fn test_named_calibration_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    Calibration {
        name: Some("rig-a".to_string()),
        dac: Some(Transfer::gain(3.0, "V")),
        ..Default::default()
    }
    .save(&dir.path().join("rig-a.json"))
    .unwrap();

    let config = MeasurementConfig {
        calibration: Some(CalibrationSource::Named("rig-a".to_string())),
        calibration_dir: dir.path().to_path_buf(),
        ..config()
    };
    let stimulus = sine(0.5, 300);
    let result = LoopbackMeasurement::new(config, SimulatedLoopback::default())
        .run(&stimulus)
        .unwrap();
    assert_eq!(result.dut_in_unit, "V");

    let missing = MeasurementConfig {
        calibration: Some(CalibrationSource::Named("rig-b".to_string())),
        calibration_dir: dir.path().to_path_buf(),
        ..self::config()
    };
    assert!(matches!(
        LoopbackMeasurement::new(missing, SimulatedLoopback::default()).run(&stimulus),
        Err(MeasurementError::CalibrationLoad { .. })
    ));
}

#[test]
fn test_result_serializes_to_json() {
    let stimulus = sine(0.5, 100);
    let result = LoopbackMeasurement::new(config(), SimulatedLoopback::default())
        .run(&stimulus)
        .unwrap();

    let json: serde_json::Value = serde_json::to_value(&result).unwrap();
    assert_eq!(json["sample_rate"], 44100);
    assert_eq!(json["pad_samples"], 100);
    assert_eq!(json["dut_in_unit"], "???");
    assert!(json["stimulus_rms"].is_null());
    assert_eq!(json["dut_out"][0].as_array().unwrap().len(), 300);
}
