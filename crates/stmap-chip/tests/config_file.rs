//! Hardware configuration file loading

use std::io::Write;

use stmap_chip::{ChipError, HardwareConfig, MLCoord};

const TWO_CHIP_CARD: &str = r#"
name = "two-chip card"

[[space]]
name = "chip"
dims = [2, 1]
bandwidth = 4.0

[[space]]
name = "core"
dims = [4, 4]
bandwidth = 32.0

[time]
steps = 2
phases = 4

[core]
memory_bytes = 147456
disabled = [[[1, 0], [3, 3]]]
"#;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(TWO_CHIP_CARD.as_bytes()).expect("write config");

    let hw = HardwareConfig::from_file(file.path()).expect("load config");
    assert_eq!(hw.name, "two-chip card");
    assert_eq!(hw.column_count(), 32);
    assert_eq!(hw.points_per_column(), 8);
    assert_eq!(hw.core.alignment, 32, "alignment falls back to default");

    let off = MLCoord::from_levels(vec![[1, 0].into(), [3, 3].into()]);
    assert!(hw.is_disabled(&off));
    assert_eq!(hw.bandwidth(0), Some(4.0));
}

#[test]
fn test_missing_file() {
    let err = HardwareConfig::from_file("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, ChipError::FileNotFound { .. }));
}

#[test]
fn test_invalid_toml() {
    let err = HardwareConfig::from_toml_str("space = 3").unwrap_err();
    assert!(matches!(err, ChipError::Parse { .. }));
}

#[test]
fn test_validation_failure_from_text() {
    let text = TWO_CHIP_CARD.replace("phases = 4", "phases = 0");
    let err = HardwareConfig::from_toml_str(&text).unwrap_err();
    assert!(matches!(err, ChipError::Validation { .. }));
}

#[test]
fn test_toml_round_trip() {
    let hw = HardwareConfig::multi_chip((2, 2), (3, 3)).with_steps(2);
    let text = hw.to_toml_string().expect("serialize");
    let back = HardwareConfig::from_toml_str(&text).expect("parse");
    assert_eq!(back, hw);
}
