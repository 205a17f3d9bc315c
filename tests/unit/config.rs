use super::*;

#[test]
fn parses_model_file_and_ignores_unknown_fields() {
    let json = r#"{
        "canvas_size": {"w": 1535, "h": 1062},
        "boxes": [],
        "output_suffix": "{nome}",
        "imposition_settings": {
            "enabled": true,
            "target_w_mm": 130,
            "target_h_mm": 90,
            "print_after_generation": true
        }
    }"#;
    let cfg = ModelConfig::from_json_str(json).unwrap();
    let imp = cfg.imposition();
    assert!(imp.enabled);
    assert_eq!((imp.target_w_mm, imp.target_h_mm), (130.0, 90.0));
    assert!(imp.print_after_generation);
    assert_eq!(cfg.naming_pattern("convite"), "convite_{nome}");
}

#[test]
fn missing_imposition_means_disabled() {
    let cfg = ModelConfig::from_json_str("{}").unwrap();
    assert_eq!(cfg.imposition(), ImpositionSettings::disabled());
    assert_eq!(cfg.naming_pattern("convite"), "convite");
}

#[test]
fn partial_imposition_object_uses_defaults() {
    let cfg = ModelConfig::from_json_str(r#"{"imposition_settings": {"enabled": false}}"#).unwrap();
    assert!(!cfg.imposition().enabled);
    assert!(!cfg.imposition().print_after_generation);
}

#[test]
fn enabled_imposition_requires_positive_sizes() {
    let err = ModelConfig::from_json_str(
        r#"{"imposition_settings": {"enabled": true, "target_w_mm": 0, "target_h_mm": 90}}"#,
    )
    .unwrap_err();
    assert!(matches!(err, CardError::Validation(_)));
    assert!(ImpositionSettings::sheets(130.0, -1.0).validate().is_err());
    assert!(ImpositionSettings::sheets(130.0, 90.0).validate().is_ok());
}

#[test]
fn malformed_json_is_a_serde_error() {
    let err = ModelConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, CardError::Serde(_)));
}

#[test]
fn load_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("template_v3.json");
    std::fs::write(&path, r#"{"output_suffix": "lote"}"#).unwrap();
    let cfg = ModelConfig::load(&path).unwrap();
    assert_eq!(cfg.output_suffix.as_deref(), Some("lote"));

    let err = ModelConfig::load(&dir.path().join("missing.json")).unwrap_err();
    assert!(err.is_planning());
}
