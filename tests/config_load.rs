// tests/config_load.rs
//
// Loading the config directory: required files, optional files, env overrides
// and the validation failures that must stop startup.

use std::{env, fs, path::Path};

use chrono::{NaiveTime, Weekday};

use signal_digest::config::{AppConfig, DeliveryMode, ENV_CONFIG_DIR};

const CATALOG: &str = r#"
fallback_category = "sensors"
competitors = ["Kistler"]

[[categories]]
id = "sensors"
name = "Sensors"
keywords = ["sensor"]
"#;

const SCORING: &str = r#"
[dimensions.revenue_impact]
label = "Revenue Impact"
weight = 0.35
[dimensions.time_sensitivity]
label = "Time Sensitivity"
weight = 0.25
[dimensions.strategic_alignment]
label = "Strategic Alignment"
weight = 0.25
[dimensions.competitive_pressure]
label = "Competitive Pressure"
weight = 0.15

[thresholds]
include_in_digest = 5.5
max_signals_per_digest = 10
"#;

fn write_base(dir: &Path) {
    fs::write(dir.join("catalog.toml"), CATALOG).unwrap();
    fs::write(dir.join("scoring.toml"), SCORING).unwrap();
}

fn clear_runtime_env() {
    for k in [
        "DELIVERY_MODE",
        "DIGEST_OUTPUT_DIR",
        "SIGNAL_STATE_PATH",
        "SEED_SIGNALS_PATH",
        "ANTHROPIC_API_KEY",
        "OPENAI_API_KEY",
    ] {
        env::remove_var(k);
    }
}

#[serial_test::serial]
#[test]
fn minimal_dir_loads_with_defaults() {
    clear_runtime_env();
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());

    let cfg = AppConfig::load_from_dir(dir.path()).unwrap();
    assert_eq!(cfg.catalog.fallback().map(|c| c.id.as_str()), Some("sensors"));
    assert_eq!(cfg.scoring.thresholds.include_in_digest, 5.5);
    assert_eq!(cfg.scoring.thresholds.max_signals_per_digest, 10);
    assert!(!cfg.ai.enabled);
    assert!(cfg.recipients.is_empty());
    assert!(cfg.schedule.is_none());
    assert_eq!(cfg.runtime.delivery_mode, DeliveryMode::Mock);
    assert_eq!(
        cfg.runtime.seed_signals_path,
        dir.path().join("seed-signals.json")
    );
}

#[serial_test::serial]
#[test]
fn env_selects_config_dir_and_runtime_knobs() {
    clear_runtime_env();
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    env::set_var(ENV_CONFIG_DIR, dir.path());
    env::set_var("DELIVERY_MODE", "SMTP");
    env::set_var("SIGNAL_STATE_PATH", "memory");
    env::set_var("DIGEST_OUTPUT_DIR", dir.path().join("out"));

    let cfg = AppConfig::load();
    env::remove_var(ENV_CONFIG_DIR);
    clear_runtime_env();

    let cfg = cfg.unwrap();
    assert_eq!(cfg.runtime.delivery_mode, DeliveryMode::Smtp);
    assert_eq!(cfg.runtime.state_path, None);
    assert_eq!(cfg.runtime.digest_dir, dir.path().join("out"));
}

#[serial_test::serial]
#[test]
fn ai_key_resolved_from_env() {
    clear_runtime_env();
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(
        dir.path().join("ai.json"),
        r#"{"enabled": true, "provider": "openai", "api_key": "ENV", "batch_size": 4}"#,
    )
    .unwrap();

    env::set_var("OPENAI_API_KEY", "sk-test");
    let cfg = AppConfig::load_from_dir(dir.path()).unwrap();
    assert_eq!(cfg.ai.api_key, "sk-test");
    assert_eq!(cfg.ai.batch_size, 4);
    assert!(cfg.ai.usable());

    // Missing key: loads, but the backend stays unusable.
    env::remove_var("OPENAI_API_KEY");
    let cfg = AppConfig::load_from_dir(dir.path()).unwrap();
    assert!(cfg.ai.enabled);
    assert!(!cfg.ai.usable());
}

#[serial_test::serial]
#[test]
fn invalid_files_fail_startup() {
    clear_runtime_env();

    // Weights off by 0.1.
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(
        dir.path().join("scoring.toml"),
        SCORING.replace("weight = 0.15", "weight = 0.25"),
    )
    .unwrap();
    let err = AppConfig::load_from_dir(dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains("sum to 1.0"), "{err:#}");

    // Fallback category not in the catalogue.
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(
        dir.path().join("catalog.toml"),
        CATALOG.replace("fallback_category = \"sensors\"", "fallback_category = \"optics\""),
    )
    .unwrap();
    let err = AppConfig::load_from_dir(dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains("optics"), "{err:#}");

    // Unsupported provider.
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(
        dir.path().join("ai.json"),
        r#"{"enabled": true, "provider": "bard", "api_key": "k"}"#,
    )
    .unwrap();
    let err = AppConfig::load_from_dir(dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Unsupported provider"), "{err:#}");

    // Recipient without an address.
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(
        dir.path().join("recipients.toml"),
        "[[recipients]]\nemail = \"sales-team\"\n",
    )
    .unwrap();
    let err = AppConfig::load_from_dir(dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains("sales-team"), "{err:#}");

    // Missing catalogue.
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("scoring.toml"), SCORING).unwrap();
    assert!(AppConfig::load_from_dir(dir.path()).is_err());
}

#[serial_test::serial]
#[test]
fn recipients_default_to_active() {
    clear_runtime_env();
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(
        dir.path().join("recipients.toml"),
        r#"
[[recipients]]
email = "ops@example.com"
name = "Ops"

[[recipients]]
email = "old@example.com"
active = false
"#,
    )
    .unwrap();
    let cfg = AppConfig::load_from_dir(dir.path()).unwrap();
    assert_eq!(cfg.recipients.len(), 2);
    let active: Vec<_> = cfg.active_recipients().map(|r| r.email.as_str()).collect();
    assert_eq!(active, vec!["ops@example.com"]);
}

#[serial_test::serial]
#[test]
fn delivery_table_configures_weekly_slot() {
    clear_runtime_env();
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(
        dir.path().join("recipients.toml"),
        r#"
[delivery]
send_day = "Thursday"
send_time_et = "08:30"
utc_offset_hours = -5

[[recipients]]
email = "ops@example.com"
"#,
    )
    .unwrap();
    let cfg = AppConfig::load_from_dir(dir.path()).unwrap();
    let slot = cfg.schedule.expect("schedule configured");
    assert_eq!(slot.day, Weekday::Thu);
    assert_eq!(slot.at, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
    assert_eq!(slot.utc_offset_hours, -5);
    assert_eq!(cfg.recipients.len(), 1);

    // Defaults fill an empty table; `scheduled = false` switches it off.
    fs::write(dir.path().join("recipients.toml"), "[delivery]\n").unwrap();
    let slot = AppConfig::load_from_dir(dir.path()).unwrap().schedule.unwrap();
    assert_eq!(slot.day, Weekday::Mon);
    assert_eq!(slot.at, NaiveTime::from_hms_opt(7, 0, 0).unwrap());

    fs::write(dir.path().join("recipients.toml"), "[delivery]\nscheduled = false\n").unwrap();
    assert!(AppConfig::load_from_dir(dir.path()).unwrap().schedule.is_none());
}

#[serial_test::serial]
#[test]
fn bad_delivery_slot_fails_startup() {
    clear_runtime_env();
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    for body in [
        "[delivery]\nsend_day = \"someday\"\n",
        "[delivery]\nsend_time = \"25:00\"\n",
        "[delivery]\nutc_offset_hours = 20\n",
    ] {
        fs::write(dir.path().join("recipients.toml"), body).unwrap();
        let err = AppConfig::load_from_dir(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("[delivery]"), "{body}: {err:#}");
    }
}
