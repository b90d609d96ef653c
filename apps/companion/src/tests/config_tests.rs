use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

use super::*;

fn temp_dir(tag: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = env::temp_dir().join(format!("companion_{tag}_{suffix}"));
    fs::create_dir_all(&dir).expect("temp dir");
    dir
}

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_match_worker_contract() {
    let settings = Settings::default();
    assert_eq!(settings.control_base_url(), "http://127.0.0.1:5000");
    assert_eq!(settings.supervisor_config(), SupervisorConfig::default());
    assert_eq!(settings.request_timeout(), Duration::from_secs(10));
    assert_eq!(settings.reconnect_policy(), ReconnectPolicy::default());
    assert_eq!(settings.event_path, "/events");
}

#[test]
fn file_values_override_defaults_and_keep_the_rest() {
    let dir = temp_dir("file");
    let path = dir.join("companion.toml");
    fs::write(
        &path,
        "port = 5050\nkill_grace_ms = 1500\nsession_title = \"Hundred Years War\"\n",
    )
    .expect("write config");

    let settings = read_settings_file(Some(&path)).expect("load");
    assert_eq!(settings.port, 5050);
    assert_eq!(settings.kill_grace_ms, 1500);
    assert_eq!(settings.session_title.as_deref(), Some("Hundred Years War"));
    assert_eq!(settings.host, "127.0.0.1");
    assert_eq!(settings.activation_grace_ms, 3000);

    fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = temp_dir("missing");
    let err = read_settings_file(Some(&dir.join("absent.toml"))).expect_err("must fail");
    assert!(err.to_string().contains("absent.toml"));
    fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn malformed_file_is_an_error() {
    let dir = temp_dir("malformed");
    let path = dir.join("companion.toml");
    fs::write(&path, "port = \"not a number\"\n").expect("write config");
    let err = read_settings_file(Some(&path)).expect_err("must fail");
    assert!(format!("{err:#}").contains("failed to parse"));
    fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn env_overrides_prefer_app_prefix_and_skip_bad_numbers() {
    let settings = apply_env_overrides(
        Settings::default(),
        lookup(&[
            ("COMPANION_HOST", "10.0.0.2"),
            ("APP__HOST", "10.0.0.3"),
            ("COMPANION_PORT", "not-a-port"),
            ("COMPANION_KILL_GRACE_MS", "250"),
            ("APP__SESSION_TITLE", "Napoleonic Wars"),
        ]),
    );
    assert_eq!(settings.host, "10.0.0.3");
    assert_eq!(settings.port, 5000);
    assert_eq!(settings.kill_grace_ms, 250);
    assert_eq!(settings.session_title.as_deref(), Some("Napoleonic Wars"));
}

#[test]
fn worker_command_is_unbuffered() {
    let settings = Settings {
        python: "python3".into(),
        worker_script: PathBuf::from("backend/app.py"),
        worker_dir: Some(PathBuf::from("/opt/companion")),
        ..Settings::default()
    };
    let command = settings.worker_command();
    assert_eq!(command.program, PathBuf::from("python3"));
    assert_eq!(command.args, vec!["-u".to_string(), "backend/app.py".to_string()]);
    assert!(command
        .env
        .contains(&("PYTHONUNBUFFERED".to_string(), "1".to_string())));
    assert_eq!(command.working_dir, Some(PathBuf::from("/opt/companion")));
}

#[test]
fn existing_venv_interpreter_wins() {
    let dir = temp_dir("venv");
    let venv_python = dir.join("python");
    fs::write(&venv_python, "").expect("fake interpreter");

    let settings = Settings {
        venv_python: Some(venv_python.clone()),
        ..Settings::default()
    };
    assert_eq!(settings.resolve_interpreter(), venv_python);

    let settings = Settings {
        venv_python: Some(dir.join("missing-python")),
        python: "python3".into(),
        ..Settings::default()
    };
    assert_eq!(settings.resolve_interpreter(), PathBuf::from("python3"));

    fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn zero_timeouts_and_delays_are_rejected() {
    assert!(Settings::default().validate().is_ok());

    let settings = apply_env_overrides(
        Settings::default(),
        lookup(&[("APP__REQUEST_TIMEOUT_SECS", "0")]),
    );
    let err = settings.validate().expect_err("zero timeout");
    assert!(err.to_string().contains("request_timeout_secs"));

    let settings = Settings {
        reconnect_initial_ms: 0,
        ..Settings::default()
    };
    assert!(settings.validate().is_err());
}
