use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
};

fn run_bin(args: &[&str]) -> bool {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_cotsabc"));

    let output = Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command");

    if !output.status.success() {
        let stdout_str =
            std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
        let stderr_str =
            std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");
        eprintln!("{args:?} failed\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n");
    }
    output.status.success()
}

fn write_config(test_dir: &Path, extra: &str) {
    let config_contents = String::new()
        + "seed = 2024\n"
        + "\n"
        + "[data]\n"
        + "theta = { mu = 0.6, delta = 0.01, nu = 0.4 }\n"
        + "init = { coral = 34, starfish = 16 }\n"
        + "obs_times = [ 0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0, 18.0, 20.0,]\n"
        + "\n"
        + "[sim]\n"
        + "max_events = 100000\n"
        + "\n"
        + "[rejection]\n"
        + "n_draws = 2000\n"
        + "quantile = 0.05\n"
        + "\n"
        + "[mcmc]\n"
        + "n_iter = 400\n"
        + "n_chains = 2\n"
        + "tolerance = 150.0\n"
        + "\n"
        + "[smc]\n"
        + "n_particles = 200\n"
        + "n_generations = 3\n"
        + "tol_init = 200.0\n"
        + "scaling_factor = 2.0\n"
        + "ess_threshold = 100.0\n"
        + extra;

    fs::write(test_dir.join("config.toml"), config_contents).expect("failed to write config file");
}

fn fresh_dir(name: &str) -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);
    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    test_dir
}

#[test]
fn basic_workflow() {
    let test_dir = fresh_dir("basic_workflow");
    write_config(&test_dir, "");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--sim-dir", test_dir_str, "generate"]));
    assert!(test_dir.join("observed.toml").exists());

    // Both need the covariance estimated from a rejection run.
    assert!(!run_bin(&["--sim-dir", test_dir_str, "mcmc"]));
    assert!(!run_bin(&["--sim-dir", test_dir_str, "smc"]));

    assert!(run_bin(&["--sim-dir", test_dir_str, "rejection"]));
    assert!(run_bin(&["--sim-dir", test_dir_str, "mcmc"]));
    assert!(run_bin(&["--sim-dir", test_dir_str, "smc"]));

    for file in ["rejection.msgpack", "mcmc.msgpack", "smc.msgpack"] {
        assert!(test_dir.join(file).exists(), "missing {file}");
    }

    assert!(run_bin(&["--sim-dir", test_dir_str, "analyze"]));

    assert!(run_bin(&["--sim-dir", test_dir_str, "clean"]));
    assert!(!test_dir.join("rejection.msgpack").exists());
    assert!(test_dir.join("observed.toml").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn same_seed_reproduces_outputs() {
    let test_dir = fresh_dir("same_seed_reproduces_outputs");
    write_config(&test_dir, "");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--sim-dir", test_dir_str, "generate"]));
    let observed_a = fs::read(test_dir.join("observed.toml")).expect("failed to read dataset");
    assert!(run_bin(&["--sim-dir", test_dir_str, "rejection"]));
    let rejection_a = fs::read(test_dir.join("rejection.msgpack")).expect("failed to read output");

    assert!(run_bin(&["--sim-dir", test_dir_str, "generate"]));
    assert!(run_bin(&["--sim-dir", test_dir_str, "rejection"]));

    assert_eq!(
        observed_a,
        fs::read(test_dir.join("observed.toml")).expect("failed to read dataset")
    );
    assert_eq!(
        rejection_a,
        fs::read(test_dir.join("rejection.msgpack")).expect("failed to read output")
    );

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn invalid_config_fails_fast() {
    let test_dir = fresh_dir("invalid_config_fails_fast");
    write_config(&test_dir, "cov_scale = -1.0\n");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(!run_bin(&["--sim-dir", test_dir_str, "generate"]));
    assert!(!test_dir.join("observed.toml").exists());

    fs::remove_dir_all(&test_dir).ok();
}
