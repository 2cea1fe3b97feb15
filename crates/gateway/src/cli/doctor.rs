use lmr_domain::config::{Config, ConfigSeverity};

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("lemonade-router doctor");
    println!("======================\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_state_dir(config, &mut all_passed);
    check_backend_paths(config, &mut all_passed);
    check_port_available(config, &mut all_passed).await;

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_state_dir(config: &Config, all_passed: &mut bool) {
    let path = &config.cache.state_dir;
    if let Err(e) = std::fs::create_dir_all(path) {
        print_check("State directory", false, format!("{}: {e}", path.display()));
        *all_passed = false;
        return;
    }
    let probe = path.join(".doctor_probe");
    let writable = std::fs::write(&probe, b"probe").is_ok();
    let _ = std::fs::remove_file(&probe);

    print_check(
        "State directory",
        writable,
        if writable {
            format!("{} (writable)", path.display())
        } else {
            format!("{} (not writable)", path.display())
        },
    );
    if !writable {
        *all_passed = false;
    }
}

fn check_backend_paths(config: &Config, _all_passed: &mut bool) {
    let expected = ["llamacpp", "flm", "ryzenai-llm", "whispercpp", "sd-cpp", "kokoro"];
    let configured = expected
        .iter()
        .filter(|recipe| config.backend_paths.contains_key(**recipe))
        .count();

    print_check(
        "Backend path overrides",
        true,
        format!("{configured}/{} configured (the rest install on first load)", expected.len()),
    );
}

async fn check_port_available(config: &Config, all_passed: &mut bool) {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let available = tokio::net::TcpListener::bind(&addr).await.is_ok();

    print_check(
        "Server port available",
        available,
        if available {
            addr
        } else {
            format!("{addr} (already in use)")
        },
    );
    if !available {
        *all_passed = false;
    }
}

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_checks_pass_against_a_writable_state_dir_and_free_port() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, b"").unwrap();

        let mut config = Config::default();
        config.cache.state_dir = dir.path().join("state");
        config.server.port = 0; // bind to an ephemeral, always-free port

        let passed = run(&config, config_path.to_str().unwrap()).await.unwrap();
        assert!(passed);
    }

    #[tokio::test]
    async fn state_dir_under_a_regular_file_fails_the_check() {
        // create_dir_all can never succeed with a plain file as an ancestor,
        // regardless of the user's own permission bits (unlike a readonly
        // directory, which root ignores).
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_directory");
        std::fs::write(&blocker, b"x").unwrap();

        let mut config = Config::default();
        config.cache.state_dir = blocker.join("state");

        let mut all_passed = true;
        check_state_dir(&config, &mut all_passed);
        assert!(!all_passed);
    }
}
