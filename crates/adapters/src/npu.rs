use lmr_domain::error::{Error, Result};

/// Reads the installed NPU driver version and compares it against a
/// recipe's minimum-required version. The actual version string is read
/// from a file the platform driver package maintains; tests substitute an
/// override via `LEMONADE_NPU_DRIVER_VERSION_OVERRIDE` so the precondition
/// can be exercised without real NPU hardware.
pub fn check_driver_version(min_version: &str) -> Result<()> {
    let installed = installed_driver_version()?;
    if compare_versions(&installed, min_version) < 0 {
        return Err(Error::PreconditionFailed(format!(
            "NPU driver {installed} is older than the required minimum {min_version}"
        )));
    }
    Ok(())
}

fn installed_driver_version() -> Result<String> {
    if let Ok(v) = std::env::var("LEMONADE_NPU_DRIVER_VERSION_OVERRIDE") {
        return Ok(v);
    }
    std::fs::read_to_string("/sys/class/amdgpu/npu/driver_version")
        .map(|s| s.trim().to_string())
        .map_err(|_| Error::PreconditionFailed("NPU driver version could not be determined".into()))
}

/// Dotted-integer version compare, e.g. `"1.10.0"` vs `"1.9.0"`. Returns
/// negative/zero/positive like `Ordering` encoded as `i32`.
fn compare_versions(a: &str, b: &str) -> i32 {
    let pa = a.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    let pb = b.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    for (x, y) in pa.zip(pb) {
        if x != y {
            return if x < y { -1 } else { 1 };
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_versions_compare_equal() {
        assert_eq!(compare_versions("1.2.3", "1.2.3"), 0);
    }

    #[test]
    fn older_version_compares_less() {
        assert!(compare_versions("1.2.0", "1.10.0") < 0);
    }

    #[test]
    fn newer_version_compares_greater() {
        assert!(compare_versions("2.0.0", "1.10.0") > 0);
    }
}
