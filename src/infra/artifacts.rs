use crate::error::{CoordinatorError, Result};
use std::path::{Path, PathBuf};

/// Path of the address file written at deployment for `contract_filename`,
/// e.g. `mixer.wasm` -> `<artifacts_dir>/mixer.txt`.
pub fn contract_address_path(artifacts_dir: &str, contract_filename: &str) -> PathBuf {
    let stem = Path::new(contract_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(contract_filename);
    Path::new(artifacts_dir).join(format!("{stem}.txt"))
}

/// Reads the secret contract address. The file holds the address as plain
/// UTF-8 text.
pub fn read_contract_address(artifacts_dir: &str, contract_filename: &str) -> Result<String> {
    let path = contract_address_path(artifacts_dir, contract_filename);
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        CoordinatorError::Config(format!(
            "failed to read contract address from {}: {e}",
            path.display()
        ))
    })?;
    let address = raw.trim();
    if address.is_empty() {
        return Err(CoordinatorError::Config(format!(
            "contract address file {} is empty",
            path.display()
        )));
    }
    Ok(address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_file_is_named_after_contract_stem() {
        let path = contract_address_path("build/contracts", "mixer.wasm");
        assert_eq!(path, Path::new("build/contracts").join("mixer.txt"));
    }

    #[test]
    fn reads_trimmed_address() {
        let dir = std::env::temp_dir().join(format!("mixer-artifacts-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("mixer.txt"), "0xabc123\n").unwrap();

        let address = read_contract_address(dir.to_str().unwrap(), "mixer.wasm").unwrap();
        assert_eq!(address, "0xabc123");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = read_contract_address("/nonexistent/dir", "mixer.wasm").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
