//! Stable per-installation machine identity.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{Result, utils::now_rfc3339};

const MACHINE_FILE: &str = "machine.toml";
const SALT: &str = "RiceRound";

#[derive(Debug, Serialize, Deserialize)]
struct MachineFile {
    machine_id: String,
    #[serde(default)]
    created_at: String,
}

/// Trims, lowercases and salts a raw host id, then hex-encodes its SHA-256 digest.
pub fn normalize_machine_id(raw: &str) -> String {
    let salted = format!("{}{}", raw.trim().to_lowercase(), SALT);
    format!("{:x}", Sha256::digest(salted.as_bytes()))
}

/// Reads the machine id from `settings_dir`, generating and persisting one on first use.
pub fn machine_id(settings_dir: &Path) -> Result<String> {
    fs::create_dir_all(settings_dir)?;
    let path = settings_dir.join(MACHINE_FILE);
    if let Ok(data) = fs::read_to_string(&path) {
        let file: MachineFile = toml::from_str(&data)?;
        if !file.machine_id.is_empty() {
            return Ok(file.machine_id);
        }
    }

    let file = MachineFile {
        machine_id: normalize_machine_id(&uuid::Uuid::new_v4().to_string()),
        created_at: now_rfc3339(),
    };
    fs::write(&path, toml::to_string(&file)?)?;
    info!("generated machine id {}", file.machine_id);
    Ok(file.machine_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_case_and_space_insensitive() {
        let a = normalize_machine_id("  ABC-def ");
        assert_eq!(a, normalize_machine_id("abc-def"));
        assert_eq!(a.len(), 64);
        assert_eq!(a, "8a3a750ea7464f3092108d50603f4514445e19a138bdc102c4d2bb625172f2b1");
    }

    #[test]
    fn test_machine_id_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("RiceRound");
        let first = machine_id(&settings).unwrap();
        assert_eq!(machine_id(&settings).unwrap(), first);
        assert!(fs::read_to_string(settings.join(MACHINE_FILE)).unwrap().contains(&first));
    }
}
