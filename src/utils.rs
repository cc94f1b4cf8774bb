use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use log::{info, error};
use regex::Regex;
use tokio::fs;

use crate::error::{LampError, Result};

static MAC_ADDRESS: OnceLock<Option<Regex>> = OnceLock::new();

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e);
        }
        info!("Created directory at: {:?}", path);
    }
    Ok(())
}

/// Locks a std mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Extracts the last MAC address found in a platform device id and formats
/// it upper-case and colon separated.
pub fn extract_mac_address(device_id_str: &str) -> Option<String> {
    let re = MAC_ADDRESS
        .get_or_init(|| Regex::new(r"([0-9A-Fa-f]{2}[:\-_]){5}([0-9A-Fa-f]{2})").ok())
        .as_ref()?;
    re.find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace(['-', '_'], ":").to_uppercase())
}

/// Normalises a user supplied address; non-MAC identifiers are kept verbatim.
pub fn normalize_address(address: &str) -> String {
    extract_mac_address(address).unwrap_or_else(|| address.trim().to_string())
}

/// Parses a raw command such as `"3E 1E"`, `"3E1E"` or `"0x3E 0x1E"` into bytes.
pub fn parse_hex_command(input: &str) -> Result<Vec<u8>> {
    let compact: String = input
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();

    if compact.is_empty() {
        return Err(LampError::Protocol("empty command".into()));
    }
    if compact.len() % 2 != 0 || !compact.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LampError::Protocol(format!("invalid hex command: {}", input)));
    }

    (0..compact.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&compact[i..i + 2], 16)
                .map_err(|e| LampError::Protocol(format!("invalid hex byte: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_command_forms() {
        assert_eq!(parse_hex_command("3E 1E").unwrap(), vec![0x3E, 0x1E]);
        assert_eq!(parse_hex_command("3E1E").unwrap(), vec![0x3E, 0x1E]);
        assert_eq!(parse_hex_command("0x3E 0x1E").unwrap(), vec![0x3E, 0x1E]);
        assert!(parse_hex_command("GG HH").is_err());
        assert!(parse_hex_command("3E1").is_err());
        assert!(parse_hex_command("  ").is_err());
    }

    #[test]
    fn hex_command_prefixes_and_separators() {
        assert_eq!(parse_hex_command("0X3e,0x1e").unwrap(), vec![0x3E, 0x1E]);
        assert_eq!(parse_hex_command("0x3E0x1E").unwrap(), vec![0x3E, 0x1E]);
        assert_eq!(parse_hex_command("0x").unwrap_err().to_string(), "protocol error: empty command");
    }

    #[test]
    fn mac_extraction_is_repeatable() {
        for _ in 0..3 {
            assert_eq!(
                extract_mac_address("BluetoothLE#BluetoothLE00:11:22:33:44:55-a4-c1-38-aa-bb-cc").as_deref(),
                Some("A4:C1:38:AA:BB:CC")
            );
        }
        assert_eq!(extract_mac_address("no address here"), None);
    }

    #[test]
    fn mac_extraction() {
        assert_eq!(
            extract_mac_address("hci0/dev_aa_bb_cc_dd_ee_ff").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(normalize_address("aa:bb:cc:dd:ee:ff"), "AA:BB:CC:DD:EE:FF");
        assert_eq!(normalize_address(" 1234-ABCD "), "1234-ABCD");
    }
}
