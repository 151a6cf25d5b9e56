use sha2::{Digest, Sha256};

use crate::DeviceFingerprint;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("machine id unavailable: {0}")]
    Unavailable(String),
    #[error("machine id not supported on this platform")]
    Unsupported,
}

/// Fingerprint derived from the OS machine identifier, SHA-256 hashed so the
/// raw hardware id never leaves the machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct MachineIdFingerprint;

impl MachineIdFingerprint {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceFingerprint for MachineIdFingerprint {
    fn fingerprint(&self) -> Result<String, FingerprintError> {
        let raw = raw_machine_id()?;
        Ok(hash_machine_id(&raw))
    }
}

/// Fixed fingerprint, for tests and hosts that manage their own identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFingerprint(String);

impl StaticFingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl DeviceFingerprint for StaticFingerprint {
    fn fingerprint(&self) -> Result<String, FingerprintError> {
        Ok(self.0.clone())
    }
}

fn hash_machine_id(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.trim().as_bytes()))
}

#[cfg(target_os = "linux")]
fn raw_machine_id() -> Result<String, FingerprintError> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(id) = std::fs::read_to_string(path) {
            let id = id.trim();
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }
    }
    Err(FingerprintError::Unavailable(
        "no /etc/machine-id or /var/lib/dbus/machine-id".to_string(),
    ))
}

#[cfg(target_os = "macos")]
fn raw_machine_id() -> Result<String, FingerprintError> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .map_err(|err| FingerprintError::Unavailable(err.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    quoted_value(&stdout, "IOPlatformUUID")
        .ok_or_else(|| FingerprintError::Unavailable("IOPlatformUUID not found".to_string()))
}

#[cfg(target_os = "windows")]
fn raw_machine_id() -> Result<String, FingerprintError> {
    let output = std::process::Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()
        .map_err(|err| FingerprintError::Unavailable(err.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|line| line.contains("MachineGuid"))
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
        .ok_or_else(|| FingerprintError::Unavailable("MachineGuid not found".to_string()))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn raw_machine_id() -> Result<String, FingerprintError> {
    Err(FingerprintError::Unsupported)
}

#[cfg(any(target_os = "macos", test))]
fn quoted_value(output: &str, key: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.contains(key))
        .find_map(|line| {
            let end = line.rfind('"')?;
            let start = line[..end].rfind('"')?;
            let value = &line[start + 1..end];
            (!value.is_empty()).then(|| value.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex() {
        let first = hash_machine_id("4c4c4544-0031-4810-8051-b4c04f4e3732\n");
        let second = hash_machine_id("4c4c4544-0031-4810-8051-b4c04f4e3732");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_ne!(first, hash_machine_id("other"));
    }

    #[test]
    fn static_fingerprint_is_returned_verbatim() {
        let fingerprint = StaticFingerprint::new("device-1");
        assert_eq!(fingerprint.fingerprint().expect("fingerprint"), "device-1");
    }

    #[test]
    fn quoted_value_extracts_ioreg_field() {
        let output = r#"  "IOPlatformSerialNumber" = "C02XYZ"
  "IOPlatformUUID" = "ABCD-1234""#;
        assert_eq!(quoted_value(output, "IOPlatformUUID").as_deref(), Some("ABCD-1234"));
        assert_eq!(quoted_value(output, "Missing"), None);
    }

    #[test]
    fn machine_fingerprint_is_deterministic_when_available() {
        let provider = MachineIdFingerprint::new();
        if let Ok(first) = provider.fingerprint() {
            assert_eq!(provider.fingerprint().expect("second read"), first);
            assert_eq!(first.len(), 64);
        }
    }
}
