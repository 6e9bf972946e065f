//! Vault configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "GHOST_CONFIG";

/// Vault configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Mount points of the share devices, scanned in order
    pub device_mounts: Vec<PathBuf>,

    /// Encrypted payload file produced by `split`
    pub payload_path: PathBuf,

    /// Root attestation key (32 raw bytes)
    pub root_key_path: PathBuf,

    /// Reject shares whose manifest attestation does not verify
    pub verify_attestation: bool,

    /// Append-only audit log (JSON lines)
    pub audit_log_path: PathBuf,

    /// Base directory for decrypted plaintext; `/dev/shm` when present
    pub ephemeral_dir: Option<PathBuf>,

    /// Random overwrite passes before removal
    pub wipe_passes: u32,

    /// Acoustic presence tuning
    pub presence: PresenceConfig,
}

/// Acoustic presence detection tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Centre of the detection band (Hz)
    pub target_frequency: f64,

    /// Half-width of the detection band (Hz)
    pub tolerance: f64,

    /// Capture sample rate (Hz)
    pub sample_rate: u32,

    /// Samples per analysis window
    pub chunk_size: usize,

    /// Minimum normalized band energy (amplitude² relative to full scale)
    pub energy_threshold: f64,

    /// Minimum share of the chunk's total energy that must sit in the band
    pub min_tone_ratio: f64,

    /// Consecutive above-threshold chunks required
    pub debounce: u32,

    /// Sleep between chunks (milliseconds)
    pub poll_interval_ms: u64,

    /// Capture program streaming s16le mono PCM to stdout
    pub capture_program: Option<String>,

    /// Arguments for the capture program; `{rate}` expands to the sample rate
    pub capture_args: Vec<String>,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            target_frequency: 18_000.0,
            tolerance: 500.0,
            sample_rate: 48_000,
            chunk_size: 1024,
            energy_threshold: 1e-4,
            min_tone_ratio: 0.1,
            debounce: 3,
            poll_interval_ms: 1,
            capture_program: Some("arecord".to_string()),
            capture_args: ["-q", "-t", "raw", "-f", "S16_LE", "-c", "1", "-r", "{rate}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PresenceConfig {
    /// Capture arguments with placeholders expanded
    pub fn expanded_capture_args(&self) -> Vec<String> {
        let rate = self.sample_rate.to_string();
        self.capture_args
            .iter()
            .map(|arg| arg.replace("{rate}", &rate))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.chunk_size == 0 {
            return Err(VaultError::Config(
                "sample rate and chunk size must be non-zero".to_string(),
            ));
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if self.target_frequency <= 0.0 || self.target_frequency + self.tolerance >= nyquist {
            return Err(VaultError::Config(format!(
                "target band {}±{} Hz must sit below Nyquist ({} Hz)",
                self.target_frequency, self.tolerance, nyquist
            )));
        }
        if self.tolerance < 0.0 || self.tolerance >= self.target_frequency {
            return Err(VaultError::Config(format!(
                "tolerance {} Hz is out of range",
                self.tolerance
            )));
        }
        if self.debounce == 0 {
            return Err(VaultError::Config("debounce must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            device_mounts: Self::default_device_mounts(),
            payload_path: Self::default_data_dir().join("payload.enc"),
            root_key_path: Self::default_data_dir().join("root.key"),
            verify_attestation: true,
            audit_log_path: Self::default_data_dir().join("audit.log"),
            ephemeral_dir: None,
            wipe_passes: 3,
            presence: PresenceConfig::default(),
        }
    }
}

impl VaultConfig {
    #[cfg(unix)]
    fn default_device_mounts() -> Vec<PathBuf> {
        (1..=3)
            .map(|i| PathBuf::from(format!("/media/bat{}", i)))
            .collect()
    }

    #[cfg(windows)]
    fn default_device_mounts() -> Vec<PathBuf> {
        ["E:\\", "F:\\", "G:\\"].iter().map(PathBuf::from).collect()
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| {
                #[cfg(unix)]
                {
                    PathBuf::from("/var/lib")
                }
                #[cfg(windows)]
                {
                    PathBuf::from(r"C:\ProgramData")
                }
            })
            .join("ghost-shell")
    }

    /// `$GHOST_CONFIG`, or `<config_dir>/ghost-shell/vault.json`
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                #[cfg(unix)]
                let fallback = PathBuf::from("/etc");
                #[cfg(windows)]
                let fallback = PathBuf::from(r"C:\ProgramData");

                dirs::config_dir()
                    .unwrap_or(fallback)
                    .join("ghost-shell")
                    .join("vault.json")
            })
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise write and return the defaults
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        tracing::info!("Created default config at {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        for path in [&self.payload_path, &self.root_key_path, &self.audit_log_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if let Some(dir) = &self.ephemeral_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_mounts.len() != ghost_core::TOTAL_SHARES as usize {
            return Err(VaultError::Config(format!(
                "expected {} device mounts, found {}",
                ghost_core::TOTAL_SHARES,
                self.device_mounts.len()
            )));
        }
        if self.wipe_passes == 0 {
            return Err(VaultError::Config(
                "wipe_passes must be at least 1".to_string(),
            ));
        }
        self.presence.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VaultConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device_mounts.len(), 3);
        assert!(config.verify_attestation);
        assert_eq!(config.presence.target_frequency, 18_000.0);
        assert_eq!(config.presence.debounce, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");

        let mut config = VaultConfig::default();
        config.wipe_passes = 7;
        config.presence.capture_program = None;
        config.save(&path).unwrap();

        let loaded = VaultConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        std::fs::write(&path, r#"{"wipe_passes": 5, "presence": {"debounce": 4}}"#).unwrap();

        let loaded = VaultConfig::load(&path).unwrap();
        assert_eq!(loaded.wipe_passes, 5);
        assert_eq!(loaded.presence.debounce, 4);
        assert_eq!(loaded.presence.chunk_size, 1024);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vault.json");

        let config = VaultConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, VaultConfig::default());
    }

    #[test]
    fn test_invalid_presence_band_is_rejected() {
        let mut config = VaultConfig::default();
        config.presence.sample_rate = 32_000;
        assert!(config.validate().is_err());

        let mut config = VaultConfig::default();
        config.device_mounts.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_capture_args_expand_rate() {
        let presence = PresenceConfig::default();
        let args = presence.expanded_capture_args();
        assert!(args.contains(&"48000".to_string()));
        assert!(!args.iter().any(|a| a.contains("{rate}")));
    }
}
