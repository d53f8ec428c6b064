//! Configuration file – reads/writes `~/.cobot/config.toml`.
//!
//! Every field has a default, so a partial (or empty) file is valid.  The
//! file is translated into the runtime's [`PipelineConfig`] and the link's
//! [`LinkConfig`] at startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cobot_link::LinkConfig;
use cobot_perception::{
    DwellTimes, EmotionThresholds, EngineConfig, MirrorConvention, PerceptionMode, PositionBands,
};
use cobot_runtime::PipelineConfig;
use cobot_types::{CobotError, MAX_SPEED};
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

/// Horizontal thresholds for left / centre / right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandsSection {
    pub low: f32,
    pub high: f32,
}

impl Default for BandsSection {
    fn default() -> Self {
        let bands = PositionBands::default();
        Self {
            low: bands.low,
            high: bands.high,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionSection {
    pub smile: f32,
    pub eye_squint: f32,
    pub mouth_open: f32,
    pub shrug: f32,
}

impl Default for EmotionSection {
    fn default() -> Self {
        let t = EmotionThresholds::default();
        Self {
            smile: t.smile,
            eye_squint: t.eye_squint,
            mouth_open: t.mouth_open,
            shrug: t.shrug,
        }
    }
}

/// Emotion lock durations, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellSection {
    pub happy_ms: u64,
    pub sad_ms: u64,
    pub angry_ms: u64,
    pub surprised_ms: u64,
    pub sleep_after_ms: u64,
}

impl Default for DwellSection {
    fn default() -> Self {
        let d = DwellTimes::default();
        Self {
            happy_ms: millis(d.happy),
            sad_ms: millis(d.sad),
            angry_ms: millis(d.angry),
            surprised_ms: millis(d.surprised),
            sleep_after_ms: millis(d.sleep_after),
        }
    }
}

/// Timer periods, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceSection {
    pub follow_capture_ms: u64,
    pub emotion_capture_ms: u64,
    pub heartbeat_ms: u64,
}

impl Default for CadenceSection {
    fn default() -> Self {
        let p = PipelineConfig::default();
        Self {
            follow_capture_ms: millis(p.follow_capture),
            emotion_capture_ms: millis(p.emotion_capture),
            heartbeat_ms: millis(p.heartbeat),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySection {
    /// Outbound command cap; `Stop` is never throttled.
    pub commands_per_second: u32,
    /// Perception silence before the heartbeat sends `Stop`.
    pub stale_after_ms: u64,
    /// Consecutive frames before a position change is published.
    pub confirm_frames: usize,
}

impl Default for SafetySection {
    fn default() -> Self {
        let p = PipelineConfig::default();
        Self {
            commands_per_second: p.commands_per_second,
            stale_after_ms: millis(p.stale_after),
            confirm_frames: p.engine.confirm_frames,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ────────────────────────────────────────────────────────────────────────────
// Config
// ────────────────────────────────────────────────────────────────────────────

/// Persisted user configuration stored in `~/.cobot/config.toml`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// BLE address of the robot.
    #[serde(default = "default_peer_address")]
    pub peer_address: String,

    /// Perception mode started by `/follow`-less sessions: `follow` or `emotion`.
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Speed sent right after connecting, in percent.
    #[serde(default = "default_speed")]
    pub speed: u8,

    /// `mirrored` for the front camera, `direct` for the rear one.
    #[serde(default = "default_mirror")]
    pub mirror: String,

    /// Follow mode changes announced by the robot.
    #[serde(default = "default_auto_switch")]
    pub auto_switch: bool,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default)]
    pub bands: BandsSection,
    #[serde(default)]
    pub emotion: EmotionSection,
    #[serde(default)]
    pub dwell: DwellSection,
    #[serde(default)]
    pub cadence: CadenceSection,
    #[serde(default)]
    pub safety: SafetySection,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("peer_address", &mask_address(&self.peer_address))
            .field("mode", &self.mode)
            .field("speed", &self.speed)
            .field("mirror", &self.mirror)
            .field("auto_switch", &self.auto_switch)
            .field("log_filter", &self.log_filter)
            .field("bands", &self.bands)
            .field("emotion", &self.emotion)
            .field("dwell", &self.dwell)
            .field("cadence", &self.cadence)
            .field("safety", &self.safety)
            .finish()
    }
}

/// Keep the first and last octet of a MAC-style address.
pub fn mask_address(address: &str) -> String {
    let octets: Vec<&str> = address.split(':').collect();
    if octets.len() < 3 {
        return "<masked>".to_string();
    }
    let last = octets.len() - 1;
    octets
        .iter()
        .enumerate()
        .map(|(i, o)| if i == 0 || i == last { *o } else { "**" })
        .collect::<Vec<_>>()
        .join(":")
}

fn default_peer_address() -> String {
    cobot_link::transport::DEFAULT_PEER_ADDRESS.to_string()
}
fn default_mode() -> String {
    "follow".to_string()
}
fn default_speed() -> u8 {
    60
}
fn default_mirror() -> String {
    "mirrored".to_string()
}
fn default_auto_switch() -> bool {
    true
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_address: default_peer_address(),
            mode: default_mode(),
            speed: default_speed(),
            mirror: default_mirror(),
            auto_switch: default_auto_switch(),
            log_filter: default_log_filter(),
            bands: BandsSection::default(),
            emotion: EmotionSection::default(),
            dwell: DwellSection::default(),
            cadence: CadenceSection::default(),
            safety: SafetySection::default(),
        }
    }
}

impl Config {
    /// # Errors
    ///
    /// [`CobotError::Config`] when `mode` is not `follow` or `emotion`.
    pub fn initial_mode(&self) -> Result<PerceptionMode, CobotError> {
        PerceptionMode::parse(&self.mode)
            .ok_or_else(|| CobotError::Config(format!("unknown mode '{}'", self.mode)))
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            peer_address: self.peer_address.clone(),
            ..LinkConfig::default()
        }
    }

    /// Translate into runtime settings, validating ranges on the way.
    ///
    /// # Errors
    ///
    /// [`CobotError::Config`] for an unknown mirror convention, bands that
    /// are not `0 ≤ low ≤ high ≤ 1`, or a zero command rate.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, CobotError> {
        let mirror = MirrorConvention::parse(&self.mirror)
            .ok_or_else(|| CobotError::Config(format!("unknown mirror convention '{}'", self.mirror)))?;
        let BandsSection { low, high } = self.bands;
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
            return Err(CobotError::Config(format!(
                "position bands must satisfy 0 <= low <= high <= 1, got low={low} high={high}"
            )));
        }
        if self.safety.commands_per_second == 0 {
            return Err(CobotError::Config("commands_per_second must be at least 1".into()));
        }

        let engine = EngineConfig {
            mode: self.initial_mode()?,
            bands: PositionBands { low, high, mirror },
            thresholds: EmotionThresholds {
                smile: self.emotion.smile,
                eye_squint: self.emotion.eye_squint,
                mouth_open: self.emotion.mouth_open,
                shrug: self.emotion.shrug,
            },
            dwell: DwellTimes {
                happy: Duration::from_millis(self.dwell.happy_ms),
                sad: Duration::from_millis(self.dwell.sad_ms),
                angry: Duration::from_millis(self.dwell.angry_ms),
                surprised: Duration::from_millis(self.dwell.surprised_ms),
                sleep_after: Duration::from_millis(self.dwell.sleep_after_ms),
            },
            confirm_frames: self.safety.confirm_frames.max(1),
        };

        Ok(PipelineConfig {
            engine,
            follow_capture: Duration::from_millis(self.cadence.follow_capture_ms),
            emotion_capture: Duration::from_millis(self.cadence.emotion_capture_ms),
            heartbeat: Duration::from_millis(self.cadence.heartbeat_ms),
            stale_after: Duration::from_millis(self.safety.stale_after_ms),
            commands_per_second: self.safety.commands_per_second,
            ..PipelineConfig::default()
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Load / save
// ────────────────────────────────────────────────────────────────────────────

/// Return the path to `~/.cobot/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".cobot").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, CobotError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, CobotError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| CobotError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| CobotError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `COBOT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `COBOT_PEER_ADDRESS` | `peer_address` |
/// | `COBOT_MODE` | `mode` |
/// | `COBOT_SPEED` | `speed` (clamped to 0–100; unparsable values ignored) |
/// | `COBOT_MIRROR` | `mirror` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("COBOT_PEER_ADDRESS") {
        cfg.peer_address = v;
    }
    if let Ok(v) = std::env::var("COBOT_MODE") {
        cfg.mode = v;
    }
    if let Ok(v) = std::env::var("COBOT_SPEED")
        && let Ok(speed) = v.trim().parse::<u32>()
    {
        cfg.speed = speed.min(u32::from(MAX_SPEED)) as u8;
    }
    if let Ok(v) = std::env::var("COBOT_MIRROR") {
        cfg.mirror = v;
    }
}

/// Save the config to disk, creating `~/.cobot/` if necessary.
pub fn save(cfg: &Config) -> Result<(), CobotError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), CobotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CobotError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| CobotError::Config(format!("failed to restrict config directory: {e}")))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| CobotError::Config(format!("failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| CobotError::Config(format!("failed to write {}: {e}", path.display()));

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_masks_peer_address() {
        let cfg = Config::default();
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("3C:A3:08:90:7D:62"));
        assert!(debug.contains("3C:**:**:**:**:62"));
    }

    #[test]
    fn mask_handles_odd_addresses() {
        assert_eq!(mask_address("robot"), "<masked>");
        assert_eq!(mask_address("AA:BB:CC"), "AA:**:CC");
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: Config = toml::from_str("[bands]\nlow = 0.3\n").unwrap();
        assert_eq!(cfg.bands.low, 0.3);
        assert_eq!(cfg.bands.high, 0.6);
        assert_eq!(cfg.dwell.happy_ms, 7000);
    }

    #[test]
    fn default_pipeline_matches_runtime_defaults() {
        let pipeline = Config::default().pipeline_config().unwrap();
        let expected = PipelineConfig::default();
        assert_eq!(pipeline.engine, expected.engine);
        assert_eq!(pipeline.follow_capture, expected.follow_capture);
        assert_eq!(pipeline.emotion_capture, expected.emotion_capture);
        assert_eq!(pipeline.heartbeat, expected.heartbeat);
        assert_eq!(pipeline.stale_after, expected.stale_after);
        assert_eq!(pipeline.commands_per_second, expected.commands_per_second);
    }

    #[test]
    fn invalid_settings_are_config_errors() {
        let cfg = Config {
            mirror: "sideways".into(),
            ..Config::default()
        };
        assert!(matches!(cfg.pipeline_config(), Err(CobotError::Config(_))));

        let cfg = Config {
            bands: BandsSection { low: 0.7, high: 0.3 },
            ..Config::default()
        };
        assert!(matches!(cfg.pipeline_config(), Err(CobotError::Config(_))));

        let cfg = Config {
            mode: "dance".into(),
            ..Config::default()
        };
        assert!(matches!(cfg.initial_mode(), Err(CobotError::Config(_))));
    }

    #[test]
    fn direct_mirror_is_applied() {
        let cfg = Config {
            mirror: "direct".into(),
            ..Config::default()
        };
        let pipeline = cfg.pipeline_config().unwrap();
        assert_eq!(pipeline.engine.bands.mirror, MirrorConvention::Direct);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            speed: 80,
            auto_switch: false,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.speed, 80);
        assert!(!loaded.auto_switch);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).unwrap().is_none());
    }

    #[test]
    fn garbage_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "speed = \"fast\"").unwrap();
        assert!(matches!(load_from(&path), Err(CobotError::Config(_))));
    }

    #[test]
    fn env_overrides_apply_and_clamp() {
        // SAFETY: the only test touching COBOT_* variables.
        unsafe {
            std::env::set_var("COBOT_PEER_ADDRESS", "AA:BB:CC:DD:EE:FF");
            std::env::set_var("COBOT_MODE", "emotion");
            std::env::set_var("COBOT_SPEED", "250");
            std::env::set_var("COBOT_MIRROR", "direct");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.peer_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(cfg.initial_mode().unwrap(), PerceptionMode::Emotion);
        assert_eq!(cfg.speed, 100);
        assert_eq!(cfg.mirror, "direct");

        unsafe { std::env::set_var("COBOT_SPEED", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.speed, 60);

        unsafe {
            for var in ["COBOT_PEER_ADDRESS", "COBOT_MODE", "COBOT_SPEED", "COBOT_MIRROR"] {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn config_path_points_to_cobot_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.ends_with(".cobot/config.toml"));
    }
}
