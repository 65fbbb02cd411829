use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::jobs::{Job, PeriodicJob, ReactiveJob};
use crate::process_manager::{SupervisorTimings, RETIRE_TIMEOUT};
use crate::stacking::WindowStacker;
use crate::state::{Modules, OptionKey, Region, RenderTarget, RenderTargetInit};
use crate::theme::{
    validate_alpha, Palette, StaticBackend, ThemeBackend, ThemeDescriptor, ThemeError,
    WalBackend, DEFAULT_ALPHA,
};

pub const CONFIG_ENV: &str = "BARKEEP_CONFIG";
pub const DEFAULT_BIND: &str = "127.0.0.1:5555";

#[derive(Debug)]
pub enum ConfigError {
    NoConfigDir,
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    Parse {
        path: PathBuf,
        error: toml::de::Error,
    },
    Invalid {
        field: String,
        message: String,
    },
    Theme(ThemeError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NoConfigDir => write!(
                f,
                "could not determine a config directory; pass --config or set {CONFIG_ENV}"
            ),
            ConfigError::Read { path, error } => {
                write!(f, "failed to read {}: {error}", path.display())
            }
            ConfigError::Parse { path, error } => {
                write!(f, "failed to parse {}: {error}", path.display())
            }
            ConfigError::Invalid { field, message } => write!(f, "invalid `{field}`: {message}"),
            ConfigError::Theme(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ThemeError> for ConfigError {
    fn from(value: ThemeError) -> Self {
        Self::Theme(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub render: RenderConfig,
    pub theme: ThemeConfig,
    pub stacking: StackingConfig,
    pub transport: TransportConfig,
    pub periodic: Vec<PeriodicConfig>,
    pub reactive: Vec<ReactiveConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub program: String,
    pub geometry: String,
    pub background: String,
    pub foreground: String,
    pub offset: String,
    pub underline_color: String,
    pub underline_pixels: String,
    #[serde(deserialize_with = "string_or_integer")]
    pub font_size: String,
    pub fonts: Vec<String>,
    pub on_bottom: bool,
    pub grace_ms: u64,
    pub stack_lead_ms: u64,
    pub retire_timeout_ms: u64,
    pub regions: RegionsConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            program: "lemonbar".to_owned(),
            geometry: "1920x30+0+0".to_owned(),
            background: "#000000".to_owned(),
            foreground: "#FFFFFF".to_owned(),
            offset: "0".to_owned(),
            underline_color: "#000000".to_owned(),
            underline_pixels: "0".to_owned(),
            font_size: "13".to_owned(),
            fonts: Vec::new(),
            on_bottom: true,
            grace_ms: 500,
            stack_lead_ms: 1000,
            retire_timeout_ms: RETIRE_TIMEOUT.as_millis() as u64,
            regions: RegionsConfig::default(),
        }
    }
}

/// Module ids and their initial text; table order is render order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionsConfig {
    pub before_left: IndexMap<String, String>,
    pub left: IndexMap<String, String>,
    pub center: IndexMap<String, String>,
    pub right: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThemeConfig {
    pub dir: String,
    pub image: Option<String>,
    pub alpha: String,
    pub wal: String,
    /// Fixed palette; when present the `wal` tool is never invoked.
    pub palette: Option<PaletteConfig>,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            dir: "~/wallpapers".to_owned(),
            image: None,
            alpha: DEFAULT_ALPHA.to_owned(),
            wal: "wal".to_owned(),
            palette: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaletteConfig {
    pub foreground: String,
    pub background: String,
    pub colors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackingConfig {
    pub enabled: bool,
    pub tool: String,
    pub background_window: String,
    pub render_window: String,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tool: "xdo".to_owned(),
            background_window: "root".to_owned(),
            render_window: "lemonbar".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub bind: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeriodicConfig {
    pub interval_secs: u64,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactiveConfig {
    pub trigger: Vec<String>,
    pub response: Vec<String>,
}

/// `--config`, then `$BARKEEP_CONFIG`, then `<config dir>/barkeep/config.toml`.
pub fn resolve_config_path(override_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    pick_config_path(
        override_path,
        std::env::var_os(CONFIG_ENV),
        dirs::config_dir(),
    )
}

fn pick_config_path(
    override_path: Option<&Path>,
    env_value: Option<OsString>,
    config_dir: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }
    if let Some(value) = env_value.filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(value));
    }
    config_dir
        .map(|dir| dir.join("barkeep").join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
        path: path.to_path_buf(),
        error,
    })?;
    let config: Config = toml::from_str(&raw).map_err(|error| ConfigError::Parse {
        path: path.to_path_buf(),
        error,
    })?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render.program.trim().is_empty() {
            return Err(invalid("render.program", "must not be empty"));
        }
        validate_alpha(&self.theme.alpha)?;
        if let Some(palette) = &self.theme.palette {
            if palette.colors.len() != 16 {
                return Err(invalid(
                    "theme.palette.colors",
                    format!("expected 16 colors, found {}", palette.colors.len()),
                ));
            }
        }
        for (index, job) in self.periodic.iter().enumerate() {
            if job.interval_secs == 0 {
                return Err(invalid(
                    format!("periodic[{index}].interval_secs"),
                    "must be greater than zero",
                ));
            }
            if job.command.is_empty() {
                return Err(invalid(
                    format!("periodic[{index}].command"),
                    "must not be empty",
                ));
            }
        }
        for (index, job) in self.reactive.iter().enumerate() {
            if job.trigger.is_empty() {
                return Err(invalid(
                    format!("reactive[{index}].trigger"),
                    "must not be empty",
                ));
            }
            if job.response.is_empty() {
                return Err(invalid(
                    format!("reactive[{index}].response"),
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }

    pub fn theme_dir(&self) -> PathBuf {
        expand_home(&self.theme.dir)
    }

    /// Builds the initial render state; picks a random wallpaper when none is configured.
    pub fn render_target(&self) -> Result<RenderTarget, ConfigError> {
        let render = &self.render;
        let options = BTreeMap::from([
            (OptionKey::Geometry, render.geometry.clone()),
            (OptionKey::Background, render.background.clone()),
            (OptionKey::Foreground, render.foreground.clone()),
            (OptionKey::Offset, render.offset.clone()),
            (OptionKey::UnderlineColor, render.underline_color.clone()),
            (OptionKey::UnderlinePixels, render.underline_pixels.clone()),
        ]);
        let regions: BTreeMap<Region, Modules> = BTreeMap::from([
            (Region::BeforeLeft, render.regions.before_left.clone()),
            (Region::Left, render.regions.left.clone()),
            (Region::Center, render.regions.center.clone()),
            (Region::Right, render.regions.right.clone()),
        ]);
        let theme = ThemeDescriptor::new(
            self.theme_dir(),
            self.theme.image.clone(),
            &self.theme.alpha,
        )?;
        Ok(RenderTarget::new(RenderTargetInit {
            program: render.program.clone(),
            options,
            font_size: render.font_size.clone(),
            fonts: render.fonts.clone(),
            on_bottom: render.on_bottom,
            regions,
            theme,
        }))
    }

    pub fn jobs(&self) -> Vec<Job> {
        let periodic = self.periodic.iter().map(|job| {
            Job::Periodic(PeriodicJob {
                interval: Duration::from_secs(job.interval_secs),
                command: job.command.clone(),
            })
        });
        let reactive = self.reactive.iter().map(|job| {
            Job::Reactive(ReactiveJob {
                trigger: job.trigger.clone(),
                response: job.response.clone(),
            })
        });
        periodic.chain(reactive).collect()
    }

    pub fn timings(&self) -> SupervisorTimings {
        SupervisorTimings {
            grace_delay: Duration::from_millis(self.render.grace_ms),
            stack_lead_delay: Duration::from_millis(self.render.stack_lead_ms),
            retire_timeout: Duration::from_millis(self.render.retire_timeout_ms),
        }
    }

    pub fn stacker(&self) -> Option<WindowStacker> {
        let stacking = &self.stacking;
        stacking.enabled.then(|| {
            WindowStacker::new(
                stacking.tool.clone(),
                stacking.background_window.clone(),
                stacking.render_window.clone(),
            )
        })
    }

    pub fn theme_backend(&self) -> Box<dyn ThemeBackend> {
        match &self.theme.palette {
            Some(palette) => {
                let colors: [String; 16] = std::array::from_fn(|index| {
                    palette.colors.get(index).cloned().unwrap_or_default()
                });
                Box::new(StaticBackend::new(Palette {
                    foreground: palette.foreground.clone(),
                    background: palette.background.clone(),
                    colors,
                }))
            }
            None => Box::new(WalBackend::new(self.theme.wal.clone())),
        }
    }
}

/// Expands a leading `~` to the home directory; other paths pass through.
pub fn expand_home(raw: &str) -> PathBuf {
    let rest = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(raw),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(raw),
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        message: message.into(),
    }
}

fn string_or_integer<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
