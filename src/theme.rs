use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::Mutex;

use rand::seq::SliceRandom;
use serde::Deserialize;
use walkdir::WalkDir;

/// Placeholder names understood by [`resolve_placeholders`], in lookup order.
pub const PLACEHOLDER_NAMES: [&str; 18] = [
    "foreground",
    "background",
    "color0",
    "color1",
    "color2",
    "color3",
    "color4",
    "color5",
    "color6",
    "color7",
    "color8",
    "color9",
    "color10",
    "color11",
    "color12",
    "color13",
    "color14",
    "color15",
];

pub const DEFAULT_ALPHA: &str = "FF";

#[derive(Debug)]
pub enum ThemeError {
    InvalidAlpha(String),
    NoWallpapers {
        dir: PathBuf,
    },
    WallpaperScan {
        dir: PathBuf,
        error: String,
    },
    ToolLaunch {
        command: String,
        error: std::io::Error,
    },
    ToolFailure {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    PaletteRead {
        path: PathBuf,
        error: std::io::Error,
    },
    PaletteParse {
        path: PathBuf,
        error: serde_json::Error,
    },
}

impl std::fmt::Display for ThemeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThemeError::InvalidAlpha(value) => write!(
                f,
                "invalid alpha `{value}` (expected two hex digits, for example `D0`)"
            ),
            ThemeError::NoWallpapers { dir } => {
                write!(f, "no wallpapers found in {}", dir.display())
            }
            ThemeError::WallpaperScan { dir, error } => {
                write!(f, "failed to list wallpapers in {}: {error}", dir.display())
            }
            ThemeError::ToolLaunch { command, error } => {
                write!(f, "failed to launch `{command}`: {error}")
            }
            ThemeError::ToolFailure {
                command,
                code,
                stderr,
            } => write!(
                f,
                "`{command}` exited with {}: {}",
                code.map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".to_owned()),
                stderr.trim()
            ),
            ThemeError::PaletteRead { path, error } => {
                write!(f, "failed to read palette {}: {error}", path.display())
            }
            ThemeError::PaletteParse { path, error } => {
                write!(f, "failed to parse palette {}: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for ThemeError {}

/// A 16-color scheme plus special colors, as `#rrggbb` strings.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Palette {
    pub foreground: String,
    pub background: String,
    pub colors: [String; 16],
}

impl Palette {
    pub fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "foreground" => Some(self.foreground.as_str()),
            "background" => Some(self.background.as_str()),
            _ => {
                let index = name.strip_prefix("color")?.parse::<usize>().ok()?;
                self.colors.get(index).map(String::as_str)
            }
        }
    }

    /// Returns a copy with `alpha` spliced in front of every base color.
    pub fn with_alpha(&self, alpha: &str) -> Palette {
        Palette {
            foreground: apply_alpha(&self.foreground, alpha),
            background: apply_alpha(&self.background, alpha),
            colors: self.colors.clone().map(|color| apply_alpha(&color, alpha)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for name in PLACEHOLDER_NAMES {
            if let Some(value) = self.lookup(name) {
                map.insert(name.to_owned(), serde_json::Value::String(value.to_owned()));
            }
        }
        serde_json::Value::Object(map)
    }
}

pub fn apply_alpha(color: &str, alpha: &str) -> String {
    match color.strip_prefix('#') {
        Some(rest) => format!("#{alpha}{rest}"),
        None => format!("{alpha}{color}"),
    }
}

/// Replaces every `${name}` token known to the palette. Unknown tokens stay as they are.
pub fn resolve_placeholders(input: &str, palette: &Palette) -> String {
    if !input.contains("${") {
        return input.to_owned();
    }
    let mut output = input.to_owned();
    for name in PLACEHOLDER_NAMES {
        let token = format!("${{{name}}}");
        if !output.contains(&token) {
            continue;
        }
        if let Some(value) = palette.lookup(name) {
            output = output.replace(&token, value);
        }
    }
    output
}

pub fn has_placeholders(input: &str) -> bool {
    PLACEHOLDER_NAMES
        .iter()
        .any(|name| input.contains(&format!("${{{name}}}")))
}

pub fn validate_alpha(value: &str) -> Result<String, ThemeError> {
    let trimmed = value.trim();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(trimmed.to_owned());
    }
    Err(ThemeError::InvalidAlpha(value.to_owned()))
}

/// Selected wallpaper plus the alpha byte the palette is rendered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeDescriptor {
    dir: PathBuf,
    image: String,
    alpha: String,
}

impl ThemeDescriptor {
    pub fn new(dir: PathBuf, image: Option<String>, alpha: &str) -> Result<Self, ThemeError> {
        let alpha = validate_alpha(alpha)?;
        let image = match image {
            Some(image) => image,
            None => pick_random_wallpaper(&dir)?,
        };
        Ok(Self { dir, image, alpha })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn alpha(&self) -> &str {
        &self.alpha
    }

    pub fn image_path(&self) -> PathBuf {
        self.dir.join(&self.image)
    }

    pub fn set_image(&mut self, image: impl Into<String>) {
        self.image = image.into();
    }

    pub fn set_alpha(&mut self, alpha: &str) -> Result<(), ThemeError> {
        self.alpha = validate_alpha(alpha)?;
        Ok(())
    }

    pub fn set_random_image(&mut self) -> Result<(), ThemeError> {
        self.image = pick_random_wallpaper(&self.dir)?;
        Ok(())
    }
}

pub fn list_wallpapers(dir: &Path) -> Result<Vec<String>, ThemeError> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|error| ThemeError::WallpaperScan {
            dir: dir.to_path_buf(),
            error: error.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

fn pick_random_wallpaper(dir: &Path) -> Result<String, ThemeError> {
    let names = list_wallpapers(dir)?;
    names
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| ThemeError::NoWallpapers {
            dir: dir.to_path_buf(),
        })
}

/// Boundary to the color-extraction and wallpaper-setting tooling.
pub trait ThemeBackend: Send {
    fn palette(&self, image: &Path) -> Result<Palette, ThemeError>;
    fn apply_wallpaper(&self, image: &Path) -> Result<(), ThemeError>;
}

/// Resolves placeholders against a descriptor at the moment of use.
pub struct ColorResolver<'a> {
    descriptor: &'a ThemeDescriptor,
    backend: &'a dyn ThemeBackend,
}

impl<'a> ColorResolver<'a> {
    pub fn new(descriptor: &'a ThemeDescriptor, backend: &'a dyn ThemeBackend) -> Self {
        Self {
            descriptor,
            backend,
        }
    }

    pub fn palette(&self) -> Result<Palette, ThemeError> {
        let base = self.backend.palette(&self.descriptor.image_path())?;
        Ok(base.with_alpha(self.descriptor.alpha()))
    }

    pub fn resolve(&self, input: &str) -> Result<String, ThemeError> {
        if !has_placeholders(input) {
            return Ok(input.to_owned());
        }
        Ok(resolve_placeholders(input, &self.palette()?))
    }
}

/// Fixed palette from configuration; wallpaper changes are left to the user.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    palette: Palette,
}

impl StaticBackend {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }
}

impl ThemeBackend for StaticBackend {
    fn palette(&self, _image: &Path) -> Result<Palette, ThemeError> {
        Ok(self.palette.clone())
    }

    fn apply_wallpaper(&self, image: &Path) -> Result<(), ThemeError> {
        tracing::debug!(image = %image.display(), "static palette: wallpaper left unchanged");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WalScheme {
    special: WalSpecial,
    colors: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct WalSpecial {
    foreground: String,
    background: String,
}

/// Palette extraction through pywal's `wal` CLI and its `colors.json` cache.
pub struct WalBackend {
    program: String,
    cache_file: PathBuf,
    schemes: Mutex<HashMap<PathBuf, Palette>>,
}

impl WalBackend {
    pub fn new(program: impl Into<String>) -> Self {
        let cache_file = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("wal")
            .join("colors.json");
        Self::with_cache_file(program, cache_file)
    }

    pub fn with_cache_file(program: impl Into<String>, cache_file: PathBuf) -> Self {
        Self {
            program: program.into(),
            cache_file,
            schemes: Mutex::new(HashMap::new()),
        }
    }

    fn run_wal(&self, args: &[&str], image: &Path) -> Result<(), ThemeError> {
        let mut process = ProcessCommand::new(&self.program);
        process
            .args(args)
            .arg("-i")
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let command = format!("{} {} -i {}", self.program, args.join(" "), image.display());
        let output = process
            .output()
            .map_err(|error| ThemeError::ToolLaunch {
                command: command.clone(),
                error,
            })?;
        if !output.status.success() {
            return Err(ThemeError::ToolFailure {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    fn read_cache(&self) -> Result<Palette, ThemeError> {
        let raw =
            std::fs::read_to_string(&self.cache_file).map_err(|error| ThemeError::PaletteRead {
                path: self.cache_file.clone(),
                error,
            })?;
        parse_wal_scheme(&raw).map_err(|error| ThemeError::PaletteParse {
            path: self.cache_file.clone(),
            error,
        })
    }
}

impl ThemeBackend for WalBackend {
    fn palette(&self, image: &Path) -> Result<Palette, ThemeError> {
        if let Some(palette) = self
            .schemes
            .lock()
            .ok()
            .and_then(|schemes| schemes.get(image).cloned())
        {
            return Ok(palette);
        }
        // -n: keep wallpaper, -s/-t: leave terminals alone, -e: skip reloads.
        self.run_wal(&["-q", "-n", "-s", "-t", "-e"], image)?;
        let palette = self.read_cache()?;
        if let Ok(mut schemes) = self.schemes.lock() {
            schemes.insert(image.to_path_buf(), palette.clone());
        }
        Ok(palette)
    }

    fn apply_wallpaper(&self, image: &Path) -> Result<(), ThemeError> {
        if !image.is_file() {
            tracing::debug!(image = %image.display(), "wallpaper is not a file; skipping");
            return Ok(());
        }
        self.run_wal(&["-q"], image)
    }
}

pub fn parse_wal_scheme(raw: &str) -> Result<Palette, serde_json::Error> {
    let scheme = serde_json::from_str::<WalScheme>(raw)?;
    let colors = std::array::from_fn(|index| {
        scheme
            .colors
            .get(&format!("color{index}"))
            .cloned()
            .unwrap_or_else(|| scheme.special.foreground.clone())
    });
    Ok(Palette {
        foreground: scheme.special.foreground,
        background: scheme.special.background,
        colors,
    })
}

#[cfg(test)]
#[path = "tests/theme_tests.rs"]
mod tests;
