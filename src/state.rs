use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::theme::ThemeDescriptor;

/// Render-process flags that can be rewritten at runtime. Declaration order is argument order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionKey {
    Geometry,
    Background,
    Foreground,
    Offset,
    UnderlineColor,
    UnderlinePixels,
}

impl OptionKey {
    pub const ALL: [OptionKey; 6] = [
        OptionKey::Geometry,
        OptionKey::Background,
        OptionKey::Foreground,
        OptionKey::Offset,
        OptionKey::UnderlineColor,
        OptionKey::UnderlinePixels,
    ];

    pub fn flag(self) -> &'static str {
        match self {
            OptionKey::Geometry => "-g",
            OptionKey::Background => "-B",
            OptionKey::Foreground => "-F",
            OptionKey::Offset => "-o",
            OptionKey::UnderlineColor => "-U",
            OptionKey::UnderlinePixels => "-u",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OptionKey::Geometry => "geometry",
            OptionKey::Background => "background",
            OptionKey::Foreground => "foreground",
            OptionKey::Offset => "offset",
            OptionKey::UnderlineColor => "underline_color",
            OptionKey::UnderlinePixels => "underline_pixels",
        }
    }

    /// Accepts either the flag (`-g`) or the long name (`geometry`).
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|key| key.flag() == value || key.name() == value)
    }

    pub fn is_color(self) -> bool {
        matches!(
            self,
            OptionKey::Background | OptionKey::Foreground | OptionKey::UnderlineColor
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Region {
    BeforeLeft,
    Left,
    Center,
    Right,
}

impl Region {
    /// Lookup priority for module updates, which is also render order.
    pub const ALL: [Region; 4] = [Region::BeforeLeft, Region::Left, Region::Center, Region::Right];

    pub fn name(self) -> &'static str {
        match self {
            Region::BeforeLeft => "before_left",
            Region::Left => "left",
            Region::Center => "center",
            Region::Right => "right",
        }
    }

    fn alignment_marker(self) -> &'static str {
        match self {
            Region::BeforeLeft => "",
            Region::Left => "%{l}",
            Region::Center => "%{c}",
            Region::Right => "%{r}",
        }
    }
}

pub type Modules = IndexMap<String, String>;

/// Everything the render process is launched with or fed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    program: String,
    options: BTreeMap<OptionKey, String>,
    font_size: String,
    fonts: Vec<String>,
    on_bottom: bool,
    regions: BTreeMap<Region, Modules>,
    theme: ThemeDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetInit {
    pub program: String,
    pub options: BTreeMap<OptionKey, String>,
    pub font_size: String,
    pub fonts: Vec<String>,
    pub on_bottom: bool,
    pub regions: BTreeMap<Region, Modules>,
    pub theme: ThemeDescriptor,
}

impl RenderTarget {
    pub fn new(init: RenderTargetInit) -> Self {
        let mut options = init.options;
        for key in OptionKey::ALL {
            options.entry(key).or_default();
        }
        let mut regions = init.regions;
        for region in Region::ALL {
            regions.entry(region).or_default();
        }
        let mut fonts = Vec::with_capacity(init.fonts.len());
        for font in init.fonts {
            if !fonts.contains(&font) {
                fonts.push(font);
            }
        }
        Self {
            program: init.program,
            options,
            font_size: init.font_size,
            fonts,
            on_bottom: init.on_bottom,
            regions,
            theme: init.theme,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Unknown keys are ignored; returns whether a value was written.
    pub fn set_option(&mut self, key: &str, value: impl Into<String>) -> bool {
        let Some(key) = OptionKey::parse(key) else {
            return false;
        };
        self.options.insert(key, value.into());
        true
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        let key = OptionKey::parse(key)?;
        self.options.get(&key).map(String::as_str)
    }

    pub fn add_font(&mut self, font: impl Into<String>) -> bool {
        let font = font.into();
        if self.fonts.contains(&font) {
            return false;
        }
        self.fonts.push(font);
        true
    }

    pub fn remove_font(&mut self, font: &str) -> bool {
        let before = self.fonts.len();
        self.fonts.retain(|existing| existing != font);
        self.fonts.len() != before
    }

    pub fn clear_fonts(&mut self) {
        self.fonts.clear();
    }

    pub fn fonts(&self) -> &[String] {
        &self.fonts
    }

    pub fn set_font_size(&mut self, size: impl Into<String>) {
        self.font_size = size.into();
    }

    pub fn font_size(&self) -> &str {
        &self.font_size
    }

    pub fn on_bottom(&self) -> bool {
        self.on_bottom
    }

    pub fn theme(&self) -> &ThemeDescriptor {
        &self.theme
    }

    pub fn theme_mut(&mut self) -> &mut ThemeDescriptor {
        &mut self.theme
    }

    pub fn modules(&self, region: Region) -> Option<&Modules> {
        self.regions.get(&region)
    }

    /// Rewrites the first module named `id`, searching regions in priority order.
    pub fn update_module(&mut self, id: &str, value: impl Into<String>) -> Option<Region> {
        for region in Region::ALL {
            if let Some(slot) = self
                .regions
                .get_mut(&region)
                .and_then(|modules| modules.get_mut(id))
            {
                *slot = value.into();
                return Some(region);
            }
        }
        None
    }

    pub fn render_argv<F, E>(&self, mut resolve: F) -> Result<Vec<String>, E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        let mut argv = Vec::with_capacity(2 + self.options.len() * 2 + self.fonts.len());
        argv.push(self.program.clone());
        for (key, value) in &self.options {
            argv.push(key.flag().to_owned());
            if key.is_color() {
                argv.push(resolve(value)?);
            } else {
                argv.push(value.clone());
            }
        }
        if self.on_bottom {
            argv.push("-b".to_owned());
        }
        for font in &self.fonts {
            argv.push(format!("-f {font}:size={}", self.font_size));
        }
        Ok(argv)
    }

    pub fn render_content<F, E>(&self, mut resolve: F) -> Result<String, E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        let mut content = String::new();
        for region in Region::ALL {
            content.push_str(region.alignment_marker());
            if let Some(modules) = self.regions.get(&region) {
                for value in modules.values() {
                    content.push_str(value);
                }
            }
        }
        resolve(&content)
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
