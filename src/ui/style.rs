use anstyle::{AnsiColor, Color, Style};

pub const COLOR_ENV: &str = "BARKEEP_COLOR";

/// `auto` (the default) colors only when the stream is a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Auto,
    Always,
    Never,
}

impl OutputMode {
    pub fn from_env() -> Self {
        Self::parse(std::env::var(COLOR_ENV).ok().as_deref())
    }

    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("always") => OutputMode::Always,
            Some("never") => OutputMode::Never,
            _ => OutputMode::Auto,
        }
    }

    /// `NO_COLOR` wins over every mode.
    pub fn color_enabled(self, is_tty: bool, no_color: bool) -> bool {
        if no_color {
            return false;
        }
        match self {
            OutputMode::Always => true,
            OutputMode::Never => false,
            OutputMode::Auto => is_tty,
        }
    }
}

pub fn no_color_requested() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy)]
pub struct Styles {
    pub heading: Style,
    pub faint: Style,
    pub key: Style,
    pub ok: Style,
    pub error: Style,
}

impl Default for Styles {
    fn default() -> Self {
        let bold = |color| Style::new().fg_color(Some(Color::Ansi(color))).bold();
        Self {
            heading: bold(AnsiColor::Magenta),
            faint: Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))),
            key: bold(AnsiColor::Blue),
            ok: bold(AnsiColor::Green),
            error: bold(AnsiColor::Red),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OutputMode;

    #[test]
    fn parses_modes_and_defaults_to_auto() {
        assert_eq!(OutputMode::parse(Some("always")), OutputMode::Always);
        assert_eq!(OutputMode::parse(Some(" never ")), OutputMode::Never);
        assert_eq!(OutputMode::parse(Some("sometimes")), OutputMode::Auto);
        assert_eq!(OutputMode::parse(None), OutputMode::Auto);
    }

    #[test]
    fn no_color_overrides_every_mode() {
        assert!(OutputMode::Always.color_enabled(false, false));
        assert!(!OutputMode::Always.color_enabled(true, true));
        assert!(OutputMode::Auto.color_enabled(true, false));
        assert!(!OutputMode::Auto.color_enabled(false, false));
        assert!(!OutputMode::Never.color_enabled(true, false));
    }
}
