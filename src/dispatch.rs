use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::process_manager::{HandleInfo, ProcessManagerError, RenderSink};
use crate::state::RenderTarget;
use crate::theme::{ColorResolver, ThemeBackend, ThemeError};

/// One remote command, as received over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<String>,
}

impl Request {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            key: None,
            val: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_val(mut self, val: impl Into<String>) -> Self {
        self.val = Some(val.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Replaced(HandleInfo),
    Pushed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub reply: Value,
    pub effect: Effect,
}

impl Outcome {
    fn reply(reply: Value) -> Self {
        Self {
            reply,
            effect: Effect::None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::reply(json!({ "error": message.into() }))
    }
}

/// Render-process failures are fatal to the caller; theme failures only during startup.
#[derive(Debug)]
pub enum DispatchError {
    Theme(ThemeError),
    Render(ProcessManagerError),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Theme(err) => write!(f, "failed to resolve colors: {err}"),
            DispatchError::Render(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<ThemeError> for DispatchError {
    fn from(value: ThemeError) -> Self {
        Self::Theme(value)
    }
}

impl From<ProcessManagerError> for DispatchError {
    fn from(value: ProcessManagerError) -> Self {
        Self::Render(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutator {
    SetOption,
    AddFont,
    RemoveFont,
    ClearFonts,
    SetFontSize,
    SetWallpaper,
    SetRandomWallpaper,
    SetAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accessor {
    Opt,
    Fonts,
    FontSize,
    Wallpaper,
    Colors,
    Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Mutate(Mutator),
    Read(Accessor),
    UpdateModule,
}

fn classify(cmd: &str) -> Option<Action> {
    let action = match cmd {
        "set_opt" => Action::Mutate(Mutator::SetOption),
        "add_font" => Action::Mutate(Mutator::AddFont),
        "remove_font" => Action::Mutate(Mutator::RemoveFont),
        "clear_fonts" => Action::Mutate(Mutator::ClearFonts),
        "set_font_size" => Action::Mutate(Mutator::SetFontSize),
        "set_wallpaper" => Action::Mutate(Mutator::SetWallpaper),
        "set_random_wallpaper" => Action::Mutate(Mutator::SetRandomWallpaper),
        "set_alpha" => Action::Mutate(Mutator::SetAlpha),
        "get_opt" => Action::Read(Accessor::Opt),
        "get_fonts" => Action::Read(Accessor::Fonts),
        "get_font_size" => Action::Read(Accessor::FontSize),
        "get_wallpaper" => Action::Read(Accessor::Wallpaper),
        "get_colors" => Action::Read(Accessor::Colors),
        "get_alpha" => Action::Read(Accessor::Alpha),
        "update_mod" => Action::UpdateModule,
        _ => return None,
    };
    Some(action)
}

/// Applies remote commands to a [`RenderTarget`] and drives the render sink.
///
/// Every mutator ends in a full `replace`, including ones that would only need new
/// content. `update_mod` is the one content-only path and uses `push`.
pub struct CommandDispatcher {
    backend: Box<dyn ThemeBackend>,
}

impl CommandDispatcher {
    pub fn new(backend: Box<dyn ThemeBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn ThemeBackend {
        self.backend.as_ref()
    }

    /// Rebuilds argv and content from `target` and swaps in a new render process.
    pub fn reload(
        &self,
        target: &RenderTarget,
        sink: &mut dyn RenderSink,
    ) -> Result<HandleInfo, DispatchError> {
        let resolver = ColorResolver::new(target.theme(), self.backend.as_ref());
        let argv = target.render_argv(|value| resolver.resolve(value))?;
        let content = target.render_content(|value| resolver.resolve(value))?;
        tracing::debug!(argv = %argv.join(" "), "replacing render process");
        Ok(sink.replace(&argv, &content)?)
    }

    pub fn dispatch(
        &self,
        target: &mut RenderTarget,
        sink: &mut dyn RenderSink,
        request: &Request,
    ) -> Result<Outcome, DispatchError> {
        let Some(action) = classify(&request.cmd) else {
            tracing::warn!(cmd = %request.cmd, "unknown command");
            return Ok(Outcome::error(format!("Unknown command: {}", request.cmd)));
        };
        match action {
            Action::Mutate(mutator) => self.mutate(target, sink, mutator, request),
            Action::Read(accessor) => Ok(self.read(target, accessor, request)),
            Action::UpdateModule => self.update_module(target, sink, request),
        }
    }

    fn mutate(
        &self,
        target: &mut RenderTarget,
        sink: &mut dyn RenderSink,
        mutator: Mutator,
        request: &Request,
    ) -> Result<Outcome, DispatchError> {
        if let Err(message) = self.apply(target, mutator, request) {
            return Ok(Outcome::error(message));
        }
        match self.reload(target, sink) {
            Ok(info) => Ok(Outcome {
                reply: json!({}),
                effect: Effect::Replaced(info),
            }),
            Err(DispatchError::Theme(err)) => {
                tracing::warn!(cmd = %request.cmd, "color resolution failed: {err}");
                Ok(Outcome::error(format!("failed to resolve colors: {err}")))
            }
            Err(err) => Err(err),
        }
    }

    fn apply(
        &self,
        target: &mut RenderTarget,
        mutator: Mutator,
        request: &Request,
    ) -> Result<(), String> {
        match mutator {
            Mutator::SetOption => {
                let key = required(request, "key", request.key.as_deref())?;
                let val = required(request, "val", request.val.as_deref())?;
                if !target.set_option(key, val) {
                    tracing::debug!(key, "ignoring unknown option key");
                }
            }
            Mutator::AddFont => {
                target.add_font(required(request, "val", request.val.as_deref())?);
            }
            Mutator::RemoveFont => {
                target.remove_font(required(request, "val", request.val.as_deref())?);
            }
            Mutator::ClearFonts => target.clear_fonts(),
            Mutator::SetFontSize => {
                target.set_font_size(required(request, "val", request.val.as_deref())?);
            }
            Mutator::SetWallpaper => {
                let image = required(request, "val", request.val.as_deref())?;
                target.theme_mut().set_image(image);
                self.apply_wallpaper(target);
            }
            Mutator::SetRandomWallpaper => {
                target
                    .theme_mut()
                    .set_random_image()
                    .map_err(|err| err.to_string())?;
                self.apply_wallpaper(target);
            }
            Mutator::SetAlpha => {
                let alpha = required(request, "val", request.val.as_deref())?;
                target
                    .theme_mut()
                    .set_alpha(alpha)
                    .map_err(|err| err.to_string())?;
            }
        }
        Ok(())
    }

    fn apply_wallpaper(&self, target: &RenderTarget) {
        let image = target.theme().image_path();
        if let Err(err) = self.backend.apply_wallpaper(&image) {
            tracing::warn!(image = %image.display(), "wallpaper change failed: {err}");
        }
    }

    fn read(&self, target: &RenderTarget, accessor: Accessor, request: &Request) -> Outcome {
        let resolver = ColorResolver::new(target.theme(), self.backend.as_ref());
        let raw = match accessor {
            Accessor::Opt => request
                .key
                .as_deref()
                .and_then(|key| target.option(key))
                .map(str::to_owned),
            Accessor::Fonts => Some(target.fonts().join("\n")),
            Accessor::FontSize => Some(target.font_size().to_owned()),
            Accessor::Wallpaper => Some(target.theme().image().to_owned()),
            Accessor::Alpha => Some(target.theme().alpha().to_owned()),
            Accessor::Colors => {
                return match resolver.palette() {
                    Ok(palette) => Outcome::reply(palette.to_json()),
                    Err(err) => Outcome::error(format!("failed to resolve colors: {err}")),
                };
            }
        };
        match raw.filter(|value| !value.is_empty()) {
            Some(value) => match resolver.resolve(&value) {
                Ok(resolved) => Outcome::reply(Value::String(resolved)),
                Err(err) => Outcome::error(format!("failed to resolve colors: {err}")),
            },
            None => Outcome::reply(json!({})),
        }
    }

    fn update_module(
        &self,
        target: &mut RenderTarget,
        sink: &mut dyn RenderSink,
        request: &Request,
    ) -> Result<Outcome, DispatchError> {
        let (Some(key), Some(val)) = (request.key.as_deref(), request.val.as_deref()) else {
            return Ok(Outcome::error("update_mod requires `key` and `val`"));
        };
        if target.update_module(key, val).is_none() {
            tracing::debug!(module = key, "update for unknown module");
        }
        let resolver = ColorResolver::new(target.theme(), self.backend.as_ref());
        let content = match target.render_content(|value| resolver.resolve(value)) {
            Ok(content) => content,
            Err(err) => return Ok(Outcome::error(format!("failed to resolve colors: {err}"))),
        };
        // Only spawning is fatal; a dead bar is picked up by the next replace.
        let effect = match sink.push(&content) {
            Ok(()) => Effect::Pushed,
            Err(err @ ProcessManagerError::InputWrite { .. }) => {
                tracing::warn!(module = key, "content push failed: {err}");
                Effect::None
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Outcome {
            reply: json!({}),
            effect,
        })
    }
}

fn required<'a>(request: &Request, field: &str, value: Option<&'a str>) -> Result<&'a str, String> {
    value.ok_or_else(|| format!("{} requires `{field}`", request.cmd))
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
