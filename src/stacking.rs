use std::process::{Command as ProcessCommand, Stdio};

#[derive(Debug)]
pub enum StackError {
    Launch {
        command: String,
        error: std::io::Error,
    },
    Failure {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    WindowNotFound {
        name: String,
    },
}

impl std::fmt::Display for StackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackError::Launch { command, error } => {
                write!(f, "failed to launch `{command}`: {error}")
            }
            StackError::Failure {
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
            StackError::WindowNotFound { name } => write!(f, "no window named `{name}`"),
        }
    }
}

impl std::error::Error for StackError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOutcome {
    pub background_id: String,
    pub render_ids: Vec<String>,
}

/// Raises the render window above a named background window through an `xdo`-style tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStacker {
    tool: String,
    background_window: String,
    render_window: String,
}

impl WindowStacker {
    pub fn new(
        tool: impl Into<String>,
        background_window: impl Into<String>,
        render_window: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            background_window: background_window.into(),
            render_window: render_window.into(),
        }
    }

    pub fn run(&self) -> Result<StackOutcome, StackError> {
        let background_id = self
            .query_window_ids(&self.background_window)?
            .into_iter()
            .next()
            .ok_or_else(|| StackError::WindowNotFound {
                name: self.background_window.clone(),
            })?;
        let render_ids = self.query_window_ids(&self.render_window)?;
        if render_ids.is_empty() {
            return Err(StackError::WindowNotFound {
                name: self.render_window.clone(),
            });
        }

        let mut args = vec!["above", "-t", background_id.as_str()];
        args.extend(render_ids.iter().map(String::as_str));
        self.run_tool(&args)?;

        Ok(StackOutcome {
            background_id,
            render_ids,
        })
    }

    fn query_window_ids(&self, name: &str) -> Result<Vec<String>, StackError> {
        let stdout = self.run_tool(&["id", "-n", name])?;
        Ok(stdout.split_whitespace().map(str::to_owned).collect())
    }

    fn run_tool(&self, args: &[&str]) -> Result<String, StackError> {
        let command = format!("{} {}", self.tool, args.join(" "));
        let output = ProcessCommand::new(&self.tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|error| StackError::Launch {
                command: command.clone(),
                error,
            })?;
        if !output.status.success() {
            return Err(StackError::Failure {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
