// Process launch configuration: resolves a CommandSpec into a concrete
// program, argument list and environment overlay.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use xexec_core::{CommandLine, CommandSpec, Result, XexecError};
use xexec_template::{expand_vars, substitute_placeholder};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Capability checks for platform-specific process creation hints
pub struct PlatformHints;

impl PlatformHints {
    /// Whether this platform has a startup hint that keeps a console window from appearing
    pub const fn supports_startup_suppression() -> bool {
        cfg!(windows)
    }

    /// The hint is applied by default and omitted when the spec asks for suppression
    pub fn hide_console_window(spec: &CommandSpec) -> bool {
        Self::supports_startup_suppression() && !spec.suppress_platform_startup_info
    }
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Applied on top of the inherited environment, in order
    pub env: Vec<(String, String)>,
    pub working_directory: Option<PathBuf>,
    pub hide_console_window: bool,
}

impl ProcessConfig {
    pub fn prepare(spec: &CommandSpec, results_path: Option<&Path>) -> Result<Self> {
        let env = resolve_environment(spec)?;
        let search_path = env
            .iter()
            .rev()
            .find(|(name, _)| name == "PATH")
            .map(|(_, value)| value.clone())
            .or_else(|| std::env::var("PATH").ok());

        let results_path = results_path.map(|p| p.to_string_lossy().into_owned());
        let substitute = |text: &str| match &results_path {
            Some(path) => substitute_placeholder(text, path),
            None => Ok(text.to_string()),
        };

        let (program, args) = match &spec.command {
            CommandLine::Argv(argv) => {
                let (program, rest) = argv.split_first().ok_or_else(|| {
                    XexecError::InvalidSpecError("command argument list is empty".to_string())
                })?;
                let program = resolve_program(
                    &substitute(program.as_str())?,
                    search_path.as_deref(),
                    spec.working_directory.as_deref(),
                )?;
                let args = rest
                    .iter()
                    .map(|arg| substitute(arg.as_str()))
                    .collect::<Result<Vec<_>>>()?;
                (program, args)
            }
            CommandLine::Shell(line) => {
                let (shell, mut args) = shell_invocation();
                args.push(substitute(line.as_str())?);
                (PathBuf::from(shell), args)
            }
        };

        debug!(program = %program.display(), args = ?args, "Prepared process");

        Ok(Self {
            program,
            args,
            env,
            working_directory: spec.working_directory.clone(),
            hide_console_window: PlatformHints::hide_console_window(spec),
        })
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(name, value)| (name, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }

        #[cfg(windows)]
        {
            if self.hide_console_window {
                cmd.creation_flags(CREATE_NO_WINDOW);
            }
        }

        cmd
    }
}

/// Expand the overlay against the inherited environment. A PATH override goes last
/// and may reference the merged result.
fn resolve_environment(spec: &CommandSpec) -> Result<Vec<(String, String)>> {
    let inherited: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
        .collect();

    let mut merged = inherited.clone();
    let mut overlay = Vec::with_capacity(spec.environment.len() + 1);

    for (name, value) in &spec.environment {
        let expanded = expand_vars(value, |var| {
            inherited
                .get(var)
                .or_else(|| spec.environment.get(var))
                .cloned()
        })?;
        merged.insert(name.clone(), expanded.clone());
        overlay.push((name.clone(), expanded));
    }

    if let Some(path) = &spec.path {
        let expanded = expand_vars(path, |var| merged.get(var).cloned())?;
        overlay.push(("PATH".to_string(), expanded));
    }

    Ok(overlay)
}

fn shell_invocation() -> (&'static str, Vec<String>) {
    if cfg!(windows) {
        ("cmd", vec!["/C".to_string()])
    } else if cfg!(target_os = "macos") {
        // login shell so the user's profile environment is set up
        ("/bin/bash", vec!["-l".to_string(), "-c".to_string()])
    } else {
        ("/bin/bash", vec!["-c".to_string()])
    }
}

fn resolve_program(program: &str, search_path: Option<&str>, cwd: Option<&Path>) -> Result<PathBuf> {
    let candidate = Path::new(program);
    // the child is started inside `cwd`, so a relative program must not be joined
    // onto a relative directory a second time
    let cwd = match cwd {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => std::env::current_dir()?.join(dir),
        None => std::env::current_dir()?,
    };

    if candidate.is_absolute() {
        return Ok(candidate.to_path_buf());
    }
    if candidate.components().count() > 1 {
        return Ok(cwd.join(candidate));
    }

    which::which_in(program, search_path, &cwd)
        .map_err(|e| XexecError::LaunchError(format!("{}: {}", program, e)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_platform_hints_are_noop_on_unix() {
        assert!(!PlatformHints::supports_startup_suppression());
        let spec = CommandSpec::new(["sh"]);
        assert!(!PlatformHints::hide_console_window(&spec));
        let spec = spec.with_suppressed_startup_info(true);
        assert!(!PlatformHints::hide_console_window(&spec));
    }

    #[test]
    fn test_prepare_resolves_program_from_path() {
        let spec = CommandSpec::new(["sh", "-c", "exit 0"]);
        let config = ProcessConfig::prepare(&spec, None).unwrap();
        assert!(config.program.is_absolute());
        assert_eq!(config.args, vec!["-c", "exit 0"]);
    }

    #[test]
    fn test_prepare_reports_missing_executable_as_launch_error() {
        let spec = CommandSpec::new(["xexec-definitely-not-installed"]);
        let err = ProcessConfig::prepare(&spec, None).unwrap_err();
        assert!(matches!(err, XexecError::LaunchError(_)));
    }

    #[test]
    fn test_prepare_joins_relative_program_with_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new(["./build.sh"]).with_working_directory(dir.path());
        let config = ProcessConfig::prepare(&spec, None).unwrap();
        assert_eq!(config.program, dir.path().join("./build.sh"));
    }

    #[test]
    fn test_prepare_anchors_relative_working_directory() {
        let spec = CommandSpec::new(["./build.sh"]).with_working_directory("sub");
        let config = ProcessConfig::prepare(&spec, None).unwrap();
        let expected = std::env::current_dir().unwrap().join("sub").join("./build.sh");
        assert!(config.program.is_absolute());
        assert_eq!(config.program, expected);
    }

    #[test]
    fn test_prepare_substitutes_results_placeholder() {
        let spec = CommandSpec::new(["sh", "-c", "echo ok > <result_file>"]);
        let config = ProcessConfig::prepare(&spec, Some(Path::new("/tmp/r.txt"))).unwrap();
        assert_eq!(config.args, vec!["-c", "echo ok > /tmp/r.txt"]);
    }

    #[test]
    fn test_prepare_wraps_shell_line() {
        let spec = CommandSpec::shell("make all > <result_file>");
        let config = ProcessConfig::prepare(&spec, Some(Path::new("/tmp/out"))).unwrap();
        assert_eq!(config.program, PathBuf::from("/bin/bash"));
        assert_eq!(config.args.last().map(String::as_str), Some("make all > /tmp/out"));
        assert_eq!(config.args[config.args.len() - 2], "-c");
    }

    #[test]
    fn test_environment_overlay_is_expanded() {
        let inherited_path = std::env::var("PATH").unwrap();
        let spec = CommandSpec::new(["sh"])
            .with_env("XEXEC_TOOLS", "${PATH}:/opt/tools")
            .with_env("XEXEC_PLAIN", "value");
        let config = ProcessConfig::prepare(&spec, None).unwrap();
        assert!(config
            .env
            .contains(&("XEXEC_TOOLS".to_string(), format!("{}:/opt/tools", inherited_path))));
        assert!(config
            .env
            .contains(&("XEXEC_PLAIN".to_string(), "value".to_string())));
    }

    #[test]
    fn test_path_override_goes_last() {
        let inherited_path = std::env::var("PATH").unwrap();
        let spec = CommandSpec::new(["sh"]).with_path("/opt/bin:$PATH");
        let config = ProcessConfig::prepare(&spec, None).unwrap();
        assert_eq!(
            config.env.last(),
            Some(&("PATH".to_string(), format!("/opt/bin:{}", inherited_path)))
        );
    }
}
