/// Child-process launching for the helper scripts and the browser.
///
/// Children are started with a hidden window and below-normal priority on
/// Windows and are never waited on: `launch` returns as soon as the process
/// exists, with its PID captured in [`LaunchedProcess`].
///
/// The [`ProcessLauncher`] trait is the seam tests use to observe launches
/// without touching real OS process APIs.
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

#[cfg(windows)]
const POWERSHELL: &str = "powershell.exe";
#[cfg(not(windows))]
const POWERSHELL: &str = "pwsh";

/// Program plus arguments, exactly as they will be passed to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: String,
    pub args: Vec<String>,
}

/// Handle to a launched child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchedProcess {
    pub pid: u32,
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchedProcess>;
}

/// Launches real processes through [`std::process::Command`].
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchedProcess> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        imp::configure(&mut cmd);

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to launch {}", request.program))?;
        let pid = child.id();
        imp::detach(child);
        Ok(LaunchedProcess { pid })
    }
}

/// `powershell.exe -WindowStyle Hidden -ExecutionPolicy Bypass -NoProfile -File <script> [args…]`
pub fn powershell_script(script: &Path, args: &[String]) -> LaunchRequest {
    let mut full = vec![
        "-WindowStyle".to_string(),
        "Hidden".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-NoProfile".to_string(),
        "-File".to_string(),
        script.to_string_lossy().into_owned(),
    ];
    full.extend(args.iter().cloned());
    LaunchRequest {
        program: POWERSHELL.to_string(),
        args: full,
    }
}

/// Opens `url` with the platform's default handler.
pub fn open_url(url: &str) -> LaunchRequest {
    #[cfg(windows)]
    let (program, mut args) = ("cmd", vec!["/C".to_string(), "start".to_string(), String::new()]);
    #[cfg(target_os = "macos")]
    let (program, mut args) = ("open", Vec::<String>::new());
    #[cfg(all(not(windows), not(target_os = "macos")))]
    let (program, mut args) = ("xdg-open", Vec::<String>::new());

    args.push(url.to_string());
    LaunchRequest {
        program: program.to_string(),
        args,
    }
}

// ── Platform specifics ────────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::os::windows::process::CommandExt;
    use std::process::{Child, Command};

    use windows::Win32::System::Threading::{BELOW_NORMAL_PRIORITY_CLASS, CREATE_NO_WINDOW};

    pub fn configure(cmd: &mut Command) {
        cmd.creation_flags(CREATE_NO_WINDOW.0 | BELOW_NORMAL_PRIORITY_CLASS.0);
    }

    /// Dropping a `Child` on Windows only closes our handles.
    pub fn detach(child: Child) {
        drop(child);
    }
}

#[cfg(not(windows))]
mod imp {
    use std::process::{Child, Command};

    pub fn configure(_cmd: &mut Command) {}

    /// Reaps the child in the background so it doesn't linger as a zombie.
    pub fn detach(mut child: Child) {
        std::thread::spawn(move || {
            let _ = child.wait();
        });
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn powershell_script_hides_window_and_passes_file_then_args() {
        let script = PathBuf::from("Assets").join("startMCM.ps1");
        let script_arg = script.to_string_lossy().into_owned();
        let req = powershell_script(&script, &["-Quiet".to_string()]);
        assert_eq!(req.program, POWERSHELL);
        assert_eq!(
            req.args,
            vec![
                "-WindowStyle",
                "Hidden",
                "-ExecutionPolicy",
                "Bypass",
                "-NoProfile",
                "-File",
                script_arg.as_str(),
                "-Quiet",
            ]
        );
    }

    #[test]
    fn open_url_passes_url_last() {
        let req = open_url("http://localhost:6050/mcm");
        assert_eq!(req.args.last().map(String::as_str), Some("http://localhost:6050/mcm"));
        assert!(!req.program.is_empty());
    }

    #[test]
    fn system_launcher_reports_missing_program() {
        let req = LaunchRequest {
            program: "mcm-bridge-no-such-program".to_string(),
            args: vec![],
        };
        let err = SystemLauncher.launch(&req).unwrap_err();
        assert!(err.to_string().contains("mcm-bridge-no-such-program"));
    }

    #[test]
    fn recording_launcher_records_and_fails_on_request() {
        let ok = testing::RecordingLauncher::default();
        let pid = ok.launch(&open_url("http://a")).unwrap().pid;
        assert!(pid > 0);
        assert_eq!(ok.requests().len(), 1);

        let failing = testing::RecordingLauncher::failing();
        assert!(failing.launch(&open_url("http://a")).is_err());
        assert_eq!(failing.requests().len(), 1);
    }
}
