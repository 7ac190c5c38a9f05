//! The privileged executor: every external tool the pipeline needs goes through here.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::cmd::CheckCommandOutput as _;

/// Builds an argv from anything printable.
#[macro_export]
macro_rules! argv {
    ($($arg:expr),* $(,)?) => {
        vec![$($arg.to_string()),*]
    };
}

/// Where a command is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Inside the install execution context (the chroot).
    #[default]
    Chroot,
    /// On the host, e.g. to bind host device nodes into the chroot.
    Host,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions<'a> {
    pub cwd: Option<&'a Path>,
    /// Whether the caller wants stdout back.
    pub capture: bool,
    /// Bytes written to the command's stdin.
    pub input: Option<&'a [u8]>,
    pub scope: Scope,
}

impl<'a> RunOptions<'a> {
    pub fn host() -> Self {
        Self {
            scope: Scope::Host,
            ..Default::default()
        }
    }

    pub fn captured(mut self) -> Self {
        self.capture = true;
        self
    }

    pub fn with_input(mut self, input: &'a [u8]) -> Self {
        self.input = Some(input);
        self
    }

    pub fn in_dir(mut self, cwd: &'a Path) -> Self {
        self.cwd = Some(cwd);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub output: Option<String>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// How the exit code of a command is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// A non-zero exit code is an error.
    Check,
    /// Issue the command and ignore its exit code apart from logging it. The effect of the
    /// command must be verified independently afterwards.
    FireAndVerify,
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs `argv` without any shell interpretation and reports the exit code.
    async fn run(&self, argv: &[String], options: RunOptions<'_>) -> Result<CommandOutput>;

    /// Maps a path as seen from inside the execution context to the same path on the host.
    fn host_path(&self, path: &Path) -> PathBuf;

    async fn run_with_policy(
        &self,
        argv: &[String],
        options: RunOptions<'_>,
        policy: ExitPolicy,
    ) -> Result<CommandOutput> {
        let output = self.run(argv, options).await?;
        if !output.success() {
            match policy {
                ExitPolicy::Check => bail!(
                    "Command {argv:?} failed with exit code {}: {}",
                    output.code,
                    output.stderr.trim()
                ),
                ExitPolicy::FireAndVerify => tracing::warn!(
                    code = output.code,
                    stderr = output.stderr.trim(),
                    "Ignoring failure of {argv:?}, the result is verified later"
                ),
            }
        }
        Ok(output)
    }

    /// Runs inside the execution context and fails on a non-zero exit code.
    async fn run_checked(&self, argv: &[String]) -> Result<()> {
        self.run_with_policy(argv, RunOptions::default(), ExitPolicy::Check)
            .await
            .map(|_| ())
    }

    /// Runs on the host and fails on a non-zero exit code.
    async fn run_host_checked(&self, argv: &[String]) -> Result<()> {
        self.run_with_policy(argv, RunOptions::host(), ExitPolicy::Check)
            .await
            .map(|_| ())
    }

    /// Runs inside the execution context and returns stdout, failing on a non-zero exit code.
    async fn run_output(&self, argv: &[String]) -> Result<String> {
        self.run_with_policy(argv, RunOptions::default().captured(), ExitPolicy::Check)
            .await
            .map(|output| output.output.unwrap_or_default())
    }
}

/// Executes commands through `chroot(8)` into a prepared root filesystem.
pub struct ChrootExecutor {
    root: PathBuf,
}

impl ChrootExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        which::which("chroot").context("Could not found `chroot` on the host")?;
        if !root.is_dir() {
            bail!("Chroot directory {root:?} does not exist or not a directory")
        }
        Ok(Self { root })
    }

    fn build_command(&self, argv: &[String], options: &RunOptions<'_>) -> Result<Command> {
        let Some((program, args)) = argv.split_first() else {
            bail!("Cannot run an empty command")
        };

        let cmd = match options.scope {
            Scope::Chroot => {
                let mut cmd = Command::new("chroot");
                cmd.arg(&self.root);
                if let Some(cwd) = options.cwd {
                    cmd.arg("env").arg(format!("--chdir={}", cwd.display()));
                }
                cmd.arg(program).args(args);
                cmd
            }
            Scope::Host => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                if let Some(cwd) = options.cwd {
                    cmd.current_dir(cwd);
                }
                cmd
            }
        };
        Ok(cmd)
    }
}

#[async_trait]
impl Executor for ChrootExecutor {
    async fn run(&self, argv: &[String], options: RunOptions<'_>) -> Result<CommandOutput> {
        tracing::debug!(scope = ?options.scope, "Running {argv:?}");

        let raw = self
            .build_command(argv, &options)?
            .run_collect(options.input)
            .await?;

        Ok(CommandOutput {
            code: raw.code,
            output: options
                .capture
                .then(|| String::from_utf8_lossy(&raw.stdout).into_owned()),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        })
    }

    fn host_path(&self, path: &Path) -> PathBuf {
        self.root
            .join(path.strip_prefix("/").unwrap_or(path))
    }
}

/// Runs every command directly on the host, for read-only queries which need no chroot.
pub struct HostExecutor;

#[async_trait]
impl Executor for HostExecutor {
    async fn run(&self, argv: &[String], options: RunOptions<'_>) -> Result<CommandOutput> {
        let Some((program, args)) = argv.split_first() else {
            bail!("Cannot run an empty command")
        };
        tracing::debug!("Running {argv:?} on the host");

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = options.cwd {
            cmd.current_dir(cwd);
        }
        let raw = cmd.run_collect(options.input).await?;

        Ok(CommandOutput {
            code: raw.code,
            output: options
                .capture
                .then(|| String::from_utf8_lossy(&raw.stdout).into_owned()),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        })
    }

    fn host_path(&self, path: &Path) -> PathBuf {
        path.to_owned()
    }
}

#[cfg(test)]
pub mod tests {
    use std::sync::Mutex;

    #[allow(unused_imports)]
    use super::*;
    use anyhow::Result;

    /// One command seen by [`RecordingExecutor`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Recorded {
        pub argv: Vec<String>,
        pub scope: Scope,
        pub input: Option<Vec<u8>>,
    }

    type Responder = Box<dyn Fn(&[String], &Path) -> Option<(i32, String)> + Send + Sync>;

    /// Records commands instead of running them. The execution context is a scratch directory.
    pub struct RecordingExecutor {
        root: PathBuf,
        pub commands: Mutex<Vec<Recorded>>,
        responders: Vec<Responder>,
    }

    impl RecordingExecutor {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self {
                root: root.into(),
                commands: Mutex::new(vec![]),
                responders: vec![],
            }
        }

        /// The first responder returning `Some` decides the exit code and stdout of a command.
        pub fn respond(
            mut self,
            f: impl Fn(&[String], &Path) -> Option<(i32, String)> + Send + Sync + 'static,
        ) -> Self {
            self.responders.push(Box::new(f));
            self
        }

        pub fn argvs(&self) -> Vec<Vec<String>> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.argv.clone())
                .collect()
        }

        pub fn joined(&self) -> Vec<String> {
            self.argvs().iter().map(|argv| argv.join(" ")).collect()
        }
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn run(&self, argv: &[String], options: RunOptions<'_>) -> Result<CommandOutput> {
            self.commands.lock().unwrap().push(Recorded {
                argv: argv.to_vec(),
                scope: options.scope,
                input: options.input.map(|i| i.to_vec()),
            });
            let (code, stdout) = self
                .responders
                .iter()
                .find_map(|f| f(argv, &self.root))
                .unwrap_or((0, String::new()));
            Ok(CommandOutput {
                code,
                output: options.capture.then_some(stdout),
                stderr: String::new(),
            })
        }

        fn host_path(&self, path: &Path) -> PathBuf {
            self.root.join(path.strip_prefix("/").unwrap_or(path))
        }
    }

    #[tokio::test]
    async fn test_fire_and_verify_ignores_exit_code() -> Result<()> {
        let executor = RecordingExecutor::new("/nonexistent").respond(|_, _| Some((1, "".into())));

        let output = executor
            .run_with_policy(
                &argv!["parted", "-s", "/dev/install", "mktable", "msdos"],
                RunOptions::default(),
                ExitPolicy::FireAndVerify,
            )
            .await?;
        assert_eq!(output.code, 1);

        assert!(executor
            .run_checked(&argv!["parted", "-s", "/dev/install", "mktable", "msdos"])
            .await
            .is_err());
        Ok(())
    }

    #[test]
    fn test_chroot_command_line() -> Result<()> {
        let executor = ChrootExecutor {
            root: PathBuf::from("/work/chroot_native"),
        };

        let cmd = executor.build_command(
            &argv!["mkdir", "-p", "/mnt/install"],
            &RunOptions::default().in_dir(Path::new("/tmp")),
        )?;
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "chroot");
        assert_eq!(
            std_cmd.get_args().collect::<Vec<_>>(),
            vec!["/work/chroot_native", "env", "--chdir=/tmp", "mkdir", "-p", "/mnt/install"]
        );

        let cmd = executor.build_command(&argv!["mount", "--bind", "a", "b"], &RunOptions::host())?;
        assert_eq!(cmd.as_std().get_program(), "mount");

        assert!(executor.build_command(&[], &RunOptions::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_host_path() {
        let executor = ChrootExecutor {
            root: PathBuf::from("/work/chroot_native"),
        };
        assert_eq!(
            executor.host_path(Path::new("/dev/mapper/pm_crypt")),
            PathBuf::from("/work/chroot_native/dev/mapper/pm_crypt")
        );
    }

    #[tokio::test]
    async fn test_host_executor() -> Result<()> {
        let output = HostExecutor
            .run(&argv!["sh", "-c", "echo hello"], RunOptions::default().captured())
            .await?;
        assert!(output.success());
        assert_eq!(output.output.as_deref(), Some("hello\n"));
        assert_eq!(HostExecutor.host_path(Path::new("/dev/sda")), Path::new("/dev/sda"));
        Ok(())
    }
}
