use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::tq_error::TqError;
use crate::error::tq_error_enums::{BuildError, TqErrorKind};
use crate::logging::syslog::{info, trace};

/// Which concrete driver a worker's `type`/`runtime.build_driver` hint
/// selects. `Interpreted` (PHP via the FastCGI pool, or any script run
/// directly by its own runtime) performs no compilation step at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverKind {
    Compiled,
    Jvm,
    Interpreted,
}

impl DriverKind {
    /// `fastcgi-pool` workers are always interpreted; `native` workers
    /// default to compiled unless `runtime.build_driver` says otherwise.
    pub fn resolve(worker_type: &str, build_driver_hint: Option<&str>) -> Self {
        if worker_type == "fastcgi-pool" {
            return DriverKind::Interpreted;
        }
        match build_driver_hint {
            Some("jvm") => DriverKind::Jvm,
            Some("interpreted") => DriverKind::Interpreted,
            _ => DriverKind::Compiled,
        }
    }
}

pub struct BuildOutcome {
    pub artifact_path: PathBuf,
}

/// Runs the build for one worker. `build_command` is a shell command
/// executed with `source_dir` as its cwd; its combined stdout/stderr
/// becomes the opaque error text surfaced verbatim on the build-error page
/// when the command exits non-zero. `out_path` is where the resulting
/// artifact (or, for `Jvm`, a generated wrapper script) is expected.
pub async fn build(kind: DriverKind, source_dir: &Path, out_path: &Path, build_command: Option<&str>) -> Result<BuildOutcome, TqError> {
    match kind {
        DriverKind::Interpreted => build_interpreted(source_dir).await,
        DriverKind::Compiled => build_compiled(source_dir, out_path, build_command).await,
        DriverKind::Jvm => build_jvm(source_dir, out_path, build_command).await,
    }
}

async fn build_interpreted(source_dir: &Path) -> Result<BuildOutcome, TqError> {
    if !source_dir.is_dir() {
        return Err(TqError::new(TqErrorKind::Build(BuildError::ArtifactMissing), format!("source directory {} does not exist", source_dir.display())));
    }
    trace(format!("interpreted worker at {}, nothing to build", source_dir.display()));
    Ok(BuildOutcome { artifact_path: source_dir.to_path_buf() })
}

async fn build_compiled(source_dir: &Path, out_path: &Path, build_command: Option<&str>) -> Result<BuildOutcome, TqError> {
    let command = build_command.ok_or_else(|| TqError::new(TqErrorKind::Build(BuildError::DriverFailed), "compiled worker is missing runtime.build_command".to_string()))?;

    run_shell(source_dir, command).await?;

    if !out_path.exists() {
        return Err(TqError::new(TqErrorKind::Build(BuildError::ArtifactMissing), format!("build command succeeded but artifact {} is missing", out_path.display())));
    }

    info(format!("built artifact {}", out_path.display()));
    Ok(BuildOutcome { artifact_path: out_path.to_path_buf() })
}

async fn build_jvm(source_dir: &Path, out_path: &Path, build_command: Option<&str>) -> Result<BuildOutcome, TqError> {
    let command = build_command.ok_or_else(|| TqError::new(TqErrorKind::Build(BuildError::DriverFailed), "jvm worker is missing runtime.build_command".to_string()))?;

    run_shell(source_dir, command).await?;

    let jar_path = out_path.with_extension("jar");
    if !jar_path.exists() {
        return Err(TqError::new(TqErrorKind::Build(BuildError::ArtifactMissing), format!("build command succeeded but jar {} is missing", jar_path.display())));
    }

    write_jvm_wrapper(out_path, &jar_path)?;

    info(format!("built jar {} and wrapper {}", jar_path.display(), out_path.display()));
    Ok(BuildOutcome { artifact_path: out_path.to_path_buf() })
}

fn write_jvm_wrapper(out_path: &Path, jar_path: &Path) -> Result<(), TqError> {
    let script = format!("#!/bin/sh\nexec java -jar \"{}\" \"$@\"\n", jar_path.display());
    std::fs::write(out_path, script).map_err(|e| TqError::new(TqErrorKind::Build(BuildError::DriverFailed), format!("failed to write jvm wrapper {}: {}", out_path.display(), e)))?;

    let mut perms = std::fs::metadata(out_path).map_err(|e| TqError::new(TqErrorKind::Build(BuildError::DriverFailed), e.to_string()))?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(out_path, perms).map_err(|e| TqError::new(TqErrorKind::Build(BuildError::DriverFailed), format!("failed to chmod wrapper {}: {}", out_path.display(), e)))?;

    Ok(())
}

async fn run_shell(cwd: &Path, command: &str) -> Result<(), TqError> {
    trace(format!("running build command `{}` in {}", command, cwd.display()));

    let output = Command::new("sh").arg("-c").arg(command).current_dir(cwd).output().await.map_err(|e| TqError::new(TqErrorKind::Build(BuildError::DriverFailed), format!("failed to run build command: {}", e)))?;

    if !output.status.success() {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(TqError::new(TqErrorKind::Build(BuildError::DriverFailed), text));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tqserver-build-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn resolves_fastcgi_pool_as_interpreted_regardless_of_hint() {
        assert_eq!(DriverKind::resolve("fastcgi-pool", Some("jvm")), DriverKind::Interpreted);
    }

    #[test]
    fn resolves_native_default_as_compiled() {
        assert_eq!(DriverKind::resolve("native", None), DriverKind::Compiled);
        assert_eq!(DriverKind::resolve("native", Some("jvm")), DriverKind::Jvm);
    }

    #[tokio::test]
    async fn interpreted_build_succeeds_if_source_dir_exists() {
        let dir = temp_dir();
        let outcome = build(DriverKind::Interpreted, &dir, &dir.join("unused"), None).await.unwrap();
        assert_eq!(outcome.artifact_path, dir);
    }

    #[tokio::test]
    async fn compiled_build_runs_the_command_and_checks_the_artifact() {
        let dir = temp_dir();
        let out_path = dir.join("app");
        let command = format!("touch {}", out_path.display());

        let outcome = build(DriverKind::Compiled, &dir, &out_path, Some(&command)).await.unwrap();
        assert_eq!(outcome.artifact_path, out_path);
    }

    #[tokio::test]
    async fn compiled_build_surfaces_stderr_as_opaque_error_text_on_failure() {
        let dir = temp_dir();
        let out_path = dir.join("app");

        let result = build(DriverKind::Compiled, &dir, &out_path, Some("echo 'boom' 1>&2; exit 1")).await;
        let err = result.unwrap_err();
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn compiled_build_fails_if_artifact_never_materializes() {
        let dir = temp_dir();
        let out_path = dir.join("app");

        let result = build(DriverKind::Compiled, &dir, &out_path, Some("true")).await;
        assert!(matches!(result.unwrap_err().kind, TqErrorKind::Build(BuildError::ArtifactMissing)));
    }
}
