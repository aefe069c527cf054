//! Agent availability check.
//!
//! The agent command may be a bare program name (`claude`), a path
//! (`~/bin/claude`, already tilde-expanded by config loading), or a program
//! followed by arguments. Only the first word is resolved: a name is looked up
//! on `PATH`, anything containing a `/` must exist and be executable.

use std::path::{Path, PathBuf};

use crate::core::error::{RunError, RunResult};

/// Resolves the program named by the first word of `command`.
///
/// # Errors
///
/// Returns a fatal error if the command is empty or the program cannot be
/// found.
pub fn check_agent_command(command: &str) -> RunResult<PathBuf> {
    let Some(program) = command.split_whitespace().next() else {
        return Err(RunError::fatal("agent command is empty"));
    };

    resolve_program(program, std::env::var_os("PATH").as_deref())
        .ok_or_else(|| RunError::fatal(format!("agent command not found: {program}")))
}

/// Looks `program` up in a `PATH`-style list, or checks it directly if it
/// contains a path separator.
fn resolve_program(program: &str, path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }

    std::env::split_paths(path_var?)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// Checks if a path points to an executable file.
#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(path) {
        Ok(metadata) => metadata.is_file() && (metadata.permissions().mode() & 0o111 != 0),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn finds_program_on_path() {
        let temp = TempDir::new().unwrap();
        let expected = write_file(temp.path(), "agent", 0o755);

        let found = resolve_program("agent", Some(temp.path().as_os_str()));
        assert_eq!(found, Some(expected));
    }

    #[test]
    fn skips_non_executable_files() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "agent", 0o644);

        assert_eq!(resolve_program("agent", Some(temp.path().as_os_str())), None);
    }

    #[test]
    fn searches_every_path_entry() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let expected = write_file(second.path(), "agent", 0o755);
        let path_var = std::env::join_paths([first.path(), second.path()]).unwrap();

        assert_eq!(resolve_program("agent", Some(&path_var)), Some(expected));
    }

    #[test]
    fn explicit_path_is_checked_directly() {
        let temp = TempDir::new().unwrap();
        let path = write_file(temp.path(), "agent", 0o755);
        let program = path.display().to_string();

        assert_eq!(resolve_program(&program, None), Some(path));
        assert_eq!(resolve_program("/definitely/not/here", None), None);
    }

    #[test]
    fn missing_path_variable_finds_nothing() {
        assert_eq!(resolve_program("agent", None), None);
    }

    #[test]
    fn only_first_word_is_resolved() {
        let temp = TempDir::new().unwrap();
        let path = write_file(temp.path(), "agent", 0o755);
        let command = format!("{} --model opus", path.display());

        assert_eq!(check_agent_command(&command).unwrap(), path);
    }

    #[test]
    fn empty_and_unknown_commands_are_fatal() {
        assert_eq!(check_agent_command("   ").unwrap_err().kind(), ErrorKind::Fatal);
        let err = check_agent_command("/no/such/agent").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.to_string().contains("/no/such/agent"));
    }
}
