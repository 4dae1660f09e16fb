use std::path::{Path, PathBuf};

use crate::error::ExecError;

const SHELL_OPERATORS: &[&str] = &["|", ">", "<", "&&", ";"];

const SHELL_CANDIDATES: &[&str] = &["/bin/bash", "/bin/zsh", "/bin/sh"];

const FALLBACK_SHELL: &str = "/bin/sh";

/// How a command string will be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Program and arguments executed directly.
    Direct { program: String, args: Vec<String> },
    /// Whole script handed to `<shell> -c`.
    Shell { shell: PathBuf, script: String },
}

impl Invocation {
    #[must_use]
    pub fn program(&self) -> String {
        match self {
            Self::Direct { program, .. } => program.clone(),
            Self::Shell { shell, .. } => shell.display().to_string(),
        }
    }

    #[must_use]
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Direct { args, .. } => args.clone(),
            Self::Shell { script, .. } => vec!["-c".to_owned(), script.clone()],
        }
    }

    #[must_use]
    pub fn is_shell(&self) -> bool {
        matches!(self, Self::Shell { .. })
    }
}

/// Whether `command` needs a shell interpreter (pipes, redirection, chaining).
#[must_use]
pub fn is_complex(command: &str) -> bool {
    SHELL_OPERATORS.iter().any(|op| command.contains(op))
}

/// Classify a raw command string.
///
/// Surrounding backticks and quotes are stripped first.
///
/// # Errors
///
/// Returns `ExecError::EmptyCommand` if nothing is left to run.
pub fn classify(command: &str, shell: &Path) -> Result<Invocation, ExecError> {
    let command = command.trim().trim_matches(['`', '\'', '"']).trim();
    if command.is_empty() {
        return Err(ExecError::EmptyCommand);
    }

    if is_complex(command) {
        return Ok(Invocation::Shell {
            shell: shell.to_path_buf(),
            script: command.to_owned(),
        });
    }

    let mut parts = command.split_whitespace().map(str::to_owned);
    let program = parts.next().ok_or(ExecError::EmptyCommand)?;
    Ok(Invocation::Direct {
        program,
        args: parts.collect(),
    })
}

/// First existing shell among bash, zsh, sh.
#[must_use]
pub fn discover_shell() -> PathBuf {
    SHELL_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(FALLBACK_SHELL))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    #[test]
    fn simple_command_split() {
        let inv = classify("ls -la src", &sh()).unwrap();
        assert_eq!(
            inv,
            Invocation::Direct {
                program: "ls".into(),
                args: vec!["-la".into(), "src".into()],
            }
        );
        assert!(!inv.is_shell());
    }

    #[test]
    fn single_word_has_no_args() {
        let inv = classify("pwd", &sh()).unwrap();
        assert_eq!(inv.program(), "pwd");
        assert!(inv.args().is_empty());
    }

    #[test]
    fn operators_route_through_shell() {
        for cmd in [
            "ls | wc -l",
            "echo hi > out.txt",
            "sort < in.txt",
            "make && make install",
            "cd src; ls",
        ] {
            let inv = classify(cmd, &sh()).unwrap();
            assert!(inv.is_shell(), "{cmd} should use the shell");
            assert_eq!(inv.args(), vec!["-c".to_owned(), cmd.to_owned()]);
        }
    }

    #[test]
    fn single_ampersand_is_simple() {
        assert!(!is_complex("echo a & b"));
    }

    #[test]
    fn surrounding_quotes_and_backticks_trimmed() {
        let inv = classify("`npm install`", &sh()).unwrap();
        assert_eq!(inv.program(), "npm");
        assert_eq!(inv.args(), vec!["install".to_owned()]);

        let inv = classify("\"cargo build\"", &sh()).unwrap();
        assert_eq!(inv.program(), "cargo");
    }

    #[test]
    fn empty_and_blank_rejected() {
        assert!(matches!(classify("", &sh()), Err(ExecError::EmptyCommand)));
        assert!(matches!(classify("   ", &sh()), Err(ExecError::EmptyCommand)));
        assert!(matches!(classify("``", &sh()), Err(ExecError::EmptyCommand)));
    }

    #[test]
    fn shell_program_is_configured_path() {
        let inv = classify("a | b", Path::new("/usr/local/bin/bash")).unwrap();
        assert_eq!(inv.program(), "/usr/local/bin/bash");
    }

    #[test]
    #[cfg(unix)]
    fn discovered_shell_exists() {
        assert!(discover_shell().exists());
    }
}
