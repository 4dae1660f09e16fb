use crate::error::ExecError;

const DEFAULT_DENYLIST: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "rm -rf .",
    "rm -rf *",
    "> /dev/sda",
    "> /dev/hda",
    "mkfs",
    "dd if=/dev/zero",
    ":(){:|:&};:",
    ":(){ :|:& };:",
];

/// Static denylist of destructive command fragments.
///
/// Matching is a case-insensitive substring check. It is a best-effort guard,
/// not a sandbox.
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    patterns: Vec<String>,
}

impl SafetyFilter {
    /// Built-in patterns plus `extra`, lowercased and de-duplicated.
    #[must_use]
    pub fn new(extra: &[String]) -> Self {
        let mut patterns: Vec<String> = DEFAULT_DENYLIST.iter().map(|s| (*s).to_owned()).collect();
        patterns.extend(
            extra
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
        );
        patterns.sort();
        patterns.dedup();
        Self { patterns }
    }

    /// Return the first denylisted pattern found in `command`.
    #[must_use]
    pub fn find_blocked(&self, command: &str) -> Option<&str> {
        let normalized = command.to_lowercase();
        self.patterns
            .iter()
            .find(|p| normalized.contains(p.as_str()))
            .map(String::as_str)
    }

    /// # Errors
    ///
    /// Returns `ExecError::Blocked` if `command` matches a denylisted pattern.
    pub fn check(&self, command: &str) -> Result<(), ExecError> {
        match self.find_blocked(command) {
            Some(pattern) => {
                tracing::warn!(command, pattern, "rejected unsafe command");
                Err(ExecError::Blocked {
                    pattern: pattern.to_owned(),
                })
            }
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn root_deletion_blocked() {
        let filter = SafetyFilter::default();
        assert!(filter.find_blocked("rm -rf /").is_some());
        assert!(filter.find_blocked("rm -rf /*").is_some());
        assert!(filter.find_blocked("rm -rf ~").is_some());
        assert!(filter.find_blocked("echo ok && rm -rf /usr").is_some());
    }

    #[test]
    fn raw_device_and_format_blocked() {
        let filter = SafetyFilter::default();
        assert!(filter.find_blocked("cat image > /dev/sda").is_some());
        assert!(filter.find_blocked("mkfs.ext4 /dev/sdb1").is_some());
        assert!(filter.find_blocked("dd if=/dev/zero of=disk.img").is_some());
    }

    #[test]
    fn fork_bombs_blocked() {
        let filter = SafetyFilter::default();
        assert!(filter.find_blocked(":(){:|:&};:").is_some());
        assert!(filter.find_blocked(":(){ :|:& };:").is_some());
    }

    #[test]
    fn case_insensitive() {
        let filter = SafetyFilter::default();
        assert!(filter.find_blocked("RM -RF /").is_some());
        assert!(filter.find_blocked("MKFS.xfs /dev/sdc").is_some());
    }

    #[test]
    fn safe_commands_pass() {
        let filter = SafetyFilter::default();
        for cmd in ["echo hello", "ls -la", "cargo build", "npm install", "rm file.txt"] {
            assert!(filter.check(cmd).is_ok(), "{cmd} should pass");
        }
    }

    #[test]
    fn check_reports_pattern() {
        let filter = SafetyFilter::default();
        let err = filter.check("sudo mkfs /dev/sda").unwrap_err();
        assert!(matches!(err, ExecError::Blocked { ref pattern } if pattern == "mkfs"));
    }

    #[test]
    fn extra_patterns_are_additive() {
        let filter = SafetyFilter::new(&["Shutdown".to_owned()]);
        assert!(filter.find_blocked("shutdown -h now").is_some());
        assert!(filter.find_blocked("rm -rf /").is_some());
    }

    #[test]
    fn extra_patterns_deduped_and_lowercased() {
        let filter = SafetyFilter::new(&["MKFS".to_owned(), "reboot".to_owned(), "Reboot".to_owned()]);
        assert_eq!(filter.patterns().iter().filter(|p| *p == "mkfs").count(), 1);
        assert_eq!(filter.patterns().iter().filter(|p| *p == "reboot").count(), 1);
    }

    #[test]
    fn blank_extra_pattern_ignored() {
        let filter = SafetyFilter::new(&["   ".to_owned()]);
        assert!(filter.find_blocked("echo hello").is_none());
    }

    #[test]
    fn empty_command_not_blocked() {
        assert!(SafetyFilter::default().find_blocked("").is_none());
    }

    proptest! {
        #[test]
        fn denylisted_root_delete_always_blocked(prefix in "[a-z ]{0,12}", suffix in "[a-z/ ]{0,12}") {
            let filter = SafetyFilter::default();
            let cmd = format!("{prefix}rm -rf /{suffix}");
            prop_assert!(filter.check(&cmd).is_err());
        }

        #[test]
        fn plain_words_never_blocked(words in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
            let filter = SafetyFilter::default();
            let cmd = words.join(" ");
            prop_assume!(!cmd.contains("mkfs"));
            prop_assert!(filter.check(&cmd).is_ok());
        }
    }
}
