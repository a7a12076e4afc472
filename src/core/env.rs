//! Environment block construction
//!
//! Windows keeps environment variables sorted case-insensitively and treats
//! names that differ only in case as the same variable. [`EnvironmentMap`]
//! follows those rules so the block handed to `CreateProcessW` is valid.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use super::pty::PtyError;

/// Variable name ordered by simple uppercase folding, independent of locale.
#[derive(Debug, Clone)]
struct EnvKey(String);

impl EnvKey {
    fn folded(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars().flat_map(char::to_uppercase)
    }
}

impl Ord for EnvKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl PartialOrd for EnvKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EnvKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EnvKey {}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentMap {
    vars: BTreeMap<EnvKey, String>,
}

impl EnvironmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Set `name` to `value`, replacing any variable whose name differs only
    /// in case. The stored name takes the new spelling.
    pub fn insert(&mut self, name: &str, value: &str) -> Result<(), PtyError> {
        validate_name(name)?;
        if value.contains('\0') {
            return Err(PtyError::Environment(format!("value of {} contains NUL", name)));
        }
        let key = EnvKey(name.to_string());
        self.vars.remove(&key);
        self.vars.insert(key, value.to_string());
        Ok(())
    }

    /// Parse `NAME=VALUE`. Names may start with `=` (drive-letter variables).
    pub fn insert_assignment(&mut self, assignment: &str) -> Result<(), PtyError> {
        let split = assignment
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '=')
            .map(|(i, _)| i)
            .ok_or_else(|| PtyError::Environment(format!("expected NAME=VALUE, got {:?}", assignment)))?;
        self.insert(&assignment[..split], &assignment[split + 1..])
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(&EnvKey(name.to_string())).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.0.as_str(), v.as_str()))
    }

    /// Add the current process environment. Variables already present win.
    pub fn merge_current_process(&mut self) {
        for (name, value) in std::env::vars_os() {
            let (Ok(name), Ok(value)) = (name.into_string(), value.into_string()) else {
                debug!("Skipping non-Unicode environment variable");
                continue;
            };
            let key = EnvKey(name);
            if !self.vars.contains_key(&key) {
                self.vars.insert(key, value);
            }
        }
    }

    /// `name=value\0...name=value\0\0` as UTF-16. An empty map still yields
    /// the double NUL terminator.
    pub fn to_environment_block(&self) -> Vec<u16> {
        let mut block = Vec::new();
        for (name, value) in self.iter() {
            block.extend(name.encode_utf16());
            block.push('=' as u16);
            block.extend(value.encode_utf16());
            block.push(0);
        }
        if block.is_empty() {
            block.push(0);
        }
        block.push(0);
        block
    }
}

fn validate_name(name: &str) -> Result<(), PtyError> {
    let body = name.strip_prefix('=').unwrap_or(name);
    if body.is_empty() || body.contains('=') || name.contains('\0') {
        return Err(PtyError::Environment(format!("invalid variable name {:?}", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_text(block: &[u16]) -> String {
        String::from_utf16(block).unwrap()
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let mut env = EnvironmentMap::new();
        env.insert("Path", "a").unwrap();
        env.insert("PATH", "b").unwrap();

        assert_eq!(env.len(), 1);
        assert_eq!(env.get("path"), Some("b"));
        assert_eq!(env.iter().next(), Some(("PATH", "b")));
    }

    #[test]
    fn test_block_is_sorted_and_double_terminated() {
        let mut env = EnvironmentMap::new();
        env.insert("zeta", "1").unwrap();
        env.insert("Alpha", "2").unwrap();
        env.insert("beta", "").unwrap();

        assert_eq!(block_text(&env.to_environment_block()), "Alpha=2\0beta=\0zeta=1\0\0");
    }

    #[test]
    fn test_empty_block() {
        assert_eq!(EnvironmentMap::new().to_environment_block(), vec![0, 0]);
    }

    #[test]
    fn test_merge_keeps_existing_values() {
        let mut env = EnvironmentMap::new();
        let (name, _) = std::env::vars().next().expect("test process has an environment");
        env.insert(&name.to_lowercase(), "override").unwrap();
        env.merge_current_process();

        assert_eq!(env.get(&name), Some("override"));
        assert!(env.len() >= 1);
    }

    #[test]
    fn test_assignment_parsing() {
        let mut env = EnvironmentMap::new();
        env.insert_assignment("TERM=xterm=256").unwrap();
        env.insert_assignment("=C:=C:\\work").unwrap();

        assert_eq!(env.get("term"), Some("xterm=256"));
        assert_eq!(env.get("=C:"), Some("C:\\work"));
        assert!(env.insert_assignment("NOVALUE").is_err());
        assert!(env.insert_assignment("=").is_err());
        assert!(env.insert("", "x").is_err());
    }
}
