//! Environment variable access behind a seam.
//!
//! Config loading reads the process environment through [`Env`] so that
//! tests can inject values without mutating global process state.

use std::collections::HashMap;

/// Environment variable reader.
#[derive(Clone, Debug, Default)]
pub enum Env {
    /// Delegate to [`std::env::var`].
    #[default]
    Process,
    /// Read from a fixed map (tests).
    Fixed(HashMap<String, String>),
}

impl Env {
    /// The real process environment.
    pub fn real() -> Self {
        Env::Process
    }

    /// An environment backed by explicit key-value pairs.
    #[cfg(test)]
    pub fn mock(vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        Env::Fixed(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Look up a variable by name.
    pub fn var(&self, name: &str) -> Result<String, std::env::VarError> {
        match self {
            Env::Process => std::env::var(name),
            Env::Fixed(map) => map
                .get(name)
                .cloned()
                .ok_or(std::env::VarError::NotPresent),
        }
    }

    /// Whether the variable is present.
    pub fn is_set(&self, name: &str) -> bool {
        self.var(name).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_env_reads_cargo_manifest_dir() {
        assert!(Env::real().var("CARGO_MANIFEST_DIR").is_ok());
    }

    #[test]
    fn fixed_env_round_trips() {
        let env = Env::mock([("FOO", "bar")]);
        assert_eq!(env.var("FOO").unwrap(), "bar");
        assert!(env.var("MISSING").is_err());
        assert!(env.is_set("FOO"));
        assert!(!env.is_set("MISSING"));
    }
}
