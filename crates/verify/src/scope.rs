use std::env;
use std::ffi::OsString;

/// Scoped override of one process environment variable.
///
/// The prior state (a value, or absence) is captured on construction and
/// restored exactly on drop, so the override never outlives the scope even
/// when the body returns early, propagates an error or panics. Nested
/// guards restore in reverse order of creation.
#[derive(Debug)]
#[must_use = "the override is reverted as soon as the guard is dropped"]
pub struct EnvScope {
    name: String,
    prior: Option<OsString>,
}

impl EnvScope {
    pub fn set(name: impl Into<String>, value: impl AsRef<str>) -> Self {
        let name = name.into();
        let prior = env::var_os(&name);
        env::set_var(&name, value.as_ref());
        Self { name, prior }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for EnvScope {
    fn drop(&mut self) {
        match self.prior.take() {
            Some(value) => env::set_var(&self.name, value),
            None => env::remove_var(&self.name),
        }
    }
}

/// Run `body` with `name=value` in the environment.
pub fn with_scope<T>(name: &str, value: &str, body: impl FnOnce() -> T) -> T {
    let _scope = EnvScope::set(name, value);
    body()
}
