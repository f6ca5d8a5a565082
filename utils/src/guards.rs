use std::env;

/// Scoped changes to the process environment, undone in reverse order when dropped.
///
/// The environment is shared by the whole process, so tests using this should be serialized.
///
/// ```no_run
/// use utils::EnvOverrides;
///
/// let _env = EnvOverrides::new()
///     .set("B2_CLIENT_RETRY_MAX_ATTEMPTS", "2")
///     .remove("B2_LOG_DEST");
/// ```
#[derive(Default)]
#[must_use = "the environment is restored as soon as this is dropped"]
pub struct EnvOverrides {
    saved: Vec<(String, Option<String>)>,
}

impl EnvOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.save(key);
        #[allow(unused_unsafe)]
        unsafe {
            env::set_var(key, value)
        };
        self
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.save(key);
        #[allow(unused_unsafe)]
        unsafe {
            env::remove_var(key)
        };
        self
    }

    fn save(&mut self, key: &str) {
        self.saved.push((key.to_owned(), env::var(key).ok()));
    }
}

impl Drop for EnvOverrides {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..).rev() {
            #[allow(unused_unsafe)]
            unsafe {
                match previous {
                    Some(value) => env::set_var(&key, value),
                    None => env::remove_var(&key),
                }
            }
        }
    }
}
