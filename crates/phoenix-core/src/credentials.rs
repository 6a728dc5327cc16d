//! Registry tokens, the file-browser account, and the environment scrub guard.

use rand::distr::Alphanumeric;
use rand::Rng;
use std::fmt;

/// Env var holding the registry-repo (Hugging Face) token.
pub const HUGGINGFACE_TOKEN_ENV: &str = "HUGGINGFACE_TOKEN";
/// Env var holding the hosted-model (Civitai) token.
pub const CIVITAI_TOKEN_ENV: &str = "CIVITAI_TOKEN";

/// Length of auto-generated file-browser passwords.
pub const GENERATED_PASSWORD_LEN: usize = 16;

/// A string that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Tokens per remote source. Absence restricts access to public assets.
#[derive(Debug, Clone, Default)]
pub struct RegistryCredentials {
    pub huggingface: Option<Secret>,
    pub civitai: Option<Secret>,
}

/// Account provisioned into the file browser before launch.
#[derive(Debug, Clone)]
pub struct FileBrowserAccount {
    pub username: String,
    pub password: Secret,
    /// True when the password was generated because none was configured.
    pub generated: bool,
}

impl FileBrowserAccount {
    pub fn new(username: String, password: Option<String>) -> Self {
        match password.filter(|p| !p.is_empty()) {
            Some(p) => FileBrowserAccount {
                username,
                password: Secret::new(p),
                generated: false,
            },
            None => FileBrowserAccount {
                username,
                password: Secret::new(generate_password(GENERATED_PASSWORD_LEN)),
                generated: true,
            },
        }
    }
}

/// Random alphanumeric password.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// Removes registry tokens from the process environment when dropped.
///
/// Held for the duration of a download run so the scrub happens on every exit
/// path, including a timeout dropping the run future.
pub struct EnvScrubGuard {
    keys: &'static [&'static str],
}

impl EnvScrubGuard {
    pub fn new(keys: &'static [&'static str]) -> Self {
        EnvScrubGuard { keys }
    }

    pub fn registry_tokens() -> Self {
        Self::new(&[HUGGINGFACE_TOKEN_ENV, CIVITAI_TOKEN_ENV])
    }
}

impl Drop for EnvScrubGuard {
    fn drop(&mut self) {
        for key in self.keys {
            if std::env::var_os(key).is_some() {
                std::env::remove_var(key);
                tracing::debug!(key, "scrubbed credential from environment");
            }
        }
    }
}
