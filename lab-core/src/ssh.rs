//! SSH session settings built from ordered options.
//!
//! An [`SshOption`] is a fallible modifier over [`SshSettings`]. Options are
//! applied strictly in order starting from `SshSettings::default()`; the
//! first failing option stops the chain and later options are never applied.
//!
//! Any closure with the right signature can be used, so callers are not
//! limited to the builtin options below.

use std::collections::BTreeMap;
use std::path::PathBuf;

use p2plab_types::LabError;

/// Settings used to open an SSH session to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshSettings {
    /// Remote login user.
    pub user: Option<String>,
    /// Remote port.
    pub port: Option<u16>,
    /// Private key file.
    pub identity_file: Option<PathBuf>,
    /// Extra `-o key=value` client options.
    pub options: BTreeMap<String, String>,
    /// Command to run instead of an interactive shell.
    pub command: Option<String>,
}

/// A fallible modifier applied to [`SshSettings`].
pub type SshOption = Box<dyn Fn(&mut SshSettings) -> Result<(), LabError> + Send + Sync>;

impl SshSettings {
    /// Apply options in order, stopping at the first failure.
    ///
    /// On failure `self` keeps the changes made by the options that ran
    /// before the failing one.
    pub fn apply(&mut self, opts: &[SshOption]) -> Result<(), LabError> {
        for opt in opts {
            opt(self)?;
        }
        Ok(())
    }

    /// Build settings from a zero value and a list of options.
    pub fn from_options(opts: &[SshOption]) -> Result<Self, LabError> {
        let mut settings = Self::default();
        settings.apply(opts)?;
        Ok(settings)
    }

    /// Render the settings as `ssh` command-line arguments targeting `host`.
    pub fn to_args(&self, host: &str) -> Vec<String> {
        let mut args = Vec::new();

        for (key, value) in &self.options {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }

        match &self.user {
            Some(user) => args.push(format!("{}@{}", user, host)),
            None => args.push(host.to_string()),
        }

        if let Some(command) = &self.command {
            args.push(command.clone());
        }

        args
    }
}

/// Log in as `user`.
pub fn with_user(user: impl Into<String>) -> SshOption {
    let user = user.into();
    Box::new(move |settings: &mut SshSettings| {
        if user.is_empty() || user.contains(char::is_whitespace) || user.contains('@') {
            return Err(LabError::validation("ssh user", format!("{:?}", user)));
        }
        settings.user = Some(user.clone());
        Ok(())
    })
}

/// Connect to `port` instead of the default.
pub fn with_port(port: u16) -> SshOption {
    Box::new(move |settings: &mut SshSettings| {
        if port == 0 {
            return Err(LabError::validation("ssh port", "port 0"));
        }
        settings.port = Some(port);
        Ok(())
    })
}

/// Authenticate with the private key at `path`.
pub fn with_identity_file(path: impl Into<PathBuf>) -> SshOption {
    let path = path.into();
    Box::new(move |settings: &mut SshSettings| {
        if path.as_os_str().is_empty() {
            return Err(LabError::validation("ssh identity file", "empty path"));
        }
        settings.identity_file = Some(path.clone());
        Ok(())
    })
}

/// Set an `ssh -o key=value` client option.
pub fn with_option(key: impl Into<String>, value: impl Into<String>) -> SshOption {
    let key = key.into();
    let value = value.into();
    Box::new(move |settings: &mut SshSettings| {
        if key.is_empty() || key.contains(|c: char| c == '=' || c.is_whitespace()) {
            return Err(LabError::validation("ssh option", format!("{:?}", key)));
        }
        settings.options.insert(key.clone(), value.clone());
        Ok(())
    })
}

/// Run `command` instead of opening an interactive shell.
pub fn with_command(command: impl Into<String>) -> SshOption {
    let command = command.into();
    Box::new(move |settings: &mut SshSettings| {
        if command.trim().is_empty() {
            return Err(LabError::validation("ssh command", "empty command"));
        }
        settings.command = Some(command.clone());
        Ok(())
    })
}
