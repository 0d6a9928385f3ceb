//! Framework model - provisioning recipe for one application stack

use serde::{Deserialize, Serialize};

/// Static recipe for one supported framework.
///
/// Command strings are opaque shell snippets executed inside the guest with
/// `bash -c`. They are loaded once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkSpec {
    /// Registry key, e.g. `python-flask`
    pub key: String,
    /// Human-readable name
    pub display_name: String,
    /// Port the application listens on inside the guest
    pub listen_port: u16,
    /// Installs the language runtime and system packages
    pub install_command: String,
    /// Builds/configures the fetched source
    pub setup_command: String,
    /// Long-running command wrapped by the service unit
    pub run_command: String,
    /// File that usually marks a project of this kind
    #[serde(default)]
    pub entry_file_hint: String,
    /// Repository used when a request does not name one
    #[serde(default)]
    pub default_source_repo: Option<String>,
}

impl FrameworkSpec {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>, listen_port: u16) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            listen_port,
            install_command: String::new(),
            setup_command: String::new(),
            run_command: String::new(),
            entry_file_hint: String::new(),
            default_source_repo: None,
        }
    }

    pub fn with_install(mut self, cmd: impl Into<String>) -> Self {
        self.install_command = cmd.into();
        self
    }

    pub fn with_setup(mut self, cmd: impl Into<String>) -> Self {
        self.setup_command = cmd.into();
        self
    }

    pub fn with_run(mut self, cmd: impl Into<String>) -> Self {
        self.run_command = cmd.into();
        self
    }

    pub fn with_entry_file(mut self, file: impl Into<String>) -> Self {
        self.entry_file_hint = file.into();
        self
    }

    pub fn with_default_repo(mut self, repo: impl Into<String>) -> Self {
        self.default_source_repo = Some(repo.into());
        self
    }
}
