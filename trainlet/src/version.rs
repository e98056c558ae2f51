//! Version information for trainlet.

/// Trainlet version from Cargo.toml
pub const TRAINLET_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information for the runtime.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    /// Trainlet runtime version.
    pub trainlet: &'static str,
    /// Interpreter the session registry spawns (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            trainlet: TRAINLET_VERSION,
            interpreter: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpreter(mut self, interpreter: String) -> Self {
        self.interpreter = Some(interpreter);
        self
    }
}
