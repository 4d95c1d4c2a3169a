use serde::Serialize;

/// Structured result of one orchestration cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub target_amps: u32,
    pub actions_taken: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl CommandOutcome {
    pub fn new(target_amps: u32) -> Self {
        Self {
            target_amps,
            ..Self::default()
        }
    }

    pub fn action(&mut self, message: impl Into<String>) {
        self.actions_taken.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Record an error and mark the cycle failed
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.errors.push(message.into());
        self
    }

    pub fn succeed(mut self, action: impl Into<String>) -> Self {
        self.success = true;
        self.actions_taken.push(action.into());
        self
    }
}
