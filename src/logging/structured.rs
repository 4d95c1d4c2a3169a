use tracing::{debug, error, info, trace, warn};

/// Context information for log messages
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g., "controller", "orchestrator", "estimator")
    pub component: String,
    /// Active charging policy, when the component is policy-aware
    pub policy: Option<String>,
}

impl LogContext {
    /// Create a new log context
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: &str) -> Self {
        self.policy = Some(policy.to_string());
        self
    }
}

/// Structured logger with context
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    pub(crate) context: LogContext,
}

impl StructuredLogger {
    /// Create a new structured logger with context
    pub fn new(context: LogContext) -> Self {
        Self { context }
    }

    /// Same logger, tagged with a different policy
    pub fn for_policy(&self, policy: &str) -> Self {
        Self::new(self.context.clone().with_policy(policy))
    }

    pub fn info(&self, message: &str) {
        let fields = self.format_fields();
        info!(%fields, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        let fields = self.format_fields();
        warn!(%fields, "{}", message);
    }

    pub fn error(&self, message: &str) {
        let fields = self.format_fields();
        error!(%fields, "{}", message);
    }

    pub fn debug(&self, message: &str) {
        let fields = self.format_fields();
        debug!(%fields, "{}", message);
    }

    pub fn trace(&self, message: &str) {
        let fields = self.format_fields();
        trace!(%fields, "{}", message);
    }

    pub(crate) fn format_fields(&self) -> String {
        let mut fields = vec![format!("component={}", self.context.component)];
        if let Some(ref policy) = self.context.policy {
            fields.push(format!("policy={}", policy));
        }
        fields.join(",")
    }
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context() {
        let context = LogContext::new("orchestrator").with_policy("ECO");

        assert_eq!(context.component, "orchestrator");
        assert_eq!(context.policy.as_deref(), Some("ECO"));
    }

    #[test]
    fn test_policy_tag_in_fields() {
        let logger = get_logger("orchestrator");
        assert_eq!(logger.format_fields(), "component=orchestrator");

        let tagged = logger.for_policy("HURRY");
        assert_eq!(tagged.format_fields(), "component=orchestrator,policy=HURRY");
        assert_eq!(tagged.context.component, "orchestrator");
    }

    #[test]
    fn test_get_logger() {
        let logger = get_logger("estimator");
        assert_eq!(logger.format_fields(), "component=estimator");
        // Must not panic without a subscriber installed
        logger.info("hello");
        logger.trace("hello");
    }
}
