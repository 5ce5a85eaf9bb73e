//! Tracing targets for the execution primitives.
//!
//! Nothing in this crate installs a subscriber. Applications pick their own,
//! for example `tracing_subscriber::fmt::init()`, and filter on these targets.

/// Target names for log filtering.
pub mod targets {
    /// Task runner lifecycle and task panics.
    pub const TASK_RUNNER: &str = "netchange_core::task_runner";
    /// Observer registration and fan-out.
    pub const OBSERVER: &str = "netchange_core::observer";
    /// One-shot timer scheduling.
    pub const TIMER: &str = "netchange_core::timer";
    /// Serial worker state transitions.
    pub const SERIAL_WORKER: &str = "netchange_core::serial_worker";
    /// Sequence affinity violations.
    pub const SEQUENCE: &str = "netchange_core::sequence";
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(payload.as_ref()), "<non-string panic payload>");
    }
}
