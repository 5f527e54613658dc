//! Process-wide convenience entry points.
//!
//! Callers that cannot thread an `Arc<Sieve>` through their code install one
//! here once and log through the free functions. Logging never panics and
//! never returns an error to the caller; failures are counted and traced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use sieve_common::{MessageType, Result};
use sieve_config::SieveConfig;
use tracing::debug;

use crate::logging::event_names;
use crate::system::Sieve;

static GLOBAL: OnceLock<Arc<Sieve>> = OnceLock::new();
static FAILED: AtomicU64 = AtomicU64::new(0);
static UNINSTALLED: AtomicU64 = AtomicU64::new(0);

/// Install `sieve` as the process-wide instance. Returns false if one was
/// already installed; the existing instance stays.
pub fn install(sieve: Arc<Sieve>) -> bool {
    GLOBAL.set(sieve).is_ok()
}

pub fn global() -> Option<&'static Arc<Sieve>> {
    GLOBAL.get()
}

/// Build and install an instance from `config`, or reconfigure the
/// installed one.
pub fn configure(config: SieveConfig) -> Result<Arc<Sieve>> {
    if let Some(existing) = GLOBAL.get() {
        existing.reconfigure(config, None)?;
        return Ok(Arc::clone(existing));
    }
    let sieve = Arc::new(Sieve::builder(config).build()?);
    // Lost a race with another installer: use theirs.
    Ok(Arc::clone(GLOBAL.get_or_init(|| sieve)))
}

/// Messages the facade could not route, by reason.
pub fn dropped_counts() -> (u64, u64) {
    (
        FAILED.load(Ordering::Relaxed),
        UNINSTALLED.load(Ordering::Relaxed),
    )
}

pub fn log(
    message_type: MessageType,
    application: &str,
    component: &str,
    function: &str,
    message: &str,
) {
    let Some(sieve) = GLOBAL.get() else {
        UNINSTALLED.fetch_add(1, Ordering::Relaxed);
        return;
    };
    if let Err(e) = sieve.log(message_type, application, component, function, message) {
        FAILED.fetch_add(1, Ordering::Relaxed);
        debug!(target: event_names::QUEUE_FULL, error = %e, "facade submit failed");
    }
}

/// Like [`log`], with the call site attached.
pub fn log_enhanced(
    message_type: MessageType,
    application: &str,
    component: &str,
    function: &str,
    message: &str,
    file: &str,
    line: u32,
) {
    let Some(sieve) = GLOBAL.get() else {
        UNINSTALLED.fetch_add(1, Ordering::Relaxed);
        return;
    };
    let msg = sieve
        .message(message_type, application, component, function, message)
        .location(file, line)
        .build();
    if let Err(e) = sieve.submit(msg) {
        FAILED.fetch_add(1, Ordering::Relaxed);
        debug!(target: event_names::QUEUE_FULL, error = %e, "facade submit failed");
    }
}

pub fn trace(application: &str, message: &str) {
    log(MessageType::Trace, application, "", "", message);
}

pub fn debug(application: &str, message: &str) {
    log(MessageType::Debug, application, "", "", message);
}

pub fn info(application: &str, message: &str) {
    log(MessageType::Info, application, "", "", message);
}

pub fn warn(application: &str, message: &str) {
    log(MessageType::Warn, application, "", "", message);
}

pub fn error(application: &str, message: &str) {
    log(MessageType::Error, application, "", "", message);
}

pub fn critical(application: &str, message: &str) {
    log(MessageType::Critical, application, "", "", message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_common::QueueKey;

    // One test owns the global; OnceLock cannot be reset between tests.
    #[test]
    fn facade_routes_through_installed_instance() {
        warn("early", "before install");
        assert!(dropped_counts().1 >= 1);

        let sieve = configure(SieveConfig::default()).unwrap();
        assert!(!install(Arc::clone(&sieve)));
        assert!(global().is_some());

        error("billing", "ledger mismatch");
        log_enhanced(
            MessageType::Critical,
            "billing",
            "Ledger",
            "post",
            "double post",
            "ledger.rs",
            42,
        );
        let queue = sieve
            .queues()
            .get(&QueueKey::default_for("billing"))
            .unwrap();
        assert_eq!(queue.size(), 2);
        let top = queue.peek_top(1);
        assert_eq!(top[0].message.origin().location.as_ref().map(|l| l.line), Some(42));

        let mut next = SieveConfig::default();
        next.queue.max_entries = 500;
        configure(next).unwrap();
        assert_eq!(sieve.config().queue.max_entries, 500);
    }
}
