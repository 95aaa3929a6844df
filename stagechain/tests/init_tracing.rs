//! Installs a global subscriber, so it runs in its own test binary.

use stagechain::observability::{init_tracing, LogFormat};

#[test]
fn test_second_init_fails() {
    init_tracing(LogFormat::Json, "warn").unwrap();
    assert!(init_tracing(LogFormat::Pretty, "debug").is_err());
}
