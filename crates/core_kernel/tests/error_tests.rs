//! Tests for core_kernel error types

use core_kernel::error::CoreError;
use core_kernel::lock::LockError;
use core_kernel::money::MoneyError;
use core_kernel::ports::{ConflictKind, PortError};

#[test]
fn test_core_error_validation() {
    let error = CoreError::validation("Invalid input");

    match error {
        CoreError::Validation(msg) => assert_eq!(msg, "Invalid input"),
        _ => panic!("Expected Validation error"),
    }
}

#[test]
fn test_core_error_from_money_error() {
    let error: CoreError = MoneyError::Overflow.into();
    assert!(matches!(error, CoreError::Money(MoneyError::Overflow)));
}

#[test]
fn test_core_error_from_lock_error() {
    let error: CoreError = LockError::Timeout { key: "customer:1".into(), waited_ms: 10 }.into();
    assert!(error.to_string().contains("customer:1"));
}

#[test]
fn test_lock_timeout_is_retriable() {
    assert!(LockError::Timeout { key: "k".into(), waited_ms: 1 }.is_retriable());
    assert!(!LockError::Backend("down".into()).is_retriable());
}

#[test]
fn test_port_conflict_kinds() {
    match PortError::stale_version("invoice changed") {
        PortError::Conflict { kind, .. } => assert_eq!(kind, ConflictKind::StaleVersion),
        _ => panic!("Expected Conflict error"),
    }
    match PortError::uniqueness("boundary taken") {
        PortError::Conflict { kind, .. } => assert_eq!(kind, ConflictKind::Uniqueness),
        _ => panic!("Expected Conflict error"),
    }
}
