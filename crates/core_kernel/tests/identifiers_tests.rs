//! Unit tests for strongly-typed identifiers

use core_kernel::{CustomerId, InvoiceId, InvoiceSubscriptionId, OrganizationId};
use uuid::Uuid;

#[test]
fn test_display_uses_prefix() {
    assert!(CustomerId::new().to_string().starts_with("CUS-"));
    assert!(InvoiceSubscriptionId::new().to_string().starts_with("INVS-"));
}

#[test]
fn test_parse_with_and_without_prefix() {
    let uuid = Uuid::new_v4();
    let with: InvoiceId = format!("INV-{uuid}").parse().unwrap();
    let without: InvoiceId = uuid.to_string().parse().unwrap();
    assert_eq!(with, without);
    assert_eq!(with.as_uuid(), &uuid);
}

#[test]
fn test_parse_rejects_garbage() {
    assert!("ORG-not-a-uuid".parse::<OrganizationId>().is_err());
}

#[test]
fn test_ids_are_unique() {
    assert_ne!(InvoiceId::new(), InvoiceId::new());
}

#[test]
fn test_serde_is_transparent() {
    let uuid = Uuid::new_v4();
    let id = CustomerId::from_uuid(uuid);
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{uuid}\""));
}
