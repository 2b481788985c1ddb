// ============================================================================
// Inventory - Race-safe stock accounting
// ============================================================================
//
// `Product.stock` is the one piece of shared mutable state in the order core.
// Every write to it goes through `InventoryLedger`, inside the transaction of
// the order or line-item change it serves.
//
// ============================================================================

mod ledger;

pub use ledger::InventoryLedger;
