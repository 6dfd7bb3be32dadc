pub mod instances;
pub mod node;
pub mod reconcile;
pub mod store;
