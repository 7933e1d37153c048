// Order lifecycle
pub mod order_lines;
pub mod order_status;
pub mod orders;

// Money
pub mod deposits;
pub mod payments;
pub mod reconciliation;

// Collaborators and plumbing
pub mod catalog;
pub mod post_commit;
pub mod store;
