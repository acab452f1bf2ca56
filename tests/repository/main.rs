//! Repository integration tests
//!
//! End-to-end behavior through the `Repository` facade: transactions,
//! versioning, deletion and the concrete scenarios the engine guarantees.


mod deletion;
mod scenarios;
mod transactions;
mod versioning;
