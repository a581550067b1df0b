//! Common utilities and types shared across Expensync modules.
//!
//! This module provides the expense data model and the error taxonomy used by
//! the storage and sync crates.

pub mod error;
pub mod time;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    Amount, Category, Description, Expense, ExpenseId, ExpensePatch, NewExpense, OwnerId,
    SyncStatus,
};
