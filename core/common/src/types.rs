//! Common types used throughout Expensync.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::time;

/// Stable, opaque identifier of an expense record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseId(String);

impl ExpenseId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an identifier received from a client or the store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the user owning a set of expenses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    /// Create a new OwnerId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "OwnerId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OwnerId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(id: OwnerId) -> Self {
        id.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-negative monetary amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Create an amount.
    ///
    /// # Errors
    /// - Returns error if the value is negative
    pub fn new(value: Decimal) -> crate::Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(crate::Error::InvalidInput(format!(
                "Amount must be non-negative, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Get the decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = crate::Error;

    fn try_from(value: Decimal) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trimmed, non-empty expense description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Description(String);

impl Description {
    /// Create a description, trimming surrounding whitespace.
    ///
    /// # Errors
    /// - Returns error if nothing is left after trimming
    pub fn new(text: impl AsRef<str>) -> crate::Result<Self> {
        let trimmed = text.as_ref().trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Description is required".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Description {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<Description> for String {
    fn from(description: Description) -> Self {
        description.0
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Expense category. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Food,
    Transport,
    Entertainment,
    Bills,
    Shopping,
    Other,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Category; 6] = [
        Category::Food,
        Category::Transport,
        Category::Entertainment,
        Category::Bills,
        Category::Shopping,
        Category::Other,
    ];

    /// Canonical name, as used on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "Food",
            Category::Transport => "Transport",
            Category::Entertainment => "Entertainment",
            Category::Bills => "Bills",
            Category::Shopping => "Shopping",
            Category::Other => "Other",
        }
    }
}

impl FromStr for Category {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Invalid category: {}", s)))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Record matches the server copy.
    #[default]
    Synced,
    /// Local changes not yet acknowledged by the server.
    Pending,
    /// Server rejected the last change as stale.
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Conflict => "conflict",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "pending" => Ok(SyncStatus::Pending),
            "conflict" => Ok(SyncStatus::Conflict),
            other => Err(crate::Error::InvalidInput(format!(
                "Invalid sync status: {}",
                other
            ))),
        }
    }
}

/// A persisted expense record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: ExpenseId,
    #[serde(rename = "userId")]
    pub owner_id: OwnerId,
    pub amount: Amount,
    pub description: Description,
    pub category: Category,
    /// When the expense occurred.
    pub date: DateTime<Utc>,
    /// Last write accepted by the server. Used as the conflict baseline.
    pub last_modified: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
}

impl Expense {
    /// Build a freshly created record.
    ///
    /// # Postconditions
    /// - `last_modified` and `created_at` equal `modified_at`
    /// - Sync status is `synced`
    pub fn from_new(
        id: ExpenseId,
        owner_id: OwnerId,
        new: NewExpense,
        modified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            amount: new.amount,
            description: new.description,
            category: new.category,
            date: new.date.map(time::truncate_to_millis).unwrap_or(modified_at),
            last_modified: modified_at,
            sync_status: SyncStatus::Synced,
            created_at: modified_at,
        }
    }
}

/// Payload of a create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExpense {
    pub amount: Amount,
    pub description: Description,
    pub category: Category,
    /// Defaults to the time of creation when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

/// Partial update of an expense.
///
/// `last_modified` is the client's baseline: the server value the client
/// believed was current when it made the edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpensePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Description>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
}

impl ExpensePatch {
    /// An empty patch against the given baseline.
    pub fn new(baseline: DateTime<Utc>) -> Self {
        Self {
            amount: None,
            description: None,
            category: None,
            date: None,
            last_modified: baseline,
        }
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_description(mut self, description: Description) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Merge the present fields into `expense` and stamp it as synced.
    ///
    /// The baseline is not copied; `modified_at` becomes the new
    /// last-modified value.
    pub fn apply_to(&self, expense: &mut Expense, modified_at: DateTime<Utc>) {
        if let Some(amount) = self.amount {
            expense.amount = amount;
        }
        if let Some(description) = &self.description {
            expense.description = description.clone();
        }
        if let Some(category) = self.category {
            expense.category = category;
        }
        if let Some(date) = self.date {
            expense.date = time::truncate_to_millis(date);
        }
        expense.last_modified = modified_at;
        expense.sync_status = SyncStatus::Synced;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_expense() -> Expense {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        Expense {
            id: ExpenseId::new("r1"),
            owner_id: OwnerId::new("u1").unwrap(),
            amount: Amount::new(Decimal::new(1250, 2)).unwrap(),
            description: Description::new("Lunch").unwrap(),
            category: Category::Food,
            date: t0,
            last_modified: t0,
            sync_status: SyncStatus::Synced,
            created_at: t0,
        }
    }

    #[test]
    fn test_owner_id_empty_fails() {
        assert!(OwnerId::new("").is_err());
        assert!(OwnerId::new("   ").is_err());
        assert_eq!(OwnerId::new("u1").unwrap().as_str(), "u1");
    }

    #[test]
    fn test_amount_rejects_negative() {
        assert!(Amount::new(Decimal::new(-1, 0)).is_err());
        assert!(Amount::new(Decimal::ZERO).is_ok());
        assert!(serde_json::from_str::<Amount>("-3.5").is_err());
        assert_eq!(
            serde_json::from_str::<Amount>("50").unwrap().value(),
            Decimal::from(50)
        );
    }

    #[test]
    fn test_description_trimmed() {
        let d = Description::new("  Coffee  ").unwrap();
        assert_eq!(d.as_str(), "Coffee");
        assert!(Description::new(" \t ").is_err());
    }

    #[test]
    fn test_category_closed_set() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("Groceries".parse::<Category>().is_err());
        assert!(serde_json::from_str::<Category>("\"Travel\"").is_err());
    }

    #[test]
    fn test_sync_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::Conflict).unwrap(),
            "\"conflict\""
        );
        assert_eq!("pending".parse::<SyncStatus>().unwrap(), SyncStatus::Pending);
    }

    #[test]
    fn test_expense_wire_shape() {
        let json = serde_json::to_value(sample_expense()).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["category"], "Food");
        assert_eq!(json["syncStatus"], "synced");
        assert!(json.get("lastModified").is_some());
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_patch_requires_baseline() {
        let err = serde_json::from_str::<ExpensePatch>(r#"{"amount": 5}"#);
        assert!(err.is_err());

        let patch: ExpensePatch =
            serde_json::from_str(r#"{"amount": 5, "lastModified": "2024-01-15T12:00:00Z"}"#)
                .unwrap();
        assert_eq!(patch.amount.unwrap().value(), Decimal::from(5));
        assert!(patch.category.is_none());
    }

    #[test]
    fn test_patch_apply_merges_present_fields() {
        let mut expense = sample_expense();
        let later = expense.last_modified + chrono::TimeDelta::seconds(10);
        let patch = ExpensePatch::new(expense.last_modified)
            .with_amount(Amount::new(Decimal::from(50)).unwrap())
            .with_category(Category::Bills);

        patch.apply_to(&mut expense, later);

        assert_eq!(expense.amount.value(), Decimal::from(50));
        assert_eq!(expense.category, Category::Bills);
        assert_eq!(expense.description.as_str(), "Lunch");
        assert_eq!(expense.last_modified, later);
    }

    #[test]
    fn test_from_new_defaults_date() {
        let now = time::now();
        let new = NewExpense {
            amount: Amount::new(Decimal::from(10)).unwrap(),
            description: Description::new("Bus").unwrap(),
            category: Category::Transport,
            date: None,
        };
        let expense = Expense::from_new(ExpenseId::generate(), OwnerId::new("u1").unwrap(), new, now);
        assert_eq!(expense.date, now);
        assert_eq!(expense.last_modified, now);
        assert_eq!(expense.sync_status, SyncStatus::Synced);
    }
}
