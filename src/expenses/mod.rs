//! In-memory expense tracking.
//!
//! Ledgers live only in process memory and are lost on restart. The sign of
//! an amount is derived from its category when the entry is created and is
//! left alone afterwards: edits store whatever amount the user typed.

use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::session::{AuthEvent, AuthSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Category {
    Food,
    Housing,
    Entertainment,
    Income,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Food,
        Category::Housing,
        Category::Entertainment,
        Category::Income,
    ];

    pub const NAMES: &'static [&'static str] = &["Food", "Housing", "Entertainment", "Income"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "Food",
            Category::Housing => "Housing",
            Category::Entertainment => "Entertainment",
            Category::Income => "Income",
        }
    }

    /// Apply the category's sign to a magnitude
    pub fn signed(&self, amount: f64) -> f64 {
        match self {
            Category::Income => amount.abs(),
            _ => -amount.abs(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LedgerError::UnknownCategory(s.to_string()))
    }
}

/// Accepts any letter case, like the expense form does
impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}

/// A blank `?category=` means no filter
fn optional_category<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Category>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(name) if !name.trim().is_empty() => name.parse().map(Some).map_err(de::Error::custom),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum LedgerError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),
    #[error("Expense {0} not found")]
    NotFound(u64),
    #[error("Amount must be a finite number")]
    InvalidAmount,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expense {
    pub id: u64,
    pub date: NaiveDate,
    pub description: String,
    pub category: Category,
    /// Signed: income positive, spending negative (unless edited)
    pub amount: f64,
}

/// User input for a new entry; `amount` is a magnitude
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseDraft {
    pub date: NaiveDate,
    pub description: String,
    pub category: Category,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpenseFilter {
    #[serde(default, deserialize_with = "optional_category")]
    pub category: Option<Category>,
    /// Case-insensitive substring of the description
    #[serde(default)]
    pub search: Option<String>,
}

impl ExpenseFilter {
    fn accepts(&self, expense: &Expense) -> bool {
        let category_ok = self.category.map_or(true, |c| c == expense.category);
        let search_ok = self.search.as_deref().map_or(true, |needle| {
            expense
                .description
                .to_lowercase()
                .contains(&needle.trim().to_lowercase())
        });
        category_ok && search_ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub income: f64,
    pub expenses: f64,
    pub balance: f64,
    pub by_category: BTreeMap<Category, f64>,
    pub count: usize,
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Default)]
pub struct ExpenseLedger {
    entries: Vec<Expense>,
    next_id: u64,
}

impl ExpenseLedger {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Ledger pre-filled with the sample entries shown to new users
    pub fn with_samples() -> Self {
        let mut ledger = Self::new();
        let samples = [
            ((2024, 1, 1), "Salary", Category::Income, 3500.0),
            ((2024, 1, 2), "Rent", Category::Housing, 1200.0),
            ((2024, 1, 5), "Groceries", Category::Food, 150.75),
            ((2024, 1, 10), "Movie tickets", Category::Entertainment, 30.0),
        ];
        for ((y, m, d), description, category, amount) in samples {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                // Sample amounts are finite
                let _ = ledger.add(ExpenseDraft {
                    date,
                    description: description.to_string(),
                    category,
                    amount,
                });
            }
        }
        ledger
    }

    pub fn add(&mut self, draft: ExpenseDraft) -> Result<Expense, LedgerError> {
        if !draft.amount.is_finite() {
            return Err(LedgerError::InvalidAmount);
        }
        let expense = Expense {
            id: self.next_id.max(1),
            date: draft.date,
            description: draft.description.trim().to_string(),
            category: draft.category,
            amount: round_cents(draft.category.signed(draft.amount)),
        };
        self.next_id = expense.id + 1;
        self.entries.push(expense.clone());
        Ok(expense)
    }

    /// Store the amount exactly as given; the category sign is not re-applied
    pub fn update_amount(&mut self, id: u64, amount: f64) -> Result<Expense, LedgerError> {
        if !amount.is_finite() {
            return Err(LedgerError::InvalidAmount);
        }
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(LedgerError::NotFound(id))?;
        entry.amount = round_cents(amount);
        Ok(entry.clone())
    }

    pub fn remove(&mut self, id: u64) -> Result<Expense, LedgerError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(LedgerError::NotFound(id))?;
        Ok(self.entries.remove(index))
    }

    /// Entries matching the filter, newest date first
    pub fn list(&self, filter: &ExpenseFilter) -> Vec<Expense> {
        let mut entries: Vec<Expense> = self
            .entries
            .iter()
            .filter(|e| filter.accepts(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        entries
    }

    pub fn summary(&self, filter: &ExpenseFilter) -> LedgerSummary {
        let matching: Vec<&Expense> = self.entries.iter().filter(|e| filter.accepts(e)).collect();
        let income = matching
            .iter()
            .filter(|e| e.amount > 0.0)
            .fold(0.0, |acc, e| acc + e.amount);
        let expenses = matching
            .iter()
            .filter(|e| e.amount < 0.0)
            .fold(0.0, |acc, e| acc + e.amount.abs());
        let by_category = matching.iter().fold(BTreeMap::new(), |mut acc, e| {
            *acc.entry(e.category).or_insert(0.0) += e.amount;
            acc
        });
        LedgerSummary {
            income: round_cents(income),
            expenses: round_cents(expenses),
            balance: round_cents(income - expenses),
            by_category: by_category
                .into_iter()
                .map(|(c, total)| (c, round_cents(total)))
                .collect(),
            count: matching.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One ledger per browser session, created with sample data on first access
#[derive(Debug, Default)]
pub struct LedgerBook {
    ledgers: DashMap<String, Arc<RwLock<ExpenseLedger>>>,
}

impl LedgerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self, sid: &str) -> Arc<RwLock<ExpenseLedger>> {
        self.ledgers
            .entry(sid.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(ExpenseLedger::with_samples())))
            .clone()
    }

    pub fn discard(&self, sid: &str) -> bool {
        self.ledgers.remove(sid).is_some()
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.ledgers.contains_key(sid)
    }

    pub fn len(&self) -> usize {
        self.ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }
}

/// Drop the ledger of every browser session the store removes: sign-out,
/// replacement by a new sign-in, expiry and failed refreshes alike.
pub fn spawn_discard_task(book: Arc<LedgerBook>, mut events: AuthSubscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let AuthEvent::SignedOut { sid, .. } = event {
                if book.discard(&sid) {
                    tracing::debug!(remaining = book.len(), "Discarded expense ledger of ended session");
                }
            }
        }
    })
}
