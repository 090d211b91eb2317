//! Expense tracker of the dashboard. Entries live in the browser session's
//! in-memory ledger and never reach the backend.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use std::sync::Arc;

use super::extract::{field, CurrentSession, FormInput, Visitor};
use super::submit::submit;
use super::error::ValidationErrorBuilder;
use super::ApiError;
use crate::expenses::{Category, Expense, ExpenseDraft, ExpenseFilter, LedgerError, LedgerSummary};
use crate::forms::{schemas, FormValues};
use crate::AppState;

pub async fn list(
    State(state): State<Arc<AppState>>,
    current: CurrentSession,
    Query(filter): Query<ExpenseFilter>,
) -> Json<Vec<Expense>> {
    let ledger = state.ledgers.ledger(&current.sid);
    let expenses = ledger.read().list(&filter);
    Json(expenses)
}

pub async fn summary(
    State(state): State<Arc<AppState>>,
    current: CurrentSession,
    Query(filter): Query<ExpenseFilter>,
) -> Json<LedgerSummary> {
    let ledger = state.ledgers.ledger(&current.sid);
    let summary = ledger.read().summary(&filter);
    Json(summary)
}

fn parse_amount(values: &FormValues) -> Result<f64, LedgerError> {
    field(values, "amount")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or(LedgerError::InvalidAmount)
}

/// Every unparseable field is reported at once.
fn draft(values: &FormValues) -> Result<ExpenseDraft, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    let date = NaiveDate::parse_from_str(field(values, "date"), "%Y-%m-%d");
    if date.is_err() {
        errors.add("date", "Date must be a date (YYYY-MM-DD)");
    }
    let category = field(values, "category").parse::<Category>();
    if let Err(e) = &category {
        errors.add("category", e.to_string());
    }
    let amount = parse_amount(values);
    if let Err(e) = &amount {
        errors.add("amount", e.to_string());
    }

    match (date, category, amount) {
        (Ok(date), Ok(category), Ok(amount)) => Ok(ExpenseDraft {
            date,
            description: field(values, "description").to_string(),
            category,
            amount,
        }),
        _ => Err(errors
            .build()
            .unwrap_or_else(|| ApiError::bad_request("Invalid expense"))),
    }
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    current: CurrentSession,
    FormInput(values): FormInput,
) -> Result<(StatusCode, Json<Expense>), ApiError> {
    let schema = schemas::expense();
    let ledger = state.ledgers.ledger(&current.sid);
    let expense = submit(&state, &visitor, &schema, &values, async {
        let entry = draft(&values)?;
        let expense = ledger.write().add(entry)?;
        Ok::<_, ApiError>(expense)
    })
    .await?;

    state.toasts.success(visitor.id(), "Expense added");
    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn update_amount(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    current: CurrentSession,
    Path(id): Path<u64>,
    FormInput(values): FormInput,
) -> Result<Json<Expense>, ApiError> {
    let schema = schemas::expense_amount();
    let ledger = state.ledgers.ledger(&current.sid);
    let expense = submit(&state, &visitor, &schema, &values, async {
        let amount = parse_amount(&values)?;
        let expense = ledger.write().update_amount(id, amount)?;
        Ok::<_, ApiError>(expense)
    })
    .await?;

    state.toasts.success(visitor.id(), "Expense updated");
    Ok(Json(expense))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    current: CurrentSession,
    Path(id): Path<u64>,
) -> Result<Json<Expense>, ApiError> {
    let ledger = state.ledgers.ledger(&current.sid);
    let removed = ledger.write().remove(id)?;
    state.toasts.info(visitor.id(), "Expense deleted");
    Ok(Json(removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ErrorCode;

    fn values(pairs: &[(&str, &str)]) -> FormValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_draft_reports_every_bad_field() {
        let err = draft(&values(&[
            ("date", "yesterday"),
            ("description", "Lunch"),
            ("category", "Snacks"),
            ("amount", "lots"),
        ]))
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.message(), "Validation failed for 3 fields");

        let err = draft(&values(&[
            ("date", "2024-03-01"),
            ("description", "Lunch"),
            ("category", "Food"),
            ("amount", "lots"),
        ]))
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), LedgerError::InvalidAmount.to_string());
    }

    #[test]
    fn test_draft_parses_valid_input() {
        let entry = draft(&values(&[
            ("date", "2024-03-01"),
            ("description", " Lunch "),
            ("category", "food"),
            ("amount", "12.50"),
        ]))
        .unwrap();
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(entry.description, "Lunch");
        assert_eq!(entry.category, Category::Food);
        assert_eq!(entry.amount, 12.5);
    }
}
