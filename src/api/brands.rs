//! Brand profiles, their contribution tiers and published updates.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::extract::{field, CurrentSession, FormInput, Visitor};
use super::submit::submit;
use super::ApiError;
use crate::backend::{self, tables};
use crate::brands::BrandContent;
use crate::forms::{schemas, FormSchema, FormValues};
use crate::sections::{BrandSection, SectionSelector, SectionView};
use crate::AppState;

fn amount(values: &FormValues) -> Result<f64, ApiError> {
    field(values, "amount")
        .parse::<f64>()
        .map_err(|_| ApiError::validation_field("amount", "Amount must be a number"))
}

/// Row id as text, whatever its JSON type
fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

async fn insert_row(
    state: &AppState,
    visitor: &Visitor,
    current: &CurrentSession,
    form: FormSchema,
    table: &str,
    values: &FormValues,
    row: impl FnOnce() -> Result<Value, ApiError>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let token = current.session.access_token.as_str();
    let inserted = submit(state, visitor, &form, values, async {
        let body = row()?;
        state
            .backend
            .insert(table, body, Some(token))
            .await
            .map_err(ApiError::from)
    })
    .await?;
    tracing::info!(table, user_id = %current.user.id, "Row created");
    Ok((StatusCode::CREATED, Json(inserted)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    current: CurrentSession,
) -> Result<Json<Vec<Value>>, ApiError> {
    let query = backend::Query::new()
        .eq("owner_id", current.user.id.clone())
        .order_by("created_at", false);
    let rows = state
        .backend
        .select(tables::BRANDS, &query, Some(&current.session.access_token))
        .await?;
    Ok(Json(rows))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    current: CurrentSession,
    FormInput(values): FormInput,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let response = insert_row(&state, &visitor, &current, schemas::brand(), tables::BRANDS, &values, || {
        Ok(json!({
            "owner_id": current.user.id,
            "name": field(&values, "name"),
            "slug": field(&values, "slug"),
            "description": field(&values, "description"),
        }))
    })
    .await?;
    state.toasts.success(visitor.id(), "Brand saved");
    Ok(response)
}

pub async fn list_tiers(
    State(state): State<Arc<AppState>>,
    current: CurrentSession,
    Path(brand): Path<String>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let rows = state
        .backend
        .select(tables::TIERS, &tiers_of(&brand), Some(&current.session.access_token))
        .await?;
    Ok(Json(rows))
}

pub async fn create_tier(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    current: CurrentSession,
    Path(brand): Path<String>,
    FormInput(values): FormInput,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let response = insert_row(&state, &visitor, &current, schemas::tier(), tables::TIERS, &values, || {
        Ok(json!({
            "brand_id": brand,
            "name": field(&values, "name"),
            "amount": amount(&values)?,
            "description": field(&values, "description"),
        }))
    })
    .await?;
    state.pages.invalidate_brand(&brand);
    state.toasts.success(visitor.id(), "Tier saved");
    Ok(response)
}

pub async fn list_updates(
    State(state): State<Arc<AppState>>,
    current: CurrentSession,
    Path(brand): Path<String>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let rows = state
        .backend
        .select(tables::UPDATES, &updates_of(&brand), Some(&current.session.access_token))
        .await?;
    Ok(Json(rows))
}

pub async fn create_update(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    current: CurrentSession,
    Path(brand): Path<String>,
    FormInput(values): FormInput,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let response = insert_row(&state, &visitor, &current, schemas::update(), tables::UPDATES, &values, || {
        Ok(json!({
            "brand_id": brand,
            "title": field(&values, "title"),
            "body": field(&values, "body"),
            "published_at": Utc::now().to_rfc3339(),
        }))
    })
    .await?;
    state.pages.invalidate_brand(&brand);
    state.toasts.success(visitor.id(), "Update published");
    Ok(response)
}

fn tiers_of(brand: &str) -> backend::Query {
    backend::Query::new()
        .eq("brand_id", brand)
        .order_by("amount", true)
}

fn updates_of(brand: &str) -> backend::Query {
    backend::Query::new()
        .eq("brand_id", brand)
        .order_by("published_at", false)
}

#[derive(Debug, Deserialize)]
pub struct TabQuery {
    tab: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BrandPage {
    pub brand: Value,
    pub active: BrandSection,
    pub tabs: Vec<SectionView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<Value>,
}

/// Brand row, tiers and every update, read with the anon key
async fn load_page(state: &AppState, slug: &str) -> Result<BrandContent, ApiError> {
    let brand = state
        .backend
        .select(tables::BRANDS, &backend::Query::new().eq("slug", slug).limit(1), None)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("Brand not found"))?;
    let brand_id = row_id(&brand).ok_or_else(|| ApiError::internal("Brand row has no id"))?;
    let tiers = state.backend.select(tables::TIERS, &tiers_of(&brand_id), None).await?;
    let updates = state.backend.select(tables::UPDATES, &updates_of(&brand_id), None).await?;
    Ok(BrandContent {
        brand_id,
        brand,
        tiers,
        updates,
    })
}

/// Public brand page. Tabs are projected from the cached page.
pub async fn page(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(params): Query<TabQuery>,
) -> Result<Json<BrandPage>, ApiError> {
    let mut selector = SectionSelector::<BrandSection>::default();
    if let Some(tab) = params.tab.as_deref() {
        selector
            .select_slug(tab)
            .ok_or_else(|| ApiError::not_found(format!("Unknown tab: {}", tab)))?;
    }

    let content = match state.pages.get(&slug) {
        Some(content) => content,
        None => {
            let content = load_page(&state, &slug).await?;
            state.pages.put(&slug, content)
        }
    };
    let (tiers, updates) = content.project(selector.active());

    Ok(Json(BrandPage {
        brand: content.brand.clone(),
        active: selector.active(),
        tabs: selector.views(),
        tiers,
        updates,
    }))
}
