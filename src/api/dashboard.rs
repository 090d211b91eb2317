//! View models of the signed-in area. Switching sections is local state and
//! makes no backend call beyond the guard's session check.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::auth::UserView;
use super::extract::CurrentSession;
use super::ApiError;
use crate::sections::{ProfileSection, Section, SectionSelector, SectionView, SidebarSection};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DashboardView<S> {
    pub user: UserView,
    pub active: S,
    pub sections: Vec<SectionView>,
}

fn view<S: Section>(
    current: &CurrentSession,
    slug: Option<&str>,
) -> Result<DashboardView<S>, ApiError> {
    let mut selector = SectionSelector::<S>::default();
    if let Some(slug) = slug {
        selector
            .select_slug(slug)
            .ok_or_else(|| ApiError::not_found(format!("Unknown section: {}", slug)))?;
    }
    Ok(DashboardView {
        user: UserView::from(&current.user),
        active: selector.active(),
        sections: selector.views(),
    })
}

/// `GET /dashboard/:section`
pub async fn section(
    current: CurrentSession,
    Path(section): Path<String>,
) -> Result<Json<DashboardView<SidebarSection>>, ApiError> {
    view(&current, Some(&section)).map(Json)
}

#[derive(Debug, Deserialize)]
pub struct TabQuery {
    tab: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub view: DashboardView<ProfileSection>,
    /// Row of the `profiles` table, missing while it is still pending
    pub profile: Option<Value>,
}

/// `GET /api/profile?tab=`
pub async fn profile(
    State(state): State<Arc<AppState>>,
    current: CurrentSession,
    Query(params): Query<TabQuery>,
) -> Result<Json<ProfileView>, ApiError> {
    let view = view::<ProfileSection>(&current, params.tab.as_deref())?;
    let profile = state.accounts.profile(&current.session).await?;
    Ok(Json(ProfileView { view, profile }))
}
