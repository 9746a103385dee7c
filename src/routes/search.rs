use axum::{
    extract::{Query, State},
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{brief_scope, BriefScope, Caller};
use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::routes::brands::visible_brand_ids;
use crate::schema::{brands, briefs, tasks, users};
use crate::state::AppState;

const PER_CATEGORY: i64 = 20;

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Serialize)]
pub struct BriefHit {
    pub id: Uuid,
    pub title: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct TaskHit {
    pub id: Uuid,
    pub brief_id: Uuid,
    pub title: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct BrandHit {
    pub id: Uuid,
    pub name: String,
}

#[derive(Serialize)]
pub struct UserHit {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Serialize, Default)]
pub struct SearchResponse {
    pub briefs: Vec<BriefHit>,
    pub tasks: Vec<TaskHit>,
    pub brands: Vec<BrandHit>,
    pub users: Vec<UserHit>,
}

/// `ILIKE` pattern matching `term` as a literal substring.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<SearchResponse>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;

    let term = query.q.trim();
    if term.is_empty() {
        return Ok(Json(SearchResponse::default()));
    }
    let pattern = like_pattern(term);

    let scope = brief_scope(&mut conn, &caller)?;
    let (brief_rows, task_rows) = match &scope {
        BriefScope::Only(ids) if ids.is_empty() => (Vec::new(), Vec::new()),
        _ => {
            let mut brief_query = briefs::table
                .filter(briefs::title.ilike(&pattern))
                .into_boxed();
            let mut task_query = tasks::table
                .filter(tasks::title.ilike(&pattern))
                .into_boxed();
            if let Some(ids) = scope.ids() {
                brief_query = brief_query.filter(briefs::id.eq_any(ids.clone()));
                task_query = task_query.filter(tasks::brief_id.eq_any(ids));
            }
            let brief_rows: Vec<(Uuid, String, String)> = brief_query
                .order(briefs::global_priority.asc())
                .select((briefs::id, briefs::title, briefs::status))
                .limit(PER_CATEGORY)
                .load(&mut conn)?;
            let task_rows: Vec<(Uuid, Uuid, String, String)> = task_query
                .order(tasks::created_at.desc())
                .select((tasks::id, tasks::brief_id, tasks::title, tasks::status))
                .limit(PER_CATEGORY)
                .load(&mut conn)?;
            (brief_rows, task_rows)
        }
    };

    let brand_rows: Vec<(Uuid, String)> = match visible_brand_ids(&mut conn, &caller)? {
        Some(ids) if ids.is_empty() => Vec::new(),
        visible => {
            let mut brand_query = brands::table
                .filter(brands::name.ilike(&pattern))
                .into_boxed();
            if let Some(ids) = visible {
                brand_query = brand_query.filter(brands::id.eq_any(ids.into_iter().collect::<Vec<_>>()));
            }
            brand_query
                .order(brands::name.asc())
                .select((brands::id, brands::name))
                .limit(PER_CATEGORY)
                .load(&mut conn)?
        }
    };

    let user_rows: Vec<(Uuid, String, String)> = users::table
        .filter(users::name.ilike(&pattern).or(users::email.ilike(&pattern)))
        .order(users::name.asc())
        .select((users::id, users::name, users::email))
        .limit(PER_CATEGORY)
        .load(&mut conn)?;

    Ok(Json(SearchResponse {
        briefs: brief_rows
            .into_iter()
            .map(|(id, title, status)| BriefHit { id, title, status })
            .collect(),
        tasks: task_rows
            .into_iter()
            .map(|(id, brief_id, title, status)| TaskHit {
                id,
                brief_id,
                title,
                status,
            })
            .collect(),
        brands: brand_rows
            .into_iter()
            .map(|(id, name)| BrandHit { id, name })
            .collect(),
        users: user_rows
            .into_iter()
            .map(|(id, name, email)| UserHit { id, name, email })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn wildcards_in_the_term_are_literal() {
        assert_eq!(like_pattern("launch"), "%launch%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
