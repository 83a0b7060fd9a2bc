//! Generic collection handlers.
//!
//! Every JSON collection in the service has the same five operations. What
//! differs per entity (storage, validation, the access policy, who owns a
//! row) lives in a [`Resource`] implementation; the handlers below only
//! sequence the steps: authorize, validate, touch the store, serialize.

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{MethodRouter, delete, get, post, put},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::api::{self, Page, PageRequest, Payload, QueryParams};
use crate::auth::{Action, Identity, Policy, Principal, authorize, require_rule};
use crate::db::Database;
use crate::error::{AppError, FieldErrors};
use crate::handler::AppState;
use crate::query::{Clauses, QuerySpec};

#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// The stored row as it is serialized in lists and write responses.
    type Record: Serialize + Send + Sync + 'static;
    /// The detail representation; may embed related rows.
    type Detail: Serialize + Send + 'static;
    /// Full body accepted by create and PUT.
    type Input: DeserializeOwned + Send + Sync + 'static;
    /// Body accepted by PATCH; every field optional.
    type Patch: DeserializeOwned + Send + 'static;

    /// Used in not-found messages and logs.
    const NAME: &'static str;
    const POLICY: Policy;
    const QUERY: QuerySpec;
    const PAGINATED: bool = false;

    /// Narrows the collection for this viewer before request filters apply.
    fn scope(_clauses: &mut Clauses, _viewer: Option<&Principal>) {}

    /// Rows this viewer may not see are reported as missing.
    fn visible(_record: &Self::Record, _viewer: Option<&Principal>) -> bool {
        true
    }

    /// The recorded author, for resources with ownership rules.
    fn owner(_record: &Self::Record) -> Option<i64> {
        None
    }

    fn validate(input: &Self::Input) -> FieldErrors;

    /// Overlays a partial update onto the stored row.
    fn merge(existing: &Self::Record, patch: Self::Patch) -> Self::Input;

    async fn list(db: &Database, clauses: &Clauses, page: Option<PageRequest>) -> anyhow::Result<Vec<Self::Record>>;

    async fn count(db: &Database, clauses: &Clauses) -> anyhow::Result<u64>;

    async fn fetch(db: &Database, id: i64) -> anyhow::Result<Option<Self::Record>>;

    async fn expand(db: &Database, record: Self::Record) -> anyhow::Result<Self::Detail>;

    /// Rows that are only ever created under a parent keep this default and
    /// leave `create` unrouted.
    async fn insert(_db: &Database, _input: Self::Input, _author: Option<&Principal>) -> anyhow::Result<Self::Record> {
        Err(AppError::BadRequest(format!("a {} cannot be created on its own", Self::NAME)).into())
    }

    async fn update(db: &Database, id: i64, input: Self::Input) -> anyhow::Result<Self::Record>;

    async fn remove(db: &Database, id: i64) -> anyhow::Result<bool>;
}

pub async fn load<R: Resource>(db: &Database, id: i64, viewer: Option<&Principal>) -> Result<R::Record, AppError> {
    match R::fetch(db, id).await? {
        Some(record) if R::visible(&record, viewer) => Ok(record),
        _ => Err(AppError::not_found(format!("{} {} not found", R::NAME, id))),
    }
}

pub async fn list<R: Resource>(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Query(params): Query<QueryParams>,
) -> Result<Response, AppError> {
    authorize(viewer.as_ref(), R::POLICY.view, None).into_result()?;

    let mut clauses = R::QUERY.build(&params).map_err(AppError::Validation)?;
    R::scope(&mut clauses, viewer.as_ref());
    render_list::<R>(&state, &params, &clauses).await
}

/// Runs an already-built listing, paginating when the resource asks for it.
pub async fn render_list<R: Resource>(
    state: &AppState,
    params: &QueryParams,
    clauses: &Clauses,
) -> Result<Response, AppError> {
    if !R::PAGINATED {
        let records = R::list(&state.db, clauses, None).await?;
        return Ok(api::ok(records));
    }

    let page = PageRequest::from_params(params, state.page_size)?;
    let count = R::count(&state.db, clauses).await?;
    page.check_in_range(count)?;
    let records = R::list(&state.db, clauses, Some(page)).await?;
    Ok(api::ok(Page::new(page, count, records)))
}

pub async fn detail<R: Resource>(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Path(id): Path<i64>,
) -> Result<Json<R::Detail>, AppError> {
    let record = load::<R>(&state.db, id, viewer.as_ref()).await?;
    authorize(viewer.as_ref(), R::POLICY.view, R::owner(&record)).into_result()?;
    Ok(Json(R::expand(&state.db, record).await?))
}

pub async fn create<R: Resource>(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Payload(input): Payload<R::Input>,
) -> Result<Response, AppError> {
    authorize(viewer.as_ref(), R::POLICY.create, None).into_result()?;
    R::validate(&input).into_result()?;

    let record = R::insert(&state.db, input, viewer.as_ref()).await?;
    tracing::info!(resource = R::NAME, user_id = ?viewer.as_ref().map(Principal::id), "created");
    Ok(api::created(record))
}

async fn apply_update<R: Resource>(
    state: &AppState,
    viewer: Option<&Principal>,
    id: i64,
    existing: R::Record,
    input: R::Input,
) -> Result<Json<R::Record>, AppError> {
    authorize(viewer, R::POLICY.update, R::owner(&existing)).into_result()?;
    R::validate(&input).into_result()?;

    let record = R::update(&state.db, id, input).await?;
    tracing::info!(resource = R::NAME, id, "updated");
    Ok(Json(record))
}

pub async fn update<R: Resource>(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Path(id): Path<i64>,
    Payload(input): Payload<R::Input>,
) -> Result<Json<R::Record>, AppError> {
    let existing = load::<R>(&state.db, id, viewer.as_ref()).await?;
    apply_update::<R>(&state, viewer.as_ref(), id, existing, input).await
}

pub async fn partial_update<R: Resource>(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Path(id): Path<i64>,
    Payload(patch): Payload<R::Patch>,
) -> Result<Json<R::Record>, AppError> {
    let existing = load::<R>(&state.db, id, viewer.as_ref()).await?;
    let input = R::merge(&existing, patch);
    apply_update::<R>(&state, viewer.as_ref(), id, existing, input).await
}

pub async fn destroy<R: Resource>(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let existing = load::<R>(&state.db, id, viewer.as_ref()).await?;
    authorize(viewer.as_ref(), R::POLICY.delete, R::owner(&existing)).into_result()?;

    if !R::remove(&state.db, id).await? {
        return Err(AppError::not_found(format!("{} {} not found", R::NAME, id)));
    }
    tracing::info!(resource = R::NAME, id, "deleted");
    Ok(api::no_content())
}

/// Where each operation is mounted; `None` leaves it out.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrudPaths {
    pub list: Option<&'static str>,
    pub detail: Option<&'static str>,
    pub create: Option<&'static str>,
    pub update: Option<&'static str>,
    pub delete: Option<&'static str>,
}

/// Runs the policy rule for `action` ahead of body extraction, so an
/// anonymous write is refused before its payload is even parsed.
fn guarded<R: Resource>(action: Action, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    let rule = R::POLICY.rule(action);
    route.route_layer(middleware::from_fn(move |request: Request, next: Next| {
        require_rule(rule, request, next)
    }))
}

pub fn routes<R: Resource>(paths: CrudPaths) -> Router<AppState> {
    let mut router = Router::new();
    if let Some(path) = paths.list {
        router = router.route(path, guarded::<R>(Action::View, get(list::<R>)));
    }
    if let Some(path) = paths.detail {
        router = router.route(path, get(detail::<R>));
    }
    if let Some(path) = paths.create {
        router = router.route(path, guarded::<R>(Action::Create, post(create::<R>)));
    }
    if let Some(path) = paths.update {
        router = router.route(
            path,
            guarded::<R>(Action::Update, put(update::<R>).patch(partial_update::<R>)),
        );
    }
    if let Some(path) = paths.delete {
        router = router.route(path, guarded::<R>(Action::Delete, delete(destroy::<R>)));
    }
    router
}
