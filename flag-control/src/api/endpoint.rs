use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;

use crate::{
    api::{
        auth::FlagOperation,
        errors::FlagError,
        types::{parse_update_body, validate_create_body, FlagListResponse},
    },
    flags::{
        flag_key::validate_flag_name,
        flag_service::{FlagSnapshot, FlagStatus},
    },
    router,
};

async fn authorize_read(
    state: &router::State,
    operation: FlagOperation,
    headers: &HeaderMap,
) -> Result<(), FlagError> {
    if !state.public_reads {
        state.admin_pipeline.run(operation, headers).await?;
    }
    Ok(())
}

pub async fn feature_status(
    State(state): State<router::State>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FlagStatus>, FlagError> {
    authorize_read(&state, FlagOperation::Read, &headers).await?;
    validate_flag_name(&name)?;

    Ok(Json(state.flags.read(&name).await))
}

pub async fn list_features(
    State(state): State<router::State>,
    headers: HeaderMap,
) -> Result<Json<FlagListResponse>, FlagError> {
    authorize_read(&state, FlagOperation::List, &headers).await?;

    Ok(Json(state.flags.list_all().await.into()))
}

pub async fn create_feature(
    State(state): State<router::State>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<FlagSnapshot>), FlagError> {
    let admin = state
        .admin_pipeline
        .run(FlagOperation::Create, &headers)
        .await?;
    validate_flag_name(&name)?;
    validate_create_body(&body)?;

    let created = state.flags.create(&name, &admin).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_feature(
    State(state): State<router::State>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<FlagSnapshot>, FlagError> {
    let admin = state
        .admin_pipeline
        .run(FlagOperation::Update, &headers)
        .await?;
    validate_flag_name(&name)?;
    let enabled = parse_update_body(&body)?;

    Ok(Json(state.flags.update(&name, enabled, &admin).await?))
}

pub async fn delete_feature(
    State(state): State<router::State>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FlagSnapshot>, FlagError> {
    let admin = state
        .admin_pipeline
        .run(FlagOperation::Delete, &headers)
        .await?;
    validate_flag_name(&name)?;

    Ok(Json(state.flags.delete(&name, &admin).await?))
}

pub async fn restore_feature(
    State(state): State<router::State>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FlagSnapshot>, FlagError> {
    let admin = state
        .admin_pipeline
        .run(FlagOperation::Restore, &headers)
        .await?;
    validate_flag_name(&name)?;

    Ok(Json(state.flags.restore(&name, &admin).await?))
}
