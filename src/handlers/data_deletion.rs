//! `POST /api/data-deletion` — provider-initiated erasure callback.

use axum::{
    extract::{Form, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::signed_request;

#[derive(Debug, Deserialize)]
pub struct DataDeletionForm {
    signed_request: String,
}

#[derive(Debug, Serialize)]
struct DataDeletionResponse {
    url: String,
    confirmation_code: String,
}

pub async fn data_deletion(State(state): State<AppState>, Form(form): Form<DataDeletionForm>) -> Response {
    match data_deletion_inner(state, form).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn data_deletion_inner(state: AppState, form: DataDeletionForm) -> AppResult<DataDeletionResponse> {
    let verified = signed_request::verify(&form.signed_request, &state.config.app_secret)?;

    // The signed request carries only a participant id; purge it across
    // every tenant that has interacted with them, since the provider does
    // not tell us which tenant's asset the participant messaged.
    let tenant_ids = state.store.list_tenant_ids_for_participant(&verified.participant_id).await?;
    for tenant_id in tenant_ids {
        state.store.purge_participant_data(tenant_id, &verified.participant_id).await?;
    }

    let mut rng = rand::thread_rng();
    let confirmation_code = signed_request::generate_confirmation_code(&mut rng);
    let url = signed_request::status_url(&state.config.public_site_url, &confirmation_code);

    Ok(DataDeletionResponse { url, confirmation_code })
}
