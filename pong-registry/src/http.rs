/**
 * API HTTP PONG REGISTRY - Transport axum du registre
 *
 * RÔLE :
 * Expose les opérations du Registry aux pongers (heartbeat, enregistrement)
 * et aux pingers (liste des cibles actives).
 *
 * ROUTES :
 * - GET  /                 → {"json_list": [...]} hosts actifs
 * - POST /servers/update   → heartbeat (form: is_active = "1" ou autre)
 * - POST /servers/create   → enregistrement (form: region, cluster, rack)
 * - GET  /servers/{host}   → détail d'un host
 * - GET  /health, /system/health
 *
 * CONTRAT :
 * Les échecs de /servers/... répondent 200 avec `"sucess": false` (clé
 * historique, orthographe conservée) : le ponger lit le corps, pas le status.
 * L'identité du ponger = IP de la connexion (ou X-Forwarded-For si configuré).
 */

use crate::health::{HealthTracker, RegistryHealth};
use crate::models::HostView;
use crate::registry::{Registration, RegistryError, SharedRegistry};
use axum::extract::rejection::FormRejection;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub health_tracker: HealthTracker,
    pub trust_forwarded_for: bool,
}

/// Réponse des routes /servers/*
#[derive(Debug, Serialize, PartialEq)]
pub struct Envelope {
    pub action: String,
    pub sucess: bool,
    #[serde(flatten)]
    pub host: Option<HostView>,
}

impl Envelope {
    fn ok(action: &str, view: HostView) -> Self {
        Self { action: action.into(), sucess: true, host: Some(view) }
    }

    fn failed(action: &str) -> Self {
        Self { action: action.into(), sucess: false, host: None }
    }
}

#[derive(Debug, Serialize)]
pub struct ActiveHosts {
    pub json_list: Vec<HostView>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(list_active))
        .route("/servers/update", post(update_server))
        .route("/servers/create", post(create_server))
        .route("/servers/{host}", get(get_server))
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .with_state(app_state)
}

/// Adresse du ponger : IP de la connexion, ou premier saut de X-Forwarded-For
fn caller_identity(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return addr.to_string();
        }
    }
    peer.ip().to_string()
}

fn log_failure(action: &str, host: &str, err: &RegistryError) {
    match err {
        RegistryError::StoreUnavailable(e) => {
            error!("[http] {}: could not record ponger {}: {}", action, host, e)
        }
        other => warn!("[http] {}: rejected ponger {}: {}", action, host, other),
    }
}

// GET / (cibles actives pour les pingers)
async fn list_active(State(app): State<AppState>) -> Result<Json<ActiveHosts>, StatusCode> {
    match app.registry.list_active_hosts().await {
        Ok(json_list) => Ok(Json(ActiveHosts { json_list })),
        Err(e) => {
            error!("[http] list: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

// POST /servers/update (keepalive / arrêt propre)
async fn update_server(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Json<Envelope> {
    let host = caller_identity(&headers, peer, app.trust_forwarded_for);
    info!("[http] update: ponger {} reporting status", host);

    let flag = match form {
        Ok(Form(fields)) => fields.get("is_active").cloned(),
        Err(e) => {
            debug!("[http] update: unreadable form from {}: {}", host, e);
            None
        }
    };
    let Some(flag) = flag else {
        warn!("[http] update: ponger {} sent no is_active field", host);
        return Json(Envelope::failed("update"));
    };

    match app.registry.report_heartbeat(&host, flag == "1").await {
        Ok(view) => Json(Envelope::ok("update", view)),
        Err(e) => {
            log_failure("update", &host, &e);
            Json(Envelope::failed("update"))
        }
    }
}

// POST /servers/create (enregistrement / rafraîchissement des métadonnées)
async fn create_server(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    form: Result<Form<Registration>, FormRejection>,
) -> Json<Envelope> {
    let host = caller_identity(&headers, peer, app.trust_forwarded_for);
    info!("[http] create: {} attempting to register", host);

    let registration = form.map(|Form(r)| r).unwrap_or_else(|e| {
        debug!("[http] create: unreadable form from {}: {}", host, e);
        Registration::default()
    });

    // la réponse de succès annonce "update", l'échec "create" : contrat historique
    match app.registry.register_or_update(&host, registration).await {
        Ok(view) => Json(Envelope::ok("update", view)),
        Err(e) => {
            log_failure("create", &host, &e);
            Json(Envelope::failed("create"))
        }
    }
}

// GET /servers/{host} (détail)
async fn get_server(
    State(app): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<HostView>, StatusCode> {
    match app.registry.get_host(&host).await {
        Ok(Some(view)) => Ok(Json(view)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("[http] get {}: {}", host, e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

// GET /system/health (état du registre et du sweeper)
async fn get_system_health(State(app): State<AppState>) -> Result<Json<RegistryHealth>, StatusCode> {
    match app.registry.counts().await {
        Ok(counts) => Ok(Json(app.health_tracker.get_health(counts))),
        Err(e) => {
            error!("[http] health: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
