// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Blob server
//!
//! Minimal self-hostable store for one encrypted snapshot and one salt.
//! The server never sees plaintext: the payload is an opaque base64
//! ciphertext, and `lastModified` is stamped here on every write so all
//! clients order against a single clock.

use crate::models::StoredEnvelope;
use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use chrono::Utc;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

const SALT_FILE: &str = "salt.txt";
const DATA_FILE: &str = "data.json";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

// =============================================================================
// Blob state
// =============================================================================

/// The whole server state: one salt, one envelope, both mirrored to disk.
pub struct BlobState {
    data_dir: PathBuf,
    salt: RwLock<Option<String>>,
    envelope: RwLock<Option<StoredEnvelope>>,
}

impl BlobState {
    /// Load whatever a previous run left behind. Unreadable files are
    /// treated as absent; a corrupt data file is logged and dropped.
    pub fn load(data_dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&data_dir)?;

        let salt = match fs::read_to_string(data_dir.join(SALT_FILE)) {
            Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        };
        let envelope = match fs::read_to_string(data_dir.join(DATA_FILE)) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    log::warn!("Ignoring corrupt data file: {}", e);
                    None
                }
            },
            Err(_) => None,
        };

        Ok(Self {
            data_dir,
            salt: RwLock::new(salt),
            envelope: RwLock::new(envelope),
        })
    }

    fn persist_salt(&self, salt: &str) -> std::io::Result<()> {
        fs::write(self.data_dir.join(SALT_FILE), salt)
    }

    fn persist_envelope(&self, envelope: &StoredEnvelope) -> std::io::Result<()> {
        let raw = serde_json::to_string(envelope)?;
        fs::write(self.data_dir.join(DATA_FILE), raw)
    }
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SaltBody {
    pub salt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaltQuery {
    pub force: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DataBody {
    pub payload: Option<String>,
}

pub async fn get_salt(state: web::Data<BlobState>) -> HttpResponse {
    match state.salt.read().unwrap().as_ref() {
        Some(salt) => HttpResponse::Ok().json(serde_json::json!({ "salt": salt })),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": "Salt not found"
        })),
    }
}

/// First writer wins: a second non-forced upload gets 409 and is expected
/// to refetch and adopt. `?force=true` is the reset path.
pub async fn post_salt(
    state: web::Data<BlobState>,
    query: web::Query<SaltQuery>,
    body: web::Json<SaltBody>,
) -> HttpResponse {
    let salt = match body.into_inner().salt {
        Some(s) if !s.is_empty() => s,
        _ => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Missing or invalid salt"
            }))
        }
    };
    let force = query.force.unwrap_or(false);

    let mut stored = state.salt.write().unwrap();
    if stored.is_some() && !force {
        return HttpResponse::Conflict().json(serde_json::json!({
            "error": "Salt already exists"
        }));
    }
    let overwrote = stored.is_some();
    if let Err(e) = state.persist_salt(&salt) {
        log::error!("Failed to persist salt: {}", e);
        return HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Failed to store salt"
        }));
    }
    *stored = Some(salt);

    if overwrote {
        log::warn!("Salt forcibly overwritten");
        HttpResponse::Ok().json(serde_json::json!({ "success": true }))
    } else {
        log::info!("Salt stored");
        HttpResponse::Created().json(serde_json::json!({ "success": true }))
    }
}

pub async fn get_data(state: web::Data<BlobState>) -> HttpResponse {
    match state.envelope.read().unwrap().as_ref() {
        Some(envelope) => HttpResponse::Ok().json(envelope),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": "No data found"
        })),
    }
}

pub async fn post_data(state: web::Data<BlobState>, body: web::Json<DataBody>) -> HttpResponse {
    let payload = match body.into_inner().payload {
        Some(p) if !p.is_empty() => p,
        _ => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Missing or invalid payload"
            }))
        }
    };

    // Server clock is the authoritative ordering value
    let envelope = StoredEnvelope {
        payload,
        last_modified: Utc::now(),
    };

    let mut stored = state.envelope.write().unwrap();
    if let Err(e) = state.persist_envelope(&envelope) {
        log::error!("Failed to persist data: {}", e);
        return HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Failed to store data"
        }));
    }
    let stamp = envelope.last_modified;
    *stored = Some(envelope);

    // Clients record the stamp so they can tell their own snapshot apart
    // from news on the next fetch
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "lastModified": stamp,
    }))
}

// =============================================================================
// Server setup
// =============================================================================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/sync/salt")
            .route(web::get().to(get_salt))
            .route(web::post().to(post_salt)),
    )
    .service(
        web::resource("/sync/data")
            .route(web::get().to(get_data))
            .route(web::post().to(post_data)),
    );
}

pub async fn run_server(config: ServerConfig) -> std::io::Result<()> {
    let state = web::Data::new(BlobState::load(config.data_dir.clone())?);

    println!("[*] Marksync blob server starting...");
    println!("   Address: http://{}:{}", config.host, config.port);
    println!("   Data directory: {}", config.data_dir.display());
    println!();
    println!("   GET  /sync/salt   - Fetch the shared salt");
    println!("   POST /sync/salt   - Store the salt (?force=true to overwrite)");
    println!("   GET  /sync/data   - Fetch the encrypted snapshot");
    println!("   POST /sync/data   - Store the encrypted snapshot");
    println!();
    println!("Press Ctrl+C to stop the server...");

    HttpServer::new(move || {
        // Extension clients run from browser-extension origins, so any
        // origin is allowed; the payload is ciphertext either way
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["Content-Type"])
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}

// =============================================================================
// Tests
// =============================================================================
