//! ICE 서버 제공 핸들러 (TURN REST 자격증명, HMAC-SHA1)

use crate::config::TurnConfig;
use crate::handlers::unix_secs;
use crate::protocol::{IceConfigData, IceServer, IceServersResponse};
use crate::state::AppState;
use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::sync::Arc;

type HmacSha1 = Hmac<Sha1>;

/// ICE 서버 목록 요청 처리
pub async fn ice_servers_handler(State(state): State<Arc<AppState>>) -> Json<IceServersResponse> {
    let turn_config = &state.config.turn;

    if !turn_config.is_configured() {
        return Json(IceServersResponse {
            success: false,
            data: None,
            error: Some("TURN server not configured".to_string()),
        });
    }

    match generate_credentials(turn_config, unix_secs()) {
        Some(ice_servers) => {
            tracing::info!(servers = ice_servers.len(), "ICE server config issued");
            Json(IceServersResponse {
                success: true,
                data: Some(IceConfigData {
                    ice_servers,
                    ttl: turn_config.credential_ttl,
                    timestamp: unix_secs(),
                }),
                error: None,
            })
        }
        None => {
            tracing::error!("Failed to sign TURN credentials");
            Json(IceServersResponse {
                success: false,
                data: None,
                error: Some("Failed to generate TURN credentials".to_string()),
            })
        }
    }
}

/// TURN 자격증명 생성 (username = `<user>:<expiry>`, password = base64(HMAC-SHA1))
pub fn generate_credentials(config: &TurnConfig, now: u64) -> Option<Vec<IceServer>> {
    let expiry_time = now + config.credential_ttl;

    let random: u64 = rand::random();
    let base_username = format!("user_{}_{:x}", now, random);
    let credential_username = format!("{}:{}", base_username, expiry_time);

    let password = generate_hmac_hash(&credential_username, &config.secret)?;

    Some(build_ice_servers(config, &credential_username, &password))
}

fn generate_hmac_hash(username: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(username.as_bytes());
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

fn build_ice_servers(config: &TurnConfig, username: &str, password: &str) -> Vec<IceServer> {
    let mut turn_urls = Vec::new();

    if config.enable_udp {
        turn_urls.push(format!("turn:{}:{}", config.url, config.ports.udp));
    }
    if config.enable_tcp {
        turn_urls.push(format!(
            "turn:{}:{}?transport=tcp",
            config.url, config.ports.tcp
        ));
    }
    if config.enable_tls {
        turn_urls.push(format!(
            "turns:{}:{}?transport=tcp",
            config.url, config.ports.tls
        ));
    }

    // 폴백 서버
    for fallback in &config.fallback_servers {
        if config.enable_tls {
            turn_urls.push(format!("turns:{}:{}?transport=tcp", fallback, config.ports.tls));
        } else {
            turn_urls.push(format!("turn:{}:{}", fallback, config.ports.udp));
        }
    }

    let mut servers: Vec<IceServer> = turn_urls
        .iter()
        .map(|url| IceServer::turn(url, username, password))
        .collect();

    if config.enable_udp {
        servers.push(IceServer::stun(&format!("stun:{}:{}", config.url, config.ports.udp)));
    }

    servers
}
