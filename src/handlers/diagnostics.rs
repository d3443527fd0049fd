use crate::{models::{DiagnosticsResponse, Identity}, state::AppState};
use axum::{extract::{State, Extension}, http::StatusCode, Json};
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Report session counts and host resource usage
pub async fn diagnostics(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> (StatusCode, Json<DiagnosticsResponse>) {

    // Aggregate counts from the session engine
    let dispatcher = &state.dispatcher;
    let n_conn = dispatcher.presence().connection_count() as u32;
    let n_rooms = dispatcher.registry().room_count() as u32;
    let n_participants = dispatcher.registry().participant_count() as u32;
    let n_online_users = dispatcher.presence().online_count() as u32;
    let n_cached_identities = dispatcher.identities().cached() as u32;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics for {}: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {}",
        identity.email,
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        n_rooms
    );

    (
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn,
            n_rooms,
            n_participants,
            n_online_users,
            n_cached_identities,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    )
}
