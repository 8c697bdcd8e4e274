use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use switchyard_llm::{CircuitState, Gateway};

/// Health check handler
///
/// Reports open circuits and cache occupancy alongside liveness.
pub async fn health_handler(State(gateway): State<Gateway>) -> impl IntoResponse {
    let breaker = gateway.breaker();
    let open: Vec<String> = breaker
        .snapshot_all()
        .into_iter()
        .filter(|snapshot| snapshot.state != CircuitState::Closed)
        .map(|snapshot| format!("{} ({})", snapshot.scope_key, snapshot.state))
        .collect();
    let trips = breaker.global_stats();
    let cache = gateway.cache().stats();

    Json(serde_json::json!({
        "status": "ok",
        "circuits": {
            "not_closed": open,
            "total_trips": trips.total_trips,
            "most_tripped": trips.most_tripped.map(|(scope_key, trips)| {
                serde_json::json!({ "scope_key": scope_key, "trips": trips })
            }),
        },
        "cache": {
            "size": cache.size,
            "capacity": cache.capacity,
            "hits": cache.hits,
            "misses": cache.misses,
            "hit_rate": cache.hit_rate(),
        },
    }))
}
