//! Roster client against an in-process stand-in for the Radiocult API.

use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use station_proto::roster::{RosterClient, RosterError};

const API_KEY: &str = "test-key";

fn authorised(headers: &HeaderMap) -> bool {
    headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some(API_KEY)
}

async fn artists(headers: HeaderMap, Path(station): Path<String>) -> impl IntoResponse {
    if !authorised(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "error": "invalid api key"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "artists": [
                {"id": "a1", "stationId": station, "slug": "dj-one", "name": "DJ One"},
                {"id": "a2", "stationId": station, "name": "DJ Two", "genres": ["dub"]}
            ]
        })),
    )
}

async fn artist(Path((station, slug)): Path<(String, String)>) -> Json<serde_json::Value> {
    if slug == "missing" {
        return Json(json!({"success": false}));
    }
    Json(json!({
        "success": true,
        "artist": {"id": "a1", "stationId": station, "slug": slug, "name": "DJ One"}
    }))
}

async fn schedule(
    Path((station, artist_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "schedules": [{
            "id": "s1",
            "stationId": station,
            "title": format!("{} live", artist_id),
            "start": params.get("startDate").cloned().unwrap_or_default(),
            "end": params.get("endDate").cloned().unwrap_or_default(),
            "artistIds": [artist_id],
            "timezone": "Europe/London"
        }]
    }))
}

async fn spawn_server() -> String {
    let app = Router::new()
        .route("/api/station/:station/artists", get(artists))
        .route("/api/station/:station/artists/:slug", get(artist))
        .route("/api/station/:station/artists/:slug/schedule", get(schedule));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn lists_artists_with_api_key() {
    let base = spawn_server().await;
    let client = RosterClient::with_base_url(&base, API_KEY, "tasty");
    let artists = client.artists().await.unwrap();
    assert_eq!(artists.len(), 2);
    assert_eq!(artists[0].slug.as_deref(), Some("dj-one"));
    assert_eq!(artists[1].station_id, "tasty");
    assert_eq!(artists[1].genres, vec!["dub".to_string()]);
}

#[tokio::test]
async fn rejected_key_surfaces_api_error() {
    let base = spawn_server().await;
    let client = RosterClient::with_base_url(&base, "wrong", "tasty");
    match client.artists().await {
        Err(RosterError::Api(message)) => assert_eq!(message, "invalid api key"),
        other => panic!("expected api error, got {:?}", other.map(|a| a.len())),
    }
}

#[tokio::test]
async fn unsuccessful_body_without_message() {
    let base = spawn_server().await;
    let client = RosterClient::with_base_url(&base, API_KEY, "tasty");
    match client.artist_by_slug("missing").await {
        Err(RosterError::Api(message)) => assert_eq!(message, "Request failed"),
        other => panic!("expected api error, got {:?}", other.map(|a| a.name)),
    }
    let artist = client.artist_by_slug("dj-one").await.unwrap();
    assert_eq!(artist.name, "DJ One");
}

#[tokio::test]
async fn schedule_passes_date_range() {
    let base = spawn_server().await;
    let client = RosterClient::with_base_url(&base, API_KEY, "tasty");
    let start = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 10, 31, 0, 0, 0).unwrap();
    let shows = client.artist_schedule("a1", start, end).await.unwrap();
    assert_eq!(shows.len(), 1);
    assert_eq!(shows[0].title, "a1 live");
    assert_eq!(shows[0].start, start);
    assert_eq!(shows[0].end, end);
    assert_eq!(shows[0].artist_ids, vec!["a1".to_string()]);
}
