use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};

use sky_monitor::fetch::{
    AircraftSet, AircraftSource, AircraftState, ElementCatalog, FetchError, TleSource,
};
use sky_monitor::horizon::HorizonProfile;
use sky_monitor::scheduler::{Coordinator, SchedulerConfig, SchedulerHandle, SchedulerTask};
use sky_monitor::snapshot::SnapshotStore;
use sky_monitor::web::auth::AppState;
use sky_monitor::web::{router, Config};

const CONFIG: &str = r#"
observatory:
  latitude_deg: 37.2317
  longitude_deg: -118.2951
  altitude_m: 1222
horizon:
  file: horizon.csv
api_keys:
  - key: operator-key
    name: operator
    permissions: [force_snapshot, view_status]
  - key: viewer-key
    name: viewer
    permissions: [view_status]
"#;

struct NoTle;

#[async_trait]
impl TleSource for NoTle {
    async fn fetch(&self) -> Result<Arc<ElementCatalog>, FetchError> {
        Err(FetchError::Timeout)
    }

    fn cached(&self) -> Arc<ElementCatalog> {
        Arc::new(ElementCatalog::new())
    }

    fn last_success(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// One aircraft near the observatory, answered after `delay`.
struct OnePlane {
    delay: Duration,
}

#[async_trait]
impl AircraftSource for OnePlane {
    async fn fetch(&self) -> Result<Arc<AircraftSet>, FetchError> {
        tokio::time::sleep(self.delay).await;
        let mut set = AircraftSet::new();
        set.insert(
            "SKW42".into(),
            AircraftState {
                callsign: "SKW42".into(),
                icao24: "a4b5c6".into(),
                timestamp: Utc::now(),
                latitude_deg: 37.30,
                longitude_deg: -118.30,
                altitude_m: 9_000.0,
            },
        );
        Ok(Arc::new(set))
    }

    fn cached(&self) -> Arc<AircraftSet> {
        Arc::new(AircraftSet::new())
    }

    fn last_success(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn rate_limited_until(&self) -> Option<DateTime<Utc>> {
        None
    }
}

struct Harness {
    base: String,
    client: reqwest::Client,
    handle: SchedulerHandle,
    task: SchedulerTask,
}

async fn start() -> Harness {
    start_with(Duration::ZERO).await
}

async fn start_with(aircraft_delay: Duration) -> Harness {
    let config = Arc::new(Config::from_str(CONFIG).unwrap());
    let store = Arc::new(SnapshotStore::open(":memory:").await.unwrap());
    let scheduler_config = SchedulerConfig {
        tick: Duration::from_millis(20),
        ..config.scheduler_config()
    };

    let (coordinator, handle) = Coordinator::new(
        scheduler_config,
        config.observer(),
        Arc::new(HorizonProfile::flat(5.0, 100_000.0)),
        Arc::new(NoTle),
        Arc::new(OnePlane {
            delay: aircraft_delay,
        }),
        store,
        Utc::now(),
    );
    let task = coordinator.spawn();

    let app = router(AppState {
        config,
        scheduler: handle.clone(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        handle,
        task,
    }
}

async fn wait_for_aircraft(handle: &SchedulerHandle) {
    for _ in 0..100 {
        if handle.latest_visibility().report.aircraft_count() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("aircraft never became visible");
}

#[tokio::test]
async fn public_reads_follow_the_coordinator() {
    let h = start().await;

    let health = h
        .client
        .get(format!("{}/health", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(health.text().await.unwrap(), "OK");

    wait_for_aircraft(&h.handle).await;

    let live: Value = h
        .client
        .get(format!("{}/api/visibility/latest", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(live["aircraft"][0]["name"], "SKW42");
    assert_eq!(live["aircraft"][0]["kind"], "aircraft");
    assert!(live["aircraft"][0]["distance_m"].as_f64().unwrap() < 100_000.0);
    assert!(live["satellites"].as_object().unwrap().is_empty());
    assert!(live["aircraft_fetched_at"].is_string());
    assert!(live["tle_fetched_at"].is_null());

    let missing = h
        .client
        .get(format!("{}/api/snapshots/999", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    h.task.stop().await;
}

#[tokio::test]
async fn status_requires_a_valid_key() {
    let h = start().await;
    let url = format!("{}/api/status", h.base);

    let anonymous = h.client.get(&url).send().await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let wrong = h
        .client
        .get(&url)
        .bearer_auth("not-a-key")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    wait_for_aircraft(&h.handle).await;
    let status: Value = h
        .client
        .get(&url)
        .header("X-API-Token", "viewer-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(status["last_aircraft_fetch"].is_i64());
    assert!(status["last_tle_fetch"].is_null());
    assert!(status["last_tle_error"].is_string());
    assert!(status["next_snapshot_at"].is_i64());

    h.task.stop().await;
}

#[tokio::test]
async fn force_snapshot_round_trip_and_cooldown() {
    let h = start().await;
    let url = format!("{}/api/snapshots/force", h.base);

    let forbidden = h
        .client
        .post(&url)
        .bearer_auth("viewer-key")
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let accepted = h
        .client
        .post(&url)
        .bearer_auth("operator-key")
        .json(&json!({ "wait_for_aircraft": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
    let accepted: Value = accepted.json().await.unwrap();
    assert_eq!(accepted["aircraft"], 1);
    let id = accepted["id"].as_i64().unwrap();

    let rejected = h
        .client
        .post(&url)
        .bearer_auth("operator-key")
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(rejected.headers().contains_key("retry-after"));
    let rejected: Value = rejected.json().await.unwrap();
    assert!(rejected["retry_after_seconds"].as_u64().unwrap() > 0);

    let listed: Value = h
        .client
        .get(format!("{}/api/snapshots", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], id);

    let snapshot: Value = h
        .client
        .get(format!("{}/api/snapshots/{}", h.base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot["id"], id);
    assert_eq!(snapshot["aircraft"][0]["name"], "SKW42");
    assert!(snapshot["aircraft"][0]["position"]["x_km"].is_f64());

    h.task.stop().await;
}

#[tokio::test]
async fn force_without_body_waits_for_aircraft() {
    let h = start_with(Duration::from_millis(500)).await;

    let accepted = h
        .client
        .post(format!("{}/api/snapshots/force", h.base))
        .bearer_auth("operator-key")
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
    let accepted: Value = accepted.json().await.unwrap();
    assert_eq!(accepted["aircraft"], 1);

    h.task.stop().await;
}

#[tokio::test]
async fn force_can_skip_waiting_for_aircraft() {
    let h = start_with(Duration::from_millis(500)).await;

    let accepted: Value = h
        .client
        .post(format!("{}/api/snapshots/force", h.base))
        .bearer_auth("operator-key")
        .json(&json!({ "wait_for_aircraft": false }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(accepted["aircraft"], 0);

    h.task.stop().await;
}
