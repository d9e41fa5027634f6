use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc, Weekday};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::{
    appointment_routes, AppointmentRepository, AppointmentState, InMemoryAppointmentRepository, LoggingNotifier,
};
use expert_cell::{AvailabilitySlotRule, ClockTime, DayOfWeek, Expert, ExpertRepository, InMemoryExpertRepository};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct TestApp {
    router: Router,
    config: TestConfig,
    expert: TestUser,
    appointments: Arc<InMemoryAppointmentRepository>,
}

fn monday() -> NaiveDate {
    NaiveDate::from_isoywd_opt(2040, 10, Weekday::Mon).unwrap()
}

fn monday_at(hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&monday().and_hms_opt(hour, 0, 0).unwrap())
}

impl TestApp {
    async fn new() -> Self {
        let config = TestConfig::default();
        let expert = TestUser::expert("expert@example.com");

        let experts = Arc::new(InMemoryExpertRepository::new());
        let mut profile = Expert::new(expert.uuid());
        profile.availability_rules = vec![AvailabilitySlotRule::new(
            DayOfWeek::Monday,
            ClockTime::from_hm(9, 0).unwrap(),
            ClockTime::from_hm(12, 0).unwrap(),
        )];
        experts.insert(&profile).await.unwrap();

        let appointments = Arc::new(InMemoryAppointmentRepository::new());
        let state = Arc::new(AppointmentState::new(
            config.to_arc(),
            experts,
            appointments.clone(),
            Arc::new(LoggingNotifier),
        ));

        Self {
            router: appointment_routes(state),
            config,
            expert,
            appointments,
        }
    }

    async fn send(&self, method: &str, uri: &str, user: Option<&TestUser>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("authorization", JwtTestUtils::bearer(user, &self.config));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn book(&self, requester: &TestUser, hour: u32) -> (StatusCode, Value) {
        self.send(
            "POST",
            &format!("/experts/{}/appointments", self.expert.uuid()),
            Some(requester),
            Some(json!({"startTime": monday_at(hour), "durationMinutes": 60})),
        )
        .await
    }
}

#[tokio::test]
async fn slots_are_public_and_shrink_after_booking() {
    let app = TestApp::new().await;
    let requester = TestUser::requester("requester@example.com");
    let uri = format!("/experts/{}/slots?date={}&duration=60", app.expert.uuid(), monday());

    let (status, body) = app.send("GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duration_minutes"], 60);
    assert_eq!(
        body["slots"],
        json!([monday_at(9), monday_at(10), monday_at(11)])
    );

    let (status, _) = app.book(&requester, 10).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = app.send("GET", &uri, None, None).await;
    assert_eq!(body["slots"], json!([monday_at(9), monday_at(11)]));
}

#[tokio::test]
async fn booking_returns_view_and_conflicts_map_to_409() {
    let app = TestApp::new().await;
    let requester = TestUser::requester("requester@example.com");

    let (status, body) = app.book(&requester, 10).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["payment_state"], "pending");
    assert_eq!(body["requester_id"], json!(requester.uuid()));
    assert_eq!(body["end_time"], json!(monday_at(11)));
    assert_eq!(body["can_be_cancelled"], true);

    let (status, body) = app
        .send(
            "POST",
            &format!("/experts/{}/appointments", app.expert.uuid()),
            Some(&TestUser::requester("other@example.com")),
            Some(json!({"start_time": monday_at(10) + Duration::minutes(30), "duration_minutes": 60})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "slot_conflict");
}

#[tokio::test]
async fn booking_errors_have_structured_codes() {
    let app = TestApp::new().await;
    let requester = TestUser::requester("requester@example.com");
    let uri = format!("/experts/{}/appointments", app.expert.uuid());

    let (status, body) = app
        .send("POST", &uri, Some(&requester), Some(json!({"start_time": monday_at(9), "duration_minutes": 5})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_duration");

    let (status, body) = app
        .send("POST", &uri, Some(&requester), Some(json!({"start_time": monday_at(14), "duration_minutes": 60})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "expert_unavailable");

    let (status, _) = app
        .send(
            "POST",
            &format!("/experts/{}/appointments", Uuid::new_v4()),
            Some(&requester),
            Some(json!({"start_time": monday_at(9), "duration_minutes": 60})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send("POST", &uri, None, Some(json!({"start_time": monday_at(9), "duration_minutes": 60})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(
            "POST",
            &uri,
            Some(&requester),
            Some(json!({"start_time": monday_at(9), "duration_minutes": 60, "requester_id": Uuid::new_v4()})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn expert_drives_lifecycle() {
    let app = TestApp::new().await;
    let requester = TestUser::requester("requester@example.com");

    let (_, booked) = app.book(&requester, 9).await;
    let id = booked["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .send("POST", &format!("/appointments/{}/confirm", id), Some(&requester), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send("POST", &format!("/appointments/{}/confirm", id), Some(&app.expert), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");

    let (status, body) = app
        .send("POST", &format!("/appointments/{}/confirm", id), Some(&app.expert), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_transition");

    let (status, body) = app
        .send(
            "POST",
            &format!("/appointments/{}/cancel", id),
            Some(&requester),
            Some(json!({"reason": "travel"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancelled_by"], "requester");
    assert_eq!(body["cancellation_reason"], "travel");
    assert_eq!(body["can_be_cancelled"], false);
}

#[tokio::test]
async fn cancellation_inside_window_is_forbidden() {
    let app = TestApp::new().await;
    let requester = TestUser::requester("requester@example.com");

    // Seeded directly so it starts inside the cancellation window.
    let soon = Utc::now() + Duration::hours(2);
    let appointment = appointment_cell::Appointment::new(requester.uuid(), app.expert.uuid(), soon, 60, Utc::now());
    app.appointments.insert(&appointment).await.unwrap();

    let (status, body) = app
        .send("POST", &format!("/appointments/{}/cancel", appointment.id), Some(&requester), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "cancellation_window");
}

#[tokio::test]
async fn appointments_are_visible_to_participants_only() {
    let app = TestApp::new().await;
    let requester = TestUser::requester("requester@example.com");
    let (_, booked) = app.book(&requester, 11).await;
    let uri = format!("/appointments/{}", booked["id"].as_str().unwrap());

    let (status, _) = app.send("GET", &uri, Some(&requester), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send("GET", &uri, Some(&TestUser::requester("nosy@example.com")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.send("GET", &uri, Some(&TestUser::admin("admin@example.com")), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send("GET", &format!("/appointments/{}", Uuid::new_v4()), Some(&requester), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let range = format!(
        "/experts/{}/appointments?from={}&to={}",
        app.expert.uuid(),
        query_time(monday_at(0)),
        query_time(monday_at(23))
    );
    let (status, body) = app.send("GET", &range, Some(&app.expert), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointments"].as_array().unwrap().len(), 1);

    let (status, _) = app.send("GET", &range, Some(&requester), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

/// RFC 3339 with a `Z` suffix needs no escaping in a query string.
fn query_time(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
