use booking_core::{
    domain::{
        entities::{booking_verifications::BookingVerificationEntity, bookings::BookingEntity},
        value_objects::{
            enums::{booking_statuses::BookingStatus, payment_statuses::PaymentStatus},
            verification::{SubmitVerificationModel, VerificationRejection},
        },
    },
    realtime::connection_registry::LiveReceiver,
    testing::{
        fakes::code_from,
        fixtures::{MEETING_LAT, MEETING_LON, booking_fixture},
        system::TestSystem,
    },
    usecases::{
        booking_lifecycle::{REASON_CLIENT_NO_SHOW, REASON_NOT_APPROVED},
        errors::BookingError,
    },
};
use chrono::{DateTime, Duration, Utc};
use worker::{
    Pass, SchedulerDeps, build_passes, config::config_model::SchedulerConfig,
    services::scheduler_loop::SchedulerPass,
};

const BATCH: i64 = 100;

fn passes(system: &TestSystem) -> Vec<Pass> {
    let deps = SchedulerDeps {
        bookings: system.store.clone(),
        verifications: system.store.clone(),
        requests: system.store.clone(),
        payments: system.payments.clone(),
        lifecycle: system.lifecycle.clone(),
        verification: system.verification.clone(),
        booking_requests: system.requests.clone(),
        rules: system.rules,
    };
    build_passes(&deps, &SchedulerConfig::default())
        .into_iter()
        .map(|(pass, _)| pass)
        .collect()
}

type Snapshot = Vec<(BookingEntity, Option<BookingVerificationEntity>)>;

fn snapshot(system: &TestSystem) -> Snapshot {
    let mut bookings = system.store.bookings();
    bookings.sort_by_key(|booking| booking.id);
    bookings
        .into_iter()
        .map(|booking| {
            let verification = system.store.verification(booking.id);
            (booking, verification)
        })
        .collect()
}

fn assert_paid_only_when_held(system: &TestSystem) {
    for booking in system.store.bookings() {
        if booking.payment_status == PaymentStatus::Paid.as_str() {
            assert!(
                booking.status == BookingStatus::Confirmed.as_str()
                    || booking.status == BookingStatus::Completed.as_str(),
                "booking {} is paid while {}",
                booking.id,
                booking.status
            );
        }
    }
}

/// Runs every pass twice back to back; the second run must change nothing.
async fn tick(system: &TestSystem, passes: &[Pass], now: DateTime<Utc>) {
    for pass in passes {
        pass.run_once(now, BATCH).await.unwrap();
        let after_first = snapshot(system);
        pass.run_once(now, BATCH).await.unwrap();
        assert_eq!(
            after_first,
            snapshot(system),
            "second {} pass changed state",
            pass.name()
        );
        assert_paid_only_when_held(system);
    }
}

fn received_types(receiver: &mut LiveReceiver) -> Vec<String> {
    let mut types = Vec::new();
    while let Ok(message) = receiver.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        if let Some(kind) = value["type"].as_str() {
            types.push(kind.to_string());
        }
    }
    types
}

fn named(passes: &[Pass], name: &str) -> Pass {
    passes
        .iter()
        .find(|pass| pass.name() == name)
        .cloned()
        .unwrap()
}

fn current(system: &TestSystem, booking: &BookingEntity) -> BookingEntity {
    system.store.booking(booking.id).unwrap()
}

#[tokio::test]
async fn verified_meeting_is_captured_completed_and_released_once() {
    let system = TestSystem::new();
    let passes = passes(&system);
    let t0 = Utc::now();
    let booking = booking_fixture(t0 + Duration::minutes(20));
    system.store.put_booking(booking.clone());
    system
        .store
        .put_payout_account(booking.companion_id, "acct_companion");

    let approved = system
        .lifecycle
        .approve_booking(booking.id, booking.companion_id, t0)
        .await
        .unwrap();
    assert!(approved.is_applied());

    tick(&system, &passes, t0).await;
    let client_code = code_from(&system.notifications.sent_to(booking.client_id)[0]).unwrap();
    let companion_code =
        code_from(&system.notifications.sent_to(booking.companion_id)[0]).unwrap();

    let at_point = |code: &str| SubmitVerificationModel {
        code: code.to_string(),
        lat: Some(MEETING_LAT),
        lon: Some(MEETING_LON),
    };
    let arrival = booking.starts_at - Duration::minutes(2);
    system
        .verification
        .submit(booking.id, booking.client_id, at_point(&client_code), arrival)
        .await
        .unwrap();
    let both = system
        .verification
        .submit(booking.id, booking.companion_id, at_point(&companion_code), arrival)
        .await
        .unwrap();
    assert!(both.both_verified_at.is_some());
    assert_eq!(current(&system, &booking).payment_status, PaymentStatus::Paid.as_str());

    tick(&system, &passes, booking.starts_at + Duration::minutes(15)).await;
    assert_eq!(current(&system, &booking).status, BookingStatus::Confirmed.as_str());

    let after_meeting = booking.ends_at + Duration::minutes(1);
    tick(&system, &passes, after_meeting).await;
    let completed = current(&system, &booking);
    assert_eq!(completed.status, BookingStatus::Completed.as_str());
    assert!(completed.payment_released_at.is_none());

    tick(&system, &passes, after_meeting + Duration::hours(49)).await;
    let released = current(&system, &booking);
    assert!(released.payment_released_at.is_some());
    assert!(released.transfer_id.is_some());

    assert_eq!(system.gateway.captures(), 1);
    assert_eq!(system.gateway.transfers(), 1);
    assert_eq!(system.gateway.cancellations(), 0);
    assert_eq!(system.notifications.sent().len(), 2);
}

#[tokio::test]
async fn client_kilometres_from_the_meeting_point_ends_as_no_show() {
    let system = TestSystem::new();
    let passes = passes(&system);
    let t0 = Utc::now();
    let booking = booking_fixture(t0 + Duration::minutes(45));
    system.store.put_booking(booking.clone());
    let (_, mut client_live) = system.registry.add(booking.client_id);

    system
        .lifecycle
        .approve_booking(booking.id, booking.companion_id, t0)
        .await
        .unwrap();
    let confirmed = current(&system, &booking);
    assert_eq!(confirmed.status, BookingStatus::Confirmed.as_str());
    assert_eq!(confirmed.payment_status, PaymentStatus::Authorized.as_str());

    let start = booking.starts_at + Duration::seconds(1);
    tick(&system, &passes, start).await;
    assert_eq!(current(&system, &booking).status, BookingStatus::Confirmed.as_str());

    let client_code = code_from(&system.notifications.sent_to(booking.client_id)[0]).unwrap();
    let companion_code =
        code_from(&system.notifications.sent_to(booking.companion_id)[0]).unwrap();

    let far_away = SubmitVerificationModel {
        code: client_code,
        lat: Some(MEETING_LAT + 0.072),
        lon: Some(MEETING_LON),
    };
    let rejected = system
        .verification
        .submit(booking.id, booking.client_id, far_away, start + Duration::minutes(1))
        .await
        .unwrap_err();
    assert!(matches!(
        rejected,
        BookingError::Rejected(VerificationRejection::OutOfRange)
    ));

    let companion = SubmitVerificationModel {
        code: companion_code,
        lat: Some(MEETING_LAT),
        lon: Some(MEETING_LON),
    };
    let status = system
        .verification
        .submit(booking.id, booking.companion_id, companion, start + Duration::minutes(2))
        .await
        .unwrap();
    assert!(status.both_verified_at.is_none());

    tick(&system, &passes, start + Duration::minutes(5)).await;
    assert_eq!(current(&system, &booking).status, BookingStatus::Confirmed.as_str());

    tick(&system, &passes, booking.starts_at + Duration::minutes(11)).await;
    let ended = current(&system, &booking);
    assert_eq!(ended.status, BookingStatus::NoShow.as_str());
    assert_eq!(ended.payment_status, PaymentStatus::Cancelled.as_str());
    assert_eq!(ended.cancelled_by.as_deref(), Some("system"));
    assert_eq!(ended.cancellation_reason.as_deref(), Some(REASON_CLIENT_NO_SHOW));
    let verification = system.store.verification(booking.id).unwrap();
    assert!(verification.client_verified_at.is_none());
    assert!(verification.both_verified_at.is_none());

    assert_eq!(system.gateway.captures(), 0);
    assert_eq!(system.gateway.cancellations(), 1);

    let events = received_types(&mut client_live);
    assert!(events.iter().any(|kind| kind == "verification_expired"));
    assert_eq!(events.iter().filter(|kind| *kind == "booking_no_show").count(), 1);
}

#[tokio::test]
async fn unapproved_booking_expires_at_start_and_releases_the_hold() {
    let system = TestSystem::new();
    let passes = passes(&system);
    let t0 = Utc::now();
    let booking = booking_fixture(t0 + Duration::minutes(10));
    system.store.put_booking(booking.clone());

    system
        .lifecycle
        .authorize_payment(booking.id, booking.client_id, t0)
        .await
        .unwrap();
    assert_eq!(
        current(&system, &booking).payment_status,
        PaymentStatus::Authorized.as_str()
    );

    tick(&system, &passes, t0 + Duration::minutes(5)).await;
    assert_eq!(current(&system, &booking).status, BookingStatus::Pending.as_str());

    tick(&system, &passes, booking.starts_at + Duration::seconds(1)).await;
    let expired = current(&system, &booking);
    assert_eq!(expired.status, BookingStatus::Expired.as_str());
    assert_eq!(expired.cancelled_by.as_deref(), Some("system"));
    assert_eq!(expired.cancellation_reason.as_deref(), Some(REASON_NOT_APPROVED));
    assert_eq!(expired.payment_status, PaymentStatus::Cancelled.as_str());
    assert_eq!(system.gateway.cancellations(), 1);
    assert!(system.store.verification(booking.id).is_none());
}

#[tokio::test]
async fn overlapping_expiry_passes_expire_a_booking_once() {
    let system = TestSystem::new();
    let t0 = Utc::now();
    let booking = booking_fixture(t0 - Duration::minutes(1));
    system.store.put_booking(booking.clone());
    let (_, mut companion_live) = system.registry.add(booking.companion_id);

    let a = named(&passes(&system), "booking_expiry");
    let b = named(&passes(&system), "booking_expiry");

    let (left, right) = tokio::join!(a.run_once(t0, BATCH), b.run_once(t0, BATCH));
    left.unwrap();
    right.unwrap();

    assert_eq!(current(&system, &booking).status, BookingStatus::Expired.as_str());
    let events = received_types(&mut companion_live);
    assert_eq!(events.iter().filter(|kind| *kind == "booking_expired").count(), 1);
}
