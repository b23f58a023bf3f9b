//! Tests for [`SingleFlight`] coalescing and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use manifold::{
    CancelPolicy, Fingerprint, GenerationRequest, ManifoldError, SingleFlight, fingerprint,
};

fn key(path: &str) -> Fingerprint {
    fingerprint(&GenerationRequest::new("https://git.example.com/org/apps", "abc").path(path))
}

#[tokio::test]
async fn joiners_share_the_leader_outcome() {
    let flights: Arc<SingleFlight<String>> = Arc::new(SingleFlight::default());
    let gate = Arc::new(Notify::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let mut callers = Vec::new();
    for _ in 0..8 {
        let flights = Arc::clone(&flights);
        let gate = Arc::clone(&gate);
        let runs = Arc::clone(&runs);
        callers.push(tokio::spawn(async move {
            flights
                .execute(key("web"), move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok("rendered".to_string())
                })
                .await
        }));
    }

    while runs.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    // Let every caller reach the table before releasing the leader.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(flights.is_in_flight(&key("web")));
    gate.notify_one();

    for caller in callers {
        assert_eq!(caller.await.unwrap().unwrap(), "rendered");
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(flights.in_flight(), 0);
}

#[tokio::test]
async fn distinct_keys_run_independently() {
    let flights: SingleFlight<usize> = SingleFlight::default();
    let (a, b) = tokio::join!(
        flights.execute(key("a"), || async { Ok(1) }),
        flights.execute(key("b"), || async { Ok(2) }),
    );
    assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
}

#[tokio::test]
async fn caller_after_completion_starts_fresh_flight() {
    let flights: SingleFlight<usize> = SingleFlight::default();
    let runs = AtomicUsize::new(0);

    for expected in 1..=3 {
        let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
        let got = flights
            .execute(key("web"), move || async move { Ok(n) })
            .await
            .unwrap();
        assert_eq!(got, expected);
    }
}

#[tokio::test]
async fn error_reaches_every_waiter() {
    let flights: SingleFlight<String> = SingleFlight::default();
    let results = futures_util::future::join_all((0..4).map(|_| {
        flights.execute(key("web"), || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(ManifoldError::transient("ssh: connection timed out"))
        })
    }))
    .await;

    for result in results {
        assert_eq!(result.unwrap_err().kind(), "render_transient");
    }
}

#[tokio::test(start_paused = true)]
async fn partial_abandonment_keeps_flight_alive() {
    let flights: Arc<SingleFlight<&'static str>> =
        Arc::new(SingleFlight::new(CancelPolicy::AbortWhenAbandoned));

    let spawn_caller = |flights: Arc<SingleFlight<&'static str>>| {
        tokio::spawn(async move {
            flights
                .execute(key("web"), || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok("done")
                })
                .await
        })
    };

    let leaver = spawn_caller(Arc::clone(&flights));
    let stayer = spawn_caller(Arc::clone(&flights));
    while flights.in_flight() == 0 {
        tokio::task::yield_now().await;
    }
    tokio::task::yield_now().await;

    leaver.abort();
    let _ = leaver.await;

    assert_eq!(stayer.await.unwrap().unwrap(), "done");
}

#[tokio::test(start_paused = true)]
async fn last_waiter_leaving_aborts_work() {
    let flights: Arc<SingleFlight<()>> =
        Arc::new(SingleFlight::new(CancelPolicy::AbortWhenAbandoned));
    let finished = Arc::new(AtomicUsize::new(0));

    let caller = {
        let flights = Arc::clone(&flights);
        let finished = Arc::clone(&finished);
        tokio::spawn(async move {
            flights
                .execute(key("web"), move || async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        })
    };
    while flights.in_flight() == 0 {
        tokio::task::yield_now().await;
    }
    caller.abort();
    let _ = caller.await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    assert_eq!(flights.in_flight(), 0);
}

#[tokio::test]
async fn policy_is_reported() {
    let flights: SingleFlight<()> = SingleFlight::new(CancelPolicy::AbortWhenAbandoned);
    assert_eq!(flights.policy(), CancelPolicy::AbortWhenAbandoned);
    assert_eq!(
        SingleFlight::<()>::default().policy(),
        CancelPolicy::RunToCompletion
    );
}
