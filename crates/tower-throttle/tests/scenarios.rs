//! End-to-end scenarios driving the full layer against stub transports.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::{Request, Response};
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_throttle::{PoolView, ThrottleLayer, MAX_RATE};

/// Pool stub with settable tables, shared with the test body.
#[derive(Default)]
struct StubPool {
    buffers: Mutex<Vec<usize>>,
    free: AtomicUsize,
    pending: AtomicUsize,
    max_sockets: usize,
}

impl PoolView for StubPool {
    fn open_socket_buffers(&self, _endpoint: &str) -> Vec<usize> {
        self.buffers.lock().unwrap().clone()
    }

    fn free_sockets(&self, _endpoint: &str) -> usize {
        self.free.load(Ordering::SeqCst)
    }

    fn pending_requests(&self, _endpoint: &str) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn max_sockets(&self) -> usize {
        self.max_sockets
    }
}

fn request(url: &str) -> Request<()> {
    Request::builder().uri(url).body(()).unwrap()
}

/// A transport stub that fails with a connection error while `failing` is
/// set and answers 200 otherwise.
fn flaky_transport(
    failing: Arc<AtomicBool>,
) -> impl Service<
    Request<()>,
    Response = Response<&'static str>,
    Error = &'static str,
    Future = impl std::future::Future<Output = Result<Response<&'static str>, &'static str>>
                 + Send,
>
       + Clone
       + Send
       + 'static {
    tower::service_fn(move |_req: Request<()>| {
        let failing = failing.load(Ordering::SeqCst);
        async move {
            if failing {
                Err("ECONNRESET")
            } else {
                Ok(Response::builder().status(200).body("ok").unwrap())
            }
        }
    })
}

#[tokio::test]
async fn limit_collapses_fast_and_recovers_slowly() {
    // A pool with zero socket headroom, so the outcome decides the vote.
    let pool = Arc::new(StubPool {
        buffers: Mutex::new(vec![0, 0]),
        max_sockets: 2,
        ..Default::default()
    });

    let window = Duration::from_millis(500);
    let failing = Arc::new(AtomicBool::new(false));
    let layer = ThrottleLayer::builder()
        .rate(100)
        .rate_interval(window)
        .pool(pool)
        .build();
    let mut client = ServiceBuilder::new()
        .layer(layer.clone())
        .service(flaky_transport(Arc::clone(&failing)));

    // One adjustment window: 10 successes, then failures.
    for _ in 0..10 {
        assert!(client
            .ready()
            .await
            .unwrap()
            .call(request("http://h/"))
            .await
            .is_ok());
    }
    failing.store(true, Ordering::SeqCst);
    for _ in 0..4 {
        let _ = client.ready().await.unwrap().call(request("http://h/")).await;
    }

    tokio::time::sleep(window + Duration::from_millis(100)).await;

    // The fifth failure crosses the window boundary and triggers the
    // adjustment: diff = 10 - 5 * 18 = -80, step = floor(100 * 0.2) = 20.
    let _ = client.ready().await.unwrap().call(request("http://h/")).await;
    assert_eq!(layer.stats()["h:80:"].rate, 80);

    // Recovery is an order of magnitude slower: +1 per healthy window.
    failing.store(false, Ordering::SeqCst);
    for expected in [81u64, 82] {
        for _ in 0..3 {
            assert!(client
                .ready()
                .await
                .unwrap()
                .call(request("http://h/"))
                .await
                .is_ok());
        }
        tokio::time::sleep(window + Duration::from_millis(100)).await;
        let _ = client.ready().await.unwrap().call(request("http://h/")).await;

        let rate = layer.stats()["h:80:"].rate;
        assert_eq!(rate, expected);
        assert!(rate <= 100);
    }
}

#[tokio::test]
async fn lowered_target_rate_clamps_the_working_limit() {
    let target = Arc::new(AtomicU64::new(100));
    let t = Arc::clone(&target);
    let layer = ThrottleLayer::builder()
        .rate_interval(Duration::from_secs(60))
        .get_rate(move |_, _| t.load(Ordering::SeqCst))
        .build();
    let failing = Arc::new(AtomicBool::new(false));
    let mut client = ServiceBuilder::new()
        .layer(layer.clone())
        .service(flaky_transport(failing));

    client
        .ready()
        .await
        .unwrap()
        .call(request("http://h/"))
        .await
        .unwrap();
    assert_eq!(layer.stats()["h:80:"].rate, 100);

    // The caller lowers its target; the next admission applies the clamp.
    target.store(50, Ordering::SeqCst);
    client
        .ready()
        .await
        .unwrap()
        .call(request("http://h/"))
        .await
        .unwrap();
    assert_eq!(layer.stats()["h:80:"].rate, 50);
}

#[tokio::test]
async fn stats_round_trip_after_one_request() {
    let pool = Arc::new(StubPool {
        buffers: Mutex::new(vec![10]),
        free: AtomicUsize::new(1),
        max_sockets: 10,
        ..Default::default()
    });
    let layer = ThrottleLayer::builder().pool(pool).build();

    assert!(layer.stats().is_empty());

    let failing = Arc::new(AtomicBool::new(false));
    let mut client = ServiceBuilder::new()
        .layer(layer.clone())
        .service(flaky_transport(failing));
    client
        .ready()
        .await
        .unwrap()
        .call(request("http://api.test/items"))
        .await
        .unwrap();

    let stats = layer.stats();
    let entry = &stats["api.test:80:"];
    assert_eq!(entry.name, "api.test:80:");
    assert_eq!(entry.accepted, 1);
    assert_eq!(entry.incoming, 1);
    assert_eq!(entry.rate, MAX_RATE);
    assert_eq!(entry.used, 1);
    assert_eq!(entry.free, 1);
    assert_eq!(entry.pending, 0);
    assert_eq!(entry.buffer_size, 10);
}

#[tokio::test]
async fn flags_split_one_host_into_classes() {
    let layer = ThrottleLayer::builder()
        .get_flag(|url| {
            if url.contains("/batch/") {
                "batch".to_string()
            } else {
                String::new()
            }
        })
        .build();
    let failing = Arc::new(AtomicBool::new(false));
    let mut client = ServiceBuilder::new()
        .layer(layer.clone())
        .service(flaky_transport(failing));

    client
        .ready()
        .await
        .unwrap()
        .call(request("http://h/live/1"))
        .await
        .unwrap();
    client
        .ready()
        .await
        .unwrap()
        .call(request("http://h/batch/1"))
        .await
        .unwrap();

    let stats = layer.stats();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats["h:80:"].accepted, 1);
    assert_eq!(stats["batch"].accepted, 1);
    assert_eq!(stats["batch"].name, "h:80:");
}

#[tokio::test]
async fn queue_gate_boundary() {
    let pool = Arc::new(StubPool {
        pending: AtomicUsize::new(0),
        max_sockets: 10,
        ..Default::default()
    });
    let layer = ThrottleLayer::builder()
        .max_pending(3)
        .pool(Arc::clone(&pool) as Arc<dyn PoolView>)
        .build();
    let failing = Arc::new(AtomicBool::new(false));
    let mut client = ServiceBuilder::new()
        .layer(layer.clone())
        .service(flaky_transport(failing));

    // One below the cutoff admits.
    pool.pending.store(2, Ordering::SeqCst);
    assert!(client
        .ready()
        .await
        .unwrap()
        .call(request("http://h/"))
        .await
        .is_ok());

    // At the cutoff the request never reaches the transport.
    pool.pending.store(3, Ordering::SeqCst);
    let err = client
        .ready()
        .await
        .unwrap()
        .call(request("http://h/"))
        .await
        .unwrap_err();
    assert!(err.is_throttled());

    let stats = layer.stats();
    assert_eq!(stats["h:80:"].accepted, 1);
    assert_eq!(stats["h:80:"].incoming, 2);
}

#[tokio::test]
async fn buffer_gate_relaxes_at_low_latency() {
    let pool = Arc::new(StubPool {
        buffers: Mutex::new(vec![300]),
        max_sockets: 10,
        ..Default::default()
    });
    let layer = ThrottleLayer::builder()
        .max_buffer(50)
        .pool(Arc::clone(&pool) as Arc<dyn PoolView>)
        .build();
    let failing = Arc::new(AtomicBool::new(false));
    let mut client = ServiceBuilder::new()
        .layer(layer.clone())
        .service(flaky_transport(failing));

    // First request of the interval is exempt and fast, so the smoothed
    // latency stays healthy.
    assert!(client
        .ready()
        .await
        .unwrap()
        .call(request("http://h/"))
        .await
        .is_ok());

    // 300 <= 50 * 7 = 350: still admitted.
    assert!(client
        .ready()
        .await
        .unwrap()
        .call(request("http://h/"))
        .await
        .is_ok());

    // Over the relaxed cap the gate fires.
    *pool.buffers.lock().unwrap() = vec![400];
    let err = client
        .ready()
        .await
        .unwrap()
        .call(request("http://h/"))
        .await
        .unwrap_err();
    assert!(err.is_throttled());
}
