use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use kubemirror::{
    Cache, Error, EventStream, EventType, ListMeta, ListOptions, Metadata, ObjectList, ObjectMeta,
    Reflector, ReflectorError, RetryPolicy, Scope, Status, Store, WatchEvent, WatchOptions,
    WatchSource, cancellation,
};

#[derive(Clone, Debug)]
struct TestObject {
    metadata: ObjectMeta,
}

impl Metadata for TestObject {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

fn object(name: &str, version: &str) -> TestObject {
    TestObject {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: "default".to_string(),
            resource_version: version.to_string(),
            ..Default::default()
        },
    }
}

enum ListStep {
    Page {
        items: Vec<TestObject>,
        version: &'static str,
        continuation: Option<&'static str>,
    },
    Fail,
}

enum WatchStep {
    /// The connect itself fails.
    Fail,
    /// The connect fails with 410 Gone.
    Expired,
    /// A stream delivering the given items, then ending.
    Events(Vec<Result<WatchEvent<TestObject>, Error>>),
    /// A stream that stays open and never yields.
    Pending,
}

struct State {
    lists: Mutex<VecDeque<ListStep>>,
    watches: Mutex<VecDeque<WatchStep>>,
    list_calls: AtomicU32,
    watched_versions: Mutex<Vec<String>>,
}

/// A transport with a fixed script. Running off the end of a script is a
/// test failure: it means the reflector connected more often than the
/// scenario allows.
#[derive(Clone)]
struct MockSource {
    state: Arc<State>,
}

impl MockSource {
    fn new(lists: Vec<ListStep>, watches: Vec<WatchStep>) -> Self {
        MockSource {
            state: Arc::new(State {
                lists: Mutex::new(lists.into()),
                watches: Mutex::new(watches.into()),
                list_calls: AtomicU32::new(0),
                watched_versions: Mutex::new(Vec::new()),
            }),
        }
    }

    fn list_calls(&self) -> u32 {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    fn watched_versions(&self) -> Vec<String> {
        self.state.watched_versions.lock().unwrap().clone()
    }
}

impl WatchSource<TestObject> for MockSource {
    async fn list(
        &self,
        _scope: &Scope,
        _options: &ListOptions,
    ) -> Result<ObjectList<TestObject>, Error> {
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);

        let step = self
            .state
            .lists
            .lock()
            .unwrap()
            .pop_front()
            .expect("unscripted list call");

        match step {
            ListStep::Page {
                items,
                version,
                continuation,
            } => Ok(ObjectList {
                metadata: ListMeta {
                    resource_version: Some(version.to_string()),
                    r#continue: continuation.map(str::to_string),
                },
                items,
            }),
            ListStep::Fail => Err(Error::Validation("scripted list failure".into())),
        }
    }

    async fn watch(
        &self,
        _scope: &Scope,
        _options: &WatchOptions,
        resource_version: &str,
    ) -> Result<EventStream<TestObject>, Error> {
        self.state
            .watched_versions
            .lock()
            .unwrap()
            .push(resource_version.to_string());

        let step = self
            .state
            .watches
            .lock()
            .unwrap()
            .pop_front()
            .expect("unscripted watch call");

        match step {
            WatchStep::Fail => Err(Error::Validation("scripted watch failure".into())),
            WatchStep::Expired => Err(Error::Api(Status {
                status: "Failure".to_string(),
                message: "too old resource version".to_string(),
                reason: "Expired".to_string(),
                code: 410,
            })),
            WatchStep::Events(events) => Ok(futures::stream::iter(events).boxed()),
            WatchStep::Pending => Ok(futures::stream::pending().boxed()),
        }
    }
}

type EventLog = Arc<Mutex<Vec<(EventType, String)>>>;

fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

async fn settle(predicate: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reflector did not settle in time");
}

#[tokio::test(start_paused = true)]
async fn mirrors_the_stream_into_the_store() {
    let source = MockSource::new(
        vec![
            ListStep::Page {
                items: vec![object("a", "1")],
                version: "1",
                continuation: Some("more"),
            },
            ListStep::Page {
                items: vec![object("b", "2")],
                version: "2",
                continuation: None,
            },
        ],
        vec![
            WatchStep::Events(vec![
                Ok(WatchEvent::Added(object("c", "3"))),
                Ok(WatchEvent::Modified(object("a", "4"))),
                Ok(WatchEvent::Deleted(object("b", "5"))),
            ]),
            WatchStep::Pending,
        ],
    );

    let cache: Cache<TestObject> = Cache::new();
    let events = event_log();

    let task = Reflector::new(source.clone(), cache.clone(), Scope::Cluster)
        .with_retry(RetryPolicy::fixed(Duration::from_secs(1)))
        .on_event({
            let events = Arc::clone(&events);
            move |event_type, object: &TestObject| {
                events
                    .lock()
                    .unwrap()
                    .push((event_type, object.metadata.name.clone()));
            }
        })
        .spawn();

    settle(|| events.lock().unwrap().len() == 3).await;

    let mut keys = cache.list_keys();
    keys.sort();
    assert_eq!(keys, vec!["default/a", "default/c"]);

    let updated = cache.get_by_key("default/a").unwrap();
    assert_eq!(updated.metadata.resource_version, "4");

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            (EventType::Added, "c".to_string()),
            (EventType::Modified, "a".to_string()),
            (EventType::Deleted, "b".to_string()),
        ]
    );

    // the initial watch starts at the list version, the reconnect after the
    // stream ended resumes at the last delivered version
    settle(|| source.watched_versions().len() == 2).await;
    assert_eq!(source.watched_versions(), vec!["2", "5"]);

    task.cancel();
    task.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reconnect_resumes_from_the_last_observed_version() {
    let source = MockSource::new(
        vec![ListStep::Page {
            items: Vec::new(),
            version: "10",
            continuation: None,
        }],
        vec![
            WatchStep::Events(vec![
                Ok(WatchEvent::Added(object("a", "100"))),
                Err(Error::Validation("scripted read failure".into())),
            ]),
            WatchStep::Pending,
        ],
    );

    let cache: Cache<TestObject> = Cache::new();
    let task = Reflector::new(source.clone(), cache.clone(), Scope::Cluster)
        .with_retry(RetryPolicy::fixed(Duration::from_secs(1)))
        .spawn();

    settle(|| source.watched_versions().len() == 2).await;
    assert_eq!(source.watched_versions(), vec!["10", "100"]);

    // one list only; the failure resumed instead of relisting
    assert_eq!(source.list_calls(), 1);

    task.cancel();
    task.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn expired_version_on_connect_triggers_a_relist() {
    let source = MockSource::new(
        vec![
            ListStep::Page {
                items: vec![object("a", "1")],
                version: "1",
                continuation: None,
            },
            ListStep::Page {
                items: vec![object("b", "20")],
                version: "20",
                continuation: None,
            },
        ],
        vec![WatchStep::Expired, WatchStep::Pending],
    );

    let cache: Cache<TestObject> = Cache::new();
    let task = Reflector::new(source.clone(), cache.clone(), Scope::Cluster)
        .with_retry(RetryPolicy::fixed(Duration::from_secs(1)))
        .spawn();

    settle(|| source.list_calls() == 2).await;
    settle(|| source.watched_versions().len() == 2).await;

    // the mirror was rebuilt wholesale, not patched
    assert_eq!(cache.list_keys(), vec!["default/b"]);
    assert_eq!(source.watched_versions(), vec!["1", "20"]);

    task.cancel();
    task.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn expired_version_in_stream_triggers_a_relist() {
    let source = MockSource::new(
        vec![
            ListStep::Page {
                items: vec![object("a", "1")],
                version: "1",
                continuation: None,
            },
            ListStep::Page {
                items: Vec::new(),
                version: "30",
                continuation: None,
            },
        ],
        vec![
            WatchStep::Events(vec![Ok(WatchEvent::Error(Status {
                status: "Failure".to_string(),
                message: "too old resource version".to_string(),
                reason: "Expired".to_string(),
                code: 410,
            }))]),
            WatchStep::Pending,
        ],
    );

    let cache: Cache<TestObject> = Cache::new();
    let task = Reflector::new(source.clone(), cache.clone(), Scope::Cluster)
        .with_retry(RetryPolicy::fixed(Duration::from_secs(1)))
        .spawn();

    settle(|| source.list_calls() == 2).await;
    assert!(cache.is_empty());
    assert_eq!(source.watched_versions(), vec!["1", "30"]);

    task.cancel();
    task.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn exhausted_retry_budget_is_reported_exactly_once() {
    // three failures allowed, and the script proves there is no fourth
    // connection attempt: an unscripted call would panic the task
    let source = MockSource::new(
        vec![ListStep::Fail, ListStep::Fail, ListStep::Fail],
        Vec::new(),
    );

    let cache: Cache<TestObject> = Cache::new();
    let errors = Arc::new(Mutex::new(Vec::new()));

    let task = Reflector::new(source.clone(), cache, Scope::Cluster)
        .with_retry(RetryPolicy::fixed(Duration::from_secs(1)).max_attempts(3))
        .on_error({
            let errors = Arc::clone(&errors);
            move |err: &ReflectorError| errors.lock().unwrap().push(err.to_string())
        })
        .spawn();

    let result = task.join().await;
    assert!(matches!(
        result,
        Err(ReflectorError::MaxRetriesReached { attempts: 3 })
    ));
    assert_eq!(source.list_calls(), 3);
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn never_retry_fails_the_initiating_call() {
    let source = MockSource::new(vec![ListStep::Fail], Vec::new());
    let cache: Cache<TestObject> = Cache::new();

    let (_canceller, token) = cancellation();
    let result = Reflector::new(source, cache, Scope::Cluster)
        .with_retry(RetryPolicy::never())
        .run(token)
        .await;

    assert!(matches!(
        result,
        Err(ReflectorError::MaxRetriesReached { attempts: 1 })
    ));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_is_prompt() {
    let source = MockSource::new(
        vec![ListStep::Page {
            items: Vec::new(),
            version: "1",
            continuation: None,
        }],
        vec![WatchStep::Fail],
    );

    let cache: Cache<TestObject> = Cache::new();
    let errors = Arc::new(Mutex::new(Vec::new()));

    let task = Reflector::new(source.clone(), cache, Scope::Cluster)
        .with_retry(RetryPolicy::fixed(Duration::from_secs(3600)))
        .on_error({
            let errors = Arc::clone(&errors);
            move |err: &ReflectorError| errors.lock().unwrap().push(err.to_string())
        })
        .spawn();

    // wait for the task to enter its hour-long backoff sleep
    settle(|| source.watched_versions().len() == 1).await;

    let start = tokio::time::Instant::now();
    task.cancel();
    task.cancel(); // idempotent
    task.join().await.unwrap();

    // stopping did not wait out the scheduled delay, and produced no
    // callbacks
    assert!(start.elapsed() < Duration::from_secs(3600));
    assert!(errors.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_while_streaming_stops_deliveries() {
    let source = MockSource::new(
        vec![ListStep::Page {
            items: vec![object("a", "1")],
            version: "1",
            continuation: None,
        }],
        vec![WatchStep::Pending],
    );

    let cache: Cache<TestObject> = Cache::new();
    let task = Reflector::new(source.clone(), cache.clone(), Scope::Cluster).spawn();

    settle(|| !cache.is_empty()).await;

    task.cancel();
    task.join().await.unwrap();
    assert_eq!(cache.list_keys(), vec!["default/a"]);
}

#[tokio::test(start_paused = true)]
async fn unkeyable_object_terminates_the_task() {
    let source = MockSource::new(
        vec![ListStep::Page {
            items: Vec::new(),
            version: "1",
            continuation: None,
        }],
        // an object with no name cannot be keyed; a data defect, not retried
        vec![WatchStep::Events(vec![Ok(WatchEvent::Added(object(
            "", "7",
        )))])],
    );

    let cache: Cache<TestObject> = Cache::new();
    let errors = Arc::new(Mutex::new(Vec::new()));

    let task = Reflector::new(source, cache, Scope::Cluster)
        .on_error({
            let errors = Arc::clone(&errors);
            move |err: &ReflectorError| errors.lock().unwrap().push(err.to_string())
        })
        .spawn();

    let result = task.join().await;
    assert!(matches!(result, Err(ReflectorError::InvalidObject(_))));
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn bookmarks_advance_the_cursor_without_deliveries() {
    let source = MockSource::new(
        vec![ListStep::Page {
            items: Vec::new(),
            version: "1",
            continuation: None,
        }],
        vec![
            WatchStep::Events(vec![Ok(WatchEvent::Bookmark(
                serde_json::from_str(r#"{"metadata":{"resourceVersion":"50"}}"#).unwrap(),
            ))]),
            WatchStep::Pending,
        ],
    );

    let cache: Cache<TestObject> = Cache::new();
    let events = event_log();

    let task = Reflector::new(source.clone(), cache.clone(), Scope::Cluster)
        .with_retry(RetryPolicy::fixed(Duration::from_secs(1)))
        .on_event({
            let events = Arc::clone(&events);
            move |event_type, object: &TestObject| {
                events
                    .lock()
                    .unwrap()
                    .push((event_type, object.metadata.name.clone()));
            }
        })
        .spawn();

    settle(|| source.watched_versions().len() == 2).await;

    // the reconnect picked up the bookmarked version, the store and the
    // callback saw nothing
    assert_eq!(source.watched_versions(), vec!["1", "50"]);
    assert!(cache.is_empty());
    assert!(events.lock().unwrap().is_empty());

    task.cancel();
    task.join().await.unwrap();
}
