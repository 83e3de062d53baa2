use std::time::Duration;

use kubemirror::{Cache, Client, Lister, Pod, Reflector, RetryPolicy, Scope};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let client = Client::new().unwrap();
    let cache: Cache<Pod> = Cache::new();

    let task = Reflector::new(client, cache.clone(), Scope::Cluster)
        .with_retry(
            RetryPolicy::exponential(Duration::from_millis(500), 2, Duration::from_secs(30))
                .jitter(0.1),
        )
        .on_event(|event_type, pod: &Pod| {
            println!(
                "{:?} {}/{}",
                event_type, pod.metadata.namespace, pod.metadata.name
            );
        })
        .spawn();

    let lister = Lister::new(cache);
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(10)).await;

        println!(
            "{} pods mirrored, {} in kube-system",
            lister.list().len(),
            lister.namespaced("kube-system").list().len()
        );
    }

    task.cancel();
    task.join().await.unwrap();
}
