use futures::StreamExt;
use kubemirror::{Client, Pod, Scope, WatchEvent, WatchOptions};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let client = Client::new().unwrap();

    let version = client.server_version().await.unwrap();
    println!("api server version: {}.{}", version.major, version.minor);

    let options = WatchOptions {
        bookmarks: true,
        ..Default::default()
    };
    let mut stream = client
        .watch::<Pod>(&Scope::Cluster, &options, "0")
        .await
        .unwrap();

    while let Some(result) = stream.next().await {
        match result {
            Ok(WatchEvent::Added(pod)) => {
                println!("added {}/{}", pod.metadata.namespace, pod.metadata.name)
            }
            Ok(WatchEvent::Modified(pod)) => {
                println!("modified {}/{}", pod.metadata.namespace, pod.metadata.name)
            }
            Ok(WatchEvent::Deleted(pod)) => {
                println!("deleted {}/{}", pod.metadata.namespace, pod.metadata.name)
            }
            Ok(WatchEvent::Bookmark(bookmark)) => {
                println!("bookmark at {}", bookmark.metadata.resource_version)
            }
            Ok(WatchEvent::Error(status)) => println!("error event: {}", status.message),
            Err(err) => {
                eprintln!("stream failed: {err}");
                break;
            }
        }
    }
}
