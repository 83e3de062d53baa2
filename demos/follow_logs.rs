use std::env;

use kubemirror::{Client, Follower};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let namespace = args.next().unwrap_or_else(|| "default".to_string());
    let pod = args.next().expect("usage: follow_logs <namespace> <pod>");

    let client = Client::new().unwrap();

    let task = Follower::new(client, namespace, pod)
        .on_line(|line| println!("{line}"))
        .spawn();

    // runs until the pod goes away or the stream breaks
    task.join().await.unwrap();
}
