//! A lightweight Kubernetes watch client that maintains locally indexed,
//! queryable mirrors of cluster state.
//!
//! A [`Reflector`] drives a long-lived watch against the API server and
//! applies every observed change to a [`Cache`], which any number of readers
//! query concurrently through [`Lister`] views or its index lookups. Lost
//! connections are retried per [`RetryPolicy`], and an expired resume cursor
//! falls back to a full relist, so the mirror heals itself without caller
//! involvement.

mod cancel;
mod client;
mod config;
mod follow;
mod reflector;
mod resource;
mod store;

pub use backoff::RetryPolicy;
pub use cancel::{CancelToken, Canceller, cancellation};
pub use client::{
    Bookmark, BookmarkMeta, Client, Error, ListOptions, LogOptions, Scope, Status, Version,
    VersionMatch, WatchEvent, WatchOptions,
};
pub use config::{Auth, Config};
pub use follow::{FollowTask, Follower};
pub use reflector::{
    Error as ReflectorError, EventStream, EventType, Reflector, WatchSource, WatchTask,
};
pub use resource::{
    Container, ContainerStatus, DynamicObject, ListMeta, Metadata, ObjectList, ObjectMeta, Pod,
    PodSpec, PodStatus, Resource,
};
pub use store::{
    Cache, Error as StoreError, IndexFn, KeyFn, Lister, NAMESPACE_INDEX, Store, namespace_index,
    object_key,
};
