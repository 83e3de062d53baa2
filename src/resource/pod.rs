use serde::Deserialize;

use super::{Metadata, ObjectMeta, Resource};

/// A single application container that you want to run within a pod.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Container {
    /// Name of the container specified as a DNS_LABEL. Each container in a
    /// pod must have a unique name (DNS_LABEL). Cannot be updated.
    pub name: String,

    /// Container image name.
    ///
    /// More info: https://kubernetes.io/docs/concepts/containers/images
    #[serde(default)]
    pub image: String,
}

/// PodSpec is a description of a pod.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#podspec-v1-core
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PodSpec {
    /// NodeName is a request to schedule this pod onto a specific node. If
    /// it is non-empty, the scheduler simply schedules this pod onto that
    /// node, assuming that it fits resource requirements.
    #[serde(default, rename = "nodeName")]
    pub node_name: String,

    /// List of containers belonging to the pod. Containers cannot currently
    /// be added or removed. There must be at least one container in a Pod.
    #[serde(default)]
    pub containers: Vec<Container>,
}

/// ContainerStatus contains details for the current status of this container.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ContainerStatus {
    /// Name is a DNS_LABEL representing the unique name of the container.
    pub name: String,

    /// Ready specifies whether the container is currently passing its
    /// readiness check.
    #[serde(default)]
    pub ready: bool,

    /// RestartCount holds the number of times the container has been
    /// restarted.
    #[serde(default, rename = "restartCount")]
    pub restart_count: i32,
}

/// PodStatus represents information about the status of a pod. Status may
/// trail the actual state of a system, especially if the node that hosts the
/// pod cannot contact the control plane.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PodStatus {
    /// The phase of a Pod is a simple, high-level summary of where the Pod
    /// is in its lifecycle, e.g. "Pending", "Running" or "Succeeded".
    ///
    /// More info: https://kubernetes.io/docs/concepts/workloads/pods/pod-lifecycle#pod-phase
    #[serde(default)]
    pub phase: String,

    /// IP address allocated to the pod. Routable at least within the
    /// cluster. Empty if not yet allocated.
    #[serde(default, rename = "podIP")]
    pub pod_ip: String,

    /// The list has one entry per container in the manifest.
    #[serde(default, rename = "containerStatuses")]
    pub container_statuses: Vec<ContainerStatus>,
}

/// Pod is a collection of containers that can run on a host. This resource
/// is created by clients and scheduled onto hosts.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Pod {
    /// Standard object's metadata.
    pub metadata: ObjectMeta,

    /// Specification of the desired behavior of the pod.
    #[serde(default)]
    pub spec: PodSpec,

    /// Most recently observed status of the pod. This data may not be up to
    /// date. Populated by the system.
    #[serde(default)]
    pub status: PodStatus,
}

impl Metadata for Pod {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl Resource for Pod {
    const GROUP: &'static str = "";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "Pod";
    const PLURAL: &'static str = "pods";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode() {
        let data = r#"{
            "metadata": {
                "name": "echo-5df98f6655-m6c7h",
                "namespace": "default",
                "resourceVersion": "12345",
                "labels": { "app": "echo" }
            },
            "spec": {
                "nodeName": "node-1",
                "containers": [ { "name": "echo", "image": "echo:1.0" } ]
            },
            "status": {
                "phase": "Running",
                "podIP": "10.1.2.3"
            }
        }"#;

        let pod = serde_json::from_str::<Pod>(data).unwrap();
        assert_eq!(pod.metadata.name, "echo-5df98f6655-m6c7h");
        assert_eq!(pod.metadata.resource_version, "12345");
        assert_eq!(pod.spec.node_name, "node-1");
        assert_eq!(pod.status.phase, "Running");
    }
}
