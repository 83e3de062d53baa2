mod dynamic;
mod metadata;
mod pod;

pub use dynamic::DynamicObject;
pub use metadata::{ListMeta, ObjectMeta};
pub use pod::{Container, ContainerStatus, Pod, PodSpec, PodStatus};

use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Access to the standard metadata every mirrored object carries.
///
/// Key and index functions derive store keys and index values through this
/// trait, so the store never interprets an object's other fields.
pub trait Metadata {
    fn metadata(&self) -> &ObjectMeta;
}

/// An accessor trait for a Kubernetes resource of a statically known kind.
pub trait Resource: DeserializeOwned + Metadata {
    /// The group of the resource, or the empty string if the resource doesn't
    /// have a group.
    const GROUP: &'static str;

    /// The version of the resource.
    const VERSION: &'static str;

    /// The kind of the resource, e.g. "Pod".
    const KIND: &'static str;

    /// The plural of this resource, which is used to construct URLs.
    const PLURAL: &'static str;

    /// Creates a url path for http requests for this resource.
    fn url_path(namespace: Option<&str>) -> String {
        let group = if Self::GROUP.is_empty() {
            "api"
        } else {
            "apis"
        };
        let api_version = if Self::GROUP.is_empty() {
            Self::VERSION.to_string()
        } else {
            format!("{}/{}", Self::GROUP, Self::VERSION)
        };
        let namespace = match namespace {
            Some(namespace) => format!("namespaces/{}/", namespace),
            None => String::new(),
        };
        let plural = Self::PLURAL;

        format!("/{group}/{api_version}/{namespace}{plural}")
    }
}

/// A generic Kubernetes object list.
///
/// This is used instead of a full struct for `PodList` and friends, since
/// the list wrappers only ever differ in their item type.
#[derive(Debug, Deserialize)]
pub struct ObjectList<T> {
    /// ListMeta, only really used for its `resourceVersion` and the
    /// continue token of chunked lists.
    #[serde(default)]
    pub metadata: ListMeta,

    /// The items we are actually interested in.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_group_path() {
        assert_eq!(Pod::url_path(None), "/api/v1/pods");
        assert_eq!(Pod::url_path(Some("kube-system")), "/api/v1/namespaces/kube-system/pods");
    }

    #[test]
    fn named_group_path() {
        struct Ingress;

        impl Metadata for Ingress {
            fn metadata(&self) -> &ObjectMeta {
                unreachable!()
            }
        }

        impl<'de> Deserialize<'de> for Ingress {
            fn deserialize<D: serde::Deserializer<'de>>(_: D) -> Result<Self, D::Error> {
                unreachable!()
            }
        }

        impl Resource for Ingress {
            const GROUP: &'static str = "networking.k8s.io";
            const VERSION: &'static str = "v1";
            const KIND: &'static str = "Ingress";
            const PLURAL: &'static str = "ingresses";
        }

        assert_eq!(
            Ingress::url_path(Some("default")),
            "/apis/networking.k8s.io/v1/namespaces/default/ingresses"
        );
    }
}
