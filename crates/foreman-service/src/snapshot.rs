//! Configuration snapshot types.

use serde::{Deserialize, Serialize};

/// Built-in service variant a descriptor asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Tracks how many times the master has been reconfigured.
    Counter,
    /// Key/value properties handed to builds.
    Properties,
    /// A directory builds can work in.
    Workdir,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Counter => write!(f, "counter"),
            Self::Properties => write!(f, "properties"),
            Self::Workdir => write!(f, "workdir"),
        }
    }
}

/// Desired state of one named service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub kind: ServiceKind,
    /// Constructor arguments; interpreted only by the service kind.
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, kind: ServiceKind, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            kind,
            args,
        }
    }
}

/// One fully-resolved configuration generation.
///
/// `extra` carries whatever the rest of the master needs (builders,
/// schedulers); the reconcile engine never looks at it.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot<E = ()> {
    /// Assigned by the configuration loader, one per load.
    pub generation: u64,
    /// Named services in descriptor order. Names must be unique.
    pub services: Vec<ServiceDescriptor>,
    pub extra: E,
}

impl ConfigSnapshot<()> {
    pub fn new(generation: u64, services: Vec<ServiceDescriptor>) -> Self {
        Self {
            generation,
            services,
            extra: (),
        }
    }

    /// A snapshot with no services, used to shut every service down.
    pub fn empty(generation: u64) -> Self {
        Self::new(generation, Vec::new())
    }
}

impl<E> ConfigSnapshot<E> {
    pub fn with_extra(generation: u64, services: Vec<ServiceDescriptor>, extra: E) -> Self {
        Self {
            generation,
            services,
            extra,
        }
    }

    /// Look up a descriptor by name.
    pub fn service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_deserialize() {
        let desc: ServiceDescriptor = serde_json::from_value(serde_json::json!({
            "name": "myService",
            "kind": "counter",
            "args": { "num_reconfig": 1 },
        }))
        .unwrap();
        assert_eq!(desc.name, "myService");
        assert_eq!(desc.kind, ServiceKind::Counter);
        assert_eq!(desc.args["num_reconfig"], 1);
    }

    #[test]
    fn test_descriptor_args_default_to_null() {
        let desc: ServiceDescriptor =
            serde_json::from_value(serde_json::json!({ "name": "p", "kind": "properties" }))
                .unwrap();
        assert!(desc.args.is_null());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: Result<ServiceDescriptor, _> =
            serde_json::from_value(serde_json::json!({ "name": "x", "kind": "mailer" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_snapshot_service_lookup() {
        let snapshot = ConfigSnapshot::new(
            3,
            vec![
                ServiceDescriptor::new("a", ServiceKind::Counter, serde_json::json!({})),
                ServiceDescriptor::new("b", ServiceKind::Properties, serde_json::json!({})),
            ],
        );
        assert_eq!(snapshot.service("b").unwrap().kind, ServiceKind::Properties);
        assert!(snapshot.service("c").is_none());
        assert!(ConfigSnapshot::empty(4).services.is_empty());
    }
}
