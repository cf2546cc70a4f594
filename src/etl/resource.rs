//! The external-resource protocol.
//!
//! Grammars refer to each other by reference: a system id (location) and/or
//! a public id (name). How a reference is opened is external to the core;
//! only the result crosses the boundary, together with a descriptor and the
//! transitive set of resources it used, which is what cache invalidation
//! reasoning works from.

use serde::Serialize;
use std::fmt;

/// Nature tag for compiled grammar artifacts.
pub const GRAMMAR_NATURE: &str = "etl.grammar";

/// Addressing for an external resource. At least one id must be set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceReference {
    pub system_id: Option<String>,
    pub public_id: Option<String>,
}

impl ResourceReference {
    pub fn new(system_id: Option<String>, public_id: Option<String>) -> Self {
        assert!(
            system_id.is_some() || public_id.is_some(),
            "resource reference needs a system id or a public id"
        );
        ResourceReference {
            system_id,
            public_id,
        }
    }

    pub fn system(system_id: impl Into<String>) -> Self {
        ResourceReference::new(Some(system_id.into()), None)
    }

    pub fn public(public_id: impl Into<String>) -> Self {
        ResourceReference::new(None, Some(public_id.into()))
    }

    /// The identity a cache keys on: the system id when present, the
    /// public id otherwise.
    pub fn identity(&self) -> &str {
        self.system_id
            .as_deref()
            .or(self.public_id.as_deref())
            .unwrap_or_default()
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.system_id, &self.public_id) {
            (Some(s), Some(p)) => write!(f, "{} ({})", s, p),
            (Some(s), None) => write!(f, "{}", s),
            (None, Some(p)) => write!(f, "{}", p),
            (None, None) => write!(f, "<unaddressed>"),
        }
    }
}

/// A request for one resource, with the context that asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRequest {
    pub reference: ResourceReference,
    pub requesting_context: String,
}

impl ResourceRequest {
    pub fn new(reference: ResourceReference, requesting_context: impl Into<String>) -> Self {
        ResourceRequest {
            reference,
            requesting_context: requesting_context.into(),
        }
    }
}

/// One dependency edge: a resource that was consulted while producing an
/// artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceUsage {
    pub reference: ResourceReference,
    pub descriptor: ResourceDescriptor,
    pub role: String,
}

/// Identity and version information for a produced artifact, plus the
/// resources it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    pub identity: String,
    pub nature: String,
    pub version_stamp: String,
    pub depends_on: Vec<ResourceUsage>,
}

impl ResourceDescriptor {
    pub fn new(
        identity: impl Into<String>,
        nature: impl Into<String>,
        version_stamp: impl Into<String>,
    ) -> Self {
        ResourceDescriptor {
            identity: identity.into(),
            nature: nature.into(),
            version_stamp: version_stamp.into(),
            depends_on: Vec::new(),
        }
    }
}

/// A resolved resource: the original request paired with the produced
/// artifact, its descriptor, and everything used along the way.
#[derive(Debug, Clone)]
pub struct ResolvedObject<T> {
    pub request: ResourceRequest,
    pub usages: Vec<ResourceUsage>,
    pub descriptor: ResourceDescriptor,
    pub object: T,
}

impl<T> ResolvedObject<T> {
    pub fn new(
        request: ResourceRequest,
        descriptor: ResourceDescriptor,
        object: T,
    ) -> Self {
        ResolvedObject {
            request,
            usages: Vec::new(),
            descriptor,
            object,
        }
    }
}
