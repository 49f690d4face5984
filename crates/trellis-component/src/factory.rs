//! Factory and type-provider SPI.
//!
//! Concrete component behaviors live outside the core. A
//! [`ComponentProvider`] advertises the component/root types it knows,
//! optional per-type metadata, the service contracts its components
//! implement, and optionally instantiates them. Any provider may support
//! only a subset of those capabilities; unsupported instantiation defaults
//! to [`InstantiationError::Unsupported`].
//!
//! A provider may also declare a [`FactoryRedirect`]: instead of
//! instantiating directly, it delegates to another service's control with
//! the fixed shape "accepts a type identifier, returns a reference-wrapped
//! instance".

use serde::{Deserialize, Serialize};
use thiserror::Error;

use trellis_types::{ErrorCode, Lookup};

use crate::component::ComponentRef;
use crate::port::PortType;

/// Identifier for a component or root type, e.g. `core:container`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentType(String);

impl ComponentType {
    /// Wraps a type identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for a service contract, e.g. `script:eval`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceType(String);

impl ServiceType {
    /// Wraps a contract identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque capability tag for a control protocol, for info purposes only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolType(String);

impl ProtocolType {
    /// Wraps a tag.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The tag text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Instantiation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstantiationError {
    /// The provider does not instantiate this type.
    #[error("type not supported by this provider: {0}")]
    Unsupported(ComponentType),
    /// The provider tried and failed.
    #[error("instantiation failed: {0}")]
    Failed(String),
}

impl ErrorCode for InstantiationError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "FACTORY_UNSUPPORTED_TYPE",
            Self::Failed(_) => "FACTORY_INSTANTIATION_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Delegated instantiation: ask the named service's control instead.
///
/// The control accepts one argument (the type identifier as a `Str`) and
/// replies with one `Ref` wrapping the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryRedirect {
    /// Service whose provider performs the instantiation.
    pub service: ServiceType,
    /// Control id on the service's address.
    pub control: String,
}

/// A service contract together with the root type implementing it.
///
/// The hub instantiates one root per descriptor at startup and indexes the
/// contract under that root's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// The contract being provided.
    pub service: ServiceType,
    /// The root type whose instance provides it.
    pub root_type: ComponentType,
}

/// Supplier of component and root types.
///
/// Every method except [`component_types`](Self::component_types) has a
/// default, so a provider implements exactly the capabilities it has.
pub trait ComponentProvider: Send + Sync {
    /// Component types this provider advertises.
    fn component_types(&self) -> Vec<ComponentType>;

    /// Root types this provider advertises.
    fn root_types(&self) -> Vec<ComponentType> {
        Vec::new()
    }

    /// Metadata for one advertised type.
    fn type_metadata(&self, kind: &ComponentType) -> Lookup {
        let _ = kind;
        Lookup::empty()
    }

    /// Service contracts provided by this provider's root types.
    fn services(&self) -> Vec<ServiceDescriptor> {
        Vec::new()
    }

    /// Instantiates a component of `kind`.
    fn create_component(&self, kind: &ComponentType) -> Result<ComponentRef, InstantiationError> {
        Err(InstantiationError::Unsupported(kind.clone()))
    }

    /// Instantiates the component tree for a root of `kind`.
    fn create_root(&self, kind: &ComponentType) -> Result<ComponentRef, InstantiationError> {
        Err(InstantiationError::Unsupported(kind.clone()))
    }

    /// Delegated-instantiation descriptor, if this provider redirects.
    fn redirect(&self) -> Option<FactoryRedirect> {
        None
    }
}

/// Enumerates the concrete port types available in the running system.
pub trait PortTypeProvider: Send + Sync {
    /// Available port capability tags.
    fn port_types(&self) -> Vec<PortType>;
}

/// Enumerates the concrete control protocols available in the running
/// system.
pub trait ProtocolTypeProvider: Send + Sync {
    /// Available protocol capability tags.
    fn protocol_types(&self) -> Vec<ProtocolType>;
}
