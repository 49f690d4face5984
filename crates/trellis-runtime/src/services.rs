//! Service discovery - contracts to provider addresses, factories to
//! instances.
//!
//! [`Services`] is the immutable index built at hub activation: every
//! registered [`ComponentProvider`] is scanned, one root is instantiated
//! per declared [`ServiceDescriptor`], and the contract is indexed under
//! that root's address. `locate` answers with the primary (first
//! registered) address, `locate_all` with every known one, primary first.
//!
//! [`Factories`] is the companion index for instantiation: component/root
//! type → provider. A provider that declares a [`FactoryRedirect`] is
//! never asked to instantiate directly; callers get the redirect and
//! follow it with a call to the named service's control (one `Str` type
//! identifier in, one `Ref`-wrapped instance out).

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use trellis_component::{
    ComponentProvider, ComponentRef, ComponentType, FactoryRedirect, InstantiationError,
    ServiceType,
};
use trellis_types::{ComponentAddress, ErrorCode, Lookup};

/// Service resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// No provider registered for the contract.
    #[error("no provider registered for service {0}")]
    Unavailable(ServiceType),
}

impl ErrorCode for ServiceError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    fn is_recoverable(&self) -> bool {
        // A provider may be registered later.
        true
    }
}

#[derive(Debug, Default)]
struct ServicesInner {
    index: HashMap<ServiceType, Vec<ComponentAddress>>,
}

/// Immutable service index; cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct Services {
    inner: Arc<ServicesInner>,
}

impl Services {
    /// Starts building an index.
    #[must_use]
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder {
            index: HashMap::new(),
        }
    }

    /// The primary address registered for `service`.
    pub fn locate(&self, service: &ServiceType) -> Result<ComponentAddress, ServiceError> {
        self.inner
            .index
            .get(service)
            .and_then(|all| all.first())
            .cloned()
            .ok_or_else(|| ServiceError::Unavailable(service.clone()))
    }

    /// Every known address for `service`, primary first.
    #[must_use]
    pub fn locate_all(&self, service: &ServiceType) -> Vec<ComponentAddress> {
        self.inner.index.get(service).cloned().unwrap_or_default()
    }

    /// The known contracts, in no particular order.
    pub fn contracts(&self) -> impl Iterator<Item = &ServiceType> {
        self.inner.index.keys()
    }
}

/// Builder used by the bootstrap step.
pub struct ServicesBuilder {
    index: HashMap<ServiceType, Vec<ComponentAddress>>,
}

impl ServicesBuilder {
    /// Registers an implementation; the first registration per contract
    /// becomes the primary.
    pub fn register(&mut self, service: ServiceType, address: ComponentAddress) {
        debug!(service = %service, address = %address, "service registered");
        self.index.entry(service).or_default().push(address);
    }

    /// Finishes the immutable index.
    #[must_use]
    pub fn build(self) -> Services {
        Services {
            inner: Arc::new(ServicesInner { index: self.index }),
        }
    }
}

/// Outcome of asking the factory index for a component.
pub enum CreateOutcome {
    /// A live instance.
    Instance(ComponentRef),
    /// Instantiation is delegated; follow the redirect with a call.
    Redirect(FactoryRedirect),
}

/// Instantiation index: type identifier → providing factory.
#[derive(Default)]
pub struct Factories {
    components: HashMap<ComponentType, Arc<dyn ComponentProvider>>,
    roots: HashMap<ComponentType, Arc<dyn ComponentProvider>>,
}

impl Factories {
    /// Indexes every provider's advertised types. Earlier providers win
    /// on conflicting type identifiers.
    #[must_use]
    pub fn index(providers: &[Arc<dyn ComponentProvider>]) -> Self {
        let mut components = HashMap::new();
        let mut roots = HashMap::new();
        for provider in providers {
            for kind in provider.component_types() {
                components
                    .entry(kind)
                    .or_insert_with(|| Arc::clone(provider));
            }
            for kind in provider.root_types() {
                roots.entry(kind).or_insert_with(|| Arc::clone(provider));
            }
        }
        Self { components, roots }
    }

    /// All advertised component types, sorted.
    #[must_use]
    pub fn component_types(&self) -> Vec<ComponentType> {
        let mut all: Vec<ComponentType> = self.components.keys().cloned().collect();
        all.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        all
    }

    /// All advertised root types, sorted.
    #[must_use]
    pub fn root_types(&self) -> Vec<ComponentType> {
        let mut all: Vec<ComponentType> = self.roots.keys().cloned().collect();
        all.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        all
    }

    /// Metadata for one advertised component or root type.
    #[must_use]
    pub fn type_metadata(&self, kind: &ComponentType) -> Lookup {
        self.components
            .get(kind)
            .or_else(|| self.roots.get(kind))
            .map(|p| p.type_metadata(kind))
            .unwrap_or_default()
    }

    /// Instantiates a component of `kind`, or hands back the provider's
    /// redirect.
    pub fn create_component(&self, kind: &ComponentType) -> Result<CreateOutcome, InstantiationError> {
        let provider = self
            .components
            .get(kind)
            .ok_or_else(|| InstantiationError::Unsupported(kind.clone()))?;
        if let Some(redirect) = provider.redirect() {
            return Ok(CreateOutcome::Redirect(redirect));
        }
        provider.create_component(kind).map(CreateOutcome::Instance)
    }

    /// Instantiates the component tree for a root of `kind`.
    pub fn create_root(&self, kind: &ComponentType) -> Result<ComponentRef, InstantiationError> {
        let provider = self
            .roots
            .get(kind)
            .ok_or_else(|| InstantiationError::Unsupported(kind.clone()))?;
        provider.create_root(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_component::{Component, ServiceDescriptor};
    use trellis_types::check_error_codes;

    fn addr(text: &str) -> ComponentAddress {
        ComponentAddress::parse(text).unwrap()
    }

    #[test]
    fn error_codes() {
        check_error_codes(
            &[ServiceError::Unavailable(ServiceType::new("x"))],
            "SERVICE_",
        );
    }

    #[test]
    fn locate_prefers_primary() {
        let contract = ServiceType::new("script:eval");
        let mut builder = Services::builder();
        builder.register(contract.clone(), addr("/first"));
        builder.register(contract.clone(), addr("/second"));
        let services = builder.build();

        assert_eq!(services.locate(&contract).unwrap(), addr("/first"));
        assert_eq!(
            services.locate_all(&contract),
            vec![addr("/first"), addr("/second")]
        );
    }

    #[test]
    fn locate_missing_is_unavailable() {
        let services = Services::builder().build();
        let contract = ServiceType::new("absent");
        assert_eq!(
            services.locate(&contract).unwrap_err(),
            ServiceError::Unavailable(contract.clone())
        );
        assert!(services.locate_all(&contract).is_empty());
    }

    struct DirectProvider;

    impl ComponentProvider for DirectProvider {
        fn component_types(&self) -> Vec<ComponentType> {
            vec![ComponentType::new("test:gain")]
        }
        fn root_types(&self) -> Vec<ComponentType> {
            vec![ComponentType::new("test:root")]
        }
        fn create_component(
            &self,
            kind: &ComponentType,
        ) -> Result<ComponentRef, InstantiationError> {
            Ok(Component::build(kind.clone()).into_ref())
        }
        fn create_root(&self, kind: &ComponentType) -> Result<ComponentRef, InstantiationError> {
            Ok(Component::build(kind.clone()).into_ref())
        }
        fn services(&self) -> Vec<ServiceDescriptor> {
            vec![ServiceDescriptor {
                service: ServiceType::new("test:service"),
                root_type: ComponentType::new("test:root"),
            }]
        }
    }

    struct RedirectingProvider;

    impl ComponentProvider for RedirectingProvider {
        fn component_types(&self) -> Vec<ComponentType> {
            vec![ComponentType::new("remote:widget")]
        }
        fn redirect(&self) -> Option<FactoryRedirect> {
            Some(FactoryRedirect {
                service: ServiceType::new("remote:factory"),
                control: "new-instance".into(),
            })
        }
    }

    #[test]
    fn factories_instantiate_directly() {
        let providers: Vec<Arc<dyn ComponentProvider>> = vec![Arc::new(DirectProvider)];
        let factories = Factories::index(&providers);

        assert_eq!(factories.component_types().len(), 1);
        assert_eq!(factories.root_types().len(), 1);
        match factories
            .create_component(&ComponentType::new("test:gain"))
            .unwrap()
        {
            CreateOutcome::Instance(c) => {
                assert_eq!(c.lock().component_type().as_str(), "test:gain");
            }
            CreateOutcome::Redirect(_) => panic!("expected a direct instance"),
        }
        assert!(factories.create_root(&ComponentType::new("test:root")).is_ok());
    }

    #[test]
    fn factories_surface_redirects() {
        let providers: Vec<Arc<dyn ComponentProvider>> = vec![Arc::new(RedirectingProvider)];
        let factories = Factories::index(&providers);

        match factories
            .create_component(&ComponentType::new("remote:widget"))
            .unwrap()
        {
            CreateOutcome::Redirect(r) => {
                assert_eq!(r.service, ServiceType::new("remote:factory"));
                assert_eq!(r.control, "new-instance");
            }
            CreateOutcome::Instance(_) => panic!("expected a redirect"),
        }
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let factories = Factories::index(&[]);
        let kind = ComponentType::new("nope");
        assert!(matches!(
            factories.create_component(&kind),
            Err(InstantiationError::Unsupported(k)) if k == kind
        ));
        assert!(factories.create_root(&kind).is_err());
        assert!(factories.type_metadata(&kind).is_empty());
    }
}
