use foldhash::fast::RandomState;
use std::collections::HashMap;

use crate::{
    MethodDescriptor, ServiceDescriptor,
    dispatch::{BoxFuture, ServerCall, ServiceBinding},
    error::{Error, ErrorKind, Result},
};

/// Resolved target of a call: the bound service and the method descriptor.
#[derive(Clone, Debug)]
pub struct Route {
    binding: ServiceBinding,
    method: &'static MethodDescriptor,
}

impl Route {
    #[must_use]
    pub fn method(&self) -> &'static MethodDescriptor {
        self.method
    }

    pub fn dispatch(&self, call: ServerCall) -> BoxFuture {
        self.binding.dispatch(self.method.id(), call)
    }
}

/// Maps full method names to bound services.
///
/// Built once before the server starts and read-only afterwards.
#[derive(Default)]
pub struct Router {
    bindings: Vec<ServiceBinding>,
    methods: HashMap<String, Route, RandomState>,
}

impl Router {
    /// Adds every method of a bound service.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a service with the same name was added
    /// before.
    pub fn add_service(&mut self, binding: ServiceBinding) -> Result<()> {
        let descriptor = binding.descriptor();
        if self.find_service(descriptor.name()).is_some() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("service {} is already registered", descriptor.name()),
            ));
        }
        for &method in descriptor.methods() {
            self.methods.insert(
                method.full_name().to_string(),
                Route {
                    binding: binding.clone(),
                    method,
                },
            );
        }
        tracing::info!(
            "service {} registered with {} methods",
            descriptor.name(),
            descriptor.methods().len()
        );
        self.bindings.push(binding);
        Ok(())
    }

    #[must_use]
    pub fn route(&self, full_name: &str) -> Option<&Route> {
        self.methods.get(full_name)
    }

    pub fn services(&self) -> impl Iterator<Item = &'static ServiceDescriptor> + '_ {
        self.bindings.iter().map(ServiceBinding::descriptor)
    }

    #[must_use]
    pub fn find_service(&self, name: &str) -> Option<&'static ServiceDescriptor> {
        self.services().find(|s| s.name() == name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &String> {
        self.methods.keys()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.methods.keys())
            .finish()
    }
}
