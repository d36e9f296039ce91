use serde::{Deserialize, Serialize};

use crate::{
    Context, Error, ErrorKind, MethodDescriptor, MethodType, Result, ServiceDescriptor,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub full_name: String,
    pub method_type: MethodType,
    pub request_type: String,
    pub response_type: String,
}

impl From<&MethodDescriptor> for MethodInfo {
    fn from(method: &MethodDescriptor) -> Self {
        Self {
            name: method.method_name().to_string(),
            full_name: method.full_name().to_string(),
            method_type: method.method_type(),
            request_type: method.request_type().to_string(),
            response_type: method.response_type().to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub methods: Vec<MethodInfo>,
}

impl From<&ServiceDescriptor> for ServiceInfo {
    fn from(service: &ServiceDescriptor) -> Self {
        Self {
            name: service.name().to_string(),
            methods: service.methods().iter().map(|&m| m.into()).collect(),
        }
    }
}

#[crate::service(package = "shoprpc")]
pub trait MetaService {
    async fn list_services(&self, ctx: &Context, req: ()) -> Result<Vec<String>>;

    async fn describe_service(&self, ctx: &Context, name: String) -> Result<ServiceInfo>;

    /// Full names of every method the server routes.
    async fn list_methods(&self, ctx: &Context, req: ()) -> Result<Vec<String>>;
}

/// Answers discovery queries from the descriptors registered on a server.
#[derive(Debug, Default)]
pub struct Reflection {
    services: Vec<&'static ServiceDescriptor>,
}

impl Reflection {
    #[must_use]
    pub fn new(services: Vec<&'static ServiceDescriptor>) -> Self {
        Self { services }
    }
}

impl MetaService for Reflection {
    async fn list_services(&self, _: &Context, (): ()) -> Result<Vec<String>> {
        Ok(self.services.iter().map(|s| s.name().to_string()).collect())
    }

    async fn describe_service(&self, _: &Context, name: String) -> Result<ServiceInfo> {
        self.services
            .iter()
            .find(|s| s.name() == name)
            .map(|&s| s.into())
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("unknown service {name}")))
    }

    async fn list_methods(&self, _: &Context, (): ()) -> Result<Vec<String>> {
        Ok(self
            .services
            .iter()
            .flat_map(|s| s.methods().iter().map(|m| m.full_name().to_string()))
            .collect())
    }
}
