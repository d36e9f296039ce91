use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Position of a method in its service's declaration order.
///
/// Assigned when the service is declared and used to pick a dispatch arm
/// without comparing names.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MethodId(u32);

impl MethodId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The call shape of a method.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodType {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl MethodType {
    /// Whether the client may send more than one request message.
    #[must_use]
    pub const fn client_sends_many(self) -> bool {
        matches!(self, MethodType::ClientStreaming | MethodType::BidiStreaming)
    }

    /// Whether the server may send more than one response message.
    #[must_use]
    pub const fn server_sends_many(self) -> bool {
        matches!(self, MethodType::ServerStreaming | MethodType::BidiStreaming)
    }
}

impl std::fmt::Display for MethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

fn assert_valid_name(kind: &str, name: &str) {
    assert!(!name.is_empty(), "{kind} name must not be empty");
    assert!(
        !name.contains('/') && !name.contains(char::is_whitespace),
        "invalid {kind} name: {name:?}"
    );
}

/// Immutable description of one RPC method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    service_name: &'static str,
    method_name: &'static str,
    full_name: String,
    method_type: MethodType,
    id: MethodId,
    request_type: &'static str,
    response_type: &'static str,
}

impl MethodDescriptor {
    /// Builds a descriptor from static metadata.
    ///
    /// # Panics
    ///
    /// Panics if a name is empty or contains `/` or whitespace, or if a type
    /// tag is empty. Descriptor metadata is fixed at compile time, so this is
    /// a defect in the service declaration.
    #[must_use]
    pub fn new(
        service_name: &'static str,
        method_name: &'static str,
        method_type: MethodType,
        id: MethodId,
        request_type: &'static str,
        response_type: &'static str,
    ) -> Self {
        assert_valid_name("service", service_name);
        assert_valid_name("method", method_name);
        assert!(
            !request_type.is_empty() && !response_type.is_empty(),
            "method {service_name}/{method_name} has an empty type tag"
        );
        Self {
            service_name,
            method_name,
            full_name: format!("{service_name}/{method_name}"),
            method_type,
            id,
            request_type,
            response_type,
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &'static str {
        self.service_name
    }

    #[must_use]
    pub fn method_name(&self) -> &'static str {
        self.method_name
    }

    /// `"<service>/<method>"`, the routing key of the method.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    #[must_use]
    pub fn method_type(&self) -> MethodType {
        self.method_type
    }

    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    #[must_use]
    pub fn request_type(&self) -> &'static str {
        self.request_type
    }

    #[must_use]
    pub fn response_type(&self) -> &'static str {
        self.response_type
    }
}

impl std::fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Immutable description of a service: its name and its methods in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: &'static str,
    methods: Vec<&'static MethodDescriptor>,
}

impl ServiceDescriptor {
    /// # Panics
    ///
    /// Panics if a method belongs to another service, if method names repeat,
    /// or if method ids do not follow declaration order.
    #[must_use]
    pub fn new(name: &'static str, methods: Vec<&'static MethodDescriptor>) -> Self {
        assert_valid_name("service", name);
        for (index, method) in methods.iter().enumerate() {
            assert_eq!(
                method.service_name(),
                name,
                "method {method} does not belong to service {name}"
            );
            assert_eq!(
                method.id().index(),
                index,
                "method {method} is declared at position {index}"
            );
            assert!(
                methods[..index]
                    .iter()
                    .all(|m| m.method_name() != method.method_name()),
                "duplicate method {method}"
            );
        }
        Self { name, methods }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn methods(&self) -> &[&'static MethodDescriptor] {
        &self.methods
    }

    #[must_use]
    pub fn method(&self, id: MethodId) -> Option<&'static MethodDescriptor> {
        self.methods.get(id.index()).copied()
    }

    /// Looks a method up by its short name, e.g. `"ListRecommendations"`.
    #[must_use]
    pub fn find_method(&self, method_name: &str) -> Option<&'static MethodDescriptor> {
        self.methods
            .iter()
            .find(|m| m.method_name() == method_name)
            .copied()
    }
}

/// Process-wide slot for a descriptor, built on first access and never torn
/// down.
///
/// Concurrent first accesses block on a single construction; every later
/// read is lock-free.
#[derive(Debug)]
pub struct DescriptorCell<T> {
    cell: OnceLock<T>,
}

impl<T> DescriptorCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get_or_init(&'static self, init: impl FnOnce() -> T) -> &'static T {
        self.cell.get_or_init(|| {
            let value = init();
            tracing::debug!("descriptor initialized: {}", std::any::type_name::<T>());
            value
        })
    }

    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }
}

impl<T> Default for DescriptorCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
