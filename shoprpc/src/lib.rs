#![forbid(unsafe_code)]

extern crate self as shoprpc;

pub use shoprpc_macro::service;

mod error;
pub use error::{Error, ErrorKind, Result};

mod payload;
pub use payload::{Payload, ResponseFrame};

mod codec;
pub use codec::Codec;

mod config;
pub use config::{CallOptions, Metadata, ServerConfig};

mod descriptor;
pub use descriptor::{DescriptorCell, MethodDescriptor, MethodId, MethodType, ServiceDescriptor};

mod context;
pub use context::{CallHandle, CallStatus, Context};

mod stream;
pub use stream::{BlockingResponseStream, RequestSink, RequestStream, ResponseSink, ResponseStream};

pub mod dispatch;

mod router;
pub use router::{Route, Router};

mod call_registry;
pub use call_registry::{CallRegistration, CallRegistry};

mod task_supervisor;
pub use task_supervisor::{TaskSupervisor, TaskSupervisorGuard};

mod channel;
pub use channel::{Channel, ClientCall, LocalChannel};

mod invoker;
pub use invoker::{
    CallInvoker, Callback, ClientStub, ResponseFuture, StreamEvent, StreamObserver, callback,
};

mod state;
pub use state::State;

pub mod services;

mod server;
pub use server::Server;
