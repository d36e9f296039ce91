//! # ShopRPC Procedural Macros
//!
//! ## `#[service]` Macro
//!
//! Turns a trait into an RPC service. For a trait `RecommendationService`
//! declared with `#[service(package = "catalog")]` the macro generates:
//! - The trait itself, every method given a default body that answers
//!   `Unimplemented`, plus `bind_service` to hand an instance to a router
//! - A module `recommendation_service` with the lazily built method and
//!   service descriptors, a `Method` enum used as dispatch tag, the dispatch
//!   table, and the `Stub`, `BlockingStub` and `FutureStub` clients
//!
//! ### Example
//!
//! ```rust,ignore
//! #[shoprpc::service(package = "catalog")]
//! pub trait RecommendationService {
//!     async fn list_recommendations(
//!         &self,
//!         ctx: &Context,
//!         req: ListRecommendationsRequest,
//!     ) -> Result<ListRecommendationsResponse>;
//! }
//! ```
//!
//! ### Method shapes
//!
//! - `async fn m(&self, ctx: &Context, req: Req) -> Result<Rsp>`: unary
//! - `async fn m(&self, ctx: &Context, req: Req, sink: ResponseSink<Rsp>) -> Result<()>`:
//!   server streaming
//! - `async fn m(&self, ctx: &Context, reqs: RequestStream<Req>) -> Result<Rsp>`:
//!   client streaming
//! - `async fn m(&self, ctx: &Context, reqs: RequestStream<Req>, sink: ResponseSink<Rsp>) -> Result<()>`:
//!   bidi streaming
//!
//! The wire name of a method is its name in UpperCamelCase unless
//! `#[rpc(name = "...")]` says otherwise.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{
    FnArg, GenericArgument, Ident, ItemTrait, LitStr, PathArguments, ReturnType, TraitItem,
    TraitItemFn, Type, parse_macro_input, parse_quote,
};

const RESERVED: &[&str] = &[
    "bind_service",
    "new",
    "from_invoker",
    "invoker",
    "into_invoker",
    "with_options",
    "with_timeout",
    "with_metadata",
    "with_codec",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Shape {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl Shape {
    fn variant(self) -> Ident {
        let name = match self {
            Shape::Unary => "Unary",
            Shape::ServerStreaming => "ServerStreaming",
            Shape::ClientStreaming => "ClientStreaming",
            Shape::BidiStreaming => "BidiStreaming",
        };
        Ident::new(name, Span::call_site())
    }
}

struct RpcMethod {
    ident: Ident,
    variant: Ident,
    wire_name: String,
    shape: Shape,
    ctx_ty: Type,
    /// Declared type of the request parameter.
    req_param: Type,
    /// Declared type of the response sink parameter, if any.
    sink_param: Option<Type>,
    /// Type of one request message.
    req: Type,
    /// Type of one response message.
    rsp: Type,
    output: Type,
}

/// Defines an RPC service from a trait.
///
/// # Errors
///
/// Fails to compile if a method does not have one of the supported shapes,
/// uses a reserved name, or has a body of its own.
#[proc_macro_attribute]
pub fn service(attr: TokenStream, input: TokenStream) -> TokenStream {
    let mut package: Option<String> = None;
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("package") {
            let value: LitStr = meta.value()?.parse()?;
            package = Some(value.value());
            Ok(())
        } else {
            Err(meta.error("expected `package = \"...\"`"))
        }
    });
    parse_macro_input!(attr with parser);

    let input = parse_macro_input!(input as ItemTrait);
    match expand(package, input) {
        Ok(tokens) => tokens.into(),
        Err(error) => error.into_compile_error().into(),
    }
}

fn expand(package: Option<String>, mut input: ItemTrait) -> syn::Result<TokenStream2> {
    let krate = get_crate_name();
    let trait_ident = input.ident.clone();
    let visibility = input.vis.clone();
    let service_name = match package {
        Some(package) => format!("{package}.{trait_ident}"),
        None => trait_ident.to_string(),
    };
    let mod_ident = Ident::new(&to_snake_case(&trait_ident.to_string()), trait_ident.span());

    let mut methods = vec![];
    for item in &mut input.items {
        let method = match item {
            TraitItem::Fn(method) => method,
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "service traits may only contain methods",
                ));
            }
        };
        let rpc = parse_method(method)?;
        rewrite_method(method, &rpc, &krate, &mod_ident);
        methods.push(rpc);
    }
    if methods.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "a service needs at least one method",
        ));
    }

    input.supertraits.push(parse_quote!(::std::marker::Send));
    input.supertraits.push(parse_quote!(::std::marker::Sync));
    input.supertraits.push(parse_quote!('static));
    input.items.push(parse_quote! {
        const NAME: &'static str = #service_name;
    });
    input.items.push(parse_quote! {
        /// Pairs this instance with the service's dispatch table.
        fn bind_service(self: ::std::sync::Arc<Self>) -> #krate::dispatch::ServiceBinding
        where
            Self: Sized,
        {
            #mod_ident::bind(self)
        }
    });

    let module = expand_module(&krate, &trait_ident, &service_name, &methods);
    let doc = format!("Descriptors, dispatch table and client stubs of `{service_name}`.");
    Ok(quote! {
        #input

        #[doc = #doc]
        #visibility mod #mod_ident {
            #module
        }
    })
}

fn parse_method(method: &mut TraitItemFn) -> syn::Result<RpcMethod> {
    let sig = &method.sig;
    let ident = sig.ident.clone();
    if RESERVED.iter().any(|r| ident == r) {
        return Err(syn::Error::new_spanned(
            &ident,
            format!("the method cannot be named `{ident}`"),
        ));
    }
    if method.default.is_some() {
        return Err(syn::Error::new_spanned(
            &ident,
            "service methods get their default body from the macro",
        ));
    }
    let form_error = || {
        syn::Error::new_spanned(
            &method.sig,
            "the method should be in the form `async fn func(&self, ctx: &Context, req: Req) -> Result<Rsp>`",
        )
    };
    if sig.asyncness.is_none()
        || sig.receiver().is_none()
        || !(3..=4).contains(&sig.inputs.len())
    {
        return Err(form_error());
    }
    let typed = |index: usize| match &sig.inputs[index] {
        FnArg::Typed(pat_type) => Some((*pat_type.ty).clone()),
        FnArg::Receiver(_) => None,
    };
    let (Some(ctx_ty), Some(req_param)) = (typed(1), typed(2)) else {
        return Err(form_error());
    };
    let sink_param = if sig.inputs.len() == 4 {
        Some(typed(3).ok_or_else(form_error)?)
    } else {
        None
    };
    let ReturnType::Type(_, output) = &sig.output else {
        return Err(form_error());
    };
    let output = (**output).clone();

    let streamed_req = wrapped_type(&req_param, "RequestStream");
    let req = streamed_req.clone().unwrap_or_else(|| req_param.clone());
    let (rsp, server_many) = match &sink_param {
        Some(sink) => (
            wrapped_type(sink, "ResponseSink").ok_or_else(|| {
                syn::Error::new_spanned(sink, "the fourth parameter must be a `ResponseSink<Rsp>`")
            })?,
            true,
        ),
        None => (
            wrapped_type(&output, "Result").ok_or_else(|| {
                syn::Error::new_spanned(&output, "the method must return `Result<Rsp>`")
            })?,
            false,
        ),
    };
    let shape = match (streamed_req.is_some(), server_many) {
        (false, false) => Shape::Unary,
        (false, true) => Shape::ServerStreaming,
        (true, false) => Shape::ClientStreaming,
        (true, true) => Shape::BidiStreaming,
    };

    let mut wire_name = None;
    let mut error = None;
    method.attrs.retain(|attr| {
        if !attr.path().is_ident("rpc") {
            return true;
        }
        let parsed = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                wire_name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("expected `name = \"...\"`"))
            }
        });
        if let Err(e) = parsed {
            error = Some(e);
        }
        false
    });
    if let Some(error) = error {
        return Err(error);
    }

    let variant = Ident::new(&to_upper_camel_case(&ident.to_string()), ident.span());
    Ok(RpcMethod {
        wire_name: wire_name.unwrap_or_else(|| variant.to_string()),
        ident,
        variant,
        shape,
        ctx_ty,
        req_param,
        sink_param,
        req,
        rsp,
        output,
    })
}

/// Gives the method a fixed signature and the `Unimplemented` default body.
fn rewrite_method(
    method: &mut TraitItemFn,
    rpc: &RpcMethod,
    krate: &TokenStream2,
    mod_ident: &Ident,
) {
    let RpcMethod {
        ident,
        ctx_ty,
        req_param,
        output,
        ..
    } = rpc;
    let descriptor_fn = format_ident!("{}_method", ident);
    let (sink_arg, sink_use) = match &rpc.sink_param {
        Some(sink_ty) => (quote! { , sink: #sink_ty }, quote! { , sink }),
        None => (quote! {}, quote! {}),
    };
    method.sig = parse_quote! {
        fn #ident(&self, ctx: #ctx_ty, req: #req_param #sink_arg)
            -> impl ::std::future::Future<Output = #output> + ::std::marker::Send
    };
    method.default = Some(parse_quote! {{
        async move {
            let _ = (ctx, req #sink_use);
            let result: #output = ::std::result::Result::Err(::std::convert::From::from(
                #krate::Error::unimplemented(#mod_ident::#descriptor_fn()),
            ));
            result
        }
    }});
    method.semi_token = None;
}

fn expand_module(
    krate: &TokenStream2,
    trait_ident: &Ident,
    service_name: &str,
    methods: &[RpcMethod],
) -> TokenStream2 {
    let variants = methods.iter().map(|m| &m.variant).collect::<Vec<_>>();
    let wire_names = methods.iter().map(|m| &m.wire_name).collect::<Vec<_>>();
    let descriptor_fns = methods
        .iter()
        .map(|m| format_ident!("{}_method", m.ident))
        .collect::<Vec<_>>();

    let descriptor_defs = methods.iter().zip(&descriptor_fns).map(|(m, f)| {
        let RpcMethod {
            variant,
            wire_name,
            req,
            rsp,
            ..
        } = m;
        let shape = m.shape.variant();
        let doc = format!("Descriptor of `{service_name}/{wire_name}`.");
        quote! {
            #[doc = #doc]
            pub fn #f() -> &'static #krate::MethodDescriptor {
                static DESCRIPTOR: #krate::DescriptorCell<#krate::MethodDescriptor> =
                    #krate::DescriptorCell::new();
                DESCRIPTOR.get_or_init(|| {
                    #krate::MethodDescriptor::new(
                        SERVICE_NAME,
                        #wire_name,
                        #krate::MethodType::#shape,
                        Method::#variant.id(),
                        ::std::any::type_name::<#req>(),
                        ::std::any::type_name::<#rsp>(),
                    )
                })
            }
        }
    });

    let dispatch_arms = methods.iter().map(|m| {
        let RpcMethod {
            ident,
            variant,
            req,
            rsp,
            ..
        } = m;
        let serve = quote! { #krate::dispatch };
        let handler = match m.shape {
            Shape::Unary => quote! {
                #serve::serve_unary(call, move |ctx: #krate::Context, req: #req| async move {
                    service.#ident(&ctx, req).await
                })
            },
            Shape::ServerStreaming => quote! {
                #serve::serve_server_streaming(
                    call,
                    move |ctx: #krate::Context, req: #req, sink: #krate::ResponseSink<#rsp>| async move {
                        service.#ident(&ctx, req, sink).await
                    },
                )
            },
            Shape::ClientStreaming => quote! {
                #serve::serve_client_streaming(
                    call,
                    move |ctx: #krate::Context, reqs: #krate::RequestStream<#req>| async move {
                        service.#ident(&ctx, reqs).await
                    },
                )
            },
            Shape::BidiStreaming => quote! {
                #serve::serve_bidi_streaming(
                    call,
                    move |ctx: #krate::Context,
                          reqs: #krate::RequestStream<#req>,
                          sink: #krate::ResponseSink<#rsp>| async move {
                        service.#ident(&ctx, reqs, sink).await
                    },
                )
            },
        };
        quote! { Method::#variant => #handler, }
    });

    let mut async_methods = vec![];
    let mut blocking_methods = vec![];
    let mut future_methods = vec![];
    for (m, f) in methods.iter().zip(&descriptor_fns) {
        let RpcMethod { ident, req, rsp, .. } = m;
        match m.shape {
            Shape::Unary => {
                async_methods.push(quote! {
                    pub fn #ident(
                        &self,
                        req: &#req,
                        observer: impl #krate::StreamObserver<#rsp>,
                    ) -> #krate::CallHandle {
                        self.invoker.unary_observer(#f(), req, observer)
                    }
                });
                blocking_methods.push(quote! {
                    pub fn #ident(&self, req: &#req) -> #krate::Result<#rsp> {
                        self.invoker.blocking_unary(#f(), req)
                    }
                });
                future_methods.push(quote! {
                    pub fn #ident(&self, req: &#req) -> #krate::ResponseFuture<#rsp> {
                        self.invoker.unary_future(#f(), req)
                    }
                });
            }
            Shape::ServerStreaming => {
                async_methods.push(quote! {
                    pub fn #ident(
                        &self,
                        req: &#req,
                        observer: impl #krate::StreamObserver<#rsp>,
                    ) -> #krate::CallHandle {
                        self.invoker.server_streaming_observer(#f(), req, observer)
                    }
                });
                blocking_methods.push(quote! {
                    pub fn #ident(
                        &self,
                        req: &#req,
                    ) -> #krate::Result<#krate::BlockingResponseStream<#rsp>> {
                        self.invoker.blocking_server_streaming(#f(), req)
                    }
                });
            }
            Shape::ClientStreaming => {
                async_methods.push(quote! {
                    pub fn #ident(
                        &self,
                        observer: impl #krate::StreamObserver<#rsp>,
                    ) -> #krate::RequestSink<#req> {
                        self.invoker.streaming_observer(#f(), observer)
                    }
                });
                future_methods.push(quote! {
                    pub fn #ident(
                        &self,
                    ) -> (#krate::RequestSink<#req>, #krate::ResponseFuture<#rsp>) {
                        self.invoker.client_streaming(#f())
                    }
                });
            }
            Shape::BidiStreaming => {
                async_methods.push(quote! {
                    pub fn #ident(
                        &self,
                        observer: impl #krate::StreamObserver<#rsp>,
                    ) -> #krate::RequestSink<#req> {
                        self.invoker.streaming_observer(#f(), observer)
                    }
                });
            }
        }
    }

    let stubs = [
        (
            format_ident!("Stub"),
            format_ident!("new_stub"),
            "Callback-based client: results are delivered to an observer.",
            async_methods,
        ),
        (
            format_ident!("BlockingStub"),
            format_ident!("new_blocking_stub"),
            "Client whose calls park the calling thread until the result arrives.",
            blocking_methods,
        ),
        (
            format_ident!("FutureStub"),
            format_ident!("new_future_stub"),
            "Client whose calls return a future of the single response.",
            future_methods,
        ),
    ]
    .into_iter()
    .map(|(stub, factory, doc, methods)| {
        quote! {
            #[doc = #doc]
            #[derive(Debug, Clone)]
            pub struct #stub<C> {
                invoker: #krate::CallInvoker<C>,
            }

            impl<C: #krate::Channel> #krate::ClientStub<C> for #stub<C> {
                fn from_invoker(invoker: #krate::CallInvoker<C>) -> Self {
                    Self { invoker }
                }

                fn invoker(&self) -> &#krate::CallInvoker<C> {
                    &self.invoker
                }

                fn into_invoker(self) -> #krate::CallInvoker<C> {
                    self.invoker
                }
            }

            impl<C: #krate::Channel> #stub<C> {
                #(#methods)*
            }

            pub fn #factory<C: #krate::Channel>(channel: C) -> #stub<C> {
                <#stub<C> as #krate::ClientStub<C>>::new(channel)
            }
        }
    });

    quote! {
        #[allow(unused_imports)]
        use super::*;

        pub const SERVICE_NAME: &str = #service_name;

        /// Dispatch tag of each method, in declaration order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Method {
            #(#variants,)*
        }

        impl Method {
            pub const ALL: &'static [Method] = &[#(Method::#variants,)*];

            #[must_use]
            pub const fn id(self) -> #krate::MethodId {
                #krate::MethodId::new(self as u32)
            }

            #[must_use]
            pub fn from_id(id: #krate::MethodId) -> ::std::option::Option<Self> {
                Self::ALL.get(id.index()).copied()
            }

            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    #(Method::#variants => #wire_names,)*
                }
            }

            #[must_use]
            pub fn descriptor(self) -> &'static #krate::MethodDescriptor {
                match self {
                    #(Method::#variants => #descriptor_fns(),)*
                }
            }
        }

        #(#descriptor_defs)*

        pub fn service_descriptor() -> &'static #krate::ServiceDescriptor {
            static DESCRIPTOR: #krate::DescriptorCell<#krate::ServiceDescriptor> =
                #krate::DescriptorCell::new();
            DESCRIPTOR.get_or_init(|| {
                #krate::ServiceDescriptor::new(
                    SERVICE_NAME,
                    Method::ALL.iter().map(|m| m.descriptor()).collect(),
                )
            })
        }

        /// Looks a method up by its wire name.
        pub fn method_descriptor(name: &str) -> ::std::option::Option<&'static #krate::MethodDescriptor> {
            service_descriptor().find_method(name)
        }

        pub struct Dispatcher<S>(pub ::std::sync::Arc<S>);

        impl<S: super::#trait_ident> #krate::dispatch::Dispatch for Dispatcher<S> {
            fn dispatch(
                &self,
                method: #krate::MethodId,
                call: #krate::dispatch::ServerCall,
            ) -> #krate::dispatch::BoxFuture {
                let ::std::option::Option::Some(m) = Method::from_id(method) else {
                    #krate::dispatch::unregistered_method(SERVICE_NAME, method)
                };
                let service = ::std::sync::Arc::clone(&self.0);
                match m {
                    #(#dispatch_arms)*
                }
            }
        }

        pub fn bind<S: super::#trait_ident>(service: ::std::sync::Arc<S>) -> #krate::dispatch::ServiceBinding {
            #krate::dispatch::ServiceBinding::new(service_descriptor(), Dispatcher(service))
        }

        #(#stubs)*
    }
}

fn wrapped_type(ty: &Type, wrapper: &str) -> Option<Type> {
    if let Type::Path(path) = ty
        && path.qself.is_none()
        && let Some(segment) = path.path.segments.last()
        && segment.ident == wrapper
        && let PathArguments::AngleBracketed(args) = &segment.arguments
        && let Some(GenericArgument::Type(inner)) = args.args.first()
    {
        Some(inner.clone())
    } else {
        None
    }
}

fn to_snake_case(name: &str) -> String {
    let chars = name.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

fn to_upper_camel_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Path of the shoprpc crate as seen from the expansion site.
///
/// Inside shoprpc itself, and in its own tests, the crate is reachable as
/// `::shoprpc` through `extern crate self as shoprpc`.
pub(crate) fn get_crate_name() -> TokenStream2 {
    match proc_macro_crate::crate_name("shoprpc") {
        Ok(proc_macro_crate::FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote! { ::#ident }
        }
        _ => quote! { ::shoprpc },
    }
}
