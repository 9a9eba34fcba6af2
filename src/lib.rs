//! # Gantry - Local Serverless Gateway Runtime
//!
//! Gantry serves a CloudFormation/SAM-style template as a running HTTP API,
//! outside of any cloud provider: the template's intrinsic functions are
//! resolved at startup, its embedded OpenAPI definitions are compiled into
//! an immutable route table, and each inbound request is translated into
//! the provider's invocation event shape, run through the target handler,
//! and translated back into an HTTP response.
//!
//! ## Architecture
//!
//! ```text
//!            startup (once)                      request time (concurrent)
//! ┌─────────────────────────────────┐   ┌─────────────────────────────────────┐
//! │ template.yml                    │   │  HTTP request                       │
//! │   │ load + canonicalize tags    │   │    │ adapt (event builder)          │
//! │   ▼                             │   │    ▼                                │
//! │ Intrinsic Resolver              │   │  InvocationEvent                    │
//! │   │ Ref/GetAtt/FindInMap/       │   │    │ invoke (cached resolver,       │
//! │   │ Sub/Transform               │   │    │         fault isolation)       │
//! │   ▼                             │   │    ▼                                │
//! │ Normalizer (Globals/Conditions) │   │  InvocationResult                   │
//! │   ▼                             │   │    │ adapt back                     │
//! │ API Extractor ──► Route Table ──┼──►│  HTTP response                      │
//! └─────────────────────────────────┘   └─────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gantry::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let template = CloudformationTemplate::from_file(
//!         Some("template.yml"),
//!         Default::default(),
//!     )?;
//!
//!     let registry = Arc::new(HandlerRegistry::new());
//!     registry.register_handler(
//!         "handlers.hello.handle",
//!         Arc::new(FnHandler::new(|_event, _ctx| Ok(InvocationResult::ok("ok")))),
//!     )?;
//!
//!     let router = Router::from_template(&template, registry).await?;
//!     let server = GatewayServer::new(GatewayConfig::new(), router);
//!     server.run().await
//! }
//! ```
//!
//! The route table is frozen before the listener accepts its first
//! connection; a template that cannot be fully resolved, an ambiguous
//! route, or an unregistered handler all refuse to start rather than serve
//! a partially built routing table.

pub mod cache;
pub mod function;
pub mod gateway;
pub mod http;
pub mod identity;
pub mod runtime;
pub mod template;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::cache::{Cache, MemoryCache};
    pub use crate::function::{
        FnHandler, Handler, HandlerContext, HandlerError, HandlerRegistry, InvocationEvent,
        InvocationResult,
    };
    pub use crate::gateway::{extract_api_documents, RouteTable};
    pub use crate::http::{ApiRequest, ApiResponse, Method, StatusCode};
    pub use crate::identity::{Claims, IdentityProvider};
    pub use crate::runtime::{GatewayConfig, GatewayServer, Router};
    pub use crate::template::CloudformationTemplate;
    pub use async_trait::async_trait;
}

// Re-export for convenience
pub use function::{Handler, HandlerRegistry, InvocationEvent, InvocationResult};
pub use gateway::RouteTable;
pub use http::{ApiRequest, ApiResponse};
pub use runtime::{GatewayConfig, GatewayServer, Router};
pub use template::CloudformationTemplate;
