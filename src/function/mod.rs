//! Handler invocation: the event contract, the handler trait, and the
//! cached resolver.

pub mod event;
pub mod handler;
pub mod registry;

pub use event::{
    build_event, Identity, InvalidInvocationResult, InvocationEvent, InvocationResult,
    RequestContext,
};
pub use handler::{FnHandler, Handler, HandlerContext, HandlerError};
pub use registry::{HandlerProvider, HandlerReference, HandlerRegistry, HandlerResolver};
