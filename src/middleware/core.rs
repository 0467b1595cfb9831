use std::sync::Arc;

use crate::context::Context;

/// One stage of a request chain.
///
/// Middleware and endpoint handlers share this shape: a stage receives the
/// request context, may call [`Context::next`] to run the remaining stages
/// in place (code after the call runs once they have finished), and may call
/// [`Context::abort`] to stop stages that have not started yet.
///
/// Plain closures are stages:
///
/// ```rust
/// use brrtframe::{handler, Context};
///
/// let hello = handler(|c: &mut Context| c.string(200, "hello"));
/// # let _ = hello;
/// ```
pub trait Middleware: Send + Sync {
    fn handle(&self, c: &mut Context);

    /// Name shown in route listings.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F> Middleware for F
where
    F: Fn(&mut Context) + Send + Sync,
{
    #[inline]
    fn handle(&self, c: &mut Context) {
        self(c)
    }
}

/// A shared, type-erased stage.
pub type HandlerFunc = Arc<dyn Middleware>;

impl Middleware for HandlerFunc {
    #[inline]
    fn handle(&self, c: &mut Context) {
        (**self).handle(c)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// An immutable ordered list of stages, fixed at registration.
///
/// Shared between every request that hits the route; dispatch only bumps the
/// reference count.
pub type HandlersChain = Arc<[HandlerFunc]>;

/// Wrap a stage for registration.
pub fn handler<M>(stage: M) -> HandlerFunc
where
    M: Middleware + 'static,
{
    Arc::new(stage)
}

/// Build a `Vec<HandlerFunc>` from heterogeneous stages.
///
/// ```rust
/// use brrtframe::{handlers, middleware::Recovery, Context};
///
/// let chain = handlers![Recovery::default(), |c: &mut Context| c.status(204)];
/// assert_eq!(chain.len(), 2);
/// ```
#[macro_export]
macro_rules! handlers {
    () => {
        ::std::vec::Vec::<$crate::middleware::HandlerFunc>::new()
    };
    ($($stage:expr),+ $(,)?) => {
        ::std::vec![$($crate::middleware::handler($stage)),+]
    };
}

/// Names of a chain's stages, in execution order.
pub(crate) fn stage_names(chain: &[HandlerFunc]) -> Vec<&'static str> {
    chain.iter().map(|h| h.name()).collect()
}
