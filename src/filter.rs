use crate::error::Error;
use crate::handler::{Handler, HandlerContext};

/// A stage wrapped around a handler.
///
/// A filter may short-circuit by writing a response and returning
/// without touching `next`, or call `next.proceed(ctx)` exactly once
/// to hand the exchange further down the chain (and post-process
/// after it comes back). Proceeding twice is a contract violation and
/// fails the exchange with an internal error.
pub trait Filter: Send + Sync {
    fn apply(&self, ctx: &mut HandlerContext, next: &mut Next)
        -> Result<(), Error>;
}

impl<F> Filter for F
    where F: Fn(&mut HandlerContext, &mut Next) -> Result<(), Error>
             + Send + Sync
{
    fn apply(&self, ctx: &mut HandlerContext, next: &mut Next)
        -> Result<(), Error>
    {
        self(ctx, next)
    }
}

/// Continuation token handed to each filter.
pub struct Next<'a> {
    filters: &'a [Box<dyn Filter>],
    handler: &'a dyn Handler,
    pos: usize,
    invoked: bool,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain: the next filter if one remains,
    /// otherwise the wrapped handler.
    pub fn proceed(&mut self, ctx: &mut HandlerContext)
        -> Result<(), Error>
    {
        if self.invoked {
            return Err(Error::internal(
                "filter invoked its continuation twice"));
        }
        self.invoked = true;
        match self.filters.split_first() {
            Some((filter, rest)) => {
                let mut next = Next {
                    filters: rest,
                    handler: self.handler,
                    pos: self.pos + 1,
                    invoked: false,
                };
                filter.apply(ctx, &mut next)
            }
            None => self.handler.handle(ctx),
        }
    }

    /// Zero-based position of the stage this token continues into.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// A handler wrapped in an ordered filter chain.
pub struct FilteredHandler {
    filters: Vec<Box<dyn Filter>>,
    inner: Box<dyn Handler>,
}

impl FilteredHandler {
    pub fn new<H: Handler + 'static>(handler: H) -> FilteredHandler {
        FilteredHandler {
            filters: Vec::new(),
            inner: Box::new(handler),
        }
    }

    /// Append a filter. Filters run in the order they were added.
    pub fn add_filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Handler for FilteredHandler {
    fn handle(&self, ctx: &mut HandlerContext) -> Result<(), Error> {
        let mut entry = Next {
            filters: &self.filters,
            handler: &*self.inner,
            pos: 0,
            invoked: false,
        };
        entry.proceed(ctx)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::enums::Status;
    use crate::error::Error;
    use crate::handler::{Handler, HandlerContext};
    use crate::request::Request;
    use crate::response::ResponseWriter;
    use super::{FilteredHandler, Next};

    fn ctx() -> HandlerContext {
        HandlerContext::detached(
            Request::build("GET", "/").done(),
            ResponseWriter::for_sink(Box::new(Vec::new())))
    }

    #[test]
    fn filters_run_in_order_around_handler() {
        let trace = Arc::new(AtomicUsize::new(0));
        // each stage shifts its tag in, so the order is readable
        let push = |trace: &Arc<AtomicUsize>, digit: usize| {
            let t = trace.clone();
            move || { t.fetch_add(digit, Ordering::SeqCst); }
        };
        let first_in = push(&trace, 1);
        let second_in = push(&trace, 10);
        let inner = push(&trace, 100);

        let handler = FilteredHandler::new(
                move |_ctx: &mut HandlerContext| -> Result<(), Error> {
                    inner();
                    Ok(())
                })
            .add_filter(move |ctx: &mut HandlerContext,
                              next: &mut Next| {
                first_in();
                assert_eq!(next.position(), 1);
                next.proceed(ctx)
            })
            .add_filter(move |ctx: &mut HandlerContext,
                              next: &mut Next| {
                second_in();
                next.proceed(ctx)
            });
        handler.handle(&mut ctx()).unwrap();
        assert_eq!(trace.load(Ordering::SeqCst), 111);
    }

    #[test]
    fn short_circuit_skips_the_handler() {
        let handler = FilteredHandler::new(
                |_ctx: &mut HandlerContext| -> Result<(), Error> {
                    panic!("handler must not run");
                })
            .add_filter(|ctx: &mut HandlerContext, _next: &mut Next| {
                ctx.response.send_status(Status::Forbidden)
            });
        let mut c = ctx();
        handler.handle(&mut c).unwrap();
        assert_eq!(c.response.status_code(), 403);
    }

    #[test]
    fn double_proceed_is_detected() {
        let handler = FilteredHandler::new(
                |_ctx: &mut HandlerContext| -> Result<(), Error> {
                    Ok(())
                })
            .add_filter(|ctx: &mut HandlerContext, next: &mut Next| {
                next.proceed(ctx)?;
                next.proceed(ctx)
            });
        assert_matches!(handler.handle(&mut ctx()),
            Err(Error::Internal(..)));
    }
}
