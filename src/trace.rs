use std::sync::Arc;

/// A sink for `(mask, value)` snapshots of a container.
///
/// `mask` names the bits that currently mean something and `value`
/// holds their state. Samples are delivered while the container is
/// held exclusively, so a tracer must not call back into the container
/// that feeds it.
pub trait Tracer: Send + Sync {
    fn sample(&self, mask: u64, value: u64);
}

impl<F> Tracer for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    #[inline]
    fn sample(&self, mask: u64, value: u64) {
        self(mask, value)
    }
}

pub type SharedTracer = Arc<dyn Tracer>;
