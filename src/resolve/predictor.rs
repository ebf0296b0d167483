//! Boundary to statistical link prediction.
//!
//! The resolution engine never trains or owns a model. When a fully ground
//! binary query has no symbolic answer, the query layer may ask a
//! [`LinkPredictor`] how plausible the missing edge is.

/// Estimates the probability that `subject --predicate--> object` holds.
pub trait LinkPredictor: Send + Sync {
    /// A probability in `[0, 1]`; values outside are clamped by the caller.
    fn estimate(&self, subject: &str, predicate: &str, object: &str) -> f64;
}

impl<F> LinkPredictor for F
where
    F: Fn(&str, &str, &str) -> f64 + Send + Sync,
{
    fn estimate(&self, subject: &str, predicate: &str, object: &str) -> f64 {
        self(subject, predicate, object)
    }
}
