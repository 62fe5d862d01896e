use crate::channel::Stream;

/// A configured stream transformation.
///
/// Configuration (and its validation) happens when the operator value is
/// built; `apply` only wires the running stage between two channels and
/// returns immediately.
pub trait Operator<In>: Sized {
    /// Element type of the output stream
    type Output;

    /// Spawn the stage consuming `input` and return its output stream
    fn apply(self, input: Stream<In>) -> Stream<Self::Output>;
}

impl<In, Out, F> Operator<In> for F
where
    F: FnOnce(Stream<In>) -> Stream<Out>,
{
    type Output = Out;

    fn apply(self, input: Stream<In>) -> Stream<Out> {
        self(input)
    }
}

impl<T> Stream<T> {
    /// Chain a configured operator onto this stream
    pub fn via<O>(self, operator: O) -> Stream<O::Output>
    where
        O: Operator<T>,
    {
        operator.apply(self)
    }
}
