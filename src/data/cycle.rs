/// Logically infinite stream over a finite, reconstructible one.
///
/// Explicit `{ current, factory }` state machine: exhaustion of the
/// wrapped iteration is consumed internally to trigger reconstruction and
/// is never surfaced to the caller (for any non-empty underlying stream).
/// Used for mid-training validation, where a full pass is a caller-bounded
/// number of draws.
pub struct CyclicStream<I, F>
where
    I: Iterator,
    F: FnMut() -> I,
{
    current: I,
    factory: F,
}

impl<I, F> CyclicStream<I, F>
where
    I: Iterator,
    F: FnMut() -> I,
{
    pub fn new(mut factory: F) -> Self {
        Self {
            current: factory(),
            factory,
        }
    }
}

impl<I, F> Iterator for CyclicStream<I, F>
where
    I: Iterator,
    F: FnMut() -> I,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        if let Some(item) = self.current.next() {
            return Some(item);
        }
        // Reconstruct once; yields None only for an empty factory, which
        // the stream builder rules out upstream.
        self.current = (self.factory)();
        self.current.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exhausts_and_replays_the_first_cycle() {
        let finite = || (0..4u32);
        let cycler = CyclicStream::new(finite);

        let drawn: Vec<u32> = cycler.take(3 * 4).collect();
        assert_eq!(drawn.len(), 12);
        assert_eq!(&drawn[0..4], &drawn[4..8]);
        assert_eq!(&drawn[4..8], &drawn[8..12]);
    }

    #[test]
    fn empty_factory_terminates_instead_of_spinning() {
        let mut cycler = CyclicStream::new(|| std::iter::empty::<u32>());
        assert_eq!(cycler.next(), None);
    }
}
