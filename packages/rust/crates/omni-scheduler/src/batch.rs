//! Lazy fixed-size batching, for tools that take bounded argument lists.

/// Iterator over consecutive batches of at most `size` items.
#[derive(Debug, Clone)]
pub struct Chunks<I> {
    iter: I,
    size: usize,
}

/// Split `iterable` into batches of `size` items; the last batch may be shorter.
///
/// A `size` of zero yields nothing.
pub fn chunks<I: IntoIterator>(iterable: I, size: usize) -> Chunks<I::IntoIter> {
    Chunks {
        iter: iterable.into_iter(),
        size,
    }
}

impl<I: Iterator> Iterator for Chunks<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.size == 0 {
            return None;
        }
        let chunk: Vec<_> = self.iter.by_ref().take(self.size).collect();
        if chunk.is_empty() { None } else { Some(chunk) }
    }
}
