//! Bounded top-K result collection
//!
//! Every plan materializes its page through [`collect_page`]. Unsorted input
//! is appended in arrival order; sorted input goes through a heap bounded at
//! `offset + max_results` whose head is the worst result kept so far, so
//! memory stays proportional to the page rather than to the match count.
//!
//! In both cases the whole input is scanned and `Page::total` is the number of
//! matches, not the page length.

use super::filter::{FilterResult, Instance, SortComparator};
use super::source::{ResultIterator, SourceError};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::warn;

/// One page of results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Results in the page
    pub items: Vec<Instance>,
    /// Number of matches seen, ignoring pagination
    pub total: usize,
}

impl Page {
    /// Empty page
    pub fn empty() -> Self {
        Self::default()
    }
}

struct Ranked<'c> {
    key: Vec<crate::document::Value>,
    seq: usize,
    payload: Instance,
    comparator: &'c SortComparator,
}

impl PartialEq for Ranked<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked<'_> {}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Ties keep arrival order, which makes the heap agree with a stable sort
impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator
            .compare(&self.key, &other.key)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Collect one page from a stream of filter results.
///
/// `max_results` of `None` means unlimited. Errors from the stream abort the
/// collection and are returned as is.
pub fn collect_page<I, E>(
    results: I,
    comparator: Option<&SortComparator>,
    offset: usize,
    max_results: Option<usize>,
) -> Result<Page, E>
where
    I: Iterator<Item = Result<FilterResult, E>>,
{
    match comparator {
        None => collect_unsorted(results, offset, max_results),
        Some(comparator) => collect_sorted(results, comparator, offset, max_results),
    }
}

fn collect_unsorted<I, E>(results: I, offset: usize, max_results: Option<usize>) -> Result<Page, E>
where
    I: Iterator<Item = Result<FilterResult, E>>,
{
    let mut items = Vec::new();
    let mut seen = 0usize;

    for result in results {
        let result = result?;
        seen += 1;
        let page_full = max_results.map(|max| items.len() >= max).unwrap_or(false);
        if seen > offset && !page_full {
            items.push(result.payload);
        }
    }

    Ok(Page { items, total: seen })
}

fn collect_sorted<I, E>(
    results: I,
    comparator: &SortComparator,
    offset: usize,
    max_results: Option<usize>,
) -> Result<Page, E>
where
    I: Iterator<Item = Result<FilterResult, E>>,
{
    let capacity = max_results.map(|max| offset.saturating_add(max));
    let mut heap = BinaryHeap::with_capacity(capacity.unwrap_or(0).min(1024));
    let mut seen = 0usize;

    for result in results {
        let result = result?;
        heap.push(Ranked {
            key: result.sort_projection.unwrap_or_default(),
            seq: seen,
            payload: result.payload,
            comparator,
        });
        seen += 1;
        if let Some(capacity) = capacity {
            if heap.len() > capacity {
                heap.pop();
            }
        }
    }

    let items = heap
        .into_sorted_vec()
        .into_iter()
        .skip(offset)
        .map(|ranked| ranked.payload)
        .collect();

    Ok(Page { items, total: seen })
}

/// Result iterator that is closed when dropped.
///
/// Scans hold one of these for the duration of the scan, so the underlying
/// resource is released on every exit path, unwinding included. Close
/// failures are logged and otherwise ignored.
pub struct ScopedIterator {
    inner: Box<dyn ResultIterator>,
}

impl ScopedIterator {
    /// Take ownership of an open iterator
    pub fn new(inner: Box<dyn ResultIterator>) -> Self {
        Self { inner }
    }

    /// Total reported by the underlying producer
    pub fn total_hint(&self) -> Option<usize> {
        self.inner.total_hint()
    }
}

impl Iterator for ScopedIterator {
    type Item = Result<Instance, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl Drop for ScopedIterator {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            warn!(error = %e, "Failed to close result iterator");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Value;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn results(keys: &[i32]) -> Vec<Result<FilterResult, Infallible>> {
        keys.iter()
            .map(|k| {
                Ok(FilterResult {
                    payload: Instance::Row(vec![Value::Int32(*k)]),
                    sort_projection: Some(vec![Value::Int32(*k)]),
                })
            })
            .collect()
    }

    fn keys(page: &Page) -> Vec<i32> {
        page.items
            .iter()
            .map(|i| i.row().unwrap()[0].as_i64().unwrap() as i32)
            .collect()
    }

    #[test]
    fn test_unsorted_counts_everything() {
        let data: Vec<i32> = (0..100).collect();
        let page = collect_page(results(&data).into_iter(), None, 95, Some(10)).unwrap();
        assert_eq!(keys(&page), vec![95, 96, 97, 98, 99]);
        assert_eq!(page.total, 100);

        let page = collect_page(results(&data).into_iter(), None, 10, Some(3)).unwrap();
        assert_eq!(keys(&page), vec![10, 11, 12]);
        assert_eq!(page.total, 100);
    }

    #[test]
    fn test_sorted_top_k() {
        let data = vec![5, 3, 9, 1, 7, 2, 8];
        let asc = SortComparator::new(vec![true]);
        let page = collect_page(results(&data).into_iter(), Some(&asc), 1, Some(3)).unwrap();
        assert_eq!(keys(&page), vec![2, 3, 5]);
        assert_eq!(page.total, 7);

        let desc = SortComparator::new(vec![false]);
        let page = collect_page(results(&data).into_iter(), Some(&desc), 0, None).unwrap();
        assert_eq!(keys(&page), vec![9, 8, 7, 5, 3, 2, 1]);
    }

    #[test]
    fn test_offset_past_end() {
        let asc = SortComparator::new(vec![true]);
        let page = collect_page(results(&[1, 2, 3]).into_iter(), Some(&asc), 5, Some(2)).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_zero_page_size() {
        let page = collect_page(results(&[1, 2, 3]).into_iter(), None, 0, Some(0)).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_errors_propagate() {
        let items: Vec<Result<FilterResult, &str>> = vec![
            Ok(FilterResult::new(Instance::Row(vec![]))),
            Err("boom"),
        ];
        assert_eq!(collect_page(items.into_iter(), None, 0, None).unwrap_err(), "boom");
    }

    struct Closing {
        closed: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Iterator for Closing {
        type Item = Result<Instance, SourceError>;

        fn next(&mut self) -> Option<Self::Item> {
            None
        }
    }

    impl ResultIterator for Closing {
        fn close(&mut self) -> Result<(), SourceError> {
            self.closed.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail {
                Err(SourceError::Close("remote gone".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_scoped_iterator_closes_on_drop() {
        let closed = Arc::new(AtomicUsize::new(0));
        {
            let mut scoped = ScopedIterator::new(Box::new(Closing {
                closed: closed.clone(),
                fail: false,
            }));
            assert!(scoped.next().is_none());
        }
        assert_eq!(closed.load(AtomicOrdering::SeqCst), 1);

        // failures are swallowed
        drop(ScopedIterator::new(Box::new(Closing {
            closed: closed.clone(),
            fail: true,
        })));
        assert_eq!(closed.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn test_scoped_iterator_closes_on_panic() {
        let closed = Arc::new(AtomicUsize::new(0));
        let inner = closed.clone();
        let outcome = std::panic::catch_unwind(move || {
            let _scoped = ScopedIterator::new(Box::new(Closing {
                closed: inner,
                fail: false,
            }));
            panic!("scan failed");
        });
        assert!(outcome.is_err());
        assert_eq!(closed.load(AtomicOrdering::SeqCst), 1);
    }
}
