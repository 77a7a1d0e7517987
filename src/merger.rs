//! Binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::marker::PhantomData;

use crate::record::Record;

/// Binary heap merger implementation.
/// Merges multiple sorted runs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of runs.
///
/// Every record entering the heap gets the next value of a monotonic counter as its
/// `sequence`, so records with equal keys from different runs stay distinct and leave the
/// heap in the order they entered it. This is arrival order into the merge frontier, not
/// input order.
pub struct BinaryHeapMerger<C, E>
where
    C: Iterator<Item = Result<Record, E>>,
{
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    items: BinaryHeap<(Reverse<Record>, usize)>,
    runs: Vec<C>,
    next_sequence: u64,
    initiated: bool,
    failed: bool,
    // run failure hit while refilling the frontier, reported after the popped record
    pending: Option<E>,

    error_type: PhantomData<E>,
}

impl<C, E> BinaryHeapMerger<C, E>
where
    C: Iterator<Item = Result<Record, E>>,
{
    /// Creates an instance of a binary heap merger using runs as inputs.
    /// Run records should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `runs` - Runs to be merged in a single sorted one
    pub fn new<I>(runs: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoIterator<IntoIter = C>,
    {
        let runs = Vec::from_iter(runs.into_iter().map(|r| r.into_iter()));
        let items = BinaryHeap::with_capacity(runs.len());

        return BinaryHeapMerger {
            runs,
            items,
            next_sequence: 0,
            initiated: false,
            failed: false,
            pending: None,
            error_type: PhantomData,
        };
    }

    /// Returns the number of runs still having records in the merge frontier.
    pub fn frontier_len(&self) -> usize {
        self.items.len()
    }

    fn advance(&mut self, idx: usize) -> Result<(), E> {
        match self.runs[idx].next() {
            Some(Ok(mut record)) => {
                record.sequence = self.next_sequence;
                self.next_sequence += 1;
                self.items.push((Reverse(record), idx));
                Ok(())
            }
            Some(Err(err)) => Err(err),
            None => Ok(()),
        }
    }
}

impl<C, E> Iterator for BinaryHeapMerger<C, E>
where
    C: Iterator<Item = Result<Record, E>>,
{
    type Item = Result<Record, E>;

    /// Returns the next record from the runs in ascending order.
    /// A run failure is yielded right after the last record taken from the frontier,
    /// the merger yields nothing after it.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(err) = self.pending.take() {
            self.failed = true;
            return Some(Err(err));
        }

        if !self.initiated {
            self.initiated = true;
            for idx in 0..self.runs.len() {
                if let Err(err) = self.advance(idx) {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }

        let (Reverse(result), idx) = self.items.pop()?;
        if let Err(err) = self.advance(idx) {
            self.pending = Some(err);
        }

        return Some(Ok(result));
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, ErrorKind};

    use rstest::*;

    use super::BinaryHeapMerger;
    use crate::record::Record;

    fn run(records: &[(i64, &str)]) -> Vec<Result<Record, io::Error>> {
        Vec::from_iter(records.iter().map(|(number, text)| Ok(Record::new(*number, *text))))
    }

    fn test_error() -> io::Error {
        io::Error::new(ErrorKind::Other, "test error")
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![run(&[]), run(&[])], vec![])]
    #[case(
        vec![
            run(&[(415, "Apple"), (30432, "Something something something")]),
            run(&[(1, "Apple"), (32, "Cherry is the best")]),
            run(&[(2, "Banana is yellow")]),
            run(&[]),
        ],
        vec![
            "1. Apple",
            "415. Apple",
            "2. Banana is yellow",
            "32. Cherry is the best",
            "30432. Something something something",
        ],
    )]
    #[case(
        vec![
            run(&[(5, "Apple"), (9, "Zebra")]),
            run(&[(1, "Apple"), (5, "Apple"), (6, "Apple")]),
        ],
        vec!["1. Apple", "5. Apple", "5. Apple", "6. Apple", "9. Zebra"],
    )]
    fn test_merger(#[case] runs: Vec<Vec<Result<Record, io::Error>>>, #[case] expected: Vec<&str>) {
        let merger = BinaryHeapMerger::new(runs);
        let actual: Result<Vec<Record>, io::Error> = merger.collect();
        let actual = Vec::from_iter(actual.unwrap().iter().map(Record::to_string));

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_merger_sequence_is_arrival_order() {
        let runs = vec![run(&[(5, "Apple")]), run(&[(5, "Apple")]), run(&[(5, "Apple")])];
        let merged: Vec<Record> = BinaryHeapMerger::new(runs).map(Result::unwrap).collect();

        assert_eq!(Vec::from_iter(merged.iter().map(|r| r.sequence)), vec![0, 1, 2]);
        assert!(merged.iter().all(|r| r.to_string() == "5. Apple"));
    }

    #[test]
    fn test_merger_frontier_holds_one_record_per_run() {
        let runs = vec![run(&[(1, "a"), (2, "a")]), run(&[(1, "b")]), run(&[])];
        let mut merger = BinaryHeapMerger::new(runs);

        assert_eq!(merger.next().unwrap().unwrap(), Record::new(1, "a"));
        assert_eq!(merger.frontier_len(), 2);
        merger.next();
        assert_eq!(merger.frontier_len(), 1);
        merger.next();
        assert_eq!(merger.frontier_len(), 0);
        assert!(merger.next().is_none());
    }

    #[rstest]
    #[case(vec![vec![Err(test_error())]], 0)]
    #[case(
        vec![
            vec![Ok(Record::new(3, "c")), Err(test_error())],
            vec![Ok(Record::new(1, "a")), Ok(Record::new(2, "b"))],
        ],
        3,
    )]
    #[case(
        vec![
            vec![Ok(Record::new(1, "a")), Err(test_error())],
            vec![Ok(Record::new(2, "b"))],
        ],
        1,
    )]
    fn test_merger_error(#[case] runs: Vec<Vec<Result<Record, io::Error>>>, #[case] records_before_error: usize) {
        let results = Vec::from_iter(BinaryHeapMerger::new(runs));

        assert_eq!(results.len(), records_before_error + 1);
        assert!(results[..records_before_error].iter().all(Result::is_ok));
        assert_eq!(results[records_before_error].as_ref().unwrap_err().to_string(), "test error");
    }
}
