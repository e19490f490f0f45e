//! Derived cells.
//!
//! A derived cell recomputes from its inputs whenever any of them changes.
//! Inputs are passed explicitly; the derived cell subscribes to them only
//! while it has subscribers of its own, and drops those subscriptions when
//! its last subscriber leaves.

use std::sync::{Arc, Mutex, PoisonError};

use crate::cell::{Cell, CellValue, Observable, Readable, Setter, StopFn};

/// Derives a cell from one input with a pure function.
pub fn derived<A, T, S, F>(source: &S, initial: T, f: F) -> Readable<T>
where
    A: CellValue,
    T: CellValue,
    S: Observable<A> + Clone + Send + Sync + 'static,
    F: Fn(&A) -> T + Send + Sync + 'static,
{
    derived_with(source, initial, move |a, set| {
        set.set(f(a));
        None
    })
}

/// Derives a cell from one input, letting `f` write the value itself.
///
/// `f` may return a teardown; it runs before the next call of `f` and when
/// the derived cell stops. This is how a derived cell owns a nested
/// subscription that must follow its input (for example, the document of the
/// currently signed-in user).
pub fn derived_with<A, T, S, F>(source: &S, initial: T, f: F) -> Readable<T>
where
    A: CellValue,
    T: CellValue,
    S: Observable<A> + Clone + Send + Sync + 'static,
    F: Fn(&A, &Setter<T>) -> Option<StopFn> + Send + Sync + 'static,
{
    let source = source.clone();
    let f = Arc::new(f);

    Cell::with_start(initial, move |set| {
        let cleanup: Arc<Mutex<Option<StopFn>>> = Arc::new(Mutex::new(None));

        let f = f.clone();
        let current = cleanup.clone();
        let subscription = source.subscribe(move |a: &A| {
            run_cleanup(&current);
            let next = f(a, &set);
            *current.lock().unwrap_or_else(PoisonError::into_inner) = next;
        });

        Some(Box::new(move || {
            drop(subscription);
            run_cleanup(&cleanup);
        }) as StopFn)
    })
    .readable()
}

fn run_cleanup(slot: &Mutex<Option<StopFn>>) {
    let previous = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(stop) = previous {
        stop();
    }
}

/// Mirrors `source`, notifying only when the value actually changes.
pub fn distinct<T, S>(source: &S) -> Readable<T>
where
    T: CellValue + PartialEq,
    S: Observable<T> + Clone + Send + Sync + 'static,
{
    derived_with(source, source.get(), |value: &T, set| {
        set.set_distinct(value.clone());
        None
    })
}

/// Derives a cell from two inputs.
pub fn derived2<A, B, T, SA, SB, F>(a: &SA, b: &SB, initial: T, f: F) -> Readable<T>
where
    A: CellValue,
    B: CellValue,
    T: CellValue,
    SA: Observable<A> + Clone + Send + Sync + 'static,
    SB: Observable<B> + Clone + Send + Sync + 'static,
    F: Fn(&A, &B) -> T + Send + Sync + 'static,
{
    let (a, b) = (a.clone(), b.clone());
    let f = Arc::new(f);

    Cell::with_start(initial, move |set| {
        let latest: Arc<Mutex<(Option<A>, Option<B>)>> = Arc::new(Mutex::new((None, None)));

        let recompute = {
            let latest = latest.clone();
            let f = f.clone();
            Arc::new(move || {
                let next = match &*latest.lock().unwrap_or_else(PoisonError::into_inner) {
                    (Some(a), Some(b)) => Some(f(a, b)),
                    _ => None,
                };
                if let Some(next) = next {
                    set.set(next);
                }
            })
        };

        let sub_a = {
            let (latest, recompute) = (latest.clone(), recompute.clone());
            a.subscribe(move |v: &A| {
                latest.lock().unwrap_or_else(PoisonError::into_inner).0 = Some(v.clone());
                recompute();
            })
        };
        let sub_b = b.subscribe(move |v: &B| {
            latest.lock().unwrap_or_else(PoisonError::into_inner).1 = Some(v.clone());
            recompute();
        });

        Some(Box::new(move || drop((sub_a, sub_b))) as StopFn)
    })
    .readable()
}

/// Derives a cell from three inputs.
///
/// The function runs once all inputs have delivered their first value, and
/// again on every later change of any input.
pub fn derived3<A, B, C, T, SA, SB, SC, F>(a: &SA, b: &SB, c: &SC, initial: T, f: F) -> Readable<T>
where
    A: CellValue,
    B: CellValue,
    C: CellValue,
    T: CellValue,
    SA: Observable<A> + Clone + Send + Sync + 'static,
    SB: Observable<B> + Clone + Send + Sync + 'static,
    SC: Observable<C> + Clone + Send + Sync + 'static,
    F: Fn(&A, &B, &C) -> T + Send + Sync + 'static,
{
    type Latest<A, B, C> = Arc<Mutex<(Option<A>, Option<B>, Option<C>)>>;

    let (a, b, c) = (a.clone(), b.clone(), c.clone());
    let f = Arc::new(f);

    Cell::with_start(initial, move |set| {
        let latest: Latest<A, B, C> = Arc::new(Mutex::new((None, None, None)));

        let recompute = {
            let latest = latest.clone();
            let f = f.clone();
            Arc::new(move || {
                let next = match &*latest.lock().unwrap_or_else(PoisonError::into_inner) {
                    (Some(a), Some(b), Some(c)) => Some(f(a, b, c)),
                    _ => None,
                };
                if let Some(next) = next {
                    set.set(next);
                }
            })
        };

        let sub_a = {
            let (latest, recompute) = (latest.clone(), recompute.clone());
            a.subscribe(move |v: &A| {
                latest.lock().unwrap_or_else(PoisonError::into_inner).0 = Some(v.clone());
                recompute();
            })
        };
        let sub_b = {
            let (latest, recompute) = (latest.clone(), recompute.clone());
            b.subscribe(move |v: &B| {
                latest.lock().unwrap_or_else(PoisonError::into_inner).1 = Some(v.clone());
                recompute();
            })
        };
        let sub_c = c.subscribe(move |v: &C| {
            latest.lock().unwrap_or_else(PoisonError::into_inner).2 = Some(v.clone());
            recompute();
        });

        Some(Box::new(move || drop((sub_a, sub_b, sub_c))) as StopFn)
    })
    .readable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn derived_follows_source() {
        let source = Cell::new(2);
        let doubled = derived(&source, 0, |v: &i32| v * 2);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = doubled.subscribe(move |v: &i32| sink.lock().unwrap().push(*v));

        source.set(5);
        assert_eq!(*seen.lock().unwrap(), vec![4, 10]);
    }

    #[test]
    fn derived_releases_source_with_last_subscriber() {
        let source = Cell::new(1);
        let plus_one = derived(&source, 0, |v: &i32| v + 1);

        let sub = plus_one.subscribe(|_| {});
        assert_eq!(source.subscriber_count(), 1);
        drop(sub);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn derived3_computes_once_on_start() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (a, b, c) = (Cell::new(1), Cell::new(2), Cell::new(3));
        let sum = derived3(&a, &b, &c, 0, move |a: &i32, b: &i32, c: &i32| {
            counter.fetch_add(1, Ordering::SeqCst);
            a + b + c
        });

        let _sub = sum.subscribe(|_| {});
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sum.get(), 6);

        b.set(10);
        assert_eq!(sum.get(), 14);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn derived2_recomputes_on_either_input() {
        let (a, b) = (Cell::new("x".to_string()), Cell::new(1usize));
        let joined = derived2(&a, &b, String::new(), |s: &String, n: &usize| s.repeat(*n));
        let _sub = joined.subscribe(|_| {});

        assert_eq!(joined.get(), "x");
        b.set(3);
        assert_eq!(joined.get(), "xxx");
        a.set("ab".to_string());
        assert_eq!(joined.get(), "ababab");
    }

    #[test]
    fn distinct_suppresses_repeats() {
        let source = Cell::new(0);
        let quiet = distinct(&source);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _sub = quiet.subscribe(move |_: &i32| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source.set(0);
        source.set(1);
        source.set(1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(quiet.get(), 1);
    }

    #[test]
    fn derived_with_tears_down_previous_nested_work() {
        let source = Cell::new(0);
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = teardowns.clone();

        let mirrored = derived_with(&source, 0, move |v: &i32, set: &Setter<i32>| {
            set.set(*v);
            let counter = counter.clone();
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }) as StopFn)
        });

        let sub = mirrored.subscribe(|_| {});
        source.set(1);
        source.set(2);
        assert_eq!(teardowns.load(Ordering::SeqCst), 2);
        assert_eq!(mirrored.get(), 2);

        drop(sub);
        assert_eq!(teardowns.load(Ordering::SeqCst), 3);
    }
}
