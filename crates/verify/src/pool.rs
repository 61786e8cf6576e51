use std::num::NonZeroUsize;
use std::sync::{mpsc, Mutex};
use std::thread;

use crate::cancel::CancelToken;

/// Number of workers for a `--jobs` value; `0` means one per CPU.
pub fn effective_jobs(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Evaluate `work` for every item and feed each result to `collect`.
///
/// Items are pulled lazily from `items`. `collect` always runs on the
/// calling thread, one result at a time, so it may own unsynchronized
/// state. Arrival order is unspecified when `jobs > 1`. Once `cancel` is
/// set no further items are started; results already in flight are still
/// delivered.
pub fn run_pool<I, T, R, F, C>(items: I, jobs: usize, cancel: &CancelToken, work: F, mut collect: C)
where
    I: Iterator<Item = T> + Send,
    T: Send,
    R: Send,
    F: Fn(&T) -> R + Sync,
    C: FnMut(T, R),
{
    if jobs <= 1 {
        for item in items {
            if cancel.is_cancelled() {
                break;
            }
            let result = work(&item);
            collect(item, result);
        }
        return;
    }

    let queue = Mutex::new(items);
    let (tx, rx) = mpsc::channel::<(T, R)>();
    thread::scope(|scope| {
        for _ in 0..jobs {
            let tx = tx.clone();
            let queue = &queue;
            let work = &work;
            scope.spawn(move || loop {
                if cancel.is_cancelled() {
                    return;
                }
                let next = match queue.lock() {
                    Ok(mut queue) => queue.next(),
                    Err(_) => return,
                };
                let Some(item) = next else {
                    return;
                };
                let result = work(&item);
                if tx.send((item, result)).is_err() {
                    return;
                }
            });
        }
        drop(tx);

        for (item, result) in rx {
            collect(item, result);
        }
    });
}
