// SPDX-License-Identifier: MIT OR Apache-2.0

//! Settlement races between threads and cancelation tokens.

use futures::executor::block_on;
use some_promise::{CancelationSource, Deferred, Outcome, Promise, State};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const ITERATIONS: usize = 200;

#[test]
fn cancelation_races_resolution() {
    for i in 0..ITERATIONS {
        let source = CancelationSource::new();
        let deferred = Deferred::<usize>::with_token(&source.token());
        let promise = deferred.promise();
        let barrier = Arc::new(Barrier::new(2));
        let b = barrier.clone();
        let canceler = thread::spawn(move || {
            b.wait();
            source.cancel();
        });
        barrier.wait();
        let resolved = deferred.try_resolve(i);
        canceler.join().unwrap();

        match block_on(promise.into_future()).unwrap() {
            Outcome::Resolved(value) => {
                assert!(resolved);
                assert_eq!(value, i);
            }
            Outcome::Canceled => assert!(!resolved),
            Outcome::Rejected(rejection) => panic!("unexpected rejection {rejection}"),
        }
    }
}

#[test]
fn chain_settled_from_another_thread() {
    let ran = Arc::new(AtomicUsize::new(0));
    let mut producers = Vec::new();
    let mut chains = Vec::new();
    for i in 0..ITERATIONS {
        let deferred = Deferred::<usize>::new();
        let r = ran.clone();
        let chain = deferred
            .promise()
            .then(move |v| {
                r.fetch_add(1, Ordering::Relaxed);
                v + 1
            })
            .unwrap()
            .then(|v| v * 2)
            .unwrap();
        chains.push((i, chain));
        producers.push(thread::spawn(move || deferred.resolve(i).unwrap()));
    }
    for producer in producers {
        producer.join().unwrap();
    }
    for (i, chain) in chains {
        let outcome = block_on(chain.into_future()).unwrap();
        assert_eq!(outcome.resolved(), Some((i + 1) * 2));
    }
    assert_eq!(ran.load(Ordering::Relaxed), ITERATIONS);
}

#[test]
fn chaining_races_settlement() {
    for i in 0..ITERATIONS {
        let deferred = Deferred::<usize>::new();
        let promise = deferred.promise();
        let barrier = Arc::new(Barrier::new(2));
        let b = barrier.clone();
        let producer = thread::spawn(move || {
            b.wait();
            deferred.resolve(i).unwrap();
        });
        barrier.wait();
        let chained = promise.then(|v| v + 1).unwrap();
        producer.join().unwrap();
        assert_eq!(block_on(chained.into_future()).unwrap().resolved(), Some(i + 1));
    }
}

#[test]
fn stale_handles_stay_stale_under_reuse() {
    let mut stale = Vec::new();
    for i in 0..ITERATIONS {
        let deferred = Deferred::<usize>::new();
        let promise = deferred.promise();
        stale.push((promise.clone(), deferred.clone()));
        deferred.resolve(i).unwrap();
        assert_eq!(block_on(promise.into_future()).unwrap().resolved(), Some(i));
    }
    for (promise, deferred) in stale {
        assert!(!promise.is_valid());
        assert!(!deferred.is_valid_and_pending());
        assert!(!deferred.try_resolve(0));
    }
}

#[test]
fn preserved_consumers_on_many_threads() {
    let deferred = Deferred::<usize>::new();
    let preserved = deferred.promise().preserve().unwrap();
    let consumers: Vec<_> = (0..8)
        .map(|offset| {
            let preserved = preserved.clone();
            thread::spawn(move || {
                let next = preserved.then(move |v| v + offset).unwrap();
                block_on(next.into_future()).unwrap()
            })
        })
        .collect();
    deferred.resolve(100).unwrap();
    let mut values: Vec<_> = consumers
        .into_iter()
        .map(|c| c.join().unwrap().resolved().unwrap())
        .collect();
    values.sort_unstable();
    assert_eq!(values, (100..108).collect::<Vec<_>>());
    preserved.forget().unwrap();
}

#[test]
fn race_across_threads_has_one_winner() {
    for _ in 0..ITERATIONS / 4 {
        let sources: Vec<_> = (0..4).map(|_| Deferred::<usize>::new()).collect();
        let raced = Promise::race(sources.iter().map(Deferred::promise)).unwrap();
        let barrier = Arc::new(Barrier::new(sources.len()));
        let threads: Vec<_> = sources
            .into_iter()
            .enumerate()
            .map(|(i, deferred)| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    deferred.resolve(i).unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let outcome = block_on(raced.into_future()).unwrap();
        assert_eq!(outcome.state(), State::Resolved);
        assert!(outcome.resolved().is_some_and(|v| v < 4));
    }
}

#[test]
fn long_chain_settles_iteratively() {
    const LINKS: usize = 50_000;
    let deferred = Deferred::<usize>::new();
    let mut chain = deferred.promise();
    for _ in 0..LINKS {
        chain = chain.then(|v| v + 1).unwrap();
    }
    deferred.report_progress(0.5).unwrap();
    deferred.resolve(0).unwrap();
    assert_eq!(block_on(chain.into_future()).unwrap().resolved(), Some(LINKS));
}
