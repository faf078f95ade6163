// SPDX-License-Identifier: MIT OR Apache-2.0

/*!
some_promise is an allocation-conscious promise runtime.

A [`Promise`] is the eventual result of an asynchronous operation: it is resolved with a
value, rejected with a [`Rejection`], or canceled. A [`Deferred`] is the producer's right
to settle one. Promises chain ([`Promise::then`], [`Promise::catch`], ...), combine
([`Promise::race`], [`Promise::all`], [`merge2`], ...), report progress, and can be
`.await`ed from any executor.

Nothing here runs threads of its own. Callbacks run on whichever thread settles the
promise they wait on, unless a chaining call marshals them onto an
[`ExecutionContext`] with [`Promise::on`].

# Handles and pooling

Handles are cheap values: a reference to a pooled node plus the node generation they
were issued for. Nodes are returned to a per-type pool once their result has been
consumed, and every reuse bumps the generation, so a stale handle fails with
[`Error::InvalidHandle`] instead of reading someone else's result.

Pooling can be turned off with [`ConfigBuilder::object_pooling`], and is always off when
the `validation` feature is enabled.

# Example

```
use some_promise::Deferred;

let download = Deferred::<Vec<u8>>::new();
let length = download
    .promise()
    .progress(|p| println!("{:.0}%", p * 100.0))
    .unwrap()
    .then(|bytes| bytes.len())
    .unwrap();

download.report_progress(0.5).unwrap();
download.resolve(vec![1, 2, 3]).unwrap();

let outcome = futures::executor::block_on(length.into_future()).unwrap();
assert_eq!(outcome.resolved(), Some(3));
```
*/

mod cancel;
mod combinator;
mod config;
mod context;
mod deferred;
mod error;
mod last_resort;
mod node;
mod outcome;
mod pool;
mod promise;
pub mod trace;

pub use cancel::{CancelationRegistration, CancelationSource, CancelationToken};
pub use combinator::{merge2, merge3, merge4};
pub use config::{
    Config, ConfigBuilder, DEFAULT_POOL_CAPACITY, UncaughtRejectionHandler, config, set_config,
};
pub use context::{Dispatch, ExecutionContext, background_context};
pub use deferred::Deferred;
pub use error::Error;
pub use last_resort::LastResortContext;
pub use outcome::{CancelSignal, Outcome, Panicked, Reason, Rejection, State, cancel};
pub use pool::clear_object_pool;
pub use priority::Priority;
pub use promise::{Awaiter, Promise};
