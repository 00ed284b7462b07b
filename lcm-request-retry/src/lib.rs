// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Retry a fallible future under the control of a policy.
//!
//! A policy inspects the attempt counter and the error and decides whether
//! to retry immediately, wait first, or give up. Closures of the shape
//! `FnMut(u32, E) -> RetryAction<E>` are policies, so most callers can pass
//! a match expression inline.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, PartialEq)]
pub enum RetryAction<E> {
    RetryNow,
    WaitFor(Duration),
    ReturnError(E),
}

pub trait RetryPolicy<E> {
    fn on_err(&mut self, request_no: u32, err: E) -> RetryAction<E>;
}

impl<E, F> RetryPolicy<E> for F
where
    F: FnMut(u32, E) -> RetryAction<E>,
{
    fn on_err(&mut self, request_no: u32, err: E) -> RetryAction<E> {
        self(request_no, err)
    }
}

/// Drives `f` until it succeeds or the policy returns the error.
///
/// `f` is invoked with the zero-based attempt number so a policy and a
/// request builder can coordinate if needed.
pub async fn retry_future<F, Fut, T, E, P>(mut f: F, mut policy: P) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: RetryPolicy<E>,
{
    let mut request_no = 0;

    loop {
        match f(request_no).await {
            Ok(x) => return Ok(x),
            Err(e) => match policy.on_err(request_no, e) {
                RetryAction::RetryNow => {}
                RetryAction::WaitFor(d) => tokio::time::sleep(d).await,
                RetryAction::ReturnError(e) => return Err(e),
            },
        }

        request_no += 1;
    }
}
