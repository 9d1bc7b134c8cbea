// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reusable open/close lifecycle, composed into each transport.
//
// States: Unopened → Opening → Open → Closing → Closed. A failed open goes
// straight to Closed. Exactly one caller performs the actual open/teardown
// work; concurrent callers wait for the in-flight transition to settle.
// Operations against a closing or closed resource fail immediately instead
// of queueing behind the teardown.

use tokio::sync::watch;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unopened,
    Opening,
    Open,
    Closing,
    Closed,
}

#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Unopened);
        Self { tx }
    }

    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == LifecycleState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == LifecycleState::Closed
    }

    /// Fail unless the resource is open.
    pub fn ensure_open(&self) -> Result<(), Error> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// Claim the open transition.
    ///
    /// Returns `Ok(true)` when the caller must perform the open work and
    /// report back via [`finish_open`](Self::finish_open); `Ok(false)` when
    /// the resource is already open (possibly after waiting out a concurrent
    /// opener); `Err(Closed)` when it is closing, closed, or a concurrent
    /// open failed.
    pub async fn begin_open(&self) -> Result<bool, Error> {
        loop {
            let mut rx = self.tx.subscribe();
            let current = *rx.borrow_and_update();

            match current {
                LifecycleState::Open => return Ok(false),
                LifecycleState::Closing | LifecycleState::Closed => return Err(Error::Closed),
                LifecycleState::Opening => {
                    if rx.changed().await.is_err() {
                        return Err(Error::Closed);
                    }
                }
                LifecycleState::Unopened => {
                    let mut claimed = false;
                    self.tx.send_modify(|state| {
                        if *state == LifecycleState::Unopened {
                            *state = LifecycleState::Opening;
                            claimed = true;
                        }
                    });

                    if claimed {
                        return Ok(true);
                    }
                    // lost the claim race; re-evaluate
                }
            }
        }
    }

    /// Settle an open transition claimed via [`begin_open`](Self::begin_open).
    pub fn finish_open(&self, success: bool) {
        self.tx.send_replace(if success {
            LifecycleState::Open
        } else {
            LifecycleState::Closed
        });
    }

    /// Claim the close transition.
    ///
    /// Returns `true` when the caller must perform the teardown and report
    /// back via [`finish_close`](Self::finish_close); `false` when there is
    /// nothing to tear down (never opened, or another closer won).
    pub async fn begin_close(&self) -> bool {
        loop {
            let mut rx = self.tx.subscribe();
            let current = *rx.borrow_and_update();

            match current {
                LifecycleState::Closed => return false,
                LifecycleState::Unopened => {
                    let mut settled = false;
                    self.tx.send_modify(|state| {
                        if *state == LifecycleState::Unopened {
                            *state = LifecycleState::Closed;
                            settled = true;
                        }
                    });

                    if settled {
                        return false;
                    }
                }
                LifecycleState::Open => {
                    let mut claimed = false;
                    self.tx.send_modify(|state| {
                        if *state == LifecycleState::Open {
                            *state = LifecycleState::Closing;
                            claimed = true;
                        }
                    });

                    if claimed {
                        return true;
                    }
                }
                LifecycleState::Opening | LifecycleState::Closing => {
                    if rx.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Settle a close transition claimed via [`begin_close`](Self::begin_close).
    pub fn finish_close(&self) {
        self.tx.send_replace(LifecycleState::Closed);
    }
}
