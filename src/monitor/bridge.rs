//! Marshals state changes from background tasks onto the render thread.
//!
//! Background tasks never touch render state directly. They post closures
//! through a [`UiSender`]; the render thread applies them in arrival order
//! with [`UiReceiver::drain`]. Each closure runs to completion with
//! exclusive access, so a reader on the render thread sees either the state
//! before a mutation or after it.

use tokio::sync::mpsc::{self, error::TryRecvError};

pub type Mutation<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

pub struct UiSender<S> {
    tx: mpsc::UnboundedSender<Mutation<S>>,
}

// Manual impl: the state type itself need not be Clone.
impl<S> Clone for UiSender<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct UiReceiver<S> {
    rx: mpsc::UnboundedReceiver<Mutation<S>>,
}

pub fn channel<S>() -> (UiSender<S>, UiReceiver<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UiSender { tx }, UiReceiver { rx })
}

impl<S> UiSender<S> {
    /// Queue `mutation` to run exactly once on the render thread.
    ///
    /// Returns `false` once the render side has gone away; the mutation is
    /// dropped in that case.
    pub fn post<F>(&self, mutation: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx.send(Box::new(mutation)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<S> UiReceiver<S> {
    /// Apply every mutation queued so far. Returns how many ran.
    pub fn drain(&mut self, state: &mut S) -> usize {
        let mut applied = 0;
        loop {
            match self.rx.try_recv() {
                Ok(mutation) => {
                    mutation(state);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Wait for the next mutation and apply it. Returns `false` when every
    /// sender is gone.
    #[cfg(test)]
    pub async fn apply_next(&mut self, state: &mut S) -> bool {
        match self.rx.recv().await {
            Some(mutation) => {
                mutation(state);
                true
            }
            None => false,
        }
    }

    /// Stop accepting new mutations; later `post` calls report `false`.
    #[cfg(test)]
    pub fn close(&mut self) {
        self.rx.close();
    }
}
