use tokio::task::JoinSet;
use tracing::{error, info};

/// Tracks the live connections of one server so they can be cut on shutdown.
///
/// Every connection runs as a task in the drainer's set. Tasks that end on their
/// own are collected by [`next_finished`](ConnectionDrainer::next_finished); [`close`](ConnectionDrainer::close) aborts the rest, which drops
/// their sockets.
#[derive(Debug, Default)]
pub struct ConnectionDrainer {
    connections: JoinSet<()>,
    listening: bool,
}

impl ConnectionDrainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `connection` and tracks it until it completes.
    pub fn track<F>(&mut self, connection: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.connections.spawn(connection);
    }

    /// Waits for the next connection to finish. Resolves to `None` at once when none are live.
    pub async fn next_finished(&mut self) -> Option<()> {
        if let Err(e) = self.connections.join_next().await?
            && e.is_panic()
        {
            error!(cause = %e, "connection task panicked");
        }
        Some(())
    }

    #[cfg(test)]
    fn live(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Records that the server is accepting, so [`close`](Self::close) also closes it.
    pub fn mark_listening(&mut self) {
        self.listening = true;
    }

    /// Aborts every live connection and waits until they are gone. Then, only if
    /// the server was listening, runs `server_close` and returns its result.
    pub async fn close<F, Fut, E>(&mut self, server_close: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        info!(live = self.connections.len(), "closing connections");
        self.connections.abort_all();
        while self.connections.join_next().await.is_some() {}

        if !self.listening {
            return Ok(());
        }
        self.listening = false;
        server_close().await
    }
}
