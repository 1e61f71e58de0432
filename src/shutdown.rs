//! Shutdown signalling shared by the async tasks

use tokio::sync::watch;

/// Resolves once `shutdown` turns true or its sender is gone
///
/// The `watch::Ref` from `wait_for` is dropped before this returns, so a
/// `select!` branch using it never holds a read guard across another
/// branch's await.
pub async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolves_on_true_or_closed() {
        let (tx, mut rx) = watch::channel(false);
        let pending = tokio::time::timeout(Duration::from_millis(20), stopped(&mut rx)).await;
        assert!(pending.is_err());

        tx.send(true).unwrap();
        stopped(&mut rx).await;

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        stopped(&mut rx).await;
    }
}
