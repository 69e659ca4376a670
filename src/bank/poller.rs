use std::io;
use std::sync::Weak;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::Shared;
use crate::ioctl::Transport;

/// Start the background input poller for a bank.
///
/// Every `interval` the poller takes the bank's lock (waiting out any
/// hold) and reads all inputs. It stops once `cancel` fires or the bank
/// has been dropped. Read errors are not fatal: the next tick tries
/// again.
pub(super) fn spawn<T: Transport>(
    shared: Weak<Shared<T>>,
    interval: Duration,
    cancel: CancellationToken,
) -> io::Result<()> {
    thread::Builder::new()
        .name("gpio-bank-poll".into())
        .spawn(move || {
            loop {
                thread::sleep(interval);
                if cancel.is_cancelled() {
                    debug!("poller cancelled");
                    break;
                }
                let Some(shared) = shared.upgrade() else {
                    debug!("bank dropped, poller exiting");
                    break;
                };
                let mut st = shared.lock.lock();
                match shared.refresh(&mut st, None) {
                    Ok(changed) => trace!(changed, "polled inputs"),
                    Err(err) => trace!(%err, "input poll failed"),
                }
            }
        })?;
    Ok(())
}
