use crate::bridge::Bridge;
use crate::command::Command;
use crate::consensus::Consensus;
use crate::protocol::{Connection, Frame};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Per-connection request loop: read a frame, dispatch it, write the answer.
///
/// Malformed frames and unparseable commands end the session; every other
/// failure is reported to the client as an error frame.
pub(crate) struct Handler<C> {
    pub(crate) bridge: Arc<Bridge<C>>,
    pub(crate) connection: Connection,
    pub(crate) shutdown: broadcast::Receiver<()>,
}

impl<C> Handler<C>
where
    C: Consensus<Response = Frame>,
{
    pub(crate) async fn run(&mut self) -> Result<()> {
        loop {
            let res = tokio::select! {
                res = self.connection.read_frame() => res,
                _ = self.shutdown.recv() => return Ok(()),
            };
            let maybe_frame = match res {
                Ok(frame) => frame,
                Err(e @ Error::Protocol(_)) => {
                    let _ = self
                        .connection
                        .write_frame(&Frame::Error(e.to_string()))
                        .await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            let Some(frame) = maybe_frame else {
                return Ok(());
            };

            let command = match Command::from_frame(frame) {
                Ok(command) => command,
                Err(e) => {
                    let _ = self
                        .connection
                        .write_frame(&Frame::Error(e.to_string()))
                        .await;
                    return Err(e);
                }
            };
            debug!(command = command.name(), "dispatch");

            if let Some(response) = self.bridge.dispatch(command).await {
                self.connection.write_frame(&response).await?;
            }
        }
    }
}
