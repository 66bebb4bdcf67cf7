use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use super::ConsoleCommand;
use crate::catalog::Catalog;
use crate::control::{ExitReason, Request, Requests};

/// Read commands line by line and forward them as requests until `q`, end
/// of input, or the shutdown latch.
pub async fn read_commands<R>(input: R, catalog: Arc<Catalog>, requests: Requests)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            _ = requests.shutdown().cancelled() => {
                debug!("console reader stopping");
                return;
            }
            line = lines.next_line() => line,
        };

        let command = match line {
            Ok(Some(line)) => ConsoleCommand::parse(&line, &catalog),
            Ok(None) => {
                debug!("console input closed");
                requests.exit(ExitReason::EndOfInput).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read console input");
                requests.exit(ExitReason::EndOfInput).await;
                return;
            }
        };

        let request = match command {
            ConsoleCommand::Blank => continue,
            ConsoleCommand::Quit => {
                requests.exit(ExitReason::Quit).await;
                return;
            }
            ConsoleCommand::Cycle => Request::Cycle,
            ConsoleCommand::Select(id) => Request::Select(id),
            ConsoleCommand::Status => Request::Status,
            ConsoleCommand::Restart => Request::Restart,
            ConsoleCommand::Help => Request::Help,
            ConsoleCommand::Unknown(input) => Request::Unknown(input),
        };
        if !requests.send(request).await {
            return;
        }
    }
}
