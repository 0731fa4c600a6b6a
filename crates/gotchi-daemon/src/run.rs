//! Operator loop for `gotchi run`
//!
//! One line per command on stdin. `status` opens the status device and prints
//! what it streams; any other non-empty line goes to the control file.

use anyhow::{Context, Result};
use gotchi_core::{GotchiService, LocalHost, ShutdownReport};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::config::DaemonConfig;

/// Why the operator loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Input closed
    EndOfInput,
    /// Ctrl-C
    Interrupted,
    /// `--for-secs` elapsed
    Deadline,
}

/// Start a service, serve stdin until told to stop, then shut down
pub async fn run(config: DaemonConfig, for_secs: Option<u64>) -> Result<()> {
    let host = Arc::new(match config.host_slots {
        Some(slots) => LocalHost::with_slots(slots),
        None => LocalHost::new(),
    });
    let service = GotchiService::start(config.service, host.clone())
        .await
        .context("Failed to start gotchi service")?;

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let deadline = for_secs.map(Duration::from_secs);
    let exit = serve(&service, &host, input, &mut std::io::stdout(), deadline).await?;
    tracing::info!(?exit, "Operator loop finished");

    let report = service.stop().await;
    print_report(&report, &mut std::io::stdout())?;
    Ok(())
}

/// Feed `input` lines to the service until end of input, Ctrl-C or
/// `deadline`
pub async fn serve<R, W>(
    service: &GotchiService,
    host: &LocalHost,
    input: R,
    out: &mut W,
    deadline: Option<Duration>,
) -> Result<Exit>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let deadline = async {
        match deadline {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return Ok(Exit::Deadline),
            _ = tokio::signal::ctrl_c() => return Ok(Exit::Interrupted),
            line = lines.next_line() => {
                match line.context("Failed to read operator input")? {
                    Some(line) => handle_line(service, host, line.trim(), out)?,
                    None => return Ok(Exit::EndOfInput),
                }
            }
        }
    }
}

fn handle_line<W: Write>(
    service: &GotchiService,
    host: &LocalHost,
    line: &str,
    out: &mut W,
) -> Result<()> {
    match line {
        "" => {}
        "status" => {
            let name = &service.config().device_name;
            let device = host
                .device(name)
                .with_context(|| format!("Status device {name} is not registered"))?;
            match device.open() {
                Ok(mut session) => {
                    let status = session.read(usize::MAX);
                    tracing::debug!(
                        device = session.device_name(),
                        bytes = status.len(),
                        "Status streamed to operator"
                    );
                    out.write_all(&status)?;
                    session.close();
                }
                Err(err) => writeln!(out, "{err}")?,
            }
        }
        command => {
            let name = &service.config().control_name;
            let control = host
                .control(name)
                .with_context(|| format!("Control file {name} is not registered"))?;
            match control.write(command.as_bytes()) {
                Ok(accepted) => writeln!(out, "accepted {accepted} bytes")?,
                Err(err) => writeln!(out, "{err}")?,
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn print_report<W: Write>(report: &ShutdownReport, out: &mut W) -> Result<()> {
    writeln!(
        out,
        "final {} after {} ticks ({} status reads, {} commands)",
        report.vitals, report.fired, report.opens, report.control_writes
    )?;
    Ok(())
}
