use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

const LOG_CAPACITY: usize = 500;

/// Fans formatted log lines out to subscribers (the TUI activity panel) and,
/// unless suppressed, to stderr.
#[derive(Clone)]
pub(crate) struct BroadcastMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stderr: bool,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            sender: self.sender.clone(),
            suppress_stderr: self.suppress_stderr,
        }
    }
}

pub(crate) struct BroadcastWriter {
    sender: broadcast::Sender<String>,
    suppress_stderr: bool,
}

impl std::io::Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).trim_end().to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        if !self.suppress_stderr {
            std::io::stderr().write_all(buf)?;
        }
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stderr {
            std::io::stderr().flush()?;
        }
        Ok(())
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
/// Returns the log channel for in-app display.
pub(crate) fn init(default_level: &str, suppress_stderr: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel::<String>(LOG_CAPACITY);
    let make_writer = BroadcastMakeWriter {
        sender: log_tx.clone(),
        suppress_stderr,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(!suppress_stderr)
        .with_target(false)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_tx
}
