use anyhow::Result;
use colored::*;
use std::io::{self, IsTerminal};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Filter directives for a verbosity level
pub fn filter_directives(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "trainctl=info,trainctl_cli=info,tower_http=warn,warn",
        1 => "trainctl=debug,trainctl_cli=debug,tower_http=info,info",
        2 => "trainctl=trace,trainctl_cli=trace,debug",
        _ => "trace",
    }
}

pub fn init_logging(verbosity: u8, quiet: bool, json_output: bool) -> Result<()> {
    // RUST_LOG wins unless the operator asked for quiet
    let env_filter = if quiet {
        EnvFilter::new(filter_directives(verbosity, quiet))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directives(verbosity, quiet)))
    };

    let is_terminal = io::stderr().is_terminal();

    if json_output {
        let json_layer = fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).try_init()?;
    } else if is_terminal && !quiet {
        let fmt_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_ansi(true)
            .with_span_events(FmtSpan::CLOSE)
            .event_format(ColoredFormatter)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_ansi(false)
            .without_time()
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).try_init()?;
    }

    Ok(())
}

/// Colored terminal output: time, level, message
struct ColoredFormatter;

impl<S, N> fmt::FormatEvent<S, N> for ColoredFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "{} ", now.format("%H:%M:%S").to_string().dimmed())?;

        let level = match *event.metadata().level() {
            Level::ERROR => "ERROR".red().bold(),
            Level::WARN => "WARN".yellow().bold(),
            Level::INFO => "INFO".green().bold(),
            Level::DEBUG => "DEBUG".blue().bold(),
            Level::TRACE => "TRACE".purple().bold(),
        };
        write!(writer, "{} ", level)?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Print a warning with a yellow icon
pub fn warning(message: &str) {
    if io::stderr().is_terminal() {
        eprintln!("{} {}", "⚠".yellow().bold(), message);
    } else {
        eprintln!("WARNING: {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_overrides_verbosity() {
        assert_eq!(filter_directives(3, true), "error");
        assert!(filter_directives(1, false).contains("trainctl=debug"));
    }
}
