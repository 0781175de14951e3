use chrono::Local;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const GRAY: &str = "\x1b[90m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// 统一日志格式
/// 格式: [Time] [LEVEL] [Target] Message
pub struct ConsoleFormat;

fn level_style(level: &Level) -> (&'static str, &'static str) {
    match *level {
        Level::INFO => ("\x1b[32m", "INFO"),  // Green
        Level::WARN => ("\x1b[33m", "WARN"),  // Yellow
        Level::ERROR => ("\x1b[31m", "ERRO"), // Red
        Level::DEBUG => ("\x1b[34m", "DEBG"), // Blue
        Level::TRACE => (GRAY, "TRAC"),
    }
}

impl<S, N> FormatEvent<S, N> for ConsoleFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let now = Local::now().format("%H:%M:%S");
        let (color, level_str) = level_style(meta.level());

        write!(
            writer,
            "{}[{}] {}[{}] {} {}[{}]{} ",
            GRAY,
            now,
            color,
            level_str,
            RESET,
            CYAN,
            meta.target(),
            RESET
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// 安装全局日志订阅器，级别由 RUST_LOG 控制，默认 info
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // 重复安装时忽略
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(ConsoleFormat)
        .try_init();
}
